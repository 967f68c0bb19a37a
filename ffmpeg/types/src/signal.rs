/*!
    Cooperative shutdown signalling.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/**
    Process-wide shutdown flag.

    The flag itself is a single atomic, so the signal path only has to call
    [`Shutdown::trigger`]. Threads that want to sleep until shutdown (or
    until a pause elapses) block on the condition variable instead of
    polling.

    Share it behind an `Arc`.
*/
#[derive(Debug, Default)]
pub struct Shutdown {
    triggered: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Shutdown {
    /**
        Create a new, untriggered shutdown flag.
    */
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Request shutdown and wake every waiter.

        Calling this more than once is harmless.
    */
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        // Taking the lock orders the store against a waiter that has checked
        // the flag but not yet parked.
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /**
        Returns true until shutdown has been requested.
    */
    pub fn is_alive(&self) -> bool {
        !self.triggered.load(Ordering::SeqCst)
    }

    /**
        Block until shutdown is requested.
    */
    pub fn wait(&self) {
        let mut guard = self.lock.lock();
        while self.is_alive() {
            self.cond.wait(&mut guard);
        }
    }

    /**
        Block until shutdown is requested or `timeout` elapses.

        Returns true if shutdown was requested.
    */
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while self.is_alive() {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        !self.is_alive()
    }
}

static_assertions::assert_impl_all!(Shutdown: Send, Sync);
