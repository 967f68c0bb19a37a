/*!
    The capture trait.
*/

use std::time::Duration;

use ffmpeg_types::{AudioFrame, Result, VideoFrame};

/**
    Result of one capture attempt.
*/
#[derive(Clone, Debug)]
pub enum Captured {
    /// A video frame arrived.
    Video(VideoFrame),
    /// An audio frame arrived.
    Audio(AudioFrame),
    /// Nothing arrived before the timeout.
    Timeout,
}

impl Captured {
    /**
        Returns true if this is a timeout.
    */
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/**
    A source of live frames.

    Frames are owned by the caller once returned and released when dropped.
*/
pub trait Capture: Send {
    /**
        Wait up to `timeout` for the next frame.

        A timeout is not an error. Errors are reserved for a source that
        failed or ended; [`Error::Eof`](ffmpeg_types::Error::Eof) means
        the source has no more data.
    */
    fn capture_next(&mut self, timeout: Duration) -> Result<Captured>;
}

impl<C: Capture + ?Sized> Capture for Box<C> {
    fn capture_next(&mut self, timeout: Duration) -> Result<Captured> {
        (**self).capture_next(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_types::{FourCc, Rational};

    struct Fixed(Vec<Captured>);

    impl Capture for Fixed {
        fn capture_next(&mut self, _timeout: Duration) -> Result<Captured> {
            Ok(self.0.pop().unwrap_or(Captured::Timeout))
        }
    }

    #[test]
    fn boxed_capture_forwards() {
        let frame = VideoFrame::new(vec![0; 16], 2, 2, FourCc::Bgra, Rational::new(25, 1));
        let mut capture: Box<dyn Capture> = Box::new(Fixed(vec![Captured::Video(frame)]));

        let first = capture.capture_next(Duration::ZERO).unwrap();
        assert!(matches!(first, Captured::Video(ref f) if f.width == 2));

        let second = capture.capture_next(Duration::ZERO).unwrap();
        assert!(second.is_timeout());
    }
}
