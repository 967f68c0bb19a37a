/*!
    Shared types for the ffmpeg relay crates.

    This crate defines the vocabulary that crosses crate boundaries in the
    relay: captured frames, source geometry, clocks and shutdown signalling.
    It has no dependency on FFmpeg, so capture implementations and tests can
    use it without pulling in FFmpeg bindings.

    # Core Types

    - [`Rational`] - Rational numbers for frame rates and time bases
    - [`Geometry`] - Width, height and declared frame rate of a video source
    - [`VideoFrame`] and [`AudioFrame`] - Raw frames as delivered by a capture source
    - [`FourCc`] - Source pixel format tags

    # Clock and Shutdown

    - [`Clock`] - Trait for monotonic microsecond clocks
    - [`WallClock`] - Process-wide monotonic clock
    - [`ManualClock`] - Manually driven clock for deterministic tests
    - [`Shutdown`] - Cooperative shutdown flag with blocking waits

    # Error Handling

    - [`Error`] and [`Result`] - Common error types
*/

mod clock;
mod error;
mod format;
mod frame;
mod rational;
mod signal;

pub use clock::{Clock, ManualClock, WallClock};
pub use error::{Error, Result};
pub use format::FourCc;
pub use frame::{AudioFrame, Geometry, VideoFrame};
pub use rational::Rational;
pub use signal::Shutdown;

/**
    Number of timestamp ticks per second used throughout the relay.

    Converted frames and both encoders use `1 / TIME_BASE` as their time base,
    so every timestamp is expressed in microseconds.
*/
pub const TIME_BASE: i64 = 1_000_000;
