/*!
    Live frame capture for the ffmpeg relay crates.

    A capture source yields raw video and audio frames one at a time, each
    call bounded by a timeout. The relay only ever talks to the [`Capture`]
    trait, so anything that can produce [`VideoFrame`]s and [`AudioFrame`]s
    can feed it.

    [`InputCapture`] is the FFmpeg-backed implementation: it opens any URL
    or device FFmpeg can demux, decodes the best video and audio streams and
    hands out tightly packed frames.

    # Example

    ```ignore
    use std::time::Duration;
    use ffmpeg_source::{Capture, Captured, InputCapture};

    let mut capture = InputCapture::open(
        "srt://0.0.0.0:9000?mode=listener",
        &[],
        Duration::from_secs(30),
    )?;

    loop {
        match capture.capture_next(Duration::from_secs(2))? {
            Captured::Video(frame) => println!("video {}x{}", frame.width, frame.height),
            Captured::Audio(frame) => println!("audio {} samples", frame.samples),
            Captured::Timeout => continue,
        }
    }
    ```
*/

pub use ffmpeg_types::{AudioFrame, Error, FourCc, Result, VideoFrame};

mod capture;
mod input;

pub use capture::{Capture, Captured};
pub use input::InputCapture;
