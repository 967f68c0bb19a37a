/*!
    Frame conversion for the ffmpeg relay crates.

    Capture sources deliver frames in whatever geometry, pixel layout and
    sample rate the sender chose. Encoders want one fixed geometry and pixel
    format, one sample format and rate, and audio in blocks of exactly the
    encoder's frame size. [`FrameConverter`] bridges the two:

    - **Video**: scaling and pixel format conversion from any supported
      [`FourCc`](ffmpeg_types::FourCc) layout, with nominal timestamps
      derived from the declared frame rate.
    - **Audio**: resampling, channel layout and sample format conversion,
      with samples carried across calls until a full block is available.

    # Usage

    ```ignore
    use std::sync::Arc;
    use ffmpeg_transform::{AudioTarget, FrameConverter, VideoTarget};
    use ffmpeg_types::WallClock;

    let mut converter = FrameConverter::new(Arc::new(WallClock::new()));
    let video_target = VideoTarget::yuv420p(1280, 720);
    let audio_target = AudioTarget::stereo_f32(960);

    // New session: restart timestamps
    converter.reset();

    let frame = converter.convert_video(&video_target, &captured_video)?;
    encoder.send_frame(frame)?;

    // Audio: one block per call, then drain
    if let Some(block) = converter.convert_audio(&audio_target, Some(&captured_audio))? {
        encoder.send_frame(block)?;
    }
    while let Some(block) = converter.convert_audio(&audio_target, None)? {
        encoder.send_frame(block)?;
    }
    ```

    # Lazy Initialization

    Scaling and resampling contexts are built on first use and cached by
    the parameters they were built for. A conversion with different
    parameters transparently rebuilds the context. Rebuilding the
    resampler drops any samples it was carrying.
*/

pub use ffmpeg_types::{AudioFrame, Error, Result, TIME_BASE, VideoFrame};

mod audio;
mod converter;
mod target;
mod video;

pub use converter::{FrameConverter, decode_timestamp};
pub use target::{AudioTarget, VideoTarget};
pub use video::ScaleKey;
