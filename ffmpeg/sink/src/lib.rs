/*!
    Encoding and streaming output for the ffmpeg relay crates.

    This crate handles the output side of the relay. An [`OutputSession`]
    owns one container, typically an RTSP or RTMP publishing destination,
    plus one video and one audio encoder feeding it.

    # Basic Usage

    ```ignore
    use ffmpeg_sink::{AudioEncoderConfig, OutputFormat, OutputSession, VideoEncoderConfig};

    let mut session = OutputSession::open(OutputFormat::Rtsp, "rtsp://127.0.0.1:8554/live.sdp")?;

    let video = session.configure_video(&VideoEncoderConfig::new(
        "libx264", 1920, 1080, frame_rate, 8_000_000,
    ))?;
    let audio = session.configure_audio(&AudioEncoderConfig::new("libopus", 320_000))?;
    session.write_header(&[])?;

    // Frames must match what the encoders reported
    session.submit_video_frame(&video_frame)?;
    session.submit_audio_frame(&audio_block)?;

    // Flush and write the trailer (also done on drop)
    session.close()?;
    ```

    # Destinations

    - **RTSP**: the `rtsp` muxer, interleaved over TCP
    - **RTMP**: the `flv` muxer over an RTMP URL

    Any other FFmpeg muxer can be used through [`OutputSession::open_as`],
    which is mostly useful for writing to a local file.

    # Audio Negotiation

    The audio encoder is configured from what it offers rather than from
    the source: 48 kHz, stereo and planar float when available, otherwise
    its first offer. The resulting [`AudioInfo`] tells the caller what
    every submitted block must look like, including its exact size.
*/

pub use ffmpeg_types::{Error, Rational, Result, TIME_BASE};

mod config;
mod session;

pub use config::{
    AudioEncoderConfig, DEFAULT_FRAME_SIZE, GOP_SIZE, OutputFormat, PREFERRED_SAMPLE_RATE,
    VideoEncoderConfig,
};
pub use session::{AudioInfo, OutputSession, VideoInfo};
