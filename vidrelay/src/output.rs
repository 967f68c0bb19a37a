use ffmpeg_next::util::frame::{audio::Audio as AudioFrameFFmpeg, video::Video as VideoFrameFFmpeg};

use ffmpeg_sink::{AudioEncoderConfig, OutputFormat, OutputSession, VideoEncoderConfig};
use ffmpeg_transform::{AudioTarget, VideoTarget};
use ffmpeg_types::Result;

/// Where encoded frames go for one session attempt.
pub trait MediaOutput {
    fn close_codecs(&mut self);

    /// Open the video encoder and return the frame shape it accepts.
    fn configure_video(&mut self, config: &VideoEncoderConfig) -> Result<VideoTarget>;

    /// Open the audio encoder and return the block shape it accepts.
    fn configure_audio(&mut self, config: &AudioEncoderConfig) -> Result<AudioTarget>;

    fn write_header(&mut self) -> Result<()>;

    fn submit_video(&mut self, frame: &VideoFrameFFmpeg) -> Result<()>;

    fn submit_audio(&mut self, frame: &AudioFrameFFmpeg) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Opens a fresh output for every session attempt.
pub trait OutputFactory {
    type Output: MediaOutput;

    fn open(&mut self) -> Result<Self::Output>;
}

impl MediaOutput for OutputSession {
    fn close_codecs(&mut self) {
        OutputSession::close_codecs(self);
    }

    fn configure_video(&mut self, config: &VideoEncoderConfig) -> Result<VideoTarget> {
        let info = OutputSession::configure_video(self, config)?;
        Ok(VideoTarget::new(info.width, info.height, info.format))
    }

    fn configure_audio(&mut self, config: &AudioEncoderConfig) -> Result<AudioTarget> {
        let info = OutputSession::configure_audio(self, config)?;
        Ok(
            AudioTarget::new(info.sample_rate, info.channels, info.format, info.frame_size)
                .with_channel_mask(info.channel_mask),
        )
    }

    fn write_header(&mut self) -> Result<()> {
        OutputSession::write_header(self, &[])
    }

    fn submit_video(&mut self, frame: &VideoFrameFFmpeg) -> Result<()> {
        self.submit_video_frame(frame)
    }

    fn submit_audio(&mut self, frame: &AudioFrameFFmpeg) -> Result<()> {
        self.submit_audio_frame(frame)
    }

    fn close(&mut self) -> Result<()> {
        OutputSession::close(self)
    }
}

/// Opens [`OutputSession`]s against one destination.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    format: OutputFormat,
    destination: String,
}

impl SessionFactory {
    pub fn new(format: OutputFormat, destination: impl Into<String>) -> Self {
        Self {
            format,
            destination: destination.into(),
        }
    }
}

impl OutputFactory for SessionFactory {
    type Output = OutputSession;

    fn open(&mut self) -> Result<OutputSession> {
        OutputSession::open(self.format, &self.destination)
    }
}
