use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use ffmpeg_sink::{AudioEncoderConfig, VideoEncoderConfig};
use ffmpeg_source::{Capture, Captured};
use ffmpeg_transform::{AudioTarget, FrameConverter, VideoTarget};
use ffmpeg_types::{AudioFrame, Clock, Error, Geometry, Result, Shutdown, VideoFrame};

use crate::output::{MediaOutput, OutputFactory};

/// Encoder and timing settings for every session.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub video_encoder: String,
    pub audio_encoder: String,
    pub video_bitrate: usize,
    pub audio_bitrate: usize,
    /// Longest single wait for the capture source.
    pub capture_timeout: Duration,
    /// Pause before every reconnect attempt.
    pub restart_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// No output; the next step opens one.
    Idle,
    /// Output open, waiting for the first video frame.
    Detecting,
    /// Geometry known, encoders not yet open.
    Configuring(Geometry),
    /// Header written, relaying frames of this geometry.
    Streaming(Geometry),
    Shutdown,
}

/// Why the last session ended.
#[derive(Debug)]
pub enum SessionEnd {
    GeometryChanged { from: Geometry, to: Geometry },
    Failed(Error),
}

/**
    The session controller.

    Drives one output at a time through detection, configuration and
    streaming, tearing it down and starting over whenever anything fails,
    until shutdown is requested.
*/
pub struct Relay<C: Capture, F: OutputFactory> {
    capture: C,
    factory: F,
    config: RelayConfig,
    converter: FrameConverter,
    shutdown: Arc<Shutdown>,
    output: Option<F::Output>,
    targets: Option<(VideoTarget, AudioTarget)>,
    last_end: Option<SessionEnd>,
    attempts: u64,
    sessions: u64,
}

impl<C: Capture, F: OutputFactory> Relay<C, F> {
    pub fn new(
        capture: C,
        factory: F,
        config: RelayConfig,
        clock: Arc<dyn Clock>,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            capture,
            factory,
            config,
            converter: FrameConverter::new(clock),
            shutdown,
            output: None,
            targets: None,
            last_end: None,
            attempts: 0,
            sessions: 0,
        }
    }

    /// Number of sessions that reached streaming.
    pub fn sessions_started(&self) -> u64 {
        self.sessions
    }

    /// Number of attempts made after the first.
    pub fn restarts(&self) -> u64 {
        self.attempts.saturating_sub(1)
    }

    pub fn last_end(&self) -> Option<&SessionEnd> {
        self.last_end.as_ref()
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /**
        Run until shutdown is requested.

        The output is closed before returning.
    */
    pub fn run(&mut self) {
        let mut state = RelayState::Idle;
        while state != RelayState::Shutdown {
            let next = self.step(state);
            if next != state {
                debug!(from = ?state, to = ?next, "relay state changed");
            }
            state = next;
        }
        self.teardown();
        info!(
            sessions = self.sessions,
            restarts = self.restarts(),
            "relay stopped"
        );
    }

    /**
        Perform one transition.

        Detection and streaming consume at most one capture result per
        step, so shutdown is noticed between frames.
    */
    pub fn step(&mut self, state: RelayState) -> RelayState {
        if !self.shutdown.is_alive() {
            return RelayState::Shutdown;
        }
        match state {
            RelayState::Idle => self.idle(),
            RelayState::Detecting => self.detect(),
            RelayState::Configuring(geometry) => self.configure(geometry),
            RelayState::Streaming(geometry) => self.stream(geometry),
            RelayState::Shutdown => RelayState::Shutdown,
        }
    }

    fn idle(&mut self) -> RelayState {
        if self.attempts > 0 {
            self.teardown();
            if self.shutdown.wait_timeout(self.config.restart_delay) {
                return RelayState::Shutdown;
            }
            info!(attempt = self.attempts + 1, "reconnecting");
        }
        self.attempts += 1;

        match self.factory.open() {
            Ok(output) => {
                self.output = Some(output);
                RelayState::Detecting
            }
            Err(e) => {
                warn!(error = %e, "could not open output");
                self.last_end = Some(SessionEnd::Failed(e));
                RelayState::Idle
            }
        }
    }

    fn detect(&mut self) -> RelayState {
        match self.capture.capture_next(self.config.capture_timeout) {
            Ok(Captured::Video(frame)) => {
                let geometry = frame.geometry();
                info!(
                    width = geometry.width,
                    height = geometry.height,
                    frame_rate = %geometry.frame_rate,
                    "detected video"
                );
                RelayState::Configuring(geometry)
            }
            Ok(Captured::Audio(_) | Captured::Timeout) => RelayState::Detecting,
            Err(e) => self.fail(e),
        }
    }

    fn configure(&mut self, geometry: Geometry) -> RelayState {
        let Some(output) = self.output.as_mut() else {
            return RelayState::Idle;
        };

        let video = VideoEncoderConfig::new(
            self.config.video_encoder.clone(),
            geometry.width,
            geometry.height,
            geometry.frame_rate,
            self.config.video_bitrate,
        );
        let audio = AudioEncoderConfig::new(self.config.audio_encoder.clone(), self.config.audio_bitrate);

        match configure_output(output, &video, &audio) {
            Ok((video_target, audio_target)) => {
                info!(
                    video = %video.encoder,
                    audio = %audio.encoder,
                    sample_rate = audio_target.sample_rate,
                    block_size = audio_target.block_size,
                    "streaming"
                );
                self.converter.reset();
                self.targets = Some((video_target, audio_target));
                self.sessions += 1;
                RelayState::Streaming(geometry)
            }
            Err(e) => self.fail(e),
        }
    }

    fn stream(&mut self, geometry: Geometry) -> RelayState {
        let result = match self.capture.capture_next(self.config.capture_timeout) {
            Ok(Captured::Timeout) => Ok(()),
            Ok(Captured::Video(frame)) => {
                if !geometry.matches_size(frame.width, frame.height) {
                    let to = frame.geometry();
                    info!(
                        from = %format_args!("{}x{}", geometry.width, geometry.height),
                        to = %format_args!("{}x{}", to.width, to.height),
                        "video geometry changed, restarting"
                    );
                    self.last_end = Some(SessionEnd::GeometryChanged { from: geometry, to });
                    self.teardown();
                    return RelayState::Idle;
                }
                self.submit_video(&frame)
            }
            Ok(Captured::Audio(frame)) => self.submit_audio(&frame),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => RelayState::Streaming(geometry),
            Err(e) => self.fail(e),
        }
    }

    fn submit_video(&mut self, frame: &VideoFrame) -> Result<()> {
        let (Some(output), Some((target, _))) = (self.output.as_mut(), self.targets.as_ref()) else {
            return Err(Error::config("no active session"));
        };
        let converted = self.converter.convert_video(target, frame)?;
        output.submit_video(converted)
    }

    fn submit_audio(&mut self, frame: &AudioFrame) -> Result<()> {
        let (Some(output), Some((_, target))) = (self.output.as_mut(), self.targets.as_ref()) else {
            return Err(Error::config("no active session"));
        };
        if let Some(block) = self.converter.convert_audio(target, Some(frame))? {
            output.submit_audio(block)?;
        }
        // Drain so buffered audio can't grow when the source outpaces the encoder
        while let Some(block) = self.converter.convert_audio(target, None)? {
            output.submit_audio(block)?;
        }
        Ok(())
    }

    fn fail(&mut self, error: Error) -> RelayState {
        warn!(error = %error, "session failed");
        self.last_end = Some(SessionEnd::Failed(error));
        self.teardown();
        RelayState::Idle
    }

    fn teardown(&mut self) {
        self.targets = None;
        if let Some(mut output) = self.output.take() {
            output.close_codecs();
            if let Err(e) = output.close() {
                warn!(error = %e, "could not close output");
            }
        }
    }
}

fn configure_output<O: MediaOutput>(
    output: &mut O,
    video: &VideoEncoderConfig,
    audio: &AudioEncoderConfig,
) -> Result<(VideoTarget, AudioTarget)> {
    output.close_codecs();
    let video_target = output.configure_video(video)?;
    let audio_target = output.configure_audio(audio)?;
    output.write_header()?;
    Ok((video_target, audio_target))
}
