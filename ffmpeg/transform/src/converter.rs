/*!
    The frame converter.
*/

use std::sync::Arc;

use ffmpeg_next::{
    ffi,
    util::frame::{Frame, audio::Audio as AudioFrameFFmpeg, video::Video as VideoFrameFFmpeg},
};

use ffmpeg_types::{AudioFrame, Clock, Error, Result, TIME_BASE, VideoFrame};

use crate::audio::AudioConverter;
use crate::target::{AudioTarget, VideoTarget};
use crate::video::{ScaleKey, VideoConverter};

/**
    Converts captured frames into frames an encoder accepts.

    One converter serves one streaming session at a time; call
    [`FrameConverter::reset`] when a new session starts.

    # Timestamps

    All timestamps are in `1 / TIME_BASE` units.

    - Video pts is nominal: frame index times the period of the declared
      frame rate. Arrival jitter and dropped source frames do not show up.
    - Audio pts follows the output sample clock, counted from the last
      reset and carried across resampler rebuilds.
    - Decode timestamps of both are the wall-clock time elapsed since the
      last reset.

    # Output frames

    Converted frames live in buffers owned by the converter and are
    overwritten by the next conversion of the same kind. The borrow checker
    enforces this: the returned reference must be dropped before the
    converter is used again.
*/
pub struct FrameConverter {
    clock: Arc<dyn Clock>,
    frame_index: i64,
    session_start: i64,
    video: VideoConverter,
    audio: AudioConverter,
}

impl FrameConverter {
    /**
        Create a converter reading time from `clock`.
    */
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let session_start = clock.now_micros();
        Self {
            clock,
            frame_index: 0,
            session_start,
            video: VideoConverter::default(),
            audio: AudioConverter::default(),
        }
    }

    /**
        Start a new session.

        Zeroes the frame index, restarts the decode timestamp clock and
        discards any audio carried over from the previous session.
    */
    pub fn reset(&mut self) {
        self.frame_index = 0;
        self.session_start = self.clock.now_micros();
        self.audio.clear();
    }

    /**
        Number of video frames converted since the last reset.
    */
    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    /**
        Clock reading taken at the last reset.
    */
    pub fn session_start(&self) -> i64 {
        self.session_start
    }

    /**
        Audio samples per channel buffered towards the next block.
    */
    pub fn buffered_samples(&self) -> usize {
        self.audio.buffered_samples()
    }

    /**
        Key of the cached scaling context, if one has been built.
    */
    pub fn scale_key(&self) -> Option<ScaleKey> {
        self.video.scalers().key()
    }

    /**
        Number of scaling contexts built so far.
    */
    pub fn scaler_rebuilds(&self) -> u64 {
        self.video.scalers().rebuilds()
    }

    /**
        Number of resamplers built so far.
    */
    pub fn resampler_rebuilds(&self) -> u64 {
        self.audio.rebuilds()
    }

    fn elapsed(&self) -> i64 {
        self.clock.now_micros() - self.session_start
    }

    /**
        Convert one captured video frame.

        The frame index advances on every call, including calls that fail.

        The period is truncated to whole `TIME_BASE` ticks so consecutive
        frames are spaced exactly alike. For rates that do not divide
        `TIME_BASE` evenly, video runs slightly fast against the audio
        sample clock: at 30000/1001 it gains two thirds of a microsecond per
        frame, under two seconds per day of continuous streaming.
    */
    pub fn convert_video(&mut self, target: &VideoTarget, source: &VideoFrame) -> Result<&VideoFrameFFmpeg> {
        let index = self.frame_index;
        self.frame_index += 1;

        let period = source.frame_rate.period_ticks(TIME_BASE).ok_or_else(|| {
            Error::invalid_data(format!("video frame declares frame rate {}", source.frame_rate))
        })?;
        let dts = self.elapsed();

        let frame = self.video.convert(target, source)?;
        frame.set_pts(Some(index * period));
        set_decode_timestamp(frame, dts);
        frame.set_kind(ffmpeg_next::picture::Type::None);

        Ok(&*frame)
    }

    /**
        Feed audio and return the next block, if one is complete.

        With `Some(frame)`, the frame is resampled into the carry buffer
        first; the resampler is rebuilt when the frame's channel count or
        rate differs from the previous frame's. With `None`, only buffered
        samples are considered.

        At most one block is returned per call. Call again with `None`
        until it returns `None` to drain everything buffered.
    */
    pub fn convert_audio(
        &mut self,
        target: &AudioTarget,
        source: Option<&AudioFrame>,
    ) -> Result<Option<&AudioFrameFFmpeg>> {
        let dts = self.elapsed();
        match self.audio.convert(target, source)? {
            Some(frame) => {
                set_decode_timestamp(frame, dts);
                Ok(Some(&*frame))
            }
            None => Ok(None),
        }
    }
}

fn set_decode_timestamp(frame: &mut Frame, dts: i64) {
    unsafe {
        (*frame.as_mut_ptr()).pkt_dts = dts;
    }
}

/**
    Returns the decode timestamp the converter stamped on a frame.
*/
pub fn decode_timestamp(frame: &Frame) -> Option<i64> {
    let dts = unsafe { (*frame.as_ptr()).pkt_dts };
    (dts != ffi::AV_NOPTS_VALUE).then_some(dts)
}

impl std::fmt::Debug for FrameConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameConverter")
            .field("frame_index", &self.frame_index)
            .field("session_start", &self.session_start)
            .field("buffered_samples", &self.buffered_samples())
            .field("scale_key", &self.scale_key())
            .finish_non_exhaustive()
    }
}
