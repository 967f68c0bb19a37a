/*!
    Output session: one container plus its video and audio encoders.
*/

use std::ffi::CString;
use std::ptr;
use std::slice;

use ffmpeg_next::{
    Dictionary, Packet, codec, encoder, ffi,
    format::{self, Pixel, Sample},
    util::frame::{audio::Audio as AudioFrameFFmpeg, video::Video as VideoFrameFFmpeg},
};

use ffmpeg_types::{Error, Rational, Result, TIME_BASE};

use crate::config::{
    AudioEncoderConfig, DEFAULT_FRAME_SIZE, GOP_SIZE, OutputFormat, PREFERRED_SAMPLE_RATE,
    VideoEncoderConfig,
};

// AV_CH_FRONT_LEFT | AV_CH_FRONT_RIGHT
const STEREO_MASK: u64 = 0b11;

/**
    What the opened video encoder accepts.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub format: Pixel,
    pub frame_rate: Rational,
}

/**
    What the opened audio encoder accepts.

    `frame_size` is the exact number of samples per channel every submitted
    frame must carry.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Native channel mask, or zero when the layout has no mask.
    pub channel_mask: u64,
    pub format: Sample,
    pub frame_size: usize,
}

struct VideoEncoder {
    encoder: encoder::video::Encoder,
    stream_index: usize,
    /// As set by the encoder once opened.
    time_base: ffmpeg_next::Rational,
    info: VideoInfo,
}

struct AudioEncoder {
    encoder: encoder::audio::Encoder,
    stream_index: usize,
    time_base: ffmpeg_next::Rational,
    info: AudioInfo,
}

/**
    A streaming destination with one video and one audio encoder.

    The lifecycle is:

    1. [`OutputSession::open`] the container
    2. [`configure_video`](OutputSession::configure_video) and
       [`configure_audio`](OutputSession::configure_audio)
    3. [`write_header`](OutputSession::write_header)
    4. submit frames until done or failed
    5. [`close`](OutputSession::close), also run on drop

    Each configured encoder owns a stream in the container. Configuring again
    after [`close_codecs`](OutputSession::close_codecs) reuses that stream.
*/
pub struct OutputSession {
    output: Option<format::context::Output>,
    destination: String,
    header_options: Vec<(String, String)>,
    video: Option<VideoEncoder>,
    audio: Option<AudioEncoder>,
    video_stream: Option<usize>,
    audio_stream: Option<usize>,
    header_written: bool,
    failed: bool,
}

impl OutputSession {
    /**
        Open a streaming destination of the given kind.

        No network traffic beyond what the protocol needs to open is
        generated until the header is written.
    */
    pub fn open(format: OutputFormat, destination: &str) -> Result<Self> {
        let mut session = Self::open_as(format.format_name(), destination)?;
        session.header_options = format
            .header_options()
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Ok(session)
    }

    /**
        Open a destination with any FFmpeg muxer, by name.

        The destination is only opened for writing when the muxer does its
        own I/O through a file or URL.
    */
    pub fn open_as(format_name: &str, destination: &str) -> Result<Self> {
        ffmpeg_next::init().map_err(|e| Error::container(format!("could not initialize FFmpeg: {e}")))?;
        format::network::init();

        let c_format = CString::new(format_name)
            .map_err(|_| Error::config(format!("invalid output format name '{format_name}'")))?;
        let c_destination = CString::new(destination)
            .map_err(|_| Error::config(format!("invalid destination '{destination}'")))?;

        let output = unsafe {
            let mut ctx: *mut ffi::AVFormatContext = ptr::null_mut();
            let ret = ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null_mut(),
                c_format.as_ptr(),
                c_destination.as_ptr(),
            );
            if ret < 0 || ctx.is_null() {
                return Err(Error::container(format!(
                    "could not create {format_name} output for {destination}: {}",
                    ffmpeg_next::Error::from(ret)
                )));
            }

            if (*(*ctx).oformat).flags & ffi::AVFMT_NOFILE as i32 == 0 {
                let ret = ffi::avio_open2(
                    &mut (*ctx).pb,
                    c_destination.as_ptr(),
                    ffi::AVIO_FLAG_WRITE as i32,
                    ptr::null_mut(),
                    ptr::null_mut(),
                );
                if ret < 0 {
                    ffi::avformat_free_context(ctx);
                    return Err(Error::container(format!(
                        "could not open {destination}: {}",
                        ffmpeg_next::Error::from(ret)
                    )));
                }
            }

            format::context::Output::wrap(ctx)
        };

        Ok(Self {
            output: Some(output),
            destination: destination.to_string(),
            header_options: Vec::new(),
            video: None,
            audio: None,
            video_stream: None,
            audio_stream: None,
            header_written: false,
            failed: false,
        })
    }

    /**
        Whether the container is still open.
    */
    pub fn is_open(&self) -> bool {
        self.output.is_some()
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn video_info(&self) -> Option<VideoInfo> {
        self.video.as_ref().map(|v| v.info)
    }

    pub fn audio_info(&self) -> Option<AudioInfo> {
        self.audio.as_ref().map(|a| a.info)
    }

    /**
        Release both encoders, keeping the container open.
    */
    pub fn close_codecs(&mut self) {
        self.video = None;
        self.audio = None;
    }

    /**
        Create and open the video encoder.

        The encoder takes planar YUV 4:2:0 at the configured size with
        timestamps in microseconds.
    */
    pub fn configure_video(&mut self, config: &VideoEncoderConfig) -> Result<VideoInfo> {
        if self.header_written {
            return Err(Error::config("cannot configure video after the header was written"));
        }
        self.video = None;
        if config.width == 0 || config.height == 0 {
            return Err(Error::config(format!(
                "video size {}x{} is empty",
                config.width, config.height
            )));
        }
        let Some(output) = self.output.as_mut() else {
            return Err(Error::config("output session is closed"));
        };

        let codec = encoder::find_by_name(&config.encoder)
            .filter(|codec| codec.is_video())
            .ok_or_else(|| Error::config(format!("unknown video encoder '{}'", config.encoder)))?;
        let global_header = output.format().flags().contains(format::Flags::GLOBAL_HEADER);

        let stream_index = match self.video_stream {
            Some(index) => index,
            None => {
                let index = output
                    .add_stream(codec)
                    .map_err(|e| Error::container(format!("could not add video stream: {e}")))?
                    .index();
                self.video_stream = Some(index);
                index
            }
        };

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| Error::codec(format!("could not create video encoder: {e}")))?;
        video.set_width(config.width);
        video.set_height(config.height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(ffmpeg_next::Rational::new(1, TIME_BASE as i32));
        if config.frame_rate.is_positive() {
            video.set_frame_rate(Some(ffmpeg_next::Rational::new(
                config.frame_rate.num,
                config.frame_rate.den,
            )));
        }
        video.set_bit_rate(config.bitrate);
        video.set_gop(GOP_SIZE);
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut options = Dictionary::new();
        for (key, value) in config.encoder_options() {
            options.set(key, value);
        }
        let encoder = video
            .open_with(options)
            .map_err(|e| Error::codec(format!("could not open video encoder {}: {e}", config.encoder)))?;

        output
            .stream_mut(stream_index)
            .ok_or_else(|| Error::container("video stream disappeared"))?
            .set_parameters(&encoder);

        let info = VideoInfo {
            width: config.width,
            height: config.height,
            format: Pixel::YUV420P,
            frame_rate: config.frame_rate,
        };
        let time_base = unsafe { (*encoder.as_ptr()).time_base }.into();
        self.video = Some(VideoEncoder {
            encoder,
            stream_index,
            time_base,
            info,
        });
        Ok(info)
    }

    /**
        Create and open the audio encoder.

        Sample rate, channel layout and sample format are negotiated with
        what the encoder offers: 48 kHz, stereo and planar float are
        preferred, otherwise the encoder's first offer is taken.
    */
    pub fn configure_audio(&mut self, config: &AudioEncoderConfig) -> Result<AudioInfo> {
        if self.header_written {
            return Err(Error::config("cannot configure audio after the header was written"));
        }
        self.audio = None;
        let Some(output) = self.output.as_mut() else {
            return Err(Error::config("output session is closed"));
        };

        let codec = encoder::find_by_name(&config.encoder)
            .filter(|codec| codec.is_audio())
            .ok_or_else(|| Error::config(format!("unknown audio encoder '{}'", config.encoder)))?;
        let global_header = output.format().flags().contains(format::Flags::GLOBAL_HEADER);

        let stream_index = match self.audio_stream {
            Some(index) => index,
            None => {
                let index = output
                    .add_stream(codec)
                    .map_err(|e| Error::container(format!("could not add audio stream: {e}")))?
                    .index();
                self.audio_stream = Some(index);
                index
            }
        };

        let mut audio = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| Error::codec(format!("could not create audio encoder: {e}")))?;
        audio.set_bit_rate(config.bitrate);
        audio.set_time_base(ffmpeg_next::Rational::new(1, TIME_BASE as i32));
        if global_header {
            audio.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        unsafe { negotiate_audio(audio.as_mut_ptr(), codec.as_ptr())? };

        let encoder = audio
            .open_with(Dictionary::new())
            .map_err(|e| Error::codec(format!("could not open audio encoder {}: {e}", config.encoder)))?;

        output
            .stream_mut(stream_index)
            .ok_or_else(|| Error::container("audio stream disappeared"))?
            .set_parameters(&encoder);

        let (channels, channel_mask) = unsafe {
            let layout = &(*encoder.as_ptr()).ch_layout;
            let mask = if layout.order == ffi::AVChannelOrder::AV_CHANNEL_ORDER_NATIVE {
                layout.u.mask
            } else {
                0
            };
            (layout.nb_channels.max(0) as u16, mask)
        };
        let frame_size = match encoder.frame_size() {
            0 => DEFAULT_FRAME_SIZE,
            n => n as usize,
        };
        let info = AudioInfo {
            sample_rate: encoder.rate(),
            channels,
            channel_mask,
            format: encoder.format(),
            frame_size,
        };
        let time_base = unsafe { (*encoder.as_ptr()).time_base }.into();
        self.audio = Some(AudioEncoder {
            encoder,
            stream_index,
            time_base,
            info,
        });
        Ok(info)
    }

    /**
        Write the container header.

        Both encoders must be configured. Extra `options` are passed to the
        muxer alongside the ones implied by the destination kind.
    */
    pub fn write_header(&mut self, options: &[(String, String)]) -> Result<()> {
        if self.header_written {
            return Err(Error::config("header was already written"));
        }
        if self.video.is_none() || self.audio.is_none() {
            return Err(Error::config(
                "both video and audio encoders must be configured before the header",
            ));
        }
        let Some(output) = self.output.as_mut() else {
            return Err(Error::config("output session is closed"));
        };

        let mut dictionary = Dictionary::new();
        for (key, value) in self.header_options.iter().chain(options) {
            dictionary.set(key, value);
        }

        unsafe {
            (*output.as_mut_ptr()).strict_std_compliance = ffi::FF_COMPLIANCE_EXPERIMENTAL as _;
        }
        match output.write_header_with(dictionary) {
            Ok(_) => {
                self.header_written = true;
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(Error::container(format!(
                    "could not write header to {}: {e}",
                    self.destination
                )))
            }
        }
    }

    /**
        Encode one video frame and write every packet it yields.

        The frame must match [`video_info`](OutputSession::video_info). Its
        `pts` is in microseconds.
    */
    pub fn submit_video_frame(&mut self, frame: &VideoFrameFFmpeg) -> Result<()> {
        let (output, video) = match (self.output.as_mut(), self.video.as_mut()) {
            (Some(output), Some(video)) if self.header_written => (output, video),
            _ => return Err(Error::config("video frame submitted before the header")),
        };
        let result = video
            .encoder
            .send_frame(frame)
            .map_err(|e| Error::codec(format!("could not encode video frame: {e}")))
            .and_then(|()| {
                write_packets(&mut video.encoder, video.time_base, output, video.stream_index)
            });
        self.mark(result)
    }

    /**
        Encode one audio frame and write every packet it yields.

        The frame must carry exactly [`AudioInfo::frame_size`] samples.
    */
    pub fn submit_audio_frame(&mut self, frame: &AudioFrameFFmpeg) -> Result<()> {
        let (output, audio) = match (self.output.as_mut(), self.audio.as_mut()) {
            (Some(output), Some(audio)) if self.header_written => (output, audio),
            _ => return Err(Error::config("audio frame submitted before the header")),
        };
        let result = audio
            .encoder
            .send_frame(frame)
            .map_err(|e| Error::codec(format!("could not encode audio frame: {e}")))
            .and_then(|()| {
                write_packets(&mut audio.encoder, audio.time_base, output, audio.stream_index)
            });
        self.mark(result)
    }

    /**
        Finish and release everything.

        When the header was written and nothing failed since, the encoders
        are flushed and the trailer is written. Closing twice is a no-op.
    */
    pub fn close(&mut self) -> Result<()> {
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };

        let result = if self.header_written && !self.failed {
            self.finish(&mut output)
        } else {
            Ok(())
        };

        self.close_codecs();
        self.header_written = false;
        drop(output);
        result
    }

    fn finish(&mut self, output: &mut format::context::Output) -> Result<()> {
        if let Some(video) = self.video.as_mut() {
            video
                .encoder
                .send_eof()
                .map_err(|e| Error::codec(format!("could not flush video encoder: {e}")))?;
            write_packets(&mut video.encoder, video.time_base, output, video.stream_index)?;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio
                .encoder
                .send_eof()
                .map_err(|e| Error::codec(format!("could not flush audio encoder: {e}")))?;
            write_packets(&mut audio.encoder, audio.time_base, output, audio.stream_index)?;
        }
        output
            .write_trailer()
            .map_err(|e| Error::container(format!("could not write trailer to {}: {e}", self.destination)))
    }

    fn mark(&mut self, result: Result<()>) -> Result<()> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

impl Drop for OutputSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for OutputSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSession")
            .field("destination", &self.destination)
            .field("open", &self.is_open())
            .field("video", &self.video_info())
            .field("audio", &self.audio_info())
            .field("header_written", &self.header_written)
            .field("failed", &self.failed)
            .finish()
    }
}

/**
    Drain every packet the encoder has ready into the container.
*/
fn write_packets(
    encoder: &mut encoder::Encoder,
    encoder_time_base: ffmpeg_next::Rational,
    output: &mut format::context::Output,
    stream_index: usize,
) -> Result<()> {
    let stream_time_base = output
        .stream(stream_index)
        .ok_or_else(|| Error::container(format!("stream {stream_index} does not exist")))?
        .time_base();

    let mut packet = Packet::empty();
    loop {
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                packet.set_stream(stream_index);
                packet.rescale_ts(encoder_time_base, stream_time_base);
                packet
                    .write_interleaved(output)
                    .map_err(|e| Error::container(format!("could not write packet: {e}")))?;
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                return Ok(());
            }
            Err(ffmpeg_next::Error::Eof) => return Ok(()),
            Err(e) => return Err(Error::codec(format!("could not receive packet: {e}"))),
        }
    }
}

/**
    Pick sample rate, channel layout and sample format for an audio encoder
    that has not been opened yet.
*/
unsafe fn negotiate_audio(ctx: *mut ffi::AVCodecContext, codec: *const ffi::AVCodec) -> Result<()> {
    unsafe {
        let rates = supported::<i32>(ctx, codec, ffi::AVCodecConfig::AV_CODEC_CONFIG_SAMPLE_RATE)?;
        (*ctx).sample_rate = pick_sample_rate(rates);

        let layouts = supported::<ffi::AVChannelLayout>(
            ctx,
            codec,
            ffi::AVCodecConfig::AV_CODEC_CONFIG_CHANNEL_LAYOUT,
        )?;
        let ret = match pick_layout(layouts) {
            Some(layout) => ffi::av_channel_layout_copy(&mut (*ctx).ch_layout, layout),
            None => {
                ffi::av_channel_layout_default(&mut (*ctx).ch_layout, 2);
                0
            }
        };
        if ret < 0 {
            return Err(Error::codec(format!(
                "could not set channel layout: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }

        let formats = supported::<ffi::AVSampleFormat>(
            ctx,
            codec,
            ffi::AVCodecConfig::AV_CODEC_CONFIG_SAMPLE_FORMAT,
        )?;
        (*ctx).sample_fmt = pick_sample_format(formats);
    }
    Ok(())
}

/**
    The values an encoder supports for one setting, or `None` when it
    accepts anything.
*/
unsafe fn supported<'a, T>(
    ctx: *const ffi::AVCodecContext,
    codec: *const ffi::AVCodec,
    config: ffi::AVCodecConfig,
) -> Result<Option<&'a [T]>> {
    let mut values: *const std::ffi::c_void = ptr::null();
    let mut count: i32 = 0;
    let ret = unsafe { ffi::avcodec_get_supported_config(ctx, codec, config, 0, &mut values, &mut count) };
    if ret < 0 {
        return Err(Error::codec(format!(
            "could not query encoder configuration: {}",
            ffmpeg_next::Error::from(ret)
        )));
    }
    if values.is_null() || count <= 0 {
        return Ok(None);
    }
    Ok(Some(unsafe { slice::from_raw_parts(values as *const T, count as usize) }))
}

fn pick_sample_rate(supported: Option<&[i32]>) -> i32 {
    let preferred = PREFERRED_SAMPLE_RATE as i32;
    match supported {
        Some(rates) if !rates.contains(&preferred) => rates.first().copied().unwrap_or(preferred),
        _ => preferred,
    }
}

fn is_stereo(layout: &ffi::AVChannelLayout) -> bool {
    layout.order == ffi::AVChannelOrder::AV_CHANNEL_ORDER_NATIVE
        && layout.nb_channels == 2
        && unsafe { layout.u.mask } == STEREO_MASK
}

fn pick_layout(supported: Option<&[ffi::AVChannelLayout]>) -> Option<&ffi::AVChannelLayout> {
    let layouts = supported?;
    layouts.iter().find(|l| is_stereo(l)).or_else(|| layouts.first())
}

fn pick_sample_format(supported: Option<&[ffi::AVSampleFormat]>) -> ffi::AVSampleFormat {
    let preferred = ffi::AVSampleFormat::AV_SAMPLE_FMT_FLTP;
    match supported {
        Some(formats) if !formats.contains(&preferred) => formats.first().copied().unwrap_or(preferred),
        _ => preferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ffmpeg_transform::{AudioTarget, FrameConverter, VideoTarget};
    use ffmpeg_types::{AudioFrame, FourCc, ManualClock, VideoFrame};

    fn video_config(encoder: &str) -> VideoEncoderConfig {
        VideoEncoderConfig::new(encoder, 64, 36, Rational::new(25, 1), 1_000_000)
    }

    fn nut_session(dir: &tempfile::TempDir) -> OutputSession {
        let path = dir.path().join("out.nut");
        OutputSession::open_as("nut", path.to_str().unwrap()).unwrap()
    }

    fn native_layout(mask: u64, channels: i32) -> ffi::AVChannelLayout {
        let mut layout: ffi::AVChannelLayout = unsafe { std::mem::zeroed() };
        layout.order = ffi::AVChannelOrder::AV_CHANNEL_ORDER_NATIVE;
        layout.nb_channels = channels;
        layout.u.mask = mask;
        layout
    }

    #[test]
    fn sample_rate_preference() {
        assert_eq!(pick_sample_rate(None), 48_000);
        assert_eq!(pick_sample_rate(Some(&[44_100, 48_000][..])), 48_000);
        assert_eq!(pick_sample_rate(Some(&[16_000, 8_000][..])), 16_000);
    }

    #[test]
    fn sample_format_preference() {
        use ffi::AVSampleFormat::*;
        assert_eq!(pick_sample_format(None), AV_SAMPLE_FMT_FLTP);
        assert_eq!(pick_sample_format(Some(&[AV_SAMPLE_FMT_S16, AV_SAMPLE_FMT_FLTP][..])), AV_SAMPLE_FMT_FLTP);
        assert_eq!(pick_sample_format(Some(&[AV_SAMPLE_FMT_S16][..])), AV_SAMPLE_FMT_S16);
    }

    #[test]
    fn layout_prefers_stereo() {
        let mono = native_layout(0b100, 1);
        let stereo = native_layout(STEREO_MASK, 2);

        let offered = [mono, stereo];
        assert!(is_stereo(pick_layout(Some(&offered[..])).unwrap()));

        let offered = [mono];
        assert_eq!(pick_layout(Some(&offered[..])).unwrap().nb_channels, 1);

        assert!(pick_layout(None).is_none());
    }

    #[test]
    fn unknown_encoders_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);

        let err = session.configure_video(&video_config("no-such-encoder")).unwrap_err();
        assert!(err.is_config());
        let err = session
            .configure_audio(&AudioEncoderConfig::new("no-such-encoder", 128_000))
            .unwrap_err();
        assert!(err.is_config());
        assert!(session.video_info().is_none());
        assert!(session.audio_info().is_none());
    }

    #[test]
    fn header_needs_both_encoders() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);

        assert!(session.write_header(&[]).unwrap_err().is_config());
        session.configure_video(&video_config("rawvideo")).unwrap();
        assert!(session.write_header(&[]).unwrap_err().is_config());
        assert!(!session.header_written());
    }

    #[test]
    fn submit_before_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);
        session.configure_video(&video_config("rawvideo")).unwrap();

        let frame = VideoFrameFFmpeg::new(Pixel::YUV420P, 64, 36);
        assert!(session.submit_video_frame(&frame).unwrap_err().is_config());
    }

    #[test]
    fn aac_negotiation() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);

        let info = session.configure_audio(&AudioEncoderConfig::new("aac", 128_000)).unwrap();
        assert_eq!(info.sample_rate, 48_000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.channel_mask, STEREO_MASK);
        assert_eq!(info.format, Sample::F32(ffmpeg_next::format::sample::Type::Planar));
        assert_eq!(info.frame_size, 1024);
    }

    #[test]
    fn variable_frame_size_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);

        let info = session
            .configure_audio(&AudioEncoderConfig::new("pcm_s16le", 1_536_000))
            .unwrap();
        assert_eq!(info.frame_size, DEFAULT_FRAME_SIZE);
        assert_eq!(info.format, Sample::I16(ffmpeg_next::format::sample::Type::Packed));
    }

    #[test]
    fn reconfigure_reuses_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);

        session.configure_video(&video_config("rawvideo")).unwrap();
        session.close_codecs();
        session.configure_video(&video_config("rawvideo")).unwrap();
        assert_eq!(session.output.as_ref().unwrap().nb_streams(), 1);
    }

    #[test]
    fn failed_reconfigure_detaches_previous_encoders() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);

        session.configure_video(&video_config("rawvideo")).unwrap();
        session.configure_audio(&AudioEncoderConfig::new("aac", 128_000)).unwrap();

        assert!(session.configure_video(&video_config("no-such-encoder")).is_err());
        assert!(session.video_info().is_none());
        assert!(session
            .configure_audio(&AudioEncoderConfig::new("no-such-encoder", 128_000))
            .is_err());
        assert!(session.audio_info().is_none());
        assert!(session.write_header(&[]).unwrap_err().is_config());
        assert_eq!(session.output.as_ref().unwrap().nb_streams(), 2);
    }

    #[test]
    fn stream_is_kept_when_encoder_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);

        // bmp has no planar YUV input, so opening fails after the stream exists
        let err = session.configure_video(&video_config("bmp")).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
        assert_eq!(session.output.as_ref().unwrap().nb_streams(), 1);

        session.configure_video(&video_config("rawvideo")).unwrap();
        assert_eq!(session.output.as_ref().unwrap().nb_streams(), 1);
    }

    #[test]
    fn packets_are_rescaled_from_the_encoder_time_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);

        session.configure_video(&video_config("rawvideo")).unwrap();
        session.configure_audio(&AudioEncoderConfig::new("aac", 128_000)).unwrap();

        let micros = ffmpeg_next::Rational::new(1, TIME_BASE as i32);
        assert_eq!(session.video.as_ref().unwrap().time_base, micros);
        assert_eq!(session.audio.as_ref().unwrap().time_base, micros);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = nut_session(&dir);

        session.close().unwrap();
        assert!(!session.is_open());
        session.close().unwrap();
        assert!(session.configure_video(&video_config("rawvideo")).unwrap_err().is_config());
    }

    #[test]
    fn streams_converted_frames_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.nut");
        let mut session = OutputSession::open_as("nut", path.to_str().unwrap()).unwrap();

        let video = session.configure_video(&video_config("rawvideo")).unwrap();
        let audio = session.configure_audio(&AudioEncoderConfig::new("aac", 128_000)).unwrap();
        session.write_header(&[]).unwrap();
        assert!(session.header_written());

        let clock = Arc::new(ManualClock::new(0));
        let mut converter = FrameConverter::new(clock.clone());
        let video_target = VideoTarget::new(video.width, video.height, video.format);
        let audio_target = AudioTarget::new(audio.sample_rate, audio.channels, audio.format, audio.frame_size)
            .with_channel_mask(audio.channel_mask);

        let captured = VideoFrame::new(vec![0x80; 64 * 36 * 4], 64, 36, FourCc::Bgra, Rational::new(25, 1));
        let sound = AudioFrame::silence(2048, 48_000, 2);
        for _ in 0..10 {
            clock.advance(40_000);
            let frame = converter.convert_video(&video_target, &captured).unwrap();
            session.submit_video_frame(frame).unwrap();

            if let Some(block) = converter.convert_audio(&audio_target, Some(&sound)).unwrap() {
                session.submit_audio_frame(block).unwrap();
            }
            while let Some(block) = converter.convert_audio(&audio_target, None).unwrap() {
                session.submit_audio_frame(block).unwrap();
            }
        }
        session.close().unwrap();

        let mut input = format::input(&path).unwrap();
        assert_eq!(input.nb_streams(), 2);
        let packets = input.packets().count();
        assert!(packets >= 10);
    }
}
