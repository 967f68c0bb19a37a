/*!
    FFmpeg-backed capture from any demuxable input.
*/

use std::collections::VecDeque;
use std::ffi::{CString, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ffmpeg_next::{
    Dictionary, Packet,
    codec::{self, decoder::Audio as AudioDecoderFFmpeg, decoder::Video as VideoDecoderFFmpeg},
    ffi,
    format::{self, Pixel, Sample},
    media,
    software::scaling,
    util::frame::{audio::Audio as AudioFrameFFmpeg, video::Video as VideoFrameFFmpeg},
};

use ffmpeg_types::{AudioFrame, Error, FourCc, Rational, Result, VideoFrame};

use crate::capture::{Capture, Captured};

/// Frame rate reported when neither the stream nor the decoder declares one.
const FALLBACK_FRAME_RATE: Rational = Rational { num: 30, den: 1 };

/// Pause between reads while a demuxer reports that no data is ready.
const RETRY_PAUSE: Duration = Duration::from_millis(5);

/**
    Capture source reading from an FFmpeg input.

    Opens the best video stream (required) and the best audio stream
    (optional) of any URL, file or device FFmpeg can demux. Decoded video
    is handed out tightly packed; pixel formats without a [`FourCc`]
    equivalent are converted to I420 first. Decoded audio is handed out as
    planar `f32`.

    The timeout passed to [`Capture::capture_next`] also interrupts reads
    blocked inside FFmpeg, so a source that goes silent yields
    [`Captured::Timeout`] instead of stalling the caller.
*/
pub struct InputCapture {
    // Dropped before `deadline`, which FFmpeg may still consult while closing
    input: format::context::Input,
    deadline: Box<ReadDeadline>,
    video: VideoInput,
    audio: Option<AudioInput>,
    pending: VecDeque<Captured>,
    eof: bool,
}

/**
    Deadline FFmpeg polls through the input's interrupt callback.
*/
#[derive(Debug)]
struct ReadDeadline {
    origin: Instant,
    /// Nanoseconds after `origin`, or `u64::MAX` when disarmed.
    expires: AtomicU64,
}

impl ReadDeadline {
    const DISARMED: u64 = u64::MAX;

    fn new() -> Self {
        Self {
            origin: Instant::now(),
            expires: AtomicU64::new(Self::DISARMED),
        }
    }

    fn arm(&self, deadline: Instant) {
        let nanos = deadline.saturating_duration_since(self.origin).as_nanos();
        let nanos = u64::try_from(nanos).unwrap_or(Self::DISARMED - 1);
        self.expires.store(nanos, Ordering::Release);
    }

    fn disarm(&self) {
        self.expires.store(Self::DISARMED, Ordering::Release);
    }

    fn expired(&self) -> bool {
        let expires = self.expires.load(Ordering::Acquire);
        expires != Self::DISARMED && self.origin.elapsed().as_nanos() >= expires as u128
    }
}

unsafe extern "C" fn interrupt_when_expired(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    // SAFETY: `opaque` points at the boxed deadline, which outlives the input.
    let deadline = unsafe { &*(opaque as *const ReadDeadline) };
    deadline.expired() as c_int
}

struct VideoInput {
    index: usize,
    decoder: VideoDecoderFFmpeg,
    decoded: VideoFrameFFmpeg,
    frame_rate: Rational,
    fallback: Option<FallbackScaler>,
}

struct AudioInput {
    index: usize,
    decoder: AudioDecoderFFmpeg,
    decoded: AudioFrameFFmpeg,
}

/**
    Converts decoder output without a FourCc equivalent to I420.
*/
struct FallbackScaler {
    key: (Pixel, u32, u32),
    context: scaling::Context,
    converted: VideoFrameFFmpeg,
}

impl FallbackScaler {
    fn new(key: (Pixel, u32, u32)) -> Result<Self> {
        let (format, width, height) = key;
        let context = scaling::Context::get(
            format,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| Error::codec(format!("could not create scaler: {e}")))?;

        Ok(Self {
            key,
            context,
            converted: VideoFrameFFmpeg::empty(),
        })
    }
}

// SAFETY: The scaling context is only ever used through `&mut self`, from
// whichever thread currently owns the capture.
unsafe impl Send for FallbackScaler {}

impl InputCapture {
    /**
        Open an input.

        `options` are passed to the demuxer and protocol as-is, for example
        `("rtsp_transport", "tcp")` or `("listen", "1")`. Opening, including
        reading stream info, gives up after `timeout`.
    */
    pub fn open(url: &str, options: &[(String, String)], timeout: Duration) -> Result<Self> {
        ffmpeg_next::init().map_err(|e| Error::codec(e.to_string()))?;
        format::network::init();

        let mut dictionary = Dictionary::new();
        for (key, value) in options {
            dictionary.set(key, value);
        }

        let deadline = Box::new(ReadDeadline::new());
        deadline.arm(Instant::now() + timeout);
        let input = open_input(url, dictionary, &deadline);
        deadline.disarm();
        let input = input?;

        let video = {
            let stream = input.streams().best(media::Type::Video).ok_or_else(|| {
                Error::unsupported_format(format!("input '{url}' has no video stream"))
            })?;

            let decoder = codec::context::Context::from_parameters(stream.parameters())
                .and_then(|ctx| ctx.decoder().video())
                .map_err(|e| Error::codec(format!("could not open video decoder: {e}")))?;

            let frame_rate = [stream.avg_frame_rate(), stream.rate()]
                .into_iter()
                .chain(decoder.frame_rate())
                .find_map(declared_rate)
                .unwrap_or(FALLBACK_FRAME_RATE);

            VideoInput {
                index: stream.index(),
                decoder,
                decoded: VideoFrameFFmpeg::empty(),
                frame_rate,
                fallback: None,
            }
        };

        let audio = match input.streams().best(media::Type::Audio) {
            Some(stream) => {
                let decoder = codec::context::Context::from_parameters(stream.parameters())
                    .and_then(|ctx| ctx.decoder().audio())
                    .map_err(|e| Error::codec(format!("could not open audio decoder: {e}")))?;

                Some(AudioInput {
                    index: stream.index(),
                    decoder,
                    decoded: AudioFrameFFmpeg::empty(),
                })
            }
            None => None,
        };

        Ok(Self {
            input,
            deadline,
            video,
            audio,
            pending: VecDeque::new(),
            eof: false,
        })
    }

    /**
        Returns the frame rate reported with every video frame.
    */
    pub fn frame_rate(&self) -> Rational {
        self.video.frame_rate
    }

    /**
        Returns true if the input has an audio stream.
    */
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /**
        Push every frame the decoders currently have ready onto the queue.
    */
    fn receive_frames(&mut self) -> Result<()> {
        loop {
            match self.video.decoder.receive_frame(&mut self.video.decoded) {
                Ok(()) => {
                    let frame = self.video.pack()?;
                    self.pending.push_back(Captured::Video(frame));
                }
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(e) => return Err(Error::codec(format!("could not decode video: {e}"))),
            }
        }

        if let Some(audio) = &mut self.audio {
            loop {
                match audio.decoder.receive_frame(&mut audio.decoded) {
                    Ok(()) => {
                        if let Some(frame) = pack_audio(&audio.decoded)? {
                            self.pending.push_back(Captured::Audio(frame));
                        }
                    }
                    Err(ffmpeg_next::Error::Other { errno })
                        if errno == ffmpeg_next::error::EAGAIN =>
                    {
                        break;
                    }
                    Err(ffmpeg_next::Error::Eof) => break,
                    Err(e) => return Err(Error::codec(format!("could not decode audio: {e}"))),
                }
            }
        }

        Ok(())
    }

    /**
        Signal end of input to the decoders and collect what they still hold.
    */
    fn finish(&mut self) -> Result<()> {
        self.eof = true;
        // Decoders that were never fed may refuse EOF; nothing is lost then
        let _ = self.video.decoder.send_eof();
        if let Some(audio) = &mut self.audio {
            let _ = audio.decoder.send_eof();
        }
        self.receive_frames()
    }

    /**
        Send a packet to the decoder of its stream, if it has one.
    */
    fn decode_packet(&mut self, packet: &Packet) -> Result<()> {
        let index = packet.stream();
        let sent = if index == self.video.index {
            self.video.decoder.send_packet(packet)
        } else if let Some(audio) = self.audio.as_mut().filter(|a| a.index == index) {
            audio.decoder.send_packet(packet)
        } else {
            return Ok(());
        };

        match sent {
            Ok(()) => self.receive_frames(),
            // Live inputs routinely start mid-GOP or lose packets
            Err(ffmpeg_next::Error::InvalidData) => Ok(()),
            Err(e) => Err(Error::codec(format!("could not send packet to decoder: {e}"))),
        }
    }
}

impl Capture for InputCapture {
    fn capture_next(&mut self, timeout: Duration) -> Result<Captured> {
        if let Some(captured) = self.pending.pop_front() {
            return Ok(captured);
        }
        if self.eof {
            return Err(Error::Eof);
        }

        let deadline = Instant::now() + timeout;
        self.deadline.arm(deadline);
        let captured = self.read_until(deadline);
        self.deadline.disarm();
        captured
    }
}

impl InputCapture {
    fn read_until(&mut self, deadline: Instant) -> Result<Captured> {
        let mut packet = Packet::empty();

        loop {
            if Instant::now() >= deadline {
                return Ok(Captured::Timeout);
            }

            match packet.read(&mut self.input) {
                Ok(()) => self.decode_packet(&packet)?,
                Err(ffmpeg_next::Error::Eof) => {
                    self.finish()?;
                    return self.pending.pop_front().ok_or(Error::Eof);
                }
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                    std::thread::sleep(RETRY_PAUSE);
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::error::ETIMEDOUT =>
                {
                    return Ok(Captured::Timeout);
                }
                // Interrupted by the deadline
                Err(ffmpeg_next::Error::Exit) => return Ok(Captured::Timeout),
                Err(e) => return Err(Error::container(format!("could not read input: {e}"))),
            }

            if let Some(captured) = self.pending.pop_front() {
                return Ok(captured);
            }
        }
    }
}

/**
    Open an input and read its stream info, with the deadline installed as
    the interrupt callback.
*/
fn open_input(
    url: &str,
    options: Dictionary,
    deadline: &ReadDeadline,
) -> Result<format::context::Input> {
    let c_url = CString::new(url).map_err(|_| Error::config(format!("invalid input '{url}'")))?;
    let open_error = |ret: c_int| {
        let e = ffmpeg_next::Error::from(ret);
        if matches!(e, ffmpeg_next::Error::Exit) {
            Error::container(format!("timed out opening input '{url}'"))
        } else {
            Error::container(format!("could not open input '{url}': {e}"))
        }
    };

    unsafe {
        let mut ctx = ffi::avformat_alloc_context();
        if ctx.is_null() {
            return Err(Error::container("could not allocate input context"));
        }
        (*ctx).interrupt_callback = ffi::AVIOInterruptCB {
            callback: Some(interrupt_when_expired),
            opaque: deadline as *const ReadDeadline as *mut c_void,
        };

        let mut options = options.disown();
        let ret =
            ffi::avformat_open_input(&mut ctx, c_url.as_ptr(), ptr::null_mut(), &mut options);
        // Frees whatever the demuxer did not consume
        drop(Dictionary::own(options));
        if ret < 0 {
            // The context is freed by avformat_open_input on failure
            return Err(open_error(ret));
        }

        let ret = ffi::avformat_find_stream_info(ctx, ptr::null_mut());
        if ret < 0 {
            ffi::avformat_close_input(&mut ctx);
            return Err(open_error(ret));
        }

        Ok(format::context::Input::wrap(ctx))
    }
}

impl VideoInput {
    /**
        Copy the decoded frame out into a tightly packed buffer.
    */
    fn pack(&mut self) -> Result<VideoFrame> {
        let width = self.decoded.width();
        let height = self.decoded.height();

        let (fourcc, source) = match fourcc_for_pixel(self.decoded.format()) {
            Some(fourcc) => (fourcc, &self.decoded),
            None => {
                let key = (self.decoded.format(), width, height);
                let scaler = match self.fallback.take() {
                    Some(scaler) if scaler.key == key => scaler,
                    _ => FallbackScaler::new(key)?,
                };
                let scaler = self.fallback.insert(scaler);
                scaler
                    .context
                    .run(&self.decoded, &mut scaler.converted)
                    .map_err(|e| Error::codec(format!("could not convert video frame: {e}")))?;
                (FourCc::I420, &scaler.converted)
            }
        };

        let data = copy_image(source)?;
        Ok(VideoFrame::new(data, width, height, fourcc, self.frame_rate))
    }
}

/**
    Returns the FourCc that describes a packed copy of this pixel format.
*/
fn fourcc_for_pixel(format: Pixel) -> Option<FourCc> {
    match format {
        Pixel::UYVY422 => Some(FourCc::Uyvy),
        Pixel::BGRA => Some(FourCc::Bgra),
        Pixel::BGRZ => Some(FourCc::Bgrx),
        Pixel::RGBA => Some(FourCc::Rgba),
        Pixel::RGBZ => Some(FourCc::Rgbx),
        Pixel::YUV420P => Some(FourCc::I420),
        Pixel::NV12 => Some(FourCc::Nv12),
        Pixel::P216LE => Some(FourCc::P216),
        _ => None,
    }
}

fn declared_rate(rate: ffmpeg_next::Rational) -> Option<Rational> {
    Rational::checked(rate.numerator(), rate.denominator()).filter(|r| r.is_positive())
}

/**
    Copy all planes of a video frame into one buffer with no row padding.
*/
fn copy_image(frame: &VideoFrameFFmpeg) -> Result<Vec<u8>> {
    let format: ffi::AVPixelFormat = frame.format().into();
    let width = frame.width() as i32;
    let height = frame.height() as i32;

    let size = unsafe { ffi::av_image_get_buffer_size(format, width, height, 1) };
    if size < 0 {
        return Err(Error::codec(format!(
            "could not size video frame: {}",
            ffmpeg_next::Error::from(size)
        )));
    }

    let mut data = vec![0u8; size as usize];
    let ret = unsafe {
        let raw = frame.as_ptr();
        ffi::av_image_copy_to_buffer(
            data.as_mut_ptr(),
            size,
            (*raw).data.as_ptr() as *const *const u8,
            (*raw).linesize.as_ptr(),
            format,
            width,
            height,
            1,
        )
    };
    if ret < 0 {
        return Err(Error::codec(format!(
            "could not copy video frame: {}",
            ffmpeg_next::Error::from(ret)
        )));
    }

    Ok(data)
}

/**
    Convert a decoded audio frame of any common sample format to planar f32.

    Returns `None` for frames that carry no samples.
*/
fn pack_audio(frame: &AudioFrameFFmpeg) -> Result<Option<AudioFrame>> {
    let samples = frame.samples();
    let channels = frame.channels();
    let sample_rate = frame.rate();
    let format = frame.format();

    if samples == 0 || channels == 0 {
        return Ok(None);
    }
    if channels as usize > ffi::AV_NUM_DATA_POINTERS as usize {
        return Err(Error::unsupported_format(format!(
            "audio frame has {channels} channels"
        )));
    }

    let bytes_per_sample = format.bytes();
    let channel_count = channels as usize;
    let mut data = Vec::with_capacity(samples * channel_count);

    if format.is_planar() {
        for ch in 0..channel_count {
            let plane = frame
                .data(ch)
                .get(..samples * bytes_per_sample)
                .ok_or_else(|| Error::invalid_data("audio plane shorter than sample count"))?;
            data.extend(samples_to_f32(plane, format)?);
        }
    } else {
        let packed = frame
            .data(0)
            .get(..samples * channel_count * bytes_per_sample)
            .ok_or_else(|| Error::invalid_data("audio buffer shorter than sample count"))?;
        let interleaved = samples_to_f32(packed, format)?;
        for ch in 0..channel_count {
            data.extend(interleaved.iter().skip(ch).step_by(channel_count));
        }
    }

    Ok(Some(AudioFrame::new(data, samples, sample_rate, channels)))
}

/**
    Convert raw samples of one plane (or one interleaved buffer) to f32.
*/
fn samples_to_f32(bytes: &[u8], format: Sample) -> Result<Vec<f32>> {
    let converted = match format {
        Sample::U8(_) => bytes.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        Sample::I16(_) => bytemuck::pod_collect_to_vec::<u8, i16>(bytes)
            .into_iter()
            .map(|s| s as f32 / 32_768.0)
            .collect(),
        Sample::I32(_) => bytemuck::pod_collect_to_vec::<u8, i32>(bytes)
            .into_iter()
            .map(|s| (s as f64 / 2_147_483_648.0) as f32)
            .collect(),
        Sample::F32(_) => bytemuck::pod_collect_to_vec::<u8, f32>(bytes),
        Sample::F64(_) => bytemuck::pod_collect_to_vec::<u8, f64>(bytes)
            .into_iter()
            .map(|s| s as f32)
            .collect(),
        other => {
            return Err(Error::unsupported_format(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    };
    Ok(converted)
}

impl std::fmt::Debug for InputCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputCapture")
            .field("video_stream", &self.video.index)
            .field("audio_stream", &self.audio.as_ref().map(|a| a.index))
            .field("frame_rate", &self.video.frame_rate)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::format::sample::Type;

    #[test]
    fn packed_pixel_formats_map_to_fourcc() {
        assert_eq!(fourcc_for_pixel(Pixel::UYVY422), Some(FourCc::Uyvy));
        assert_eq!(fourcc_for_pixel(Pixel::BGRA), Some(FourCc::Bgra));
        assert_eq!(fourcc_for_pixel(Pixel::YUV420P), Some(FourCc::I420));
        assert_eq!(fourcc_for_pixel(Pixel::NV12), Some(FourCc::Nv12));
    }

    #[test]
    fn other_pixel_formats_need_conversion() {
        assert_eq!(fourcc_for_pixel(Pixel::YUVJ420P), None);
        assert_eq!(fourcc_for_pixel(Pixel::YUV444P), None);
    }

    #[test]
    fn declared_rate_rejects_unset_rates() {
        assert_eq!(
            declared_rate(ffmpeg_next::Rational::new(30000, 1001)),
            Some(Rational::new(30000, 1001))
        );
        assert_eq!(declared_rate(ffmpeg_next::Rational::new(0, 1)), None);
        assert_eq!(declared_rate(ffmpeg_next::Rational::new(0, 0)), None);
    }

    #[test]
    fn integer_samples_are_scaled() {
        let bytes: Vec<u8> = [i16::MIN, 0, 16_384]
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        let converted = samples_to_f32(&bytes, Sample::I16(Type::Planar)).unwrap();
        assert_eq!(converted, vec![-1.0, 0.0, 0.5]);

        let converted = samples_to_f32(&[0, 128, 192], Sample::U8(Type::Packed)).unwrap();
        assert_eq!(converted, vec![-1.0, 0.0, 0.5]);
    }

    #[test]
    fn float_samples_pass_through() {
        let bytes: Vec<u8> = [0.25f32, -0.75].iter().flat_map(|s| s.to_ne_bytes()).collect();
        let converted = samples_to_f32(&bytes, Sample::F32(Type::Packed)).unwrap();
        assert_eq!(converted, vec![0.25, -0.75]);

        let bytes: Vec<u8> = [0.5f64].iter().flat_map(|s| s.to_ne_bytes()).collect();
        let converted = samples_to_f32(&bytes, Sample::F64(Type::Planar)).unwrap();
        assert_eq!(converted, vec![0.5]);
    }

    #[test]
    fn empty_audio_frames_are_skipped() {
        let frame = AudioFrameFFmpeg::empty();
        assert!(pack_audio(&frame).unwrap().is_none());
    }

    #[test]
    fn read_deadline_interrupts_once_passed() {
        let deadline = ReadDeadline::new();
        let opaque = &deadline as *const ReadDeadline as *mut c_void;
        assert!(!deadline.expired());
        assert_eq!(unsafe { interrupt_when_expired(opaque) }, 0);

        deadline.arm(Instant::now() + Duration::from_secs(60));
        assert!(!deadline.expired());

        deadline.arm(Instant::now());
        assert!(deadline.expired());
        assert_eq!(unsafe { interrupt_when_expired(opaque) }, 1);

        deadline.disarm();
        assert!(!deadline.expired());
        assert_eq!(unsafe { interrupt_when_expired(std::ptr::null_mut()) }, 0);
    }

    #[test]
    fn missing_input_fails_to_open() {
        let err = InputCapture::open("/nonexistent/relay-input.mkv", &[], Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, Error::Container { .. }));
    }

    #[test]
    fn silent_input_gives_up_after_timeout() {
        // Nothing sends to this port, so reading stream info blocks until interrupted
        let port = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("udp://127.0.0.1:{port}");

        let started = Instant::now();
        let err = InputCapture::open(&url, &[], Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, Error::Container { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
