/*!
    Audio resampling into fixed-size encoder blocks.
*/

use std::ptr;

use ffmpeg_next::{ffi, format::Sample, util::frame::audio::Audio as AudioFrameFFmpeg};

use ffmpeg_types::{AudioFrame, Error, Result, TIME_BASE};

use crate::target::AudioTarget;

/**
    Everything a resampler is built for.

    The input side is only the channel count and rate a source declares;
    the input layout is always the default one for that count and the input
    format is always planar f32.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ResampleKey {
    in_channels: u16,
    in_rate: u32,
    out_channels: u16,
    out_mask: Option<u64>,
    out_rate: u32,
    out_format: Sample,
}

impl ResampleKey {
    fn new(source: &AudioFrame, target: &AudioTarget) -> Self {
        Self {
            in_channels: source.channels,
            in_rate: source.sample_rate,
            out_channels: target.channels,
            out_mask: target.usable_mask(),
            out_rate: target.sample_rate,
            out_format: target.format,
        }
    }

    fn output_matches(&self, target: &AudioTarget) -> bool {
        self.out_channels == target.channels
            && self.out_mask == target.usable_mask()
            && self.out_rate == target.sample_rate
            && self.out_format == target.format
    }
}

/**
    Owned `SwrContext`.
*/
struct SwrContext {
    ptr: *mut ffi::SwrContext,
}

impl SwrContext {
    fn new(key: &ResampleKey) -> Result<Self> {
        unsafe {
            let mut out_layout: ffi::AVChannelLayout = std::mem::zeroed();
            match key.out_mask {
                Some(mask) => {
                    let ret = ffi::av_channel_layout_from_mask(&mut out_layout, mask);
                    if ret < 0 {
                        return Err(Error::codec(format!(
                            "invalid output channel mask {mask:#x}: {}",
                            ffmpeg_next::Error::from(ret)
                        )));
                    }
                }
                None => ffi::av_channel_layout_default(&mut out_layout, key.out_channels as i32),
            }

            let mut in_layout: ffi::AVChannelLayout = std::mem::zeroed();
            ffi::av_channel_layout_default(&mut in_layout, key.in_channels as i32);

            let mut ctx: *mut ffi::SwrContext = ptr::null_mut();
            let ret = ffi::swr_alloc_set_opts2(
                &mut ctx,
                &out_layout,
                key.out_format.into(),
                key.out_rate as i32,
                &in_layout,
                ffi::AVSampleFormat::AV_SAMPLE_FMT_FLTP,
                key.in_rate as i32,
                0,
                ptr::null_mut(),
            );
            ffi::av_channel_layout_uninit(&mut out_layout);
            ffi::av_channel_layout_uninit(&mut in_layout);

            // Freed by Drop from here on, including on the error paths below
            let context = Self { ptr: ctx };
            if ret < 0 {
                return Err(Error::codec(format!(
                    "could not configure resampler: {}",
                    ffmpeg_next::Error::from(ret)
                )));
            }
            if context.ptr.is_null() {
                return Err(Error::codec("could not allocate resampler"));
            }

            let ret = ffi::swr_init(context.ptr);
            if ret < 0 {
                return Err(Error::codec(format!(
                    "could not initialize resampler: {}",
                    ffmpeg_next::Error::from(ret)
                )));
            }

            Ok(context)
        }
    }
}

impl Drop for SwrContext {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                ffi::swr_free(&mut self.ptr);
            }
        }
    }
}

// SAFETY: The context is owned exclusively and only used through `&mut self`.
unsafe impl Send for SwrContext {}

/**
    Samples the resampler produced that have not been cut into a block yet.

    Holds raw bytes in the encoder's sample format, one buffer per plane.
*/
#[derive(Debug, Default)]
struct CarryBuffer {
    planes: Vec<Vec<u8>>,
    stride: usize,
    samples: usize,
}

impl CarryBuffer {
    fn new(target: &AudioTarget) -> Self {
        Self {
            planes: vec![Vec::new(); target.planes()],
            stride: target.plane_stride(),
            samples: 0,
        }
    }

    /**
        Drop the first `count` samples of every plane.
    */
    fn consume(&mut self, count: usize) {
        let bytes = count * self.stride;
        for plane in &mut self.planes {
            plane.drain(..bytes);
        }
        self.samples -= count;
    }
}

/**
    A built resampler and the output it has not handed out yet.
*/
struct Resampler {
    key: ResampleKey,
    context: SwrContext,
    carry: CarryBuffer,
}

impl Resampler {
    fn new(key: ResampleKey, target: &AudioTarget) -> Result<Self> {
        Ok(Self {
            key,
            context: SwrContext::new(&key)?,
            carry: CarryBuffer::new(target),
        })
    }

    /**
        Run one source frame through the resampler, appending everything it
        produces to the carry buffer.
    */
    fn feed(&mut self, source: &AudioFrame) -> Result<()> {
        let in_count = source.samples as i32;
        let in_planes: Vec<*const u8> = (0..source.channels)
            .map(|ch| {
                source
                    .plane(ch)
                    .map(|plane| plane.as_ptr() as *const u8)
                    .ok_or_else(|| Error::invalid_data("audio frame shorter than its sample count"))
            })
            .collect::<Result<_>>()?;

        let capacity = unsafe { ffi::swr_get_out_samples(self.context.ptr, in_count) };
        if capacity < 0 {
            return Err(Error::codec(format!(
                "could not size resampler output: {}",
                ffmpeg_next::Error::from(capacity)
            )));
        }

        let stride = self.carry.stride;
        let offset = self.carry.samples * stride;
        let mut out_planes: Vec<*mut u8> = self
            .carry
            .planes
            .iter_mut()
            .map(|plane| {
                plane.resize(offset + capacity as usize * stride, 0);
                // SAFETY: `offset` is within the plane after the resize.
                unsafe { plane.as_mut_ptr().add(offset) }
            })
            .collect();

        let converted = unsafe {
            ffi::swr_convert(
                self.context.ptr,
                out_planes.as_mut_ptr() as _,
                capacity,
                in_planes.as_ptr() as _,
                in_count,
            )
        };

        let produced = converted.max(0) as usize;
        for plane in &mut self.carry.planes {
            plane.truncate(offset + produced * stride);
        }
        if converted < 0 {
            return Err(Error::codec(format!(
                "could not resample audio: {}",
                ffmpeg_next::Error::from(converted)
            )));
        }

        self.carry.samples += produced;
        Ok(())
    }
}

/**
    Output samples handed out since the converter was last cleared.

    Survives resampler rebuilds so block timestamps keep increasing when the
    source changes its channel count or rate mid-session.
*/
#[derive(Clone, Copy, Debug, Default)]
struct SampleClock {
    samples: i64,
    rate: u32,
}

impl SampleClock {
    /**
        Presentation time of the next block at `rate`, rescaling the count
        first if the output rate changed.
    */
    fn pts_at(&mut self, rate: u32) -> i64 {
        if self.rate != rate {
            if self.rate != 0 {
                self.samples = (self.samples as i128 * rate as i128 / self.rate as i128) as i64;
            }
            self.rate = rate;
        }
        self.samples * TIME_BASE / rate as i64
    }

    fn advance(&mut self, samples: usize) {
        self.samples += samples as i64;
    }
}

/**
    Resamples captured audio and cuts it into encoder-sized blocks.
*/
#[derive(Default)]
pub(crate) struct AudioConverter {
    resampler: Option<Resampler>,
    scratch: Option<AudioFrameFFmpeg>,
    clock: SampleClock,
    rebuilds: u64,
}

impl AudioConverter {
    /**
        Samples per channel waiting for the next block.
    */
    pub fn buffered_samples(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.carry.samples)
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /**
        Forget the resampler, every sample it carried and the sample clock.
    */
    pub fn clear(&mut self) {
        self.resampler = None;
        self.clock = SampleClock::default();
    }

    /**
        Feed `source` (if any) and return the next full block, with its
        presentation timestamp already set.
    */
    pub fn convert(
        &mut self,
        target: &AudioTarget,
        source: Option<&AudioFrame>,
    ) -> Result<Option<&mut AudioFrameFFmpeg>> {
        if target.block_size == 0 {
            return Err(Error::config("audio target block size is zero"));
        }
        if target.channels == 0 || target.sample_rate == 0 {
            return Err(Error::config(format!(
                "audio target needs channels and a rate ({} channels at {} Hz)",
                target.channels, target.sample_rate
            )));
        }
        if target.planes() > ffi::AV_NUM_DATA_POINTERS as usize {
            return Err(Error::unsupported_format(format!(
                "planar audio with {} channels",
                target.channels
            )));
        }

        if let Some(source) = source {
            if source.channels == 0 || source.sample_rate == 0 {
                return Err(Error::invalid_data(format!(
                    "audio frame declares {} channels at {} Hz",
                    source.channels, source.sample_rate
                )));
            }
            if source.data.len() < source.expected_data_len() {
                return Err(Error::invalid_data(format!(
                    "audio frame holds {} samples, needs {}",
                    source.data.len(),
                    source.expected_data_len()
                )));
            }

            let key = ResampleKey::new(source, target);
            let resampler = match self.resampler.take() {
                Some(resampler) if resampler.key == key => resampler,
                _ => {
                    self.rebuilds += 1;
                    Resampler::new(key, target)?
                }
            };
            let resampler = self.resampler.insert(resampler);
            if source.samples > 0 {
                resampler.feed(source)?;
            }
        }

        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(None);
        };
        // Carried samples are in the format the resampler was built for
        if !resampler.key.output_matches(target) || resampler.carry.samples < target.block_size {
            return Ok(None);
        }

        let frame = prepare_scratch(&mut self.scratch, target)?;
        let bytes = target.block_size * resampler.carry.stride;
        for (index, plane) in resampler.carry.planes.iter().enumerate() {
            frame.data_mut(index)[..bytes].copy_from_slice(&plane[..bytes]);
        }

        frame.set_pts(Some(self.clock.pts_at(target.sample_rate)));
        self.clock.advance(target.block_size);
        resampler.carry.consume(target.block_size);

        Ok(Some(frame))
    }
}

fn frame_matches(frame: &AudioFrameFFmpeg, target: &AudioTarget) -> bool {
    frame.samples() == target.block_size
        && frame.format() == target.format
        && frame.rate() == target.sample_rate
        && frame.channels() == target.channels
}

/**
    Returns the scratch frame, reallocated if its shape no longer matches and
    otherwise made writable.
*/
fn prepare_scratch<'a>(
    scratch: &'a mut Option<AudioFrameFFmpeg>,
    target: &AudioTarget,
) -> Result<&'a mut AudioFrameFFmpeg> {
    let frame = match scratch.take() {
        Some(frame) if frame_matches(&frame, target) => frame,
        _ => allocate_block(target)?,
    };
    let frame = scratch.insert(frame);

    let ret = unsafe { ffi::av_frame_make_writable(frame.as_mut_ptr()) };
    if ret < 0 {
        return Err(Error::codec(format!(
            "could not allocate audio frame: {}",
            ffmpeg_next::Error::from(ret)
        )));
    }
    Ok(frame)
}

fn allocate_block(target: &AudioTarget) -> Result<AudioFrameFFmpeg> {
    let mut frame = AudioFrameFFmpeg::empty();
    unsafe {
        let raw = frame.as_mut_ptr();
        (*raw).format = ffi::AVSampleFormat::from(target.format) as i32;
        (*raw).nb_samples = target.block_size as i32;
        (*raw).sample_rate = target.sample_rate as i32;
        match target.usable_mask() {
            Some(mask) => {
                let ret = ffi::av_channel_layout_from_mask(&mut (*raw).ch_layout, mask);
                if ret < 0 {
                    return Err(Error::codec(format!(
                        "invalid output channel mask {mask:#x}: {}",
                        ffmpeg_next::Error::from(ret)
                    )));
                }
            }
            None => ffi::av_channel_layout_default(&mut (*raw).ch_layout, target.channels as i32),
        }

        let ret = ffi::av_frame_get_buffer(raw, 0);
        if ret < 0 {
            return Err(Error::codec(format!(
                "could not allocate audio frame: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::format::sample::Type;

    fn tone(samples: usize, sample_rate: u32, channels: u16) -> AudioFrame {
        let data = (0..samples * channels as usize)
            .map(|i| ((i % 97) as f32 / 97.0) - 0.5)
            .collect();
        AudioFrame::new(data, samples, sample_rate, channels)
    }

    #[test]
    fn passthrough_keeps_sample_values() {
        ffmpeg_next::init().unwrap();
        let target = AudioTarget::new(48_000, 1, Sample::F32(Type::Planar), 4);
        let mut converter = AudioConverter::default();
        let source = AudioFrame::new(vec![0.1, 0.2, 0.3, 0.4], 4, 48_000, 1);

        let block = converter.convert(&target, Some(&source)).unwrap().unwrap();
        let values: Vec<f32> = block
            .data(0)
            .chunks_exact(4)
            .take(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(values, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn packed_output_interleaves_channels() {
        ffmpeg_next::init().unwrap();
        let target = AudioTarget::new(48_000, 2, Sample::I16(Type::Packed), 256);
        let mut converter = AudioConverter::default();

        let block = converter.convert(&target, Some(&tone(300, 48_000, 2))).unwrap().unwrap();
        assert_eq!(block.samples(), 256);
        assert!(block.data(0).len() >= 256 * 2 * 2);
        assert_eq!(converter.buffered_samples(), 44);
    }

    #[test]
    fn flush_without_resampler_is_empty() {
        let mut converter = AudioConverter::default();
        let block = converter.convert(&AudioTarget::stereo_f32(960), None).unwrap();
        assert!(block.is_none());
        assert_eq!(converter.buffered_samples(), 0);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let mut converter = AudioConverter::default();
        let err = converter.convert(&AudioTarget::stereo_f32(0), None).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn short_source_is_rejected() {
        ffmpeg_next::init().unwrap();
        let mut converter = AudioConverter::default();
        let source = AudioFrame::new(vec![0.0; 10], 10, 48_000, 2);
        let err = converter.convert(&AudioTarget::stereo_f32(960), Some(&source)).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
    }

    #[test]
    fn changed_target_does_not_drain_stale_samples() {
        ffmpeg_next::init().unwrap();
        let mut converter = AudioConverter::default();
        converter
            .convert(&AudioTarget::stereo_f32(960), Some(&tone(2000, 48_000, 2)))
            .unwrap();
        assert_eq!(converter.buffered_samples(), 2000 - 960);

        let other = AudioTarget::new(48_000, 2, Sample::I16(Type::Packed), 960);
        assert!(converter.convert(&other, None).unwrap().is_none());
    }

    #[test]
    fn clear_drops_carried_samples() {
        ffmpeg_next::init().unwrap();
        let target = AudioTarget::stereo_f32(960);
        let mut converter = AudioConverter::default();
        converter.convert(&target, Some(&tone(500, 48_000, 2))).unwrap();
        assert_eq!(converter.buffered_samples(), 500);

        converter.clear();
        assert_eq!(converter.buffered_samples(), 0);
        assert!(converter.convert(&target, None).unwrap().is_none());
    }

    #[test]
    fn sample_clock_rescales_on_rate_change() {
        let mut clock = SampleClock::default();
        assert_eq!(clock.pts_at(48_000), 0);
        clock.advance(960);
        assert_eq!(clock.pts_at(48_000), 20_000);

        assert_eq!(clock.pts_at(44_100), 20_000);
        clock.advance(441);
        assert_eq!(clock.pts_at(44_100), 30_000);
    }

    #[test]
    fn clear_restarts_block_timestamps() {
        ffmpeg_next::init().unwrap();
        let target = AudioTarget::stereo_f32(960);
        let mut converter = AudioConverter::default();
        converter.convert(&target, Some(&tone(960, 48_000, 2))).unwrap();
        let block = converter.convert(&target, Some(&tone(960, 48_000, 2))).unwrap().unwrap();
        assert_eq!(block.pts(), Some(20_000));

        converter.clear();
        let block = converter.convert(&target, Some(&tone(960, 48_000, 2))).unwrap().unwrap();
        assert_eq!(block.pts(), Some(0));
    }
}
