/*!
    Video scaling and pixel format conversion.
*/

use std::ptr;

use ffmpeg_next::{ffi, format::Pixel, software::scaling, util::frame::video::Video as VideoFrameFFmpeg};

use ffmpeg_types::{Error, FourCc, Result, VideoFrame};

use crate::target::VideoTarget;

/**
    Everything a scaling context is built for.

    Two conversions with equal keys can share one context.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaleKey {
    pub src_width: u32,
    pub src_height: u32,
    pub src_format: Pixel,
    pub dst_width: u32,
    pub dst_height: u32,
    pub dst_format: Pixel,
}

/**
    Source layout resolved from a FourCc tag.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SourceLayout {
    pub format: Pixel,
    /// YV12 stores V before U.
    pub swap_chroma: bool,
}

/**
    Resolve the FFmpeg pixel format a FourCc tag describes.

    Formats carrying a trailing alpha plane map to their colour-only
    equivalent; the alpha plane is not read.
*/
pub(crate) fn source_layout(fourcc: FourCc) -> Result<SourceLayout> {
    let format = match fourcc {
        FourCc::Uyvy | FourCc::Uyva => Pixel::UYVY422,
        FourCc::Bgra => Pixel::BGRA,
        FourCc::Bgrx => Pixel::BGRZ,
        FourCc::Rgba => Pixel::RGBA,
        FourCc::Rgbx => Pixel::RGBZ,
        FourCc::I420 | FourCc::Yv12 => Pixel::YUV420P,
        FourCc::Nv12 => Pixel::NV12,
        FourCc::P216 | FourCc::Pa16 => Pixel::P216LE,
        FourCc::Other(_) => {
            return Err(Error::unsupported_format(format!(
                "no pixel format for fourcc {fourcc}"
            )));
        }
    };
    Ok(SourceLayout {
        format,
        swap_chroma: fourcc == FourCc::Yv12,
    })
}

struct Scaler(scaling::Context);

// SAFETY: The context is only used through `&mut self` by the thread that
// owns the converter.
unsafe impl Send for Scaler {}

/**
    Single-entry scaling context cache.

    A lookup with the key of the cached context reuses it; any other key
    replaces it.
*/
#[derive(Default)]
pub(crate) struct ScalerCache {
    entry: Option<(ScaleKey, Scaler)>,
    rebuilds: u64,
}

impl ScalerCache {
    /**
        Returns a context for `key`, building one on a miss.
    */
    pub fn get(&mut self, key: ScaleKey) -> Result<&mut scaling::Context> {
        let scaler = match self.entry.take() {
            Some((cached, scaler)) if cached == key => scaler,
            _ => {
                let context = scaling::Context::get(
                    key.src_format,
                    key.src_width,
                    key.src_height,
                    key.dst_format,
                    key.dst_width,
                    key.dst_height,
                    scaling::Flags::BICUBIC,
                )
                .map_err(|e| Error::codec(format!("could not create scaler: {e}")))?;
                self.rebuilds += 1;
                Scaler(context)
            }
        };
        let (_, scaler) = self.entry.insert((key, scaler));
        Ok(&mut scaler.0)
    }

    pub fn key(&self) -> Option<ScaleKey> {
        self.entry.as_ref().map(|(key, _)| *key)
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

/**
    Scales captured frames into a reusable output frame.
*/
#[derive(Default)]
pub(crate) struct VideoConverter {
    scalers: ScalerCache,
    scratch: Option<VideoFrameFFmpeg>,
}

impl VideoConverter {
    pub fn scalers(&self) -> &ScalerCache {
        &self.scalers
    }

    /**
        Convert `source` into the scratch frame and return it.
    */
    pub fn convert(&mut self, target: &VideoTarget, source: &VideoFrame) -> Result<&mut VideoFrameFFmpeg> {
        if source.width == 0 || source.height == 0 {
            return Err(Error::invalid_data(format!(
                "video frame has no pixels ({}x{})",
                source.width, source.height
            )));
        }
        if target.width == 0 || target.height == 0 {
            return Err(Error::config(format!(
                "video target has no pixels ({}x{})",
                target.width, target.height
            )));
        }

        let layout = source_layout(source.format)?;
        let width = source.width as i32;
        let height = source.height as i32;
        let src_format: ffi::AVPixelFormat = layout.format.into();

        let required = unsafe { ffi::av_image_get_buffer_size(src_format, width, height, 1) };
        if required < 0 {
            return Err(Error::invalid_data(format!(
                "invalid video geometry {}x{}: {}",
                source.width,
                source.height,
                ffmpeg_next::Error::from(required)
            )));
        }
        if source.data.len() < required as usize {
            return Err(Error::invalid_data(format!(
                "{} frame {}x{} needs {} bytes, got {}",
                source.format,
                source.width,
                source.height,
                required,
                source.data.len()
            )));
        }

        let mut src_data: [*mut u8; 4] = [ptr::null_mut(); 4];
        let mut src_linesize: [i32; 4] = [0; 4];
        let ret = unsafe {
            ffi::av_image_fill_arrays(
                src_data.as_mut_ptr(),
                src_linesize.as_mut_ptr(),
                source.data.as_ptr(),
                src_format,
                width,
                height,
                1,
            )
        };
        if ret < 0 {
            return Err(Error::invalid_data(format!(
                "could not lay out video frame: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }
        if layout.swap_chroma {
            src_data.swap(1, 2);
            src_linesize.swap(1, 2);
        }

        let key = ScaleKey {
            src_width: source.width,
            src_height: source.height,
            src_format: layout.format,
            dst_width: target.width,
            dst_height: target.height,
            dst_format: target.format,
        };
        let scaler = self.scalers.get(key)?;
        let output = prepare_scratch(&mut self.scratch, target)?;

        let ret = unsafe {
            let out = output.as_mut_ptr();
            ffi::sws_scale(
                scaler.as_mut_ptr(),
                src_data.as_ptr() as *const *const u8,
                src_linesize.as_ptr(),
                0,
                height,
                (*out).data.as_ptr() as _,
                (*out).linesize.as_ptr(),
            )
        };
        if ret < 0 {
            return Err(Error::codec(format!(
                "could not scale video frame: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }

        Ok(output)
    }
}

/**
    Returns the scratch frame, reallocated if its shape no longer matches and
    otherwise made writable so an encoder still holding the previous
    contents never sees them change.
*/
fn prepare_scratch<'a>(
    scratch: &'a mut Option<VideoFrameFFmpeg>,
    target: &VideoTarget,
) -> Result<&'a mut VideoFrameFFmpeg> {
    let stale = scratch.as_ref().is_some_and(|frame| {
        frame.width() != target.width
            || frame.height() != target.height
            || frame.format() != target.format
    });
    if stale {
        *scratch = None;
    }
    let frame = scratch
        .get_or_insert_with(|| VideoFrameFFmpeg::new(target.format, target.width, target.height));

    let ret = unsafe { ffi::av_frame_make_writable(frame.as_mut_ptr()) };
    if ret < 0 {
        return Err(Error::codec(format!(
            "could not allocate video frame: {}",
            ffmpeg_next::Error::from(ret)
        )));
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_types::Rational;

    fn key(width: u32) -> ScaleKey {
        ScaleKey {
            src_width: width,
            src_height: 36,
            src_format: Pixel::BGRA,
            dst_width: 64,
            dst_height: 36,
            dst_format: Pixel::YUV420P,
        }
    }

    #[test]
    fn fourcc_mapping() {
        let cases = [
            (FourCc::Uyvy, Pixel::UYVY422),
            (FourCc::Uyva, Pixel::UYVY422),
            (FourCc::Bgra, Pixel::BGRA),
            (FourCc::Bgrx, Pixel::BGRZ),
            (FourCc::Rgba, Pixel::RGBA),
            (FourCc::Rgbx, Pixel::RGBZ),
            (FourCc::I420, Pixel::YUV420P),
            (FourCc::Yv12, Pixel::YUV420P),
            (FourCc::Nv12, Pixel::NV12),
            (FourCc::P216, Pixel::P216LE),
            (FourCc::Pa16, Pixel::P216LE),
        ];
        for (fourcc, pixel) in cases {
            assert_eq!(source_layout(fourcc).unwrap().format, pixel, "{fourcc}");
        }

        assert!(source_layout(FourCc::Yv12).unwrap().swap_chroma);
        assert!(!source_layout(FourCc::I420).unwrap().swap_chroma);
    }

    #[test]
    fn unknown_fourcc_is_unsupported() {
        let err = source_layout(FourCc::Other(0x3131_3131)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn cache_reuses_matching_key() {
        ffmpeg_next::init().unwrap();
        let mut cache = ScalerCache::default();

        cache.get(key(64)).unwrap();
        cache.get(key(64)).unwrap();
        assert_eq!(cache.rebuilds(), 1);
        assert_eq!(cache.key(), Some(key(64)));

        cache.get(key(128)).unwrap();
        assert_eq!(cache.rebuilds(), 2);
        assert_eq!(cache.key(), Some(key(128)));
    }

    #[test]
    fn short_buffer_is_rejected() {
        ffmpeg_next::init().unwrap();
        let mut converter = VideoConverter::default();
        let frame = VideoFrame::new(vec![0; 64 * 36 * 4 - 1], 64, 36, FourCc::Bgra, Rational::new(25, 1));

        let err = converter.convert(&VideoTarget::yuv420p(64, 36), &frame).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
        assert_eq!(converter.scalers().rebuilds(), 0);
    }

    #[test]
    fn converts_into_target_shape() {
        ffmpeg_next::init().unwrap();
        let mut converter = VideoConverter::default();
        let frame = VideoFrame::new(vec![0x80; 64 * 36 * 4], 64, 36, FourCc::Bgra, Rational::new(25, 1));

        let output = converter.convert(&VideoTarget::yuv420p(32, 18), &frame).unwrap();
        assert_eq!(output.width(), 32);
        assert_eq!(output.height(), 18);
        assert_eq!(output.format(), Pixel::YUV420P);
    }

    #[test]
    fn yv12_and_i420_differ_only_in_chroma_order() {
        ffmpeg_next::init().unwrap();
        let (w, h) = (16usize, 16usize);
        let luma = w * h;
        let chroma = luma / 4;

        // Y = 0x40, first chroma plane = 0x10, second = 0xf0
        let mut data = vec![0x40u8; luma];
        data.extend(std::iter::repeat_n(0x10, chroma));
        data.extend(std::iter::repeat_n(0xf0, chroma));

        let rate = Rational::new(25, 1);
        let target = VideoTarget::yuv420p(w as u32, h as u32);
        let mut converter = VideoConverter::default();

        let i420 = VideoFrame::new(data.clone(), w as u32, h as u32, FourCc::I420, rate);
        let out = converter.convert(&target, &i420).unwrap();
        let (u_i420, v_i420) = (out.data(1)[0], out.data(2)[0]);

        let yv12 = VideoFrame::new(data, w as u32, h as u32, FourCc::Yv12, rate);
        let out = converter.convert(&target, &yv12).unwrap();
        let (u_yv12, v_yv12) = (out.data(1)[0], out.data(2)[0]);

        assert!(u_i420 < 0x80 && v_i420 > 0x80);
        assert_eq!((u_yv12, v_yv12), (v_i420, u_i420));
    }
}
