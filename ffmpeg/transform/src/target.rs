/*!
    Encoder-side frame parameters.
*/

use ffmpeg_next::format::{Pixel, Sample, sample::Type};

/**
    Geometry and pixel format an encoder expects.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoTarget {
    pub width: u32,
    pub height: u32,
    pub format: Pixel,
}

impl VideoTarget {
    /**
        Create a target with the given geometry and format.
    */
    pub fn new(width: u32, height: u32, format: Pixel) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /**
        Create a planar YUV 4:2:0 target, the format most encoders accept.
    */
    pub fn yuv420p(width: u32, height: u32) -> Self {
        Self::new(width, height, Pixel::YUV420P)
    }
}

/**
    Sample parameters and block size an audio encoder expects.

    Every converted block holds exactly `block_size` samples per channel.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioTarget {
    pub sample_rate: u32,
    pub channels: u16,
    /**
        Native channel mask, or zero to use the default layout for
        `channels`. A mask whose bit count differs from `channels` is
        ignored.
    */
    pub channel_mask: u64,
    pub format: Sample,
    pub block_size: usize,
}

impl AudioTarget {
    /**
        Create a target with the default layout for `channels`.
    */
    pub fn new(sample_rate: u32, channels: u16, format: Sample, block_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            channel_mask: 0,
            format,
            block_size,
        }
    }

    /**
        48 kHz stereo planar float, the usual choice for Opus and AAC.
    */
    pub fn stereo_f32(block_size: usize) -> Self {
        Self::new(48_000, 2, Sample::F32(Type::Planar), block_size)
    }

    /**
        Set the native channel mask.
    */
    pub fn with_channel_mask(mut self, mask: u64) -> Self {
        self.channel_mask = mask;
        self
    }

    /**
        Returns the channel mask to build the output layout from, if any.
    */
    pub(crate) fn usable_mask(&self) -> Option<u64> {
        (self.channel_mask != 0 && self.channel_mask.count_ones() == self.channels as u32)
            .then_some(self.channel_mask)
    }

    /**
        Number of data planes a frame in this format has.
    */
    pub(crate) fn planes(&self) -> usize {
        if self.format.is_planar() {
            self.channels as usize
        } else {
            1
        }
    }

    /**
        Bytes one sample occupies in one plane.
    */
    pub(crate) fn plane_stride(&self) -> usize {
        if self.format.is_planar() {
            self.format.bytes()
        } else {
            self.format.bytes() * self.channels as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_layout() {
        let target = AudioTarget::stereo_f32(960);
        assert_eq!(target.planes(), 2);
        assert_eq!(target.plane_stride(), 4);
    }

    #[test]
    fn packed_layout() {
        let target = AudioTarget::new(44_100, 2, Sample::I16(Type::Packed), 1024);
        assert_eq!(target.planes(), 1);
        assert_eq!(target.plane_stride(), 4);
    }

    #[test]
    fn mask_must_match_channel_count() {
        let stereo = AudioTarget::stereo_f32(960);
        assert_eq!(stereo.usable_mask(), None);
        assert_eq!(stereo.with_channel_mask(0b11).usable_mask(), Some(0b11));
        assert_eq!(stereo.with_channel_mask(0b111).usable_mask(), None);
    }
}
