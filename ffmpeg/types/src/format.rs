/*!
    Source pixel format tags.
*/

use std::fmt;

/**
    Builds a little-endian FourCC code from its four characters.
*/
const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/**
    Pixel format tag attached to captured video frames.

    These are the layouts live video senders commonly deliver. The frame
    converter maps each tag to an FFmpeg pixel format; a tag it cannot map
    is rejected as an unsupported input format.

    Buffers are expected to be tightly packed: each plane follows the
    previous one with no row padding.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FourCc {
    /// Packed YUV 4:2:2, 16bpp, U0 Y0 V0 Y1 order
    Uyvy,
    /// Packed UYVY followed by an 8-bit alpha plane
    Uyva,
    /// Semi-planar YUV 4:2:2, 16 bits per component
    P216,
    /// P216 followed by a 16-bit alpha plane
    Pa16,
    /// Planar YUV 4:2:0, Y then V then U
    Yv12,
    /// Planar YUV 4:2:0, Y then U then V
    I420,
    /// Semi-planar YUV 4:2:0, Y then interleaved UV
    Nv12,
    /// Packed BGRA, 32bpp
    Bgra,
    /// Packed BGR with an unused fourth byte, 32bpp
    Bgrx,
    /// Packed RGBA, 32bpp
    Rgba,
    /// Packed RGB with an unused fourth byte, 32bpp
    Rgbx,
    /// Any tag without a known meaning, kept verbatim
    Other(u32),
}

impl FourCc {
    const CODE_UYVY: u32 = fourcc(b"UYVY");
    const CODE_UYVA: u32 = fourcc(b"UYVA");
    const CODE_P216: u32 = fourcc(b"P216");
    const CODE_PA16: u32 = fourcc(b"PA16");
    const CODE_YV12: u32 = fourcc(b"YV12");
    const CODE_I420: u32 = fourcc(b"I420");
    const CODE_NV12: u32 = fourcc(b"NV12");
    const CODE_BGRA: u32 = fourcc(b"BGRA");
    const CODE_BGRX: u32 = fourcc(b"BGRX");
    const CODE_RGBA: u32 = fourcc(b"RGBA");
    const CODE_RGBX: u32 = fourcc(b"RGBX");

    /**
        Parse a little-endian FourCC code.
    */
    pub const fn from_code(code: u32) -> Self {
        match code {
            Self::CODE_UYVY => Self::Uyvy,
            Self::CODE_UYVA => Self::Uyva,
            Self::CODE_P216 => Self::P216,
            Self::CODE_PA16 => Self::Pa16,
            Self::CODE_YV12 => Self::Yv12,
            Self::CODE_I420 => Self::I420,
            Self::CODE_NV12 => Self::Nv12,
            Self::CODE_BGRA => Self::Bgra,
            Self::CODE_BGRX => Self::Bgrx,
            Self::CODE_RGBA => Self::Rgba,
            Self::CODE_RGBX => Self::Rgbx,
            other => Self::Other(other),
        }
    }

    /**
        Returns the little-endian FourCC code for this tag.
    */
    pub const fn code(self) -> u32 {
        match self {
            Self::Uyvy => Self::CODE_UYVY,
            Self::Uyva => Self::CODE_UYVA,
            Self::P216 => Self::CODE_P216,
            Self::Pa16 => Self::CODE_PA16,
            Self::Yv12 => Self::CODE_YV12,
            Self::I420 => Self::CODE_I420,
            Self::Nv12 => Self::CODE_NV12,
            Self::Bgra => Self::CODE_BGRA,
            Self::Bgrx => Self::CODE_BGRX,
            Self::Rgba => Self::CODE_RGBA,
            Self::Rgbx => Self::CODE_RGBX,
            Self::Other(code) => code,
        }
    }

    /**
        Returns true if the tag carries an alpha plane after the colour data.
    */
    pub const fn has_trailing_alpha(self) -> bool {
        matches!(self, Self::Uyva | Self::Pa16)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.code().to_le_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            for b in bytes {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08x}", self.code())
        }
    }
}
