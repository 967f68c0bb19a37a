/*!
    Output configuration types.
*/

use std::fmt;
use std::str::FromStr;

use ffmpeg_types::{Error, Rational};

/// Keyframe interval of every video encoder, in frames.
pub const GOP_SIZE: u32 = 12;

/// Sample rate chosen when the audio encoder offers it or states no preference.
pub const PREFERRED_SAMPLE_RATE: u32 = 48_000;

/// Block size reported for audio encoders that accept any frame size.
pub const DEFAULT_FRAME_SIZE: usize = 1024;

/**
    Kind of streaming destination.

    Each kind implies a container format and the options its header is
    written with.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// RTSP publishing, interleaved over TCP.
    #[default]
    Rtsp,
    /// RTMP publishing, FLV-muxed.
    Rtmp,
}

impl OutputFormat {
    /**
        Get the FFmpeg muxer name for this destination kind.
    */
    pub fn format_name(&self) -> &'static str {
        match self {
            Self::Rtsp => "rtsp",
            Self::Rtmp => "flv",
        }
    }

    /**
        Options the container header is written with.
    */
    pub fn header_options(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Rtsp => &[("rtsp_transport", "tcp")],
            Self::Rtmp => &[],
        }
    }

    /**
        Destination used when none is given.
    */
    pub fn default_destination(&self) -> &'static str {
        match self {
            Self::Rtsp => "rtsp://127.0.0.1:8554/live.sdp",
            Self::Rtmp => "rtmp://127.0.0.1:1935/live/stream",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rtsp => write!(f, "rtsp"),
            Self::Rtmp => write!(f, "rtmp"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rtsp" => Ok(Self::Rtsp),
            "rtmp" => Ok(Self::Rtmp),
            _ => Err(Error::config(format!(
                "output format '{s}' is not supported (expected rtsp or rtmp)"
            ))),
        }
    }
}

/**
    Configuration for the video encoder.

    The pixel format is always planar YUV 4:2:0 and the GOP size is
    [`GOP_SIZE`].
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoEncoderConfig {
    /// FFmpeg encoder name, e.g. `libx264` or `libvpx`.
    pub encoder: String,
    pub width: u32,
    pub height: u32,
    /// Declared frame rate of the source.
    pub frame_rate: Rational,
    /// Target bitrate in bits per second.
    pub bitrate: usize,
}

impl VideoEncoderConfig {
    /**
        Create a new video encoder configuration.
    */
    pub fn new(encoder: impl Into<String>, width: u32, height: u32, frame_rate: Rational, bitrate: usize) -> Self {
        Self {
            encoder: encoder.into(),
            width,
            height,
            frame_rate,
            bitrate,
        }
    }

    /**
        Encoder-specific options.

        Only `libx264` gets any: the `veryfast` preset.
    */
    pub fn encoder_options(&self) -> &'static [(&'static str, &'static str)] {
        match self.encoder.as_str() {
            "libx264" => &[("preset", "veryfast")],
            _ => &[],
        }
    }
}

/**
    Configuration for the audio encoder.

    Sample rate, layout and format are negotiated with the encoder.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioEncoderConfig {
    /// FFmpeg encoder name, e.g. `libopus` or `aac`.
    pub encoder: String,
    /// Target bitrate in bits per second.
    pub bitrate: usize,
}

impl AudioEncoderConfig {
    /**
        Create a new audio encoder configuration.
    */
    pub fn new(encoder: impl Into<String>, bitrate: usize) -> Self {
        Self {
            encoder: encoder.into(),
            bitrate,
        }
    }
}
