/*!
    Raw frames as delivered by a capture source.
*/

use crate::{FourCc, Rational};

/**
    Width, height and declared frame rate of a video source.

    A streaming session is built for exactly one geometry; a frame with a
    different width or height ends the session.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
}

impl Geometry {
    /**
        Returns true if a frame of the given size fits this geometry.

        The frame rate is not compared; senders are free to re-declare it.
    */
    pub fn matches_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/**
    A captured video frame.

    The pixel data is tightly packed in the layout named by `format`:
    planes follow each other with no row padding.
*/
#[derive(Clone, Debug)]
pub struct VideoFrame {
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Layout of `data`.
    pub format: FourCc,
    /// Frame rate declared by the sender.
    pub frame_rate: Rational,
}

impl VideoFrame {
    /**
        Create a new video frame.
    */
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: FourCc, frame_rate: Rational) -> Self {
        Self {
            data,
            width,
            height,
            format,
            frame_rate,
        }
    }

    /**
        Returns the geometry this frame was captured at.
    */
    pub fn geometry(&self) -> Geometry {
        Geometry {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
        }
    }
}

/**
    A captured audio frame.

    Samples are 32-bit float and planar: all samples of channel 0, then all
    samples of channel 1, and so on.
*/
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /**
        Planar sample data, `samples * channels` values long.
    */
    pub data: Vec<f32>,
    /**
        Number of samples per channel.
    */
    pub samples: usize,
    /**
        Sample rate in Hz.
    */
    pub sample_rate: u32,
    /**
        Number of channels. No layout is implied beyond the count.
    */
    pub channels: u16,
}

impl AudioFrame {
    /**
        Create a new audio frame.
    */
    pub fn new(data: Vec<f32>, samples: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            data,
            samples,
            sample_rate,
            channels,
        }
    }

    /**
        Create a frame of digital silence.
    */
    pub fn silence(samples: usize, sample_rate: u32, channels: u16) -> Self {
        Self::new(vec![0.0; samples * channels as usize], samples, sample_rate, channels)
    }

    /**
        Returns the samples of one channel, or `None` if the channel does not
        exist or the data is too short to hold it.
    */
    pub fn plane(&self, channel: u16) -> Option<&[f32]> {
        if channel >= self.channels {
            return None;
        }
        let start = channel as usize * self.samples;
        self.data.get(start..start + self.samples)
    }

    /**
        Returns the expected data length in samples (per channel * channels).
    */
    pub fn expected_data_len(&self) -> usize {
        self.samples * self.channels as usize
    }
}

// Frames move from the capture thread into the relay
static_assertions::assert_impl_all!(VideoFrame: Send, Sync);
static_assertions::assert_impl_all!(AudioFrame: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    const NTSC: Rational = Rational {
        num: 30000,
        den: 1001,
    };

    #[test]
    fn video_frame_geometry() {
        let frame = VideoFrame::new(vec![0u8; 1280 * 720 * 4], 1280, 720, FourCc::Bgra, NTSC);

        let geometry = frame.geometry();
        assert_eq!(geometry.width, 1280);
        assert_eq!(geometry.height, 720);
        assert_eq!(geometry.frame_rate, NTSC);
    }

    #[test]
    fn geometry_size_match_ignores_rate() {
        let geometry = Geometry {
            width: 1280,
            height: 720,
            frame_rate: NTSC,
        };

        assert!(geometry.matches_size(1280, 720));
        assert!(!geometry.matches_size(1920, 1080));
        assert!(!geometry.matches_size(1280, 721));
    }

    #[test]
    fn audio_frame_planes() {
        let frame = AudioFrame::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 48000, 2);

        assert_eq!(frame.plane(0), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(frame.plane(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(frame.plane(2), None);
    }

    #[test]
    fn audio_frame_short_data_has_no_plane() {
        let frame = AudioFrame::new(vec![1.0, 2.0, 3.0, 4.0], 3, 48000, 2);
        assert!(frame.plane(0).is_some());
        assert_eq!(frame.plane(1), None);
    }

    #[test]
    fn audio_frame_expected_data_len() {
        let frame = AudioFrame::silence(1024, 44100, 2);
        assert_eq!(frame.expected_data_len(), 1024 * 2);
        assert_eq!(frame.data.len(), frame.expected_data_len());
    }
}
