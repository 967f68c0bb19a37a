/*!
    Error types for the ffmpeg relay crates.
*/

use std::fmt;

/**
    Error type for the ffmpeg relay crates.

    Every variant carries a human-readable message suitable for logging by
    the caller; the library crates never log on their own.
*/
#[derive(Debug)]
pub enum Error {
    /// I/O error outside of FFmpeg (file not found, socket error, etc.)
    Io(std::io::Error),
    /// Encoder, scaler or resampler failure
    Codec { message: String },
    /// Container open, header or packet write failure
    Container { message: String },
    /// Invalid configuration (unknown encoder, unusable destination, misuse)
    Config { message: String },
    /// Invalid data (malformed or truncated input)
    InvalidData { message: String },
    /// Unsupported format (valid but not handled)
    UnsupportedFormat { message: String },
    /// End of stream (the capture source has no more data)
    Eof,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Codec { message } => write!(f, "codec error: {message}"),
            Self::Container { message } => write!(f, "container error: {message}"),
            Self::Config { message } => write!(f, "configuration error: {message}"),
            Self::InvalidData { message } => write!(f, "invalid data: {message}"),
            Self::UnsupportedFormat { message } => write!(f, "unsupported format: {message}"),
            Self::Eof => write!(f, "end of stream"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl Error {
    /**
        Create a codec error with the given message.
    */
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /**
        Create a container error with the given message.
    */
    pub fn container(message: impl Into<String>) -> Self {
        Self::Container {
            message: message.into(),
        }
    }

    /**
        Create a configuration error with the given message.
    */
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /**
        Create an invalid data error with the given message.
    */
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /**
        Create an unsupported format error with the given message.
    */
    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: message.into(),
        }
    }

    /**
        Returns true if this is an EOF error.
    */
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    /**
        Returns true if this is a configuration error.
    */
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/**
    Result type alias for the ffmpeg relay crates.
*/
pub type Result<T> = std::result::Result<T, Error>;
