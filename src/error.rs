//! Errors of the encoding pipeline.

use crate::picture::{ColorSpace, ColorSpaces};

/// An error that occurred during encoding.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The output buffer cannot hold the encoded frame.
    ///
    /// Retry with a buffer of at least `required` bytes.
    #[error("output buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall {
        /// Bytes needed to complete the call.
        required: usize,
        /// Bytes the supplied buffer holds.
        available: usize,
    },

    /// The picture is not in one of the encoder's native color spaces.
    #[error("unsupported color space {found:?}, encoder accepts {supported}")]
    UnsupportedColorSpace {
        /// Color space of the rejected picture.
        found: ColorSpace,
        /// What the encoder accepts.
        supported: ColorSpaces,
    },

    /// The encoder was used after [`finish`](crate::encoder::VideoEncoder::finish).
    #[error("encoder already finished")]
    Finished,

    /// Picture data does not match its dimensions and color space.
    #[error("invalid picture: {0}")]
    InvalidPicture(String),

    /// An image codec failed.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// An I/O operation of a sink failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A codec or container backend failed.
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wraps a third-party codec or container error.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Backend(err.into())
    }

    /// Returns `true` if a retry with a larger buffer may succeed.
    pub fn is_buffer_too_small(&self) -> bool {
        matches!(self, Self::BufferTooSmall { .. })
    }
}

/// The result type for encoding operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = Error::BufferTooSmall {
            required: 10,
            available: 1,
        };
        assert!(err.is_buffer_too_small());
        assert_eq!(
            err.to_string(),
            "output buffer too small: 10 bytes required, 1 available"
        );

        let err = Error::UnsupportedColorSpace {
            found: ColorSpace::Rgb,
            supported: ColorSpaces::Only(&[ColorSpace::Yuv420p]),
        };
        assert!(!err.is_buffer_too_small());
        assert_eq!(
            err.to_string(),
            "unsupported color space Rgb, encoder accepts [Yuv420p]"
        );
    }

    #[test]
    fn backend_wraps_strings() {
        let err = Error::backend("codec exploded");
        assert_eq!(err.to_string(), "codec exploded");
    }
}
