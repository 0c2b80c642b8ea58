//! Encodes every picture as a standalone still image, e.g. motion JPEG.

use super::{EncodedFrame, EncoderState, Lifecycle, OutputBuffer, Result, VideoEncoder};
use crate::picture::{ColorSpace, ColorSpaces, Picture};

#[cfg(feature = "png")]
pub use ::image::codecs::png::CompressionType;

const HEADER_OVERHEAD: usize = 1024;

/// The still-image format an [`ImageEncoder`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    /// PNG with the given compression.
    #[cfg(feature = "png")]
    Png {
        /// Deflate effort.
        compression: CompressionType,
    },
    /// Baseline JPEG.
    #[cfg(feature = "jpeg")]
    Jpeg {
        /// Quality from 1 to 100.
        quality: u8,
    },
    /// Single-frame GIF.
    #[cfg(feature = "gif")]
    Gif {
        /// Quantization speed from 1 (best) to 30 (fastest).
        speed: i32,
    },
}

impl StillFormat {
    /// The file extension images of this format use.
    pub fn extension(&self) -> &'static str {
        match self {
            #[cfg(feature = "png")]
            Self::Png { .. } => "png",
            #[cfg(feature = "jpeg")]
            Self::Jpeg { .. } => "jpg",
            #[cfg(feature = "gif")]
            Self::Gif { .. } => "gif",
        }
    }

    fn color_spaces(&self) -> &'static [ColorSpace] {
        match self {
            #[cfg(feature = "png")]
            Self::Png { .. } => &[ColorSpace::Gray, ColorSpace::Rgb, ColorSpace::Rgba],
            #[cfg(feature = "jpeg")]
            Self::Jpeg { .. } => &[ColorSpace::Gray, ColorSpace::Rgb],
            #[cfg(feature = "gif")]
            Self::Gif { .. } => &[ColorSpace::Rgba],
        }
    }
}

/// An intra-only encoder: every picture becomes one still image and every frame
/// is a key frame.
///
/// The image is produced into a staging buffer owned by the encoder and copied into
/// the caller's buffer only once it is known to fit.
pub struct ImageEncoder {
    format: StillFormat,
    staging: Vec<u8>,
    lifecycle: Lifecycle,
    frame: u64,
}

impl ImageEncoder {
    /// Creates a new encoder producing `format`.
    pub fn new(format: StillFormat) -> Self {
        Self {
            format,
            staging: Vec::new(),
            lifecycle: Lifecycle::default(),
            frame: 0,
        }
    }

    /// Creates a PNG encoder with default compression.
    #[cfg(feature = "png")]
    pub fn png() -> Self {
        Self::new(StillFormat::Png {
            compression: CompressionType::Default,
        })
    }

    /// Creates a JPEG encoder with the given quality (clamped to 1..=100).
    #[cfg(feature = "jpeg")]
    pub fn jpeg(quality: u8) -> Self {
        Self::new(StillFormat::Jpeg {
            quality: quality.clamp(1, 100),
        })
    }

    /// Creates a GIF encoder with the given speed (clamped to 1..=30).
    /// See [`Frame::from_rgba_speed`](https://docs.rs/gif/latest/gif/struct.Frame.html#method.from_rgba_speed)
    /// for more information on the speed parameter.
    #[cfg(feature = "gif")]
    pub fn gif(speed: i32) -> Self {
        Self::new(StillFormat::Gif {
            speed: speed.clamp(1, 30),
        })
    }

    /// The format this encoder produces.
    pub fn format(&self) -> StillFormat {
        self.format
    }

    fn encode_still(&mut self, picture: &Picture) -> Result<()> {
        self.staging.clear();

        let (width, height) = (picture.width(), picture.height());

        match self.format {
            #[cfg(feature = "png")]
            StillFormat::Png { compression } => {
                use ::image::{
                    codecs::png::{FilterType, PngEncoder},
                    ImageEncoder as _,
                };

                PngEncoder::new_with_quality(&mut self.staging, compression, FilterType::Adaptive)
                    .write_image(picture.data(), width, height, color_type(picture))?;
            }
            #[cfg(feature = "jpeg")]
            StillFormat::Jpeg { quality } => {
                ::image::codecs::jpeg::JpegEncoder::new_with_quality(&mut self.staging, quality)
                    .encode(picture.data(), width, height, color_type(picture))?;
            }
            #[cfg(feature = "gif")]
            StillFormat::Gif { speed } => {
                use crate::error::Error;
                use ::image::{codecs::gif::GifEncoder, Frame, RgbaImage};

                let image = RgbaImage::from_raw(width, height, picture.data().to_vec())
                    .ok_or_else(|| Error::InvalidPicture("rgba data too short".to_string()))?;
                // The trailer is written when the gif encoder is dropped.
                let mut gif = GifEncoder::new_with_speed(&mut self.staging, speed);
                gif.encode_frame(Frame::new(image))?;
            }
        }

        Ok(())
    }
}

impl VideoEncoder for ImageEncoder {
    fn encode_frame<'a>(
        &mut self,
        picture: &Picture,
        buffer: &'a mut [u8],
    ) -> Result<Option<EncodedFrame<'a>>> {
        self.lifecycle.ensure_ready()?;
        self.supported_color_spaces().check(picture.color_space())?;

        self.encode_still(picture)?;

        let mut output = OutputBuffer::new(buffer);
        output.push(&self.staging, true)?;

        bevy::log::trace!(
            "encoded {} frame {} into {} bytes",
            self.format.extension(),
            self.frame,
            self.staging.len()
        );
        self.frame += 1;
        output.into_frame()
    }

    fn supported_color_spaces(&self) -> ColorSpaces {
        ColorSpaces::Only(self.format.color_spaces())
    }

    fn estimate_buffer_size(&self, picture: &Picture) -> usize {
        match self.format {
            // Stored deflate blocks plus one filter byte per row.
            #[cfg(feature = "png")]
            StillFormat::Png { .. } => {
                let raw = raw_size(picture);
                raw + raw / 64 + picture.height() as usize + HEADER_OVERHEAD
            }
            #[cfg(feature = "jpeg")]
            StillFormat::Jpeg { quality } => {
                raw_size(picture) * (quality as usize + 50) / 100 + HEADER_OVERHEAD
            }
            // 8-bit indices, LZW codes up to 12 bits, plus the palette.
            #[cfg(feature = "gif")]
            StillFormat::Gif { .. } => {
                picture.width() as usize * picture.height() as usize * 2 + 768 + HEADER_OVERHEAD
            }
        }
    }

    fn finish<'a>(&mut self, _buffer: &'a mut [u8]) -> Result<Vec<EncodedFrame<'a>>> {
        self.lifecycle.finish()?;
        self.staging = Vec::new();
        bevy::log::debug!(
            "{} encoder finished after {} frames",
            self.format.extension(),
            self.frame
        );
        Ok(Vec::new())
    }

    fn state(&self) -> EncoderState {
        self.lifecycle.state()
    }
}

#[cfg(any(feature = "png", feature = "jpeg"))]
fn color_type(picture: &Picture) -> ::image::ExtendedColorType {
    match picture.color_space() {
        ColorSpace::Gray => ::image::ExtendedColorType::L8,
        ColorSpace::Rgb => ::image::ExtendedColorType::Rgb8,
        _ => ::image::ExtendedColorType::Rgba8,
    }
}

#[cfg(any(feature = "png", feature = "jpeg"))]
fn raw_size(picture: &Picture) -> usize {
    picture
        .color_space()
        .frame_size(picture.width(), picture.height())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn gradient(width: u32, height: u32, color_space: ColorSpace) -> Picture {
        let size = color_space.frame_size(width, height);
        let data = (0..size).map(|i| (i % 251) as u8).collect();
        Picture::new(width, height, color_space, data).unwrap()
    }

    #[cfg(feature = "png")]
    #[test]
    fn png_frames_are_decodable_key_frames() {
        let picture = gradient(16, 8, ColorSpace::Rgba);
        let mut encoder = ImageEncoder::png();
        let mut buffer = vec![0; encoder.estimate_buffer_size(&picture)];

        let frame = encoder
            .encode_frame(&picture, &mut buffer)
            .unwrap()
            .unwrap();
        assert!(frame.is_key_frame());
        assert_eq!(frame.offset(), 0);

        let decoded = ::image::load_from_memory_with_format(frame.data(), ::image::ImageFormat::Png)
            .unwrap()
            .to_rgba8();
        assert_eq!(decoded.as_raw().as_slice(), picture.data());
    }

    #[cfg(feature = "png")]
    #[test]
    fn png_rejects_yuv() {
        let picture = Picture::filled(4, 4, ColorSpace::Yuv420p, 16).unwrap();
        let mut encoder = ImageEncoder::png();
        let mut buffer = vec![0; 4096];

        assert!(matches!(
            encoder.encode_frame(&picture, &mut buffer),
            Err(Error::UnsupportedColorSpace { .. })
        ));
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[cfg(feature = "png")]
    #[test]
    fn one_byte_buffer_is_untouched() {
        let picture = gradient(32, 32, ColorSpace::Rgb);
        let mut encoder = ImageEncoder::png();
        let mut buffer = [0x55u8; 1];

        let err = encoder.encode_frame(&picture, &mut buffer).unwrap_err();
        assert!(err.is_buffer_too_small());
        assert_eq!(buffer, [0x55]);

        // The encoder is still usable with a properly sized buffer.
        let mut buffer = vec![0; encoder.estimate_buffer_size(&picture)];
        assert!(encoder.encode_frame(&picture, &mut buffer).unwrap().is_some());
    }

    #[cfg(feature = "jpeg")]
    #[test]
    fn jpeg_estimate_tracks_quality() {
        let picture = gradient(64, 64, ColorSpace::Rgb);
        let low = ImageEncoder::jpeg(10);
        let high = ImageEncoder::jpeg(100);
        assert!(low.estimate_buffer_size(&picture) < high.estimate_buffer_size(&picture));

        let mut encoder = ImageEncoder::jpeg(80);
        let mut buffer = vec![0; encoder.estimate_buffer_size(&picture)];
        let frame = encoder
            .encode_frame(&picture, &mut buffer)
            .unwrap()
            .unwrap();
        assert!(frame.data().starts_with(&[0xFF, 0xD8]));
    }

    #[cfg(feature = "gif")]
    #[test]
    fn gif_frame_has_trailer() {
        let picture = gradient(8, 8, ColorSpace::Rgba);
        let mut encoder = ImageEncoder::gif(10);
        let mut buffer = vec![0; encoder.estimate_buffer_size(&picture)];
        let frame = encoder
            .encode_frame(&picture, &mut buffer)
            .unwrap()
            .unwrap();
        assert!(frame.data().starts_with(b"GIF89a"));
        assert_eq!(frame.data().last(), Some(&0x3B));
    }
}
