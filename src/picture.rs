//! Pictures and the color spaces they are tagged with.

use crate::error::{Error, Result};
use bevy::{prelude::*, render::render_resource::TextureFormat};
use std::fmt;

/// The pixel layout of a [`Picture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// Planar YUV 4:2:0 (I420). Chroma planes are `ceil(w/2) x ceil(h/2)`.
    Yuv420p,
    /// Planar YUV 4:4:4.
    Yuv444p,
    /// Packed 8-bit RGB.
    Rgb,
    /// Packed 8-bit RGBA.
    Rgba,
    /// Packed 8-bit BGRA.
    Bgra,
    /// 8-bit luma.
    Gray,
}

impl ColorSpace {
    /// Every color space, in no particular order.
    pub const ALL: &'static [ColorSpace] = &[
        ColorSpace::Yuv420p,
        ColorSpace::Yuv444p,
        ColorSpace::Rgb,
        ColorSpace::Rgba,
        ColorSpace::Bgra,
        ColorSpace::Gray,
    ];

    /// Returns `true` for the YUV color spaces.
    pub fn is_yuv(self) -> bool {
        matches!(self, Self::Yuv420p | Self::Yuv444p)
    }

    /// Bytes per pixel of the packed color spaces, `None` for planar ones.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Self::Rgb => Some(3),
            Self::Rgba | Self::Bgra => Some(4),
            Self::Gray => Some(1),
            Self::Yuv420p | Self::Yuv444p => None,
        }
    }

    /// Dimensions of plane `index` for a frame of `width x height`.
    pub fn plane_dimensions(self, index: usize, width: u32, height: u32) -> Option<(u32, u32)> {
        match (self, index) {
            (Self::Yuv420p, 0) | (Self::Yuv444p, 0..=2) => Some((width, height)),
            (Self::Yuv420p, 1 | 2) => Some((width.div_ceil(2), height.div_ceil(2))),
            (Self::Rgb | Self::Rgba | Self::Bgra | Self::Gray, 0) => Some((width, height)),
            _ => None,
        }
    }

    /// Number of planes.
    pub fn plane_count(self) -> usize {
        if self.is_yuv() {
            3
        } else {
            1
        }
    }

    /// Size in bytes of a whole frame of `width x height`.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Yuv420p => {
                let chroma = width.div_ceil(2) as usize * height.div_ceil(2) as usize;
                pixels + 2 * chroma
            }
            Self::Yuv444p => pixels * 3,
            Self::Rgb => pixels * 3,
            Self::Rgba | Self::Bgra => pixels * 4,
            Self::Gray => pixels,
        }
    }

    /// The color space of a texture format, if it maps onto one.
    pub fn from_texture_format(format: TextureFormat) -> Option<Self> {
        match format {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => Some(Self::Rgba),
            TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => Some(Self::Bgra),
            TextureFormat::R8Unorm => Some(Self::Gray),
            _ => None,
        }
    }

    /// The texture format a camera can render into for this color space.
    ///
    /// Only packed RGBA, BGRA and gray have one; the others are reached through
    /// conversion.
    pub fn texture_format(self) -> Option<TextureFormat> {
        match self {
            Self::Rgba => Some(TextureFormat::Rgba8UnormSrgb),
            Self::Bgra => Some(TextureFormat::Bgra8UnormSrgb),
            Self::Gray => Some(TextureFormat::R8Unorm),
            Self::Yuv420p | Self::Yuv444p | Self::Rgb => None,
        }
    }
}

/// The color spaces an encoder accepts natively.
///
/// Membership is all that matters; two sets with the same members in a different
/// order are equal.
#[derive(Debug, Clone, Copy)]
pub enum ColorSpaces {
    /// Any color space is accepted without conversion.
    Any,
    /// Only these color spaces are accepted.
    Only(&'static [ColorSpace]),
}

impl ColorSpaces {
    /// Returns `true` if pictures in `color_space` are accepted as-is.
    pub fn contains(&self, color_space: ColorSpace) -> bool {
        match self {
            Self::Any => true,
            Self::Only(spaces) => spaces.contains(&color_space),
        }
    }

    /// Picks the color space a picture in `source` should be encoded in.
    ///
    /// `source` itself wins when it is accepted, otherwise the first member a
    /// conversion reaches.
    pub fn negotiate(&self, source: ColorSpace) -> Option<ColorSpace> {
        if self.contains(source) {
            return Some(source);
        }
        match self {
            Self::Any => Some(source),
            Self::Only(spaces) => spaces
                .iter()
                .copied()
                .find(|&target| crate::convert::can_convert(source, target)),
        }
    }

    /// Fails with [`Error::UnsupportedColorSpace`] unless `color_space` is accepted.
    pub fn check(&self, color_space: ColorSpace) -> Result<()> {
        if self.contains(color_space) {
            Ok(())
        } else {
            Err(Error::UnsupportedColorSpace {
                found: color_space,
                supported: *self,
            })
        }
    }
}

impl PartialEq for ColorSpaces {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, Self::Any) => true,
            (Self::Only(a), Self::Only(b)) => {
                a.iter().all(|cs| b.contains(cs)) && b.iter().all(|cs| a.contains(cs))
            }
            _ => false,
        }
    }
}

impl Eq for ColorSpaces {}

impl fmt::Display for ColorSpaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any color space"),
            Self::Only(spaces) => write!(f, "{spaces:?}"),
        }
    }
}

/// One video frame: pixel data plus its dimensions and color space.
///
/// Planar color spaces store their planes back to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    width: u32,
    height: u32,
    color_space: ColorSpace,
    data: Vec<u8>,
}

impl Picture {
    /// Creates a picture, validating the data length.
    pub fn new(width: u32, height: u32, color_space: ColorSpace, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidPicture(format!(
                "dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = color_space.frame_size(width, height);
        if data.len() != expected {
            return Err(Error::InvalidPicture(format!(
                "{width}x{height} {color_space:?} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            color_space,
            data,
        })
    }

    /// Creates a picture with every byte set to `value`.
    pub fn filled(width: u32, height: u32, color_space: ColorSpace, value: u8) -> Result<Self> {
        Self::new(
            width,
            height,
            color_space,
            vec![value; color_space.frame_size(width, height)],
        )
    }

    /// Creates a picture of a packed color space from rows that are `stride` bytes
    /// apart, as read back from a GPU buffer.
    pub fn from_padded_rows(
        width: u32,
        height: u32,
        color_space: ColorSpace,
        bytes: &[u8],
        stride: usize,
    ) -> Result<Self> {
        let bytes_per_pixel = color_space.bytes_per_pixel().ok_or_else(|| {
            Error::InvalidPicture(format!("{color_space:?} is planar, rows cannot be padded"))
        })?;
        if height == 0 {
            return Err(Error::InvalidPicture("height must be non-zero".to_string()));
        }
        let row_bytes = width as usize * bytes_per_pixel;
        if stride < row_bytes || bytes.len() < stride * (height as usize - 1) + row_bytes {
            return Err(Error::InvalidPicture(format!(
                "{} bytes with stride {stride} cannot hold {height} rows of {row_bytes} bytes",
                bytes.len()
            )));
        }

        let data = if stride == row_bytes {
            bytes[..row_bytes * height as usize].to_vec()
        } else {
            bytes
                .chunks(stride)
                .take(height as usize)
                .flat_map(|row| &row[..row_bytes])
                .copied()
                .collect()
        };
        Self::new(width, height, color_space, data)
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The color space the data is laid out in.
    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// All pixel data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the picture, returning its data.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// The bytes of plane `index`, `None` if the color space has no such plane.
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let mut offset = 0;
        for i in 0..=index {
            let (w, h) = self
                .color_space
                .plane_dimensions(i, self.width, self.height)?;
            let bytes_per_sample = self.color_space.bytes_per_pixel().unwrap_or(1);
            let len = w as usize * h as usize * bytes_per_sample;
            if i == index {
                return self.data.get(offset..offset + len);
            }
            offset += len;
        }
        None
    }
}

impl TryFrom<&Image> for Picture {
    type Error = Error;

    fn try_from(image: &Image) -> Result<Self> {
        let format = image.texture_descriptor.format;
        let color_space = ColorSpace::from_texture_format(format).ok_or_else(|| {
            Error::InvalidPicture(format!("texture format {format:?} has no color space"))
        })?;
        Self::new(image.width(), image.height(), color_space, image.data.clone())
    }
}
