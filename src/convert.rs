//! Color-space conversion, done by the caller before a picture reaches an encoder.
//!
//! Uses BT.601 full-range coefficients. 4:2:0 chroma is the average of each 2x2
//! block, clamped at the right and bottom edges. BGRA pictures with even
//! dimensions go to planar YUV through `dcv-color-primitives`.

use crate::{
    error::{Error, Result},
    picture::{ColorSpace, Picture},
};
use dcv_color_primitives as dcp;
use std::sync::Once;

static DCP_INIT: Once = Once::new();

/// Returns `true` if [`convert`] can turn `from` into `to`.
pub fn can_convert(from: ColorSpace, to: ColorSpace) -> bool {
    ColorSpace::ALL.contains(&from) && ColorSpace::ALL.contains(&to)
}

/// Converts `picture` into `target`. Converting into the picture's own color space
/// is a plain copy.
pub fn convert(picture: &Picture, target: ColorSpace) -> Result<Picture> {
    if picture.color_space() == target {
        return Ok(picture.clone());
    }
    if let Some(converted) = bgra_to_yuv(picture, target) {
        return converted;
    }

    let reader = Reader::new(picture);
    let (w, h) = (picture.width() as usize, picture.height() as usize);
    let mut out = Vec::with_capacity(target.frame_size(picture.width(), picture.height()));

    match target {
        ColorSpace::Rgb => {
            for y in 0..h {
                for x in 0..w {
                    let [r, g, b, _] = reader.rgba(x, y);
                    out.extend([r, g, b]);
                }
            }
        }
        ColorSpace::Rgba => {
            for y in 0..h {
                for x in 0..w {
                    out.extend(reader.rgba(x, y));
                }
            }
        }
        ColorSpace::Bgra => {
            for y in 0..h {
                for x in 0..w {
                    let [r, g, b, a] = reader.rgba(x, y);
                    out.extend([b, g, r, a]);
                }
            }
        }
        ColorSpace::Gray => {
            for y in 0..h {
                for x in 0..w {
                    out.push(reader.yuv(x, y)[0]);
                }
            }
        }
        ColorSpace::Yuv444p => {
            for plane in 0..3 {
                for y in 0..h {
                    for x in 0..w {
                        out.push(reader.yuv(x, y)[plane]);
                    }
                }
            }
        }
        ColorSpace::Yuv420p => {
            for y in 0..h {
                for x in 0..w {
                    out.push(reader.yuv(x, y)[0]);
                }
            }
            for plane in 1..3 {
                for y in (0..h).step_by(2) {
                    for x in (0..w).step_by(2) {
                        let mut sum = 0u32;
                        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                            let sx = (x + dx).min(w - 1);
                            let sy = (y + dy).min(h - 1);
                            sum += reader.yuv(sx, sy)[plane] as u32;
                        }
                        out.push(((sum + 2) / 4) as u8);
                    }
                }
            }
        }
    }

    Picture::new(picture.width(), picture.height(), target, out)
}

fn bgra_to_yuv(picture: &Picture, target: ColorSpace) -> Option<Result<Picture>> {
    if picture.color_space() != ColorSpace::Bgra {
        return None;
    }
    let dst_pixel_format = match target {
        ColorSpace::Yuv420p => dcp::PixelFormat::I420,
        ColorSpace::Yuv444p => dcp::PixelFormat::I444,
        _ => return None,
    };
    let (width, height) = (picture.width(), picture.height());
    if width % 2 != 0 || height % 2 != 0 {
        return None;
    }
    DCP_INIT.call_once(dcp::initialize);

    let src_format = dcp::ImageFormat {
        pixel_format: dcp::PixelFormat::Bgra,
        color_space: dcp::ColorSpace::Rgb,
        num_planes: 1,
    };
    let dst_format = dcp::ImageFormat {
        pixel_format: dst_pixel_format,
        color_space: dcp::ColorSpace::Bt601FR,
        num_planes: 3,
    };

    let size = target.frame_size(width, height);
    let luma = width as usize * height as usize;
    let mut data = vec![0; size];
    let (y, chroma) = data.split_at_mut(luma);
    let (u, v) = chroma.split_at_mut((size - luma) / 2);

    let converted = dcp::convert_image(
        width,
        height,
        &src_format,
        None,
        &[picture.data()],
        &dst_format,
        None,
        &mut [y, u, v],
    );
    Some(
        converted
            .map_err(Error::backend)
            .and_then(|()| Picture::new(width, height, target, data)),
    )
}

/// Per-pixel access to a picture in either RGB or YUV terms.
struct Reader<'a> {
    picture: &'a Picture,
    width: usize,
}

impl<'a> Reader<'a> {
    fn new(picture: &'a Picture) -> Self {
        Self {
            picture,
            width: picture.width() as usize,
        }
    }

    fn rgba(&self, x: usize, y: usize) -> [u8; 4] {
        let data = self.picture.data();
        let i = y * self.width + x;
        match self.picture.color_space() {
            ColorSpace::Rgb => [data[i * 3], data[i * 3 + 1], data[i * 3 + 2], 255],
            ColorSpace::Rgba => [data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]],
            ColorSpace::Bgra => [data[i * 4 + 2], data[i * 4 + 1], data[i * 4], data[i * 4 + 3]],
            ColorSpace::Gray => [data[i], data[i], data[i], 255],
            ColorSpace::Yuv420p | ColorSpace::Yuv444p => {
                let [r, g, b] = yuv_to_rgb(self.yuv(x, y));
                [r, g, b, 255]
            }
        }
    }

    fn yuv(&self, x: usize, y: usize) -> [u8; 3] {
        let picture = self.picture;
        match picture.color_space() {
            ColorSpace::Yuv444p => {
                let i = y * self.width + x;
                let size = self.width * picture.height() as usize;
                let data = picture.data();
                [data[i], data[size + i], data[2 * size + i]]
            }
            ColorSpace::Yuv420p => {
                let data = picture.data();
                let luma = self.width * picture.height() as usize;
                let chroma_width = picture.width().div_ceil(2) as usize;
                let chroma = chroma_width * picture.height().div_ceil(2) as usize;
                let c = (y / 2) * chroma_width + x / 2;
                [
                    data[y * self.width + x],
                    data[luma + c],
                    data[luma + chroma + c],
                ]
            }
            ColorSpace::Gray => [picture.data()[y * self.width + x], 128, 128],
            ColorSpace::Rgb | ColorSpace::Rgba | ColorSpace::Bgra => {
                let [r, g, b, _] = self.rgba(x, y);
                rgb_to_yuv([r, g, b])
            }
        }
    }
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    [
        clamp(0.299 * r + 0.587 * g + 0.114 * b),
        clamp(-0.169 * r - 0.331 * g + 0.500 * b + 128.0),
        clamp(0.500 * r - 0.419 * g - 0.081 * b + 128.0),
    ]
}

fn yuv_to_rgb([y, u, v]: [u8; 3]) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        clamp(y + 1.402 * v),
        clamp(y - 0.344 * u - 0.714 * v),
        clamp(y + 1.772 * u),
    ]
}

fn clamp(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
