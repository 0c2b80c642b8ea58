//! Pass pictures through unchanged.

use super::{EncodedFrame, EncoderState, Lifecycle, OutputBuffer, Result, VideoEncoder};
use crate::picture::{ColorSpace, ColorSpaces, Picture};

/// An encoder that copies picture bytes verbatim. Every frame is a key frame.
#[derive(Debug, Default)]
pub struct RawEncoder {
    color_spaces: Option<&'static [ColorSpace]>,
    lifecycle: Lifecycle,
    frame: u64,
}

impl RawEncoder {
    /// Creates a raw encoder that takes pictures in any color space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a raw encoder that only takes pictures in the given color spaces.
    pub fn only(color_spaces: &'static [ColorSpace]) -> Self {
        Self {
            color_spaces: Some(color_spaces),
            ..Self::default()
        }
    }

    /// Number of frames encoded so far.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }
}

impl VideoEncoder for RawEncoder {
    fn encode_frame<'a>(
        &mut self,
        picture: &Picture,
        buffer: &'a mut [u8],
    ) -> Result<Option<EncodedFrame<'a>>> {
        self.lifecycle.ensure_ready()?;
        self.supported_color_spaces().check(picture.color_space())?;

        let mut output = OutputBuffer::new(buffer);
        output.push(picture.data(), true)?;

        self.frame += 1;
        output.into_frame()
    }

    fn supported_color_spaces(&self) -> ColorSpaces {
        match self.color_spaces {
            Some(spaces) => ColorSpaces::Only(spaces),
            None => ColorSpaces::Any,
        }
    }

    fn estimate_buffer_size(&self, picture: &Picture) -> usize {
        picture
            .color_space()
            .frame_size(picture.width(), picture.height())
    }

    fn finish<'a>(&mut self, _buffer: &'a mut [u8]) -> Result<Vec<EncodedFrame<'a>>> {
        self.lifecycle.finish()?;
        bevy::log::debug!("raw encoder finished after {} frames", self.frame);
        Ok(Vec::new())
    }

    fn state(&self) -> EncoderState {
        self.lifecycle.state()
    }
}
