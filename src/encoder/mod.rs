//! The video encoder contract and the encoders shipped with this crate.

pub mod lookahead;
pub mod raw;

#[cfg(any(feature = "png", feature = "jpeg", feature = "gif"))]
pub mod still;

#[cfg(feature = "h264")]
pub mod h264;

mod output;

pub use crate::error::{Error, Result};
pub use output::{EncodedFrame, OutputBuffer};

use crate::picture::{ColorSpaces, Picture};

/// An encoder that turns a sequence of pictures into encoded frames.
///
/// Encoders never allocate the storage of their output: every encoded frame is
/// written into the buffer the caller supplies and returned as a view into it.
/// Encoding is stateful, so feeding the same picture twice may give different
/// bytes. An instance is meant for one stream on one thread.
pub trait VideoEncoder {
    /// Encodes one picture into `buffer`.
    ///
    /// The picture must be in one of the [supported color
    /// spaces](Self::supported_color_spaces), otherwise this fails with
    /// [`Error::UnsupportedColorSpace`] before anything is written. Size `buffer`
    /// with [`estimate_buffer_size`](Self::estimate_buffer_size); a buffer that is
    /// too small fails with [`Error::BufferTooSmall`].
    ///
    /// Returns `None` if the picture was consumed but no frame is ready yet, e.g.
    /// because the encoder holds pictures for lookahead. Bytes of `buffer` outside the returned
    /// frame are left untouched.
    fn encode_frame<'a>(
        &mut self,
        picture: &Picture,
        buffer: &'a mut [u8],
    ) -> Result<Option<EncodedFrame<'a>>>;

    /// The color spaces this encoder accepts without conversion.
    fn supported_color_spaces(&self) -> ColorSpaces;

    /// A coarse, upper-bound-leaning estimate of the bytes needed to encode `picture`
    /// with this encoder's settings.
    fn estimate_buffer_size(&self, picture: &Picture) -> usize;

    /// Flushes every delayed frame into `buffer` and ends the session.
    ///
    /// Afterwards every call to [`encode_frame`](Self::encode_frame) or `finish`
    /// fails with [`Error::Finished`]. If `buffer` cannot hold the delayed frames this
    /// fails with [`Error::BufferTooSmall`] and the encoder stays usable, so the
    /// call can be repeated with a larger buffer.
    fn finish<'a>(&mut self, buffer: &'a mut [u8]) -> Result<Vec<EncodedFrame<'a>>>;

    /// Whether the encoder still accepts pictures.
    fn state(&self) -> EncoderState;

    /// Number of pictures consumed but not yet emitted.
    fn delayed_frames(&self) -> usize {
        0
    }

    /// Estimate of the buffer [`finish`](Self::finish) needs.
    fn estimate_finish_size(&self) -> usize {
        0
    }
}

impl<E: VideoEncoder + ?Sized> VideoEncoder for Box<E> {
    fn encode_frame<'a>(
        &mut self,
        picture: &Picture,
        buffer: &'a mut [u8],
    ) -> Result<Option<EncodedFrame<'a>>> {
        (**self).encode_frame(picture, buffer)
    }

    fn supported_color_spaces(&self) -> ColorSpaces {
        (**self).supported_color_spaces()
    }

    fn estimate_buffer_size(&self, picture: &Picture) -> usize {
        (**self).estimate_buffer_size(picture)
    }

    fn finish<'a>(&mut self, buffer: &'a mut [u8]) -> Result<Vec<EncodedFrame<'a>>> {
        (**self).finish(buffer)
    }

    fn state(&self) -> EncoderState {
        (**self).state()
    }

    fn delayed_frames(&self) -> usize {
        (**self).delayed_frames()
    }

    fn estimate_finish_size(&self) -> usize {
        (**self).estimate_finish_size()
    }
}

/// Lifecycle of an encoder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Accepting pictures.
    #[default]
    Ready,
    /// [`finish`](VideoEncoder::finish) succeeded; terminal.
    Finished,
}

/// Tracks the [`EncoderState`] of an encoder implementation.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: EncoderState,
}

impl Lifecycle {
    /// The current state.
    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Fails with [`Error::Finished`] once the encoder has finished.
    pub fn ensure_ready(&self) -> Result<()> {
        match self.state {
            EncoderState::Ready => Ok(()),
            EncoderState::Finished => Err(Error::Finished),
        }
    }

    /// Moves to [`EncoderState::Finished`].
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.state = EncoderState::Finished;
        Ok(())
    }
}
