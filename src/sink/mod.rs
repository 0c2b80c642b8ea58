//! Consumers of encoded frames.

pub mod frames;
pub mod stream;

#[cfg(feature = "mp4")]
pub mod mp4;

use crate::{encoder::EncodedFrame, error::Result};

/// Receives encoded frames in the order the encoder emits them.
///
/// The frame only borrows the caller's output buffer, so a sink copies whatever it
/// needs to keep.
pub trait FrameSink {
    /// Consumes one encoded frame.
    fn write_frame(&mut self, frame: &EncodedFrame<'_>) -> Result<()>;

    /// Finishes the output.
    /// This method can be used to finalize the output and write any remaining data, if necessary.
    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
