//! Views of encoded frames inside caller-owned storage.

use crate::error::{Error, Result};
use std::ops::Range;

/// The bytes of one encoded frame together with its metadata.
///
/// The bytes live in the buffer the caller passed to the encoder; this type never
/// owns storage and cannot outlive that buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFrame<'a> {
    data: &'a [u8],
    offset: usize,
    key_frame: bool,
}

impl<'a> EncodedFrame<'a> {
    /// Creates a view over `range` of `buffer`.
    ///
    /// Fails with [`Error::BufferTooSmall`] if the range does not lie within the buffer.
    pub fn new(buffer: &'a [u8], range: Range<usize>, key_frame: bool) -> Result<Self> {
        let available = buffer.len();
        let offset = range.start;
        match buffer.get(range.clone()) {
            Some(data) => Ok(Self {
                data,
                offset,
                key_frame,
            }),
            None => Err(Error::BufferTooSmall {
                required: range.end.max(range.start),
                available,
            }),
        }
    }

    /// The encoded bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Where the encoded bytes start inside the caller's buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The encoded bytes' position inside the caller's buffer.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.data.len()
    }

    /// Number of encoded bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the frame holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the frame can be decoded without any other frame.
    pub fn is_key_frame(&self) -> bool {
        self.key_frame
    }
}

/// Appends encoded frames to a caller-owned buffer.
///
/// Every append checks the remaining capacity first, so a failed append leaves the
/// buffer as it was.
pub struct OutputBuffer<'a> {
    buffer: &'a mut [u8],
    len: usize,
    frames: Vec<(Range<usize>, bool)>,
}

impl<'a> OutputBuffer<'a> {
    /// Starts writing at the beginning of `buffer`.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self::with_offset(buffer, 0)
    }

    /// Starts writing at `offset`. Bytes before it are never touched.
    pub fn with_offset(buffer: &'a mut [u8], offset: usize) -> Self {
        let len = offset.min(buffer.len());
        Self {
            buffer,
            len,
            frames: Vec::new(),
        }
    }

    /// Bytes still free.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.len
    }

    /// Number of frames appended so far.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Fails unless `required` more bytes fit.
    pub fn reserve(&self, required: usize) -> Result<()> {
        if required > self.remaining() {
            Err(Error::BufferTooSmall {
                required: self.len + required,
                available: self.buffer.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Appends one frame's bytes.
    pub fn push(&mut self, bytes: &[u8], key_frame: bool) -> Result<()> {
        self.push_with(bytes.len(), key_frame, |dst| dst.copy_from_slice(bytes))
    }

    /// Appends one frame of `len` bytes written by `fill`.
    pub fn push_with(
        &mut self,
        len: usize,
        key_frame: bool,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<()> {
        self.reserve(len)?;
        let range = self.len..self.len + len;
        fill(&mut self.buffer[range.clone()]);
        self.len = range.end;
        self.frames.push((range, key_frame));
        Ok(())
    }

    /// Views of every appended frame, in order.
    pub fn into_frames(self) -> Result<Vec<EncodedFrame<'a>>> {
        let buffer: &'a [u8] = self.buffer;
        self.frames
            .into_iter()
            .map(|(range, key_frame)| EncodedFrame::new(buffer, range, key_frame))
            .collect()
    }

    /// View of the first appended frame, if any.
    pub fn into_frame(self) -> Result<Option<EncodedFrame<'a>>> {
        let buffer: &'a [u8] = self.buffer;
        match self.frames.into_iter().next() {
            Some((range, key_frame)) => EncodedFrame::new(buffer, range, key_frame).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_view_stays_inside_buffer() {
        let buffer = [1, 2, 3, 4, 5];
        let frame = EncodedFrame::new(&buffer, 1..4, true).unwrap();
        assert_eq!(frame.data(), &[2, 3, 4]);
        assert_eq!(frame.offset(), 1);
        assert_eq!(frame.range(), 1..4);
        assert!(frame.is_key_frame());

        assert!(matches!(
            EncodedFrame::new(&buffer, 3..6, false),
            Err(Error::BufferTooSmall {
                required: 6,
                available: 5
            })
        ));
    }

    #[test]
    fn failed_push_leaves_buffer_untouched() {
        let mut buffer = [0u8; 4];
        let mut output = OutputBuffer::new(&mut buffer);
        output.push(&[7, 7], true).unwrap();
        let err = output.push(&[9, 9, 9], false).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferTooSmall {
                required: 5,
                available: 4
            }
        ));
        output.push(&[8], false).unwrap();

        let frames = output.into_frames().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data(), &[7, 7]);
        assert_eq!(frames[1].data(), &[8]);
        assert_eq!(frames[1].offset(), 2);
        assert_eq!(buffer, [7, 7, 8, 0]);
    }

    #[test]
    fn offset_skips_leading_bytes() {
        let mut buffer = [5u8; 4];
        let mut output = OutputBuffer::with_offset(&mut buffer, 2);
        output.push(&[1, 2], true).unwrap();
        let frame = output.into_frame().unwrap().unwrap();
        assert_eq!(frame.range(), 2..4);
        assert_eq!(buffer, [5, 5, 1, 2]);
    }
}
