//! Concatenate encoded frames into one byte stream.

use super::FrameSink;
use crate::{encoder::EncodedFrame, error::Result};
use std::io::Write;

/// A sink that appends every frame to a writer, e.g. a raw `.h264` elementary
/// stream or a motion-JPEG stream.
pub struct StreamSink<W: Write> {
    writer: W,
    frames: u64,
    key_frames: u64,
    bytes: u64,
}

impl<W: Write> StreamSink<W> {
    /// Creates a new stream sink that writes to the given writer, e.g. a file.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames: 0,
            key_frames: 0,
            bytes: 0,
        }
    }

    /// Number of frames written so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Number of key frames written so far.
    pub fn key_frame_count(&self) -> u64 {
        self.key_frames
    }

    /// Number of bytes written so far.
    pub fn byte_count(&self) -> u64 {
        self.bytes
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FrameSink for StreamSink<W> {
    fn write_frame(&mut self, frame: &EncodedFrame<'_>) -> Result<()> {
        self.writer.write_all(frame.data())?;
        self.frames += 1;
        self.key_frames += frame.is_key_frame() as u64;
        self.bytes += frame.len() as u64;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.flush()?;
        bevy::log::debug!(
            "stream finished: {} frames ({} key), {} bytes",
            self.frames,
            self.key_frames,
            self.bytes
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_frames_and_counts_key_frames() {
        let mut sink = StreamSink::new(Vec::new());
        let buffer = [9, 8, 7];
        sink.write_frame(&EncodedFrame::new(&buffer, 0..1, true).unwrap())
            .unwrap();
        sink.write_frame(&EncodedFrame::new(&buffer, 1..3, false).unwrap())
            .unwrap();

        assert_eq!(sink.frame_count(), 2);
        assert_eq!(sink.key_frame_count(), 1);
        assert_eq!(sink.byte_count(), 3);
        assert_eq!(sink.into_inner(), [9, 8, 7]);
    }
}
