//! Write every encoded frame to its own file.

use super::FrameSink;
use crate::{encoder::EncodedFrame, error::Result};
use std::{fs, path::PathBuf};

/// A sink that writes each frame to `frame_{:06}.{extension}` inside a directory.
/// Pairs with intra-only encoders, e.g. PNG frames.
pub struct FramesSink {
    path: PathBuf,
    extension: String,
    frame: u32,
}

impl FramesSink {
    /// Creates a new frames sink that writes frames to the given directory.
    pub fn new(path: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extension: extension.into(),
            frame: 0,
        }
    }

    /// Number of frames written so far.
    pub fn frame_count(&self) -> u32 {
        self.frame
    }
}

impl FrameSink for FramesSink {
    fn write_frame(&mut self, frame: &EncodedFrame<'_>) -> Result<()> {
        fs::create_dir_all(&self.path)?;

        let file = self
            .path
            .join(format!("frame_{:06}.{}", self.frame, self.extension));
        fs::write(file, frame.data())?;

        self.frame += 1;

        Ok(())
    }
}
