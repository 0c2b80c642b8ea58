//! Frame delay in front of any encoder.
//!
//! Pictures wait in a lookahead queue of `depth` entries before they reach the
//! wrapped encoder, the way an encoder with B-frame lookahead holds input. Frames
//! come out in the order the pictures went in.

use super::{EncodedFrame, EncoderState, Lifecycle, OutputBuffer, Result, VideoEncoder};
use crate::{
    error::Error,
    picture::{ColorSpaces, Picture},
};
use std::collections::VecDeque;

/// Wraps an encoder and delays its input by `depth` pictures.
///
/// The first `depth` calls to [`encode_frame`](VideoEncoder::encode_frame) return
/// `None`; after that every call returns the frame of the picture submitted `depth`
/// calls earlier. [`finish`](VideoEncoder::finish) returns whatever is still held.
pub struct Lookahead<E> {
    inner: E,
    depth: usize,
    held: VecDeque<Picture>,
    pending: VecDeque<(Vec<u8>, bool)>,
    staging: Vec<u8>,
    inner_finished: bool,
    lifecycle: Lifecycle,
}

impl<E: VideoEncoder> Lookahead<E> {
    /// Wraps `inner`, holding up to `depth` pictures.
    pub fn new(inner: E, depth: usize) -> Self {
        Self {
            inner,
            depth,
            held: VecDeque::with_capacity(depth),
            pending: VecDeque::with_capacity(2),
            staging: Vec::new(),
            inner_finished: false,
            lifecycle: Lifecycle::default(),
        }
    }

    /// The wrapped encoder.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Number of pictures held before they are encoded.
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn encode_inner(&mut self, picture: &Picture) -> Result<()> {
        self.staging.resize(self.inner.estimate_buffer_size(picture), 0);

        let retry = match self.inner.encode_frame(picture, &mut self.staging) {
            Ok(frame) => {
                queue(&mut self.pending, frame);
                None
            }
            Err(Error::BufferTooSmall { required, .. }) => Some(required),
            Err(err) => return Err(err),
        };

        if let Some(required) = retry {
            bevy::log::debug!("growing lookahead staging buffer to {required} bytes");
            self.staging.resize(required, 0);
            let frame = self.inner.encode_frame(picture, &mut self.staging)?;
            queue(&mut self.pending, frame);
        }
        Ok(())
    }

    /// Encodes the oldest held picture. It stays held if the inner encoder fails.
    fn encode_oldest(&mut self) -> Result<()> {
        let Some(oldest) = self.held.pop_front() else {
            return Ok(());
        };
        if let Err(err) = self.encode_inner(&oldest) {
            self.held.push_front(oldest);
            return Err(err);
        }
        Ok(())
    }

    fn finish_inner(&mut self) -> Result<()> {
        if self.inner_finished {
            return Ok(());
        }
        self.staging.resize(self.inner.estimate_finish_size(), 0);

        let retry = match self.inner.finish(&mut self.staging) {
            Ok(frames) => {
                frames
                    .into_iter()
                    .for_each(|frame| queue(&mut self.pending, Some(frame)));
                None
            }
            Err(Error::BufferTooSmall { required, .. }) => Some(required),
            Err(err) => return Err(err),
        };

        if let Some(required) = retry {
            self.staging.resize(required, 0);
            for frame in self.inner.finish(&mut self.staging)? {
                queue(&mut self.pending, Some(frame));
            }
        }
        self.inner_finished = true;
        Ok(())
    }
}

fn queue(pending: &mut VecDeque<(Vec<u8>, bool)>, frame: Option<EncodedFrame<'_>>) {
    if let Some(frame) = frame {
        pending.push_back((frame.data().to_vec(), frame.is_key_frame()));
    }
}

impl<E: VideoEncoder> VideoEncoder for Lookahead<E> {
    fn encode_frame<'a>(
        &mut self,
        picture: &Picture,
        buffer: &'a mut [u8],
    ) -> Result<Option<EncodedFrame<'a>>> {
        self.lifecycle.ensure_ready()?;
        self.supported_color_spaces().check(picture.color_space())?;

        let full = self.held.len() >= self.depth;

        // Capacity is checked before the picture is accepted.
        let required = match self.pending.front() {
            Some((bytes, _)) => bytes.len(),
            None if full => self
                .inner
                .estimate_buffer_size(self.held.front().unwrap_or(picture)),
            None => 0,
        };
        if required > buffer.len() {
            return Err(Error::BufferTooSmall {
                required,
                available: buffer.len(),
            });
        }

        if self.depth == 0 {
            self.encode_inner(picture)?;
        } else {
            if full {
                self.encode_oldest()?;
            }
            self.held.push_back(picture.clone());
        }

        match self.pending.pop_front() {
            Some((bytes, key_frame)) if bytes.len() <= buffer.len() => {
                let mut output = OutputBuffer::new(buffer);
                output.push(&bytes, key_frame)?;
                output.into_frame()
            }
            Some(frame) => {
                bevy::log::debug!(
                    "{} byte frame does not fit {} byte buffer, keeping it queued",
                    frame.0.len(),
                    buffer.len()
                );
                self.pending.push_front(frame);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn supported_color_spaces(&self) -> ColorSpaces {
        self.inner.supported_color_spaces()
    }

    fn estimate_buffer_size(&self, picture: &Picture) -> usize {
        let queued = self.pending.front().map_or(0, |(bytes, _)| bytes.len());
        queued.max(self.inner.estimate_buffer_size(picture))
    }

    fn finish<'a>(&mut self, buffer: &'a mut [u8]) -> Result<Vec<EncodedFrame<'a>>> {
        self.lifecycle.ensure_ready()?;

        while !self.held.is_empty() {
            self.encode_oldest()?;
        }
        self.finish_inner()?;

        let mut output = OutputBuffer::new(buffer);
        output.reserve(self.pending.iter().map(|(bytes, _)| bytes.len()).sum())?;
        for (bytes, key_frame) in self.pending.drain(..) {
            output.push(&bytes, key_frame)?;
        }

        self.lifecycle.finish()?;
        self.staging = Vec::new();
        bevy::log::debug!("lookahead finished, flushed {} frames", output.frame_count());
        output.into_frames()
    }

    fn state(&self) -> EncoderState {
        self.lifecycle.state()
    }

    fn delayed_frames(&self) -> usize {
        self.held.len() + self.pending.len()
    }

    fn estimate_finish_size(&self) -> usize {
        let pending: usize = self.pending.iter().map(|(bytes, _)| bytes.len()).sum();
        let held: usize = self
            .held
            .iter()
            .map(|picture| self.inner.estimate_buffer_size(picture))
            .sum();
        pending + held + self.inner.estimate_finish_size()
    }
}
