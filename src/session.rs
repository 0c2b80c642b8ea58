//! Drives one encoder and one sink: the caller side of the encoder contract.

use crate::{
    convert,
    encoder::{EncodedFrame, EncoderState, VideoEncoder},
    error::{Error, Result},
    picture::Picture,
    sink::FrameSink,
};

/// A boxed encoder that can be moved into the render world.
pub type BoxedEncoder = Box<dyn VideoEncoder + Send + Sync + 'static>;

/// A boxed sink that can be moved into the render world.
pub type BoxedSink = Box<dyn FrameSink + Send + Sync + 'static>;

/// Feeds pictures through an encoder into a sink.
///
/// The session owns the output buffer and sizes it from the encoder's estimate
/// plus some headroom. Pictures in a color space the encoder does not accept are
/// converted first. A capacity error grows the buffer to what the encoder asked
/// for and the call is retried once.
pub struct EncodeSession {
    encoder: BoxedEncoder,
    sink: Option<BoxedSink>,
    buffer: Vec<u8>,
    headroom_percent: usize,
    submitted: u64,
    emitted: u64,
    key_frames: u64,
}

impl EncodeSession {
    /// Creates a session that encodes with `encoder` and writes to `sink`.
    pub fn new(
        encoder: impl VideoEncoder + Send + Sync + 'static,
        sink: impl FrameSink + Send + Sync + 'static,
    ) -> Self {
        Self::from_boxed(Box::new(encoder), Box::new(sink))
    }

    /// Creates a session from already boxed parts.
    pub fn from_boxed(encoder: BoxedEncoder, sink: BoxedSink) -> Self {
        Self {
            encoder,
            sink: Some(sink),
            buffer: Vec::new(),
            headroom_percent: 25,
            submitted: 0,
            emitted: 0,
            key_frames: 0,
        }
    }

    /// Sets how much larger than the encoder's estimate the buffer is made.
    pub fn with_headroom_percent(mut self, percent: usize) -> Self {
        self.headroom_percent = percent;
        self
    }

    /// Number of pictures submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Number of frames handed to the sink so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Number of key frames handed to the sink so far.
    pub fn key_frames(&self) -> u64 {
        self.key_frames
    }

    /// Current size of the output buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// State of the wrapped encoder.
    pub fn state(&self) -> EncoderState {
        self.encoder.state()
    }

    /// Encodes one picture and forwards the frame, if any, to the sink.
    pub fn submit(&mut self, picture: &Picture) -> Result<()> {
        let supported = self.encoder.supported_color_spaces();
        let converted;
        let picture = match supported.negotiate(picture.color_space()) {
            Some(target) if target == picture.color_space() => picture,
            Some(target) => {
                converted = convert::convert(picture, target)?;
                &converted
            }
            None => {
                return Err(Error::UnsupportedColorSpace {
                    found: picture.color_space(),
                    supported,
                })
            }
        };

        let estimate = self.encoder.estimate_buffer_size(picture);
        self.reserve(estimate + estimate * self.headroom_percent / 100);

        let retry = match self.encoder.encode_frame(picture, &mut self.buffer) {
            Ok(frame) => {
                Self::forward(&mut self.sink, &mut self.emitted, &mut self.key_frames, frame)?;
                None
            }
            Err(Error::BufferTooSmall { required, .. }) => Some(required),
            Err(err) => return Err(err),
        };

        if let Some(required) = retry {
            bevy::log::warn!(
                "encoder needed {required} bytes, estimate was {estimate}; retrying with a larger buffer"
            );
            self.reserve(required);
            let frame = self.encoder.encode_frame(picture, &mut self.buffer)?;
            Self::forward(&mut self.sink, &mut self.emitted, &mut self.key_frames, frame)?;
        }

        self.submitted += 1;
        Ok(())
    }

    /// Flushes the encoder, forwards the delayed frames and finishes the sink.
    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        match self.sink.take() {
            Some(sink) => sink.finish(),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        let estimate = self.encoder.estimate_finish_size();
        self.reserve(estimate + estimate * self.headroom_percent / 100);

        let retry = match self.encoder.finish(&mut self.buffer) {
            Ok(frames) => {
                for frame in frames {
                    Self::forward(&mut self.sink, &mut self.emitted, &mut self.key_frames, Some(frame))?;
                }
                None
            }
            Err(Error::BufferTooSmall { required, .. }) => Some(required),
            Err(err) => return Err(err),
        };

        if let Some(required) = retry {
            self.reserve(required);
            for frame in self.encoder.finish(&mut self.buffer)? {
                Self::forward(&mut self.sink, &mut self.emitted, &mut self.key_frames, Some(frame))?;
            }
        }

        bevy::log::debug!(
            "session finished: {} pictures in, {} frames out ({} key)",
            self.submitted,
            self.emitted,
            self.key_frames
        );
        Ok(())
    }

    fn reserve(&mut self, len: usize) {
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
    }

    fn forward(
        sink: &mut Option<BoxedSink>,
        emitted: &mut u64,
        key_frames: &mut u64,
        frame: Option<EncodedFrame<'_>>,
    ) -> Result<()> {
        let (Some(frame), Some(sink)) = (frame, sink.as_mut()) else {
            return Ok(());
        };
        sink.write_frame(&frame)?;
        *emitted += 1;
        *key_frames += frame.is_key_frame() as u64;
        Ok(())
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if self.sink.is_none() {
            return;
        }
        if self.encoder.state() == EncoderState::Ready {
            if let Err(err) = self.flush() {
                bevy::log::error!("Failed to flush encoder: {}", err);
            }
        }
        if let Some(sink) = self.sink.take() {
            if let Err(err) = sink.finish() {
                bevy::log::error!("Failed to finish sink: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoder::{lookahead::Lookahead, raw::RawEncoder, Lifecycle},
        picture::{ColorSpace, ColorSpaces},
    };
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Collect {
        frames: Arc<Mutex<Vec<(Vec<u8>, bool)>>>,
        finished: Arc<Mutex<bool>>,
    }

    impl FrameSink for Collect {
        fn write_frame(&mut self, frame: &EncodedFrame<'_>) -> Result<()> {
            self.frames
                .lock()
                .unwrap()
                .push((frame.data().to_vec(), frame.is_key_frame()));
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<()> {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }
    }

    /// Underestimates by half so the session has to retry.
    struct Underestimating(RawEncoder);

    impl VideoEncoder for Underestimating {
        fn encode_frame<'a>(
            &mut self,
            picture: &Picture,
            buffer: &'a mut [u8],
        ) -> Result<Option<EncodedFrame<'a>>> {
            self.0.encode_frame(picture, buffer)
        }

        fn supported_color_spaces(&self) -> ColorSpaces {
            self.0.supported_color_spaces()
        }

        fn estimate_buffer_size(&self, picture: &Picture) -> usize {
            self.0.estimate_buffer_size(picture) / 2
        }

        fn finish<'a>(&mut self, buffer: &'a mut [u8]) -> Result<Vec<EncodedFrame<'a>>> {
            self.0.finish(buffer)
        }

        fn state(&self) -> EncoderState {
            self.0.state()
        }
    }

    #[test]
    fn converts_for_yuv_only_encoders() {
        let sink = Collect::default();
        let mut session =
            EncodeSession::new(RawEncoder::only(&[ColorSpace::Yuv420p]), sink.clone());

        let rgba = Picture::filled(4, 4, ColorSpace::Rgba, 255).unwrap();
        session.submit(&rgba).unwrap();

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.len(), ColorSpace::Yuv420p.frame_size(4, 4));
    }

    #[test]
    fn grows_buffer_after_capacity_error() {
        let sink = Collect::default();
        let mut session = EncodeSession::new(Underestimating(RawEncoder::new()), sink.clone())
            .with_headroom_percent(0);

        let picture = Picture::filled(8, 8, ColorSpace::Gray, 1).unwrap();
        session.submit(&picture).unwrap();
        assert_eq!(session.buffer_len(), 64);
        assert_eq!(session.emitted(), 1);
    }

    #[test]
    fn finish_forwards_delayed_frames() {
        let sink = Collect::default();
        let mut session = EncodeSession::new(Lookahead::new(RawEncoder::new(), 2), sink.clone());

        for n in 1..=4 {
            session
                .submit(&Picture::filled(2, 2, ColorSpace::Gray, n).unwrap())
                .unwrap();
        }
        assert_eq!(session.submitted(), 4);
        assert_eq!(session.emitted(), 2);

        session.finish().unwrap();
        let order: Vec<u8> = sink.frames.lock().unwrap().iter().map(|f| f.0[0]).collect();
        assert_eq!(order, [1, 2, 3, 4]);
        assert!(*sink.finished.lock().unwrap());
    }

    #[test]
    fn dropping_finishes_the_sink() {
        let sink = Collect::default();
        let session = EncodeSession::new(RawEncoder::new(), sink.clone());
        drop(session);
        assert!(*sink.finished.lock().unwrap());
    }

    #[test]
    fn no_route_is_a_format_error() {
        struct Nothing(Lifecycle);

        impl VideoEncoder for Nothing {
            fn encode_frame<'a>(
                &mut self,
                _picture: &Picture,
                _buffer: &'a mut [u8],
            ) -> Result<Option<EncodedFrame<'a>>> {
                Ok(None)
            }

            fn supported_color_spaces(&self) -> ColorSpaces {
                ColorSpaces::Only(&[])
            }

            fn estimate_buffer_size(&self, _picture: &Picture) -> usize {
                0
            }

            fn finish<'a>(&mut self, _buffer: &'a mut [u8]) -> Result<Vec<EncodedFrame<'a>>> {
                self.0.finish()?;
                Ok(Vec::new())
            }

            fn state(&self) -> EncoderState {
                self.0.state()
            }
        }

        let mut session = EncodeSession::new(Nothing(Lifecycle::default()), Collect::default());
        let picture = Picture::filled(1, 1, ColorSpace::Gray, 0).unwrap();
        assert!(matches!(
            session.submit(&picture),
            Err(Error::UnsupportedColorSpace { .. })
        ));
    }
}
