//! H.264 encoder using OpenH264.

use super::{EncodedFrame, EncoderState, Lifecycle, OutputBuffer, Result, VideoEncoder};
use crate::{
    error::Error,
    picture::{ColorSpace, ColorSpaces, Picture},
};
use openh264::{
    encoder::{EncodedBitStream, EncoderConfig, FrameType},
    formats::YUVSlices,
    OpenH264API, Timestamp,
};

type Openh264Encoder = openh264::encoder::Encoder;

pub use openh264;

const NATIVE_COLOR_SPACES: &[ColorSpace] = &[ColorSpace::Yuv420p];
const PARAMETER_SET_OVERHEAD: usize = 256;
/// Key frames are usually several times the size of an average frame.
const KEY_FRAME_FACTOR: usize = 8;

/// How NAL units are delimited in the encoded frames.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum NalFraming {
    /// `00 00 00 01` start codes, as in a raw `.h264` elementary stream.
    #[default]
    AnnexB,
    /// Big-endian 4-byte lengths, as in MP4 samples.
    LengthPrefixed,
}

/// An encoder that encodes YUV 4:2:0 pictures into H.264 using OpenH264.
///
/// Every frame carries all NAL units OpenH264 produced for it, including
/// SPS/PPS on key frames. Width and height must be even.
pub struct H264Encoder {
    openh264: Openh264Encoder,
    lifecycle: Lifecycle,
    /// A frame that came out larger than the caller's buffer.
    overflow: Option<(Vec<u8>, bool)>,
    frame: u64,
    bitrate_bps: u32,
    frame_rate: f32,
    framing: NalFraming,
}

impl H264Encoder {
    /// Creates a new H.264 encoder targeting 5 Mbit/s at 60 frames per second.
    pub fn new() -> Result<Self> {
        Self::new_with_settings(5_000_000, 60.0)
    }

    /// Creates a new H.264 encoder with the given target bitrate and frame rate.
    /// Both feed into rate control and into [`estimate_buffer_size`](VideoEncoder::estimate_buffer_size).
    pub fn new_with_settings(bitrate_bps: u32, frame_rate: f32) -> Result<Self> {
        let frame_rate = frame_rate.max(1.0);
        let config = EncoderConfig::new()
            .set_bitrate_bps(bitrate_bps)
            .max_frame_rate(frame_rate);
        let openh264 = Openh264Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(Error::backend)?;

        bevy::log::debug!("created h264 encoder: {bitrate_bps} bps, {frame_rate} fps");

        Ok(Self {
            openh264,
            lifecycle: Lifecycle::default(),
            overflow: None,
            frame: 0,
            bitrate_bps,
            frame_rate,
            framing: NalFraming::default(),
        })
    }

    /// Sets how NAL units are delimited.
    pub fn with_framing(mut self, framing: NalFraming) -> Self {
        self.framing = framing;
        self
    }

    /// The NAL framing of produced frames.
    pub fn framing(&self) -> NalFraming {
        self.framing
    }
}

impl VideoEncoder for H264Encoder {
    /// Buffers smaller than [`estimate_buffer_size`](VideoEncoder::estimate_buffer_size)
    /// are rejected before OpenH264 sees the picture, so rate control and key-frame
    /// distance do not advance on that error.
    ///
    /// A frame that still outgrows the buffer is kept and the call fails with
    /// [`Error::BufferTooSmall`] carrying its exact size. The next call delivers
    /// that frame instead of encoding its picture, so retry with the same picture.
    fn encode_frame<'a>(
        &mut self,
        picture: &Picture,
        buffer: &'a mut [u8],
    ) -> Result<Option<EncodedFrame<'a>>> {
        self.lifecycle.ensure_ready()?;
        self.supported_color_spaces().check(picture.color_space())?;

        if let Some((bytes, key_frame)) = self.overflow.take() {
            let mut output = OutputBuffer::new(buffer);
            if let Err(err) = output.push(&bytes, key_frame) {
                self.overflow = Some((bytes, key_frame));
                return Err(err);
            }
            bevy::log::debug!("delivered {} byte frame held from the last call", bytes.len());
            return output.into_frame();
        }

        if picture.width() % 2 != 0 || picture.height() % 2 != 0 {
            return Err(Error::InvalidPicture(format!(
                "h264 needs even dimensions, got {}x{}",
                picture.width(),
                picture.height()
            )));
        }

        let required = self.estimate_buffer_size(picture);
        if buffer.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                available: buffer.len(),
            });
        }

        let (width, height) = (picture.width() as usize, picture.height() as usize);
        let chroma_width = width / 2;
        let (Some(y), Some(u), Some(v)) = (picture.plane(0), picture.plane(1), picture.plane(2))
        else {
            return Err(Error::InvalidPicture("missing yuv planes".to_string()));
        };
        let yuv = YUVSlices::new((y, u, v), (width, height), (width, chroma_width, chroma_width));

        let timestamp = Timestamp::from_millis(self.frame * 1000 / self.frame_rate as u64);
        let bitstream = self
            .openh264
            .encode_at(&yuv, timestamp)
            .map_err(Error::backend)?;
        self.frame += 1;

        let frame_type = bitstream.frame_type();
        if matches!(frame_type, FrameType::Skip) {
            bevy::log::trace!("rate control skipped frame {}", self.frame - 1);
            return Ok(None);
        }
        let key_frame = matches!(frame_type, FrameType::I | FrameType::IDR);

        let framing = self.framing;
        let mut len = 0;
        for_each_nal(&bitstream, |nal| len += framed_len(framing, nal));

        let write = |dst: &mut [u8]| {
            let mut at = 0;
            for_each_nal(&bitstream, |nal| {
                let written = write_nal(framing, nal, &mut dst[at..]);
                at += written;
            });
        };

        if len > buffer.len() {
            bevy::log::warn!(
                "h264 frame {} is {len} bytes, over the {} byte estimate; holding it",
                self.frame - 1,
                required
            );
            let mut bytes = vec![0; len];
            write(bytes.as_mut_slice());
            self.overflow = Some((bytes, key_frame));
            return Err(Error::BufferTooSmall {
                required: len,
                available: buffer.len(),
            });
        }

        let mut output = OutputBuffer::new(buffer);
        output.push_with(len, key_frame, write)?;

        bevy::log::trace!(
            "encoded h264 frame {} ({:?}) into {len} bytes",
            self.frame - 1,
            frame_type
        );
        output.into_frame()
    }

    fn supported_color_spaces(&self) -> ColorSpaces {
        ColorSpaces::Only(NATIVE_COLOR_SPACES)
    }

    fn estimate_buffer_size(&self, picture: &Picture) -> usize {
        if let Some((bytes, _)) = &self.overflow {
            return bytes.len();
        }
        let raw = ColorSpace::Yuv420p.frame_size(picture.width(), picture.height());
        let average = (self.bitrate_bps as f32 / 8.0 / self.frame_rate) as usize;
        (average * KEY_FRAME_FACTOR)
            .max(raw / 2)
            .min(raw + raw / 16)
            + PARAMETER_SET_OVERHEAD
    }

    fn finish<'a>(&mut self, buffer: &'a mut [u8]) -> Result<Vec<EncodedFrame<'a>>> {
        self.lifecycle.ensure_ready()?;

        // OpenH264 does not reorder; only a held frame can be delayed.
        let mut output = OutputBuffer::new(buffer);
        if let Some((bytes, key_frame)) = &self.overflow {
            output.push(bytes, *key_frame)?;
        }
        self.overflow = None;

        self.lifecycle.finish()?;
        bevy::log::debug!("h264 encoder finished after {} frames", self.frame);
        output.into_frames()
    }

    fn state(&self) -> EncoderState {
        self.lifecycle.state()
    }

    fn delayed_frames(&self) -> usize {
        self.overflow.is_some() as usize
    }

    fn estimate_finish_size(&self) -> usize {
        self.overflow.as_ref().map_or(0, |(bytes, _)| bytes.len())
    }
}

fn for_each_nal(bitstream: &EncodedBitStream<'_>, mut f: impl FnMut(&[u8])) {
    for l in 0..bitstream.num_layers() {
        let Some(layer) = bitstream.layer(l) else {
            continue;
        };
        for n in 0..layer.nal_count() {
            if let Some(nal) = layer.nal_unit(n) {
                f(nal);
            }
        }
    }
}

fn framed_len(framing: NalFraming, nal: &[u8]) -> usize {
    match framing {
        NalFraming::AnnexB => nal.len(),
        NalFraming::LengthPrefixed => 4 + remove_nal_start_code(nal).len(),
    }
}

fn write_nal(framing: NalFraming, nal: &[u8], dst: &mut [u8]) -> usize {
    match framing {
        NalFraming::AnnexB => {
            dst[..nal.len()].copy_from_slice(nal);
            nal.len()
        }
        NalFraming::LengthPrefixed => {
            let nal = remove_nal_start_code(nal);
            dst[..4].copy_from_slice(&u32::to_be_bytes(nal.len() as u32));
            dst[4..4 + nal.len()].copy_from_slice(nal);
            4 + nal.len()
        }
    }
}

pub(crate) fn remove_nal_start_code(nal: &[u8]) -> &[u8] {
    if nal.starts_with(&[0, 0, 0, 1]) {
        &nal[4..]
    } else if nal.starts_with(&[0, 0, 1]) {
        &nal[3..]
    } else {
        nal
    }
}
