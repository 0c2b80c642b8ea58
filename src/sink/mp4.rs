//! MP4 container for H.264 frames.

use super::FrameSink;
use crate::{
    encoder::EncodedFrame,
    error::{Error, Result},
};
use ::mp4::{
    AvcConfig, FourCC, MediaConfig, Mp4Config, Mp4Sample, Mp4Writer, TrackConfig, TrackType,
};
use std::io::{Seek, Write};

const TIMESCALE: u32 = 1000;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

/// A sink that muxes H.264 frames into an MP4 file.
///
/// Expects [`NalFraming::LengthPrefixed`](crate::encoder::h264::NalFraming::LengthPrefixed)
/// frames. SPS and PPS are taken from the first frame, which must be a key frame, and
/// are kept out of the samples.
pub struct Mp4Sink<W> {
    mp4: Mp4Writer<W>,
    mp4_track_added: bool,
    frame: u64,
    frame_duration: u32,
    width: u16,
    height: u16,
}

impl<W: Write + Seek> Mp4Sink<W> {
    /// Creates a new MP4 sink that writes the MP4 to the given writer, e.g. a file.
    /// The width and height of the video should match the dimensions of the pictures.
    pub fn new(writer: W, width: u16, height: u16) -> Result<Self> {
        let brand = |name: &str| name.parse::<FourCC>().map_err(Error::backend);
        let mp4 = Mp4Writer::write_start(
            writer,
            &Mp4Config {
                major_brand: brand("isom")?,
                minor_version: 512,
                compatible_brands: vec![
                    brand("isom")?,
                    brand("iso2")?,
                    brand("avc1")?,
                    brand("mp41")?,
                ],
                timescale: TIMESCALE,
            },
        )
        .map_err(Error::backend)?;

        Ok(Self {
            mp4,
            mp4_track_added: false,
            frame: 0,
            frame_duration: 100,
            width,
            height,
        })
    }

    /// Sets the duration of every frame in milliseconds.
    pub fn with_frame_duration(mut self, millis: u32) -> Self {
        self.frame_duration = millis.max(1);
        self
    }

    fn add_track(&mut self, units: &[&[u8]]) -> Result<()> {
        let find = |kind: u8| {
            units
                .iter()
                .find(|unit| nal_type(unit) == Some(kind))
                .map(|unit| unit.to_vec())
                .ok_or_else(|| {
                    Error::backend(format!("first key frame carries no NAL type {kind}"))
                })
        };

        self.mp4
            .add_track(&TrackConfig {
                track_type: TrackType::Video,
                timescale: TIMESCALE,
                language: "und".to_string(),
                media_conf: MediaConfig::AvcConfig(AvcConfig {
                    width: self.width,
                    height: self.height,
                    seq_param_set: find(NAL_SPS)?,
                    pic_param_set: find(NAL_PPS)?,
                }),
            })
            .map_err(Error::backend)?;
        self.mp4_track_added = true;
        Ok(())
    }
}

impl<W: Write + Seek> FrameSink for Mp4Sink<W> {
    fn write_frame(&mut self, frame: &EncodedFrame<'_>) -> Result<()> {
        let units = length_prefixed_units(frame.data())?;

        if !self.mp4_track_added {
            if !frame.is_key_frame() {
                return Err(Error::backend("mp4 stream must start with a key frame"));
            }
            self.add_track(&units)?;
        }

        let mut bytes = Vec::with_capacity(frame.len());
        for unit in units
            .iter()
            .filter(|unit| !matches!(nal_type(unit), Some(NAL_SPS | NAL_PPS | NAL_AUD)))
        {
            bytes.extend_from_slice(&u32::to_be_bytes(unit.len() as u32));
            bytes.extend_from_slice(unit);
        }

        self.mp4
            .write_sample(
                1,
                &Mp4Sample {
                    start_time: self.frame * self.frame_duration as u64,
                    duration: self.frame_duration,
                    rendering_offset: 0,
                    is_sync: frame.is_key_frame(),
                    bytes: bytes.into(),
                },
            )
            .map_err(Error::backend)?;

        self.frame += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.mp4.write_end().map_err(Error::backend)?;
        bevy::log::debug!("mp4 finished after {} samples", self.frame);
        Ok(())
    }
}

fn nal_type(unit: &[u8]) -> Option<u8> {
    unit.first().map(|header| header & 0x1F)
}

fn length_prefixed_units(mut data: &[u8]) -> Result<Vec<&[u8]>> {
    let mut units = Vec::new();
    while !data.is_empty() {
        let Some((len, rest)) = data.split_first_chunk::<4>() else {
            return Err(Error::backend("truncated NAL length prefix"));
        };
        let len = u32::from_be_bytes(*len) as usize;
        if rest.len() < len {
            return Err(Error::backend(format!(
                "NAL unit of {len} bytes exceeds the {} remaining",
                rest.len()
            )));
        }
        let (unit, rest) = rest.split_at(len);
        units.push(unit);
        data = rest;
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    fn prefixed(units: &[&[u8]]) -> Vec<u8> {
        let mut data = Vec::new();
        for unit in units {
            data.extend_from_slice(&(unit.len() as u32).to_be_bytes());
            data.extend_from_slice(unit);
        }
        data
    }

    #[test]
    fn splits_length_prefixed_units() {
        let data = prefixed(&[&[0x67, 1], &[0x68], &[0x65, 2, 3]]);
        let units = length_prefixed_units(&data).unwrap();
        let expected: [&[u8]; 3] = [&[0x67, 1], &[0x68], &[0x65, 2, 3]];
        assert_eq!(units, expected);
        assert_eq!(nal_type(units[2]), Some(5));

        assert!(length_prefixed_units(&[0, 0, 0, 5, 1]).is_err());
        assert!(length_prefixed_units(&[0, 0]).is_err());
    }

    #[test]
    fn rejects_stream_without_leading_key_frame() {
        let dir = TempDir::new("mp4_sink").unwrap();
        let file = fs::File::create(dir.path().join("out.mp4")).unwrap();
        let mut sink = Mp4Sink::new(file, 16, 16).unwrap();

        let data = prefixed(&[&[0x41, 0]]);
        let frame = EncodedFrame::new(&data, 0..data.len(), false).unwrap();
        assert!(sink.write_frame(&frame).is_err());
    }

    #[test]
    fn writes_a_playable_container() {
        let dir = TempDir::new("mp4_sink").unwrap();
        let path = dir.path().join("out.mp4");
        let file = fs::File::create(&path).unwrap();
        let mut sink = Mp4Sink::new(file, 16, 16).unwrap().with_frame_duration(40);

        let key = prefixed(&[&[0x67, 0x42, 0, 0x1E], &[0x68, 0xCE], &[0x65, 0x88]]);
        let delta = prefixed(&[&[0x41, 0x9A]]);
        sink.write_frame(&EncodedFrame::new(&key, 0..key.len(), true).unwrap())
            .unwrap();
        sink.write_frame(&EncodedFrame::new(&delta, 0..delta.len(), false).unwrap())
            .unwrap();
        Box::new(sink).finish().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
        assert!(bytes.windows(4).any(|window| window == b"moov"));
    }
}
