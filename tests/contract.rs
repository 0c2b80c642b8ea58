use bevy_frame_encoder::{
    encoder::{lookahead::Lookahead, raw::RawEncoder, VideoEncoder},
    ColorSpace, ColorSpaces, EncoderState, Error, Picture,
};

fn gradient(width: u32, height: u32, color_space: ColorSpace, seed: u8) -> Picture {
    let size = color_space.frame_size(width, height);
    let data = (0..size)
        .map(|i| ((i * 7) as u8).wrapping_add(seed))
        .collect();
    Picture::new(width, height, color_space, data).unwrap()
}

fn encoders() -> Vec<(&'static str, Box<dyn VideoEncoder>)> {
    #[allow(unused_mut)]
    let mut encoders: Vec<(&'static str, Box<dyn VideoEncoder>)> = vec![
        ("raw", Box::new(RawEncoder::new())),
        ("lookahead", Box::new(Lookahead::new(RawEncoder::new(), 2))),
    ];
    #[cfg(feature = "png")]
    encoders.push(("png", Box::new(bevy_frame_encoder::encoder::still::ImageEncoder::png())));
    #[cfg(feature = "h264")]
    encoders.push((
        "h264",
        Box::new(bevy_frame_encoder::encoder::h264::H264Encoder::new().unwrap()),
    ));
    encoders
}

fn native_picture(encoder: &dyn VideoEncoder, seed: u8) -> Picture {
    let color_space = match encoder.supported_color_spaces() {
        ColorSpaces::Any => ColorSpace::Rgba,
        ColorSpaces::Only(spaces) => spaces[0],
    };
    gradient(32, 32, color_space, seed)
}

#[test]
fn frames_lie_within_the_buffer() {
    for (name, mut encoder) in encoders() {
        for seed in 0..6 {
            let picture = native_picture(encoder.as_ref(), seed);
            let mut buffer = vec![0; encoder.estimate_buffer_size(&picture)];
            let start = buffer.as_ptr() as usize;
            let end = start + buffer.len();

            if let Some(frame) = encoder.encode_frame(&picture, &mut buffer).unwrap() {
                let data = frame.data();
                assert!(data.as_ptr() as usize >= start, "{name}");
                assert!(data.as_ptr() as usize + data.len() <= end, "{name}");
                assert_eq!(frame.range().len(), frame.len(), "{name}");
            }
        }
    }
}

#[test]
fn encoding_after_finish_is_rejected() {
    for (name, mut encoder) in encoders() {
        let picture = native_picture(encoder.as_ref(), 0);
        let mut buffer = vec![0; encoder.estimate_buffer_size(&picture)];
        encoder.encode_frame(&picture, &mut buffer).unwrap();

        let mut flush = vec![0; encoder.estimate_finish_size()];
        encoder.finish(&mut flush).unwrap();
        assert_eq!(encoder.state(), EncoderState::Finished, "{name}");

        assert!(
            matches!(
                encoder.encode_frame(&picture, &mut buffer),
                Err(Error::Finished)
            ),
            "{name}"
        );
        assert!(
            matches!(encoder.finish(&mut flush), Err(Error::Finished)),
            "{name}"
        );
    }
}

#[test]
fn color_space_query_is_stable() {
    for (name, mut encoder) in encoders() {
        let before = encoder.supported_color_spaces();
        let picture = native_picture(encoder.as_ref(), 1);
        let mut buffer = vec![0; encoder.estimate_buffer_size(&picture)];
        encoder.encode_frame(&picture, &mut buffer).unwrap();
        assert_eq!(encoder.supported_color_spaces(), before, "{name}");
        assert_eq!(encoder.supported_color_spaces(), before, "{name}");
    }
}

#[test]
fn one_byte_buffer_fails_without_writing() {
    for (name, mut encoder) in encoders() {
        if name == "lookahead" {
            // Held pictures need no output space.
            continue;
        }
        let picture = native_picture(encoder.as_ref(), 2);
        let mut buffer = [0xA5u8; 1];
        let err = encoder.encode_frame(&picture, &mut buffer).unwrap_err();
        assert!(err.is_buffer_too_small(), "{name}: {err}");
        assert_eq!(buffer, [0xA5], "{name}");
        assert_eq!(encoder.state(), EncoderState::Ready, "{name}");
    }
}

#[test]
fn yuv_only_encoder_rejects_rgb() {
    let mut encoder = RawEncoder::only(&[ColorSpace::Yuv420p, ColorSpace::Yuv444p]);
    assert_eq!(
        encoder.supported_color_spaces(),
        ColorSpaces::Only(&[ColorSpace::Yuv444p, ColorSpace::Yuv420p])
    );

    let rgb = gradient(8, 8, ColorSpace::Rgb, 0);
    let mut buffer = vec![0u8; 1024];
    assert!(matches!(
        encoder.encode_frame(&rgb, &mut buffer),
        Err(Error::UnsupportedColorSpace {
            found: ColorSpace::Rgb,
            ..
        })
    ));
    assert!(buffer.iter().all(|&b| b == 0));
}

#[test]
fn lookahead_delays_then_flushes_in_order() {
    let mut encoder = Lookahead::new(RawEncoder::new(), 2);
    let pictures: Vec<Picture> = (1..=5)
        .map(|n| Picture::filled(4, 4, ColorSpace::Gray, n).unwrap())
        .collect();

    let mut out = Vec::new();
    let mut buffer = vec![0u8; 16];
    for picture in &pictures {
        if let Some(frame) = encoder.encode_frame(picture, &mut buffer).unwrap() {
            out.push(frame.data()[0]);
        }
    }
    assert_eq!(out, [1, 2, 3]);
    assert_eq!(encoder.delayed_frames(), 2);

    let mut flush = vec![0u8; encoder.estimate_finish_size()];
    let frames = encoder.finish(&mut flush).unwrap();
    out.extend(frames.iter().map(|frame| frame.data()[0]));

    assert_eq!(out, [1, 2, 3, 4, 5]);
}

#[test]
fn identity_encoder_reproduces_rgba_input() {
    let picture = gradient(16, 16, ColorSpace::Rgba, 9);
    let mut encoder = RawEncoder::new();
    let mut buffer = vec![0u8; 2 * encoder.estimate_buffer_size(&picture)];
    let frame = encoder.encode_frame(&picture, &mut buffer).unwrap().unwrap();
    assert!(frame.is_key_frame());
    assert_eq!(frame.data(), picture.data());
}
