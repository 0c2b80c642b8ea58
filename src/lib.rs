#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod render_world;

pub mod convert;
pub mod encoder;
pub mod error;
pub mod picture;
pub mod session;
pub mod sink;

use bevy::{
    prelude::*,
    render::{
        camera::RenderTarget,
        render_asset::RenderAssetUsages,
        render_resource::{Extent3d, TextureDimension, TextureUsages},
        texture::TextureFormatPixelInfo,
    },
    utils::all_tuples,
};
use std::sync::Mutex;

#[doc(inline)]
pub use encoder::{EncodedFrame, EncoderState, VideoEncoder};
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use picture::{ColorSpace, ColorSpaces, Picture};
#[doc(inline)]
pub use session::EncodeSession;
#[doc(inline)]
pub use sink::FrameSink;

/// A Bevy plugin for capturing frames.
pub struct CapturePlugin;

impl Plugin for CapturePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(render_world::CaptureRenderWorldPlugin);
    }
}

/// Bundle for the capture plugin. This is usually attached to a camera.
#[derive(Default, Bundle)]
pub struct CaptureBundle {
    /// The capture component.
    pub capture: Capture,
    /// The source of the capture.
    pub camera_source: CaptureSource,
}

/// The capture component.
#[derive(Default, Component)]
pub struct Capture {
    state: CaptureState,
}

impl Capture {
    /// Starts capturing frames into the given encode sessions.
    pub fn start(&mut self, sessions: impl IntoSessions) {
        self.state = CaptureState::Capturing {
            sessions: Mutex::new(Some(Sessions(sessions.into_sessions()))),
            paused: false,
        };
    }

    /// Pauses the capture.
    pub fn pause(&mut self) {
        if let CaptureState::Capturing { paused, .. } = &mut self.state {
            *paused = true;
        }
    }

    /// Resumes the capture.
    pub fn resume(&mut self) {
        if let CaptureState::Capturing { paused, .. } = &mut self.state {
            *paused = false;
        }
    }

    /// Stops the capture. This drops the active sessions, which flushes their
    /// encoders and finishes their sinks.
    pub fn stop(&mut self) {
        self.state = CaptureState::Idle;
    }

    /// Returns `true` if the capture is currently capturing frames.
    pub fn is_capturing(&self) -> bool {
        matches!(&self.state, CaptureState::Capturing { .. })
    }

    /// Returns `true` if the capture is currently paused.
    pub fn is_paused(&self) -> bool {
        matches!(&self.state, CaptureState::Capturing { paused: true, .. })
    }
}

#[derive(Default)]
enum CaptureState {
    #[default]
    Idle,
    Capturing {
        sessions: Mutex<Option<Sessions>>,
        paused: bool,
    },
}

struct Sessions(Vec<EncodeSession>);

impl Drop for Sessions {
    fn drop(&mut self) {
        for session in self.0.drain(..) {
            if let Err(err) = session.finish() {
                bevy::log::error!("Failed to finish encode session: {}", err);
            }
        }
    }
}

/// The source of the capture.
#[derive(Default, Clone, Copy, Component)]
#[non_exhaustive]
pub enum CaptureSource {
    /// Use the camera of the entity this component is attached to.
    #[default]
    ThisCamera,
    /// Use the camera with the given entity.
    Camera(Entity),
}

/// Creates an image a camera can render into and the capture can read back.
///
/// Returns `None` for color spaces with no renderable texture format
/// (see [`ColorSpace::texture_format`]).
pub fn headless_image(width: u32, height: u32, color_space: ColorSpace) -> Option<Image> {
    let format = color_space.texture_format()?;
    let mut image = Image::new_fill(
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        &vec![0; format.pixel_size()],
        format,
        RenderAssetUsages::default(),
    );
    image.texture_descriptor.usage |=
        TextureUsages::COPY_SRC | TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING;
    Some(image)
}

/// Points a camera at a headless image so its frames can be captured without a
/// window. Implemented for `Camera`, `Camera2dBundle` and `Camera3dBundle`.
///
/// # Example
/// ```ignore
/// # use bevy::prelude::*;
/// # use bevy_frame_encoder::{CameraTargetHeadless, ColorSpace};
/// #
/// fn setup(mut commands: Commands, mut images: ResMut<Assets<Image>>) {
///    commands.spawn(Camera2dBundle::default().target_headless(512, 512, &mut images));
///    commands.spawn(
///        Camera2dBundle::default().target_headless_as(512, 512, ColorSpace::Bgra, &mut images),
///    );
/// }
/// ```
pub trait CameraTargetHeadless: Sized {
    /// Renders into a headless image whose pixels read back as `color_space`.
    ///
    /// A color space without a texture format falls back to RGBA, and the
    /// session converts from there.
    fn target_headless_as(
        self,
        width: u32,
        height: u32,
        color_space: ColorSpace,
        images: &mut Assets<Image>,
    ) -> Self;

    /// Renders into a headless RGBA image.
    fn target_headless(self, width: u32, height: u32, images: &mut Assets<Image>) -> Self {
        self.target_headless_as(width, height, ColorSpace::Rgba, images)
    }
}

impl CameraTargetHeadless for Camera {
    fn target_headless_as(
        mut self,
        width: u32,
        height: u32,
        color_space: ColorSpace,
        images: &mut Assets<Image>,
    ) -> Self {
        let image = headless_image(width, height, color_space).or_else(|| {
            bevy::log::warn!("{:?} cannot be rendered to, using RGBA", color_space);
            headless_image(width, height, ColorSpace::Rgba)
        });
        if let Some(image) = image {
            self.target = RenderTarget::Image(images.add(image));
        }
        self
    }
}

impl CameraTargetHeadless for Camera2dBundle {
    fn target_headless_as(
        mut self,
        width: u32,
        height: u32,
        color_space: ColorSpace,
        images: &mut Assets<Image>,
    ) -> Self {
        self.camera = self
            .camera
            .target_headless_as(width, height, color_space, images);
        self
    }
}

impl CameraTargetHeadless for Camera3dBundle {
    fn target_headless_as(
        mut self,
        width: u32,
        height: u32,
        color_space: ColorSpace,
        images: &mut Assets<Image>,
    ) -> Self {
        self.camera = self
            .camera
            .target_headless_as(width, height, color_space, images);
        self
    }
}

/// Convert a value into a sequence of encode sessions.
pub trait IntoSessions {
    /// Converts the value into a sequence of encode sessions.
    fn into_sessions(self) -> Vec<EncodeSession>;
}

impl IntoSessions for EncodeSession {
    fn into_sessions(self) -> Vec<EncodeSession> {
        vec![self]
    }
}

impl IntoSessions for Vec<EncodeSession> {
    fn into_sessions(self) -> Vec<EncodeSession> {
        self
    }
}

macro_rules! impl_into_sessions {
    ($($s:ident),*) => {
        impl IntoSessions for ($(impl_into_sessions!(@session $s),)*) {
            fn into_sessions(self) -> Vec<EncodeSession> {
                let ($($s,)*) = self;
                vec![$($s,)*]
            }
        }
    };
    (@session $s:ident) => {
        EncodeSession
    };
}

all_tuples!(impl_into_sessions, 0, 15, s);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encoder::raw::RawEncoder, sink::stream::StreamSink};

    fn session() -> EncodeSession {
        EncodeSession::new(RawEncoder::new(), StreamSink::new(Vec::new()))
    }

    #[test]
    fn tuples_become_sessions() {
        assert_eq!(().into_sessions().len(), 0);
        assert_eq!((session(),).into_sessions().len(), 1);
        assert_eq!((session(), session(), session()).into_sessions().len(), 3);
        assert_eq!(vec![session(), session()].into_sessions().len(), 2);
    }

    #[test]
    fn capture_state_transitions() {
        let mut capture = Capture::default();
        assert!(!capture.is_capturing());

        capture.start(session());
        assert!(capture.is_capturing());
        assert!(!capture.is_paused());

        capture.pause();
        assert!(capture.is_paused());
        capture.resume();
        assert!(!capture.is_paused());

        capture.stop();
        assert!(!capture.is_capturing());
        capture.pause();
        assert!(!capture.is_paused());
    }

    #[test]
    fn headless_images_read_back_as_their_color_space() {
        for color_space in [ColorSpace::Rgba, ColorSpace::Bgra, ColorSpace::Gray] {
            let image = headless_image(6, 4, color_space).unwrap();
            assert!(image
                .texture_descriptor
                .usage
                .contains(TextureUsages::COPY_SRC | TextureUsages::RENDER_ATTACHMENT));
            let picture = Picture::try_from(&image).unwrap();
            assert_eq!(picture.color_space(), color_space);
            assert_eq!(picture.data().len(), color_space.frame_size(6, 4));
        }
        assert!(headless_image(6, 4, ColorSpace::Yuv420p).is_none());
    }
}
