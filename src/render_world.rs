use crate::{picture::ColorSpace, *};
use bevy::{
    prelude::*,
    render::{
        graph::CameraDriverLabel,
        render_asset::RenderAssets,
        render_graph::{self, NodeRunError, RenderGraph, RenderGraphContext, RenderLabel},
        render_resource::{
            Buffer, BufferDescriptor, BufferUsages, ImageCopyBuffer, ImageDataLayout, Maintain,
            MapMode,
        },
        renderer::{RenderContext, RenderDevice},
        texture::{GpuImage, TextureFormatPixelInfo},
        Extract, Render, RenderApp, RenderSet,
    },
    utils::EntityHashMap,
};

pub struct CaptureRenderWorldPlugin;

impl Plugin for CaptureRenderWorldPlugin {
    fn build(&self, app: &mut App) {
        let render_app = app.sub_app_mut(RenderApp);

        render_app
            .init_resource::<Captures>()
            .add_systems(ExtractSchedule, extract_captures);

        let mut graph = render_app.world_mut().resource_mut::<RenderGraph>();
        graph.add_node(ImageCopy, ImageCopyDriver);
        graph.add_node_edge(CameraDriverLabel, ImageCopy);

        render_app.add_systems(Render, encode.after(RenderSet::Render));
    }
}

#[derive(Default, Resource)]
struct Captures {
    captures: EntityHashMap<Entity, ExtractedCapture>,
}

struct ExtractedCapture {
    sessions: Sessions,
    paused: bool,
    state: Option<ExtractedCaptureState>,
}

struct ExtractedCaptureState {
    source: Handle<Image>,
    target_buffer: Buffer,
    width: u32,
    height: u32,
    color_space: ColorSpace,
    padded_bytes_per_row: usize,
}

impl ExtractedCaptureState {
    fn init(
        source: Handle<Image>,
        images: &Assets<Image>,
        render_device: &RenderDevice,
    ) -> Option<Self> {
        let source_image = images.get(&source)?;
        let size = source_image.texture_descriptor.size;
        let format = source_image.texture_descriptor.format;

        let Some(color_space) = ColorSpace::from_texture_format(format) else {
            bevy::log::error!("Cannot capture texture format {:?}", format);
            return None;
        };

        let padded_bytes_per_row =
            RenderDevice::align_copy_bytes_per_row(size.width as usize * format.pixel_size());
        let target_buffer = render_device.create_buffer(&BufferDescriptor {
            label: Some("capture_readback_buffer"),
            size: padded_bytes_per_row as u64 * size.height as u64,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        bevy::log::debug!(
            "capturing {}x{} {:?} texture as {:?}",
            size.width,
            size.height,
            format,
            color_space
        );

        Some(Self {
            source,
            target_buffer,
            width: size.width,
            height: size.height,
            color_space,
            padded_bytes_per_row,
        })
    }
}

fn extract_captures(
    mut captures: ResMut<Captures>,
    captures_query: Extract<Query<(Entity, &Capture, &CaptureSource)>>,
    cameras_query: Extract<Query<&Camera>>,
    images: Extract<Res<Assets<Image>>>,
    render_device: Res<RenderDevice>,
) {
    captures.captures = captures_query
        .iter()
        .filter_map(|(entity, capture, capture_source)| match &capture.state {
            CaptureState::Idle => None,
            CaptureState::Capturing { sessions, paused } => {
                let (prev_sessions, prev_state) = match captures.captures.remove(&entity) {
                    Some(extracted) => (Some(extracted.sessions), extracted.state),
                    None => (None, None),
                };

                let sessions = match prev_sessions {
                    Some(sessions) => sessions,
                    None => sessions.lock().ok()?.take()?,
                };

                let camera_entity = match capture_source {
                    CaptureSource::ThisCamera => entity,
                    CaptureSource::Camera(entity) => *entity,
                };
                let source = cameras_query
                    .get(camera_entity)
                    .ok()
                    .and_then(|camera| match &camera.target {
                        RenderTarget::Image(image) => Some(image.clone()),
                        _ => None,
                    });
                let source = match source {
                    Some(source) => source,
                    None => {
                        return Some((
                            entity,
                            ExtractedCapture {
                                sessions,
                                paused: *paused,
                                state: None,
                            },
                        ))
                    }
                };

                let state = match prev_state {
                    Some(prev_state) if prev_state.source == source => Some(prev_state),
                    _ => ExtractedCaptureState::init(source, &images, &render_device),
                };

                Some((
                    entity,
                    ExtractedCapture {
                        sessions,
                        paused: *paused,
                        state,
                    },
                ))
            }
        })
        .collect();
}

#[derive(Debug, PartialEq, Eq, Clone, Hash, RenderLabel)]
struct ImageCopy;

#[derive(Default)]
struct ImageCopyDriver;

impl render_graph::Node for ImageCopyDriver {
    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), NodeRunError> {
        let (Some(captures), Some(gpu_images)) = (
            world.get_resource::<Captures>(),
            world.get_resource::<RenderAssets<GpuImage>>(),
        ) else {
            return Ok(());
        };

        for capture in captures.captures.values() {
            let capture_state = match &capture.state {
                Some(state) if !capture.paused => state,
                _ => continue,
            };

            let Some(src_image) = gpu_images.get(&capture_state.source) else {
                continue;
            };
            if src_image.size.x != capture_state.width || src_image.size.y != capture_state.height
            {
                continue;
            }

            let encoder = render_context.command_encoder();

            // Rows in the buffer are padded to COPY_BYTES_PER_ROW_ALIGNMENT.
            let padded_bytes_per_row = capture_state.padded_bytes_per_row as u32;

            let texture_extent = Extent3d {
                width: src_image.size.x,
                height: src_image.size.y,
                depth_or_array_layers: 1,
            };

            encoder.copy_texture_to_buffer(
                src_image.texture.as_image_copy(),
                ImageCopyBuffer {
                    buffer: &capture_state.target_buffer,
                    layout: ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_bytes_per_row),
                        rows_per_image: None,
                    },
                },
                texture_extent,
            );
        }

        Ok(())
    }
}

/// Maps the readback buffer and copies its rows into a [`Picture`].
fn read_back(state: &ExtractedCaptureState, render_device: &RenderDevice) -> Result<Picture> {
    let buffer_slice = state.target_buffer.slice(..);

    let (s, r) = crossbeam_channel::bounded(1);
    buffer_slice.map_async(MapMode::Read, move |r| {
        // The receiver only goes away if the wait below was abandoned.
        let _ = s.send(r);
    });
    render_device.poll(Maintain::wait()).panic_on_timeout();
    r.recv().map_err(Error::backend)?.map_err(Error::backend)?;

    let picture = Picture::from_padded_rows(
        state.width,
        state.height,
        state.color_space,
        &buffer_slice.get_mapped_range(),
        state.padded_bytes_per_row,
    );
    state.target_buffer.unmap();
    picture
}

fn encode(mut captures: ResMut<Captures>, render_device: Res<RenderDevice>) {
    for capture in captures.captures.values_mut() {
        let capture_state = match &capture.state {
            Some(state) if !capture.paused => state,
            _ => continue,
        };

        let picture = match read_back(capture_state, &render_device) {
            Ok(picture) => picture,
            Err(err) => {
                bevy::log::error!("Failed to read back frame: {}", err);
                continue;
            }
        };

        for session in &mut capture.sessions.0 {
            if let Err(err) = session.submit(&picture) {
                bevy::log::error!("Failed to encode: {}", err);
            }
        }
    }
}
