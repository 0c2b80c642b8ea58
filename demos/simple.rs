use bevy::{
    app::{RunMode, ScheduleRunnerPlugin},
    prelude::*,
    sprite::MaterialMesh2dBundle,
    time::TimeUpdateStrategy,
    winit::WinitPlugin,
};
use bevy_frame_encoder::{
    encoder::{
        h264::{H264Encoder, NalFraming},
        still::ImageEncoder,
    },
    sink::{frames::FramesSink, mp4::Mp4Sink, stream::StreamSink},
    CameraTargetHeadless, Capture, CaptureBundle, EncodeSession,
};
use std::{f32::consts::TAU, fs, time::Duration};

fn main() -> AppExit {
    // Create the captures directory
    fs::create_dir_all("captures/simple").unwrap();

    let mut app = App::new();

    app.add_plugins((
        // Disable the WinitPlugin to prevent the creation of a window
        DefaultPlugins.build().disable::<WinitPlugin>(),
        // Add the ScheduleRunnerPlugin to run the app in loop mode
        ScheduleRunnerPlugin {
            run_mode: RunMode::Loop { wait: None },
        },
        // Add the CapturePlugin
        bevy_frame_encoder::CapturePlugin,
    ));

    // Update the time at a fixed rate of 60 FPS
    app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_secs_f64(
        1.0 / 60.0,
    )));

    // Setup
    app.add_systems(Startup, setup);

    // Update
    app.add_systems(Update, update);

    // Run the app
    app.run()
}

#[derive(Component)]
struct Cube;

fn setup(
    mut commands: Commands,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<ColorMaterial>>,
) {
    commands.spawn((
        Camera2dBundle::default().target_headless(512, 512, &mut images),
        CaptureBundle::default(),
    ));

    commands.spawn((
        MaterialMesh2dBundle {
            mesh: meshes.add(Rectangle::new(128.0, 128.0)).into(),
            material: materials.add(Color::srgb(0.0, 0.0, 1.0)),
            ..default()
        },
        Cube,
    ));
}

fn update(
    mut app_exit: EventWriter<AppExit>,
    mut capture: Query<&mut Capture>,
    mut cubes: Query<&mut Transform, With<Cube>>,
    mut frame: Local<u32>,

    time: Res<Time>,
) {
    // Wait for some frames to make sure the app is fully initialized
    if time.elapsed() < Duration::from_secs(1) {
        return;
    }

    let mut capture = capture.single_mut();
    if !capture.is_capturing() {
        capture.start((
            EncodeSession::new(
                ImageEncoder::png(),
                FramesSink::new("captures/simple/frames", "png"),
            ),
            EncodeSession::new(
                ImageEncoder::jpeg(85),
                StreamSink::new(fs::File::create("captures/simple/simple.mjpeg").unwrap()),
            ),
            EncodeSession::new(
                H264Encoder::new_with_settings(2_000_000, 60.0)
                    .unwrap()
                    .with_framing(NalFraming::LengthPrefixed),
                Mp4Sink::new(
                    fs::File::create("captures/simple/simple.mp4").unwrap(),
                    512,
                    512,
                )
                .unwrap()
                .with_frame_duration(16),
            ),
        ));
    }

    for mut transform in &mut cubes {
        transform.rotation = Quat::from_rotation_z(*frame as f32 / 60.0 * TAU)
    }

    *frame += 1;
    if *frame >= 15 {
        app_exit.send(AppExit::Success);
    }
}
