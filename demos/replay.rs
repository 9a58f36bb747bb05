//! Drive a session with a synthetic walk toward the localized target.
//!
//! Phase 1 stands still and uploads until the service localizes the frame.
//! Phase 2 steps back 3 m and walks toward the target, printing hint and
//! distance changes until the overlay fires.
//!
//! Usage:
//!   cargo run --example mock_server &
//!   cargo run --example replay [server_url] [image.png]
//!
//! Without a server URL the reference mock pose is applied locally.

use nalgebra::{UnitQuaternion, Vector3};
use scenelock::protocol::ProtocolClient;
use scenelock::{
    CameraFrame, DevicePose, EncodedImage, HostFeed, LocalizationSession, SessionConfig,
    SessionEvent,
};
use std::time::{Duration, Instant};

const DT: f64 = 1.0 / 60.0;
const WALK_SPEED_M_S: f64 = 0.6;
const TURN_RATE_DEG_S: f64 = 45.0;
const MAX_SECONDS: f64 = 60.0;

fn main() {
    env_logger::init();

    let server_url = std::env::args().nth(1);
    let image = match std::env::args().nth(2) {
        Some(path) => match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Failed to read {}: {}", path, e);
                std::process::exit(1);
            }
        },
        // The mock service does not decode images.
        None => b"\x89PNG\r\n\x1a\nsynthetic".to_vec(),
    };

    let mut config = SessionConfig::from_env();
    config.capture.interval_s = 0.5;
    if let Some(url) = &server_url {
        config.server_url = url.clone();
    }

    let mut session = match LocalizationSession::connect(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start session: {}", e);
            std::process::exit(1);
        }
    };
    let events = session.subscribe();

    let mut feed = HostFeed::new();
    let mut device = DevicePose::identity();
    feed.set_device_pose(device);
    feed.set_camera_frame(CameraFrame {
        image: EncodedImage::png(image, 640, 480),
        intrinsics: None,
    });

    if server_url.is_none() {
        println!("No server URL, applying the mock pose locally");
        session.set_capture_enabled(false);
        session.apply_localization(ProtocolClient::mock_pose(), &device);
    } else {
        session.probe_server();
    }

    let start = Instant::now();
    let mut sim_time = 0.0;
    let mut walking = false;

    while sim_time < MAX_SECONDS {
        let frame = session.tick(DT, &mut feed);
        sim_time += DT;

        let mut done = false;
        for event in events.drain() {
            match event {
                SessionEvent::CaptureStarted { request_id, album_first } => {
                    println!("[{:5.2}s] upload #{} (album={})", sim_time, request_id, album_first)
                }
                SessionEvent::ServerReachable(ok) => {
                    println!("[{:5.2}s] server reachable: {}", sim_time, ok)
                }
                SessionEvent::Localized(pose) => {
                    let p = pose.position;
                    println!(
                        "[{:5.2}s] localized ({}) at [{:+.3}, {:+.3}, {:+.3}]",
                        sim_time, pose.source_id, p.x, p.y, p.z
                    );
                }
                SessionEvent::HintChanged(hint) => {
                    println!("[{:5.2}s] hint: {}", sim_time, hint.text())
                }
                SessionEvent::StatusChanged(status) => {
                    println!("[{:5.2}s] status: {}", sim_time, status.text())
                }
                SessionEvent::OverlayShow { distance, yaw_deg } => {
                    println!(
                        "[{:5.2}s] overlay! distance {:.2}m, yaw {:+.1}°",
                        sim_time, distance, yaw_deg
                    );
                    // The first localization puts the target on the device itself.
                    done = walking;
                }
                SessionEvent::Error { kind, message } => {
                    println!("[{:5.2}s] error {:?}: {}", sim_time, kind, message)
                }
                _ => {}
            }
        }
        if done {
            break;
        }

        if session.guidance().is_active() && !walking {
            // Step back and off to the side, facing forward.
            walking = true;
            let target = session.guidance().target().position();
            let start = target + Vector3::new(1.5, 0.0, -3.0);
            device = DevicePose::new(start, UnitQuaternion::identity());
            session.overlay_hidden();
            println!("[{:5.2}s] walking back to the target", sim_time);
        } else if walking {
            if let Some(frame) = &frame {
                device = step_toward(&device, frame.yaw_deg, frame.distance_m);
            }
        }
        feed.set_device_pose(device);

        std::thread::sleep(Duration::from_secs_f64(DT));
    }

    if let Some(frame) = session.guidance().last_frame() {
        println!("{}  {}  {}", frame.distance_label, frame.hint.text(), frame.status.text());
    }
    println!("Finished in {:.1}s wall time", start.elapsed().as_secs_f64());
}

/// Turn toward the target and walk forward.
fn step_toward(device: &DevicePose, yaw_deg: f64, distance: f64) -> DevicePose {
    let max_turn = TURN_RATE_DEG_S * DT;
    let turn = yaw_deg.clamp(-max_turn, max_turn).to_radians();
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), turn) * device.rotation;

    let speed = if distance < 0.5 { WALK_SPEED_M_S * 0.3 } else { WALK_SPEED_M_S };
    let step = if yaw_deg.abs() < 30.0 { speed * DT } else { 0.0 };
    let forward = rotation * Vector3::z();
    DevicePose::new(device.position + forward * step, rotation)
}
