//! C FFI layer for scenelock.
//!
//! Provides an opaque session handle for C/C++/Unity/Swift hosts. The host
//! pushes the device pose, camera frame and selection, calls `sl_tick` once
//! per frame, then reads guidance and polls events.
//! The generated C header is written to `include/scenelock.h` by cbindgen.

use crate::config::SessionConfig;
use crate::error::{ErrorKind, LastError};
use crate::events::{SessionEvent, Subscription};
use crate::session::LocalizationSession;
use crate::source::HostFeed;
use crate::transform::RigidTransform;
use crate::types::{
    CameraFrame, DevicePose, EncodedImage, FrameSelection, GuidanceStatus, Hint, Intrinsics,
};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use std::ffi::{c_char, c_int, CStr};

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque session handle for C consumers.
pub struct SlSession {
    session: LocalizationSession,
    feed: HostFeed,
    events: Subscription<SessionEvent>,
}

/// Rigid pose in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlPose {
    /// Position [x, y, z] in meters (+X right, +Y up, +Z forward).
    pub position: [f64; 3],
    /// Quaternion [w, x, y, z].
    pub rotation: [f64; 4],
}

/// Camera intrinsics at `width` x `height`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SlIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

/// Guidance snapshot in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SlGuidance {
    pub active: bool,
    pub overlay_triggered: bool,
    pub distance_m: f64,
    pub yaw_deg: f64,
    pub hint: Hint,
    pub status: GuidanceStatus,
    pub arrow: SlPose,
}

/// Target pose for a frustum visualizer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SlTarget {
    pub pose: SlPose,
    /// Vertical field of view in degrees.
    pub fov: f64,
    pub aspect: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlEventKind {
    CaptureStarted = 0,
    CaptureEnabled = 1,
    Localized = 2,
    AlbumFirstFrameProcessed = 3,
    TargetPose = 4,
    AlignmentReset = 5,
    HintChanged = 6,
    StatusChanged = 7,
    Distance = 8,
    Arrow = 9,
    GuidanceVisible = 10,
    OverlayShow = 11,
    ServerReachable = 12,
    Error = 13,
}

/// One session event. Only the fields relevant to `kind` are meaningful.
///
/// - `CaptureStarted`: `request_id`, `flag` = album image
/// - `CaptureEnabled`, `GuidanceVisible`, `ServerReachable`: `flag`
/// - `Localized`, `TargetPose`: `pose`, `values` = [fov, aspect]
/// - `Arrow`: `pose`
/// - `Distance`: `values[0]` meters
/// - `OverlayShow`: `values` = [distance, yaw]
/// - `Error`: `error_kind`; message via `sl_last_error()`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SlEvent {
    pub kind: SlEventKind,
    pub request_id: u64,
    pub flag: bool,
    pub hint: Hint,
    pub status: GuidanceStatus,
    pub error_kind: ErrorKind,
    pub pose: SlPose,
    pub values: [f64; 2],
}

impl SlEvent {
    fn of(kind: SlEventKind) -> Self {
        Self {
            kind,
            request_id: 0,
            flag: false,
            hint: Hint::GoStraight,
            status: GuidanceStatus::Navigating,
            error_kind: ErrorKind::Internal,
            pose: SlPose::default(),
            values: [0.0; 2],
        }
    }
}

fn pose_to_c(position: &Vector3<f64>, rotation: &UnitQuaternion<f64>) -> SlPose {
    SlPose {
        position: [position.x, position.y, position.z],
        rotation: [rotation.w, rotation.i, rotation.j, rotation.k],
    }
}

fn pose_from_c(pose: &SlPose) -> Option<DevicePose> {
    let [w, x, y, z] = pose.rotation;
    let q = Quaternion::new(w, x, y, z);
    if !(q.norm() > f64::EPSILON) || !pose.position.iter().all(|v| v.is_finite()) {
        return None;
    }
    let [px, py, pz] = pose.position;
    Some(DevicePose::new(
        Vector3::new(px, py, pz),
        UnitQuaternion::from_quaternion(q),
    ))
}

unsafe fn opt_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

unsafe fn bytes(data: *const u8, len: usize) -> Option<Vec<u8>> {
    if data.is_null() || len == 0 {
        None
    } else {
        Some(std::slice::from_raw_parts(data, len).to_vec())
    }
}

fn event_to_c(event: SessionEvent) -> SlEvent {
    match event {
        SessionEvent::CaptureStarted {
            request_id,
            album_first,
        } => SlEvent {
            request_id,
            flag: album_first,
            ..SlEvent::of(SlEventKind::CaptureStarted)
        },
        SessionEvent::CaptureEnabled(on) => SlEvent {
            flag: on,
            ..SlEvent::of(SlEventKind::CaptureEnabled)
        },
        SessionEvent::Localized(pose) => SlEvent {
            pose: pose_to_c(&pose.position, &pose.rotation),
            values: [pose.fov, pose.aspect],
            ..SlEvent::of(SlEventKind::Localized)
        },
        SessionEvent::AlbumFirstFrameProcessed => {
            SlEvent::of(SlEventKind::AlbumFirstFrameProcessed)
        }
        SessionEvent::TargetPose {
            transform,
            fov,
            aspect,
        } => SlEvent {
            pose: pose_to_c(&transform.position(), &transform.rotation()),
            values: [fov, aspect],
            ..SlEvent::of(SlEventKind::TargetPose)
        },
        SessionEvent::AlignmentReset => SlEvent::of(SlEventKind::AlignmentReset),
        SessionEvent::HintChanged(hint) => SlEvent {
            hint,
            ..SlEvent::of(SlEventKind::HintChanged)
        },
        SessionEvent::StatusChanged(status) => SlEvent {
            status,
            ..SlEvent::of(SlEventKind::StatusChanged)
        },
        SessionEvent::Distance { meters, .. } => SlEvent {
            values: [meters, 0.0],
            ..SlEvent::of(SlEventKind::Distance)
        },
        SessionEvent::Arrow(arrow) => SlEvent {
            pose: pose_to_c(&arrow.position, &arrow.rotation),
            ..SlEvent::of(SlEventKind::Arrow)
        },
        SessionEvent::GuidanceVisible(on) => SlEvent {
            flag: on,
            ..SlEvent::of(SlEventKind::GuidanceVisible)
        },
        SessionEvent::OverlayShow { distance, yaw_deg } => SlEvent {
            values: [distance, yaw_deg],
            ..SlEvent::of(SlEventKind::OverlayShow)
        },
        SessionEvent::ServerReachable(on) => SlEvent {
            flag: on,
            ..SlEvent::of(SlEventKind::ServerReachable)
        },
        SessionEvent::Error { kind, message } => {
            LAST_ERROR.set_message(message);
            SlEvent {
                error_kind: kind,
                ..SlEvent::of(SlEventKind::Error)
            }
        }
    }
}

/// Create a session.
///
/// `config_json` may be NULL to use defaults with `SCENELOCK_*` environment
/// overrides. A non-NULL `server_url` overrides the configured one.
/// Returns NULL on error (check sl_last_error()).
///
/// # Safety
/// `server_url` and `config_json` must be null-terminated strings, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_session_create(
    server_url: *const c_char,
    config_json: *const c_char,
) -> *mut SlSession {
    let config = match opt_str(config_json) {
        Some(json) => SessionConfig::from_json_str(&json),
        None => Ok(SessionConfig::from_env()),
    };
    let mut config = match config {
        Ok(c) => c,
        Err(e) => {
            LAST_ERROR.set(&e);
            return std::ptr::null_mut();
        }
    };
    if let Some(url) = opt_str(server_url) {
        config.server_url = url;
    }

    match LocalizationSession::connect(config) {
        Ok(mut session) => {
            let events = session.subscribe();
            Box::into_raw(Box::new(SlSession {
                session,
                feed: HostFeed::new(),
                events,
            }))
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Destroy a session. An upload in progress finishes first.
///
/// # Safety
/// `s` must be a pointer returned by `sl_session_create`, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_session_destroy(s: *mut SlSession) {
    if !s.is_null() {
        drop(Box::from_raw(s));
    }
}

/// Set the current device pose. NULL marks tracking as lost.
///
/// # Safety
/// `s` must be a valid session pointer, `pose` a valid pose pointer or null.
#[no_mangle]
pub unsafe extern "C" fn sl_set_device_pose(s: *mut SlSession, pose: *const SlPose) {
    if s.is_null() {
        return;
    }
    let s = &mut *s;
    match pose.as_ref().and_then(pose_from_c) {
        Some(p) => s.feed.set_device_pose(p),
        None => s.feed.clear_device_pose(),
    }
}

/// Set the latest encoded (PNG) camera frame. NULL `data` clears it.
///
/// # Safety
/// `data` must point to `len` readable bytes, or be null. `intrinsics` must
/// be a valid pointer or null.
#[no_mangle]
pub unsafe extern "C" fn sl_set_camera_frame(
    s: *mut SlSession,
    data: *const u8,
    len: usize,
    width: u32,
    height: u32,
    intrinsics: *const SlIntrinsics,
) {
    if s.is_null() {
        return;
    }
    let s = &mut *s;
    let Some(image) = bytes(data, len) else {
        s.feed.clear_camera_frame();
        return;
    };
    let intrinsics = intrinsics.as_ref().map(|k| Intrinsics {
        fx: k.fx,
        fy: k.fy,
        cx: k.cx,
        cy: k.cy,
        width: k.width,
        height: k.height,
    });
    s.feed.set_camera_frame(CameraFrame {
        image: EncodedImage::png(image, width, height),
        intrinsics,
    });
}

/// Set the frame being navigated to. When `is_album` is set, `album_data`
/// holds the encoded album image; a different image restarts the album
/// handshake.
///
/// # Safety
/// String arguments must be null-terminated or null; `album_data` must
/// point to `album_len` readable bytes, or be null.
#[no_mangle]
pub unsafe extern "C" fn sl_set_selection(
    s: *mut SlSession,
    movie: *const c_char,
    scene: *const c_char,
    frame_id: *const c_char,
    album_data: *const u8,
    album_len: usize,
    album_width: u32,
    album_height: u32,
    is_album: bool,
) {
    if s.is_null() {
        return;
    }
    let s = &mut *s;
    let album_image = bytes(album_data, album_len)
        .map(|b| EncodedImage::png(b, album_width, album_height));

    let previous = s.feed.current_selection();
    let new_album = is_album
        && (!previous.is_album
            || previous.album_image.as_ref().map(|i| &i.bytes)
                != album_image.as_ref().map(|i| &i.bytes));

    s.feed.set_selection(FrameSelection {
        movie: opt_str(movie).unwrap_or_default(),
        scene: opt_str(scene).unwrap_or_default(),
        frame_id: opt_str(frame_id).unwrap_or_default(),
        album_image,
        is_album,
    });
    if new_album {
        s.session.reset_album_handshake();
    }
}

/// Advance one frame by `dt` seconds.
/// Returns the guidance update bits for this frame (0 while guidance is inactive).
///
/// # Safety
/// `s` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_tick(s: *mut SlSession, dt: f64) -> u32 {
    if s.is_null() {
        return 0;
    }
    let s = &mut *s;
    s.session
        .tick(dt, &mut s.feed)
        .map(|frame| frame.updates.bits())
        .unwrap_or(0)
}

/// Read the current guidance state. Returns 0 on success, -1 on error.
///
/// # Safety
/// `s` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_guidance(s: *const SlSession, out: *mut SlGuidance) -> c_int {
    if s.is_null() || out.is_null() {
        return -1;
    }
    let guidance = (*s).session.guidance();
    let snapshot = match guidance.last_frame() {
        Some(f) => SlGuidance {
            active: guidance.is_active(),
            overlay_triggered: guidance.overlay_triggered(),
            distance_m: f.distance_m,
            yaw_deg: f.yaw_deg,
            hint: f.hint,
            status: f.status,
            arrow: pose_to_c(&f.arrow.position, &f.arrow.rotation),
        },
        None => SlGuidance {
            active: guidance.is_active(),
            overlay_triggered: guidance.overlay_triggered(),
            distance_m: f64::INFINITY,
            yaw_deg: 0.0,
            hint: Hint::AdjustDirection,
            status: GuidanceStatus::Navigating,
            arrow: SlPose::default(),
        },
    };
    out.write(snapshot);
    0
}

/// Read the aligned target pose. Returns 0 on success, -1 when no target
/// has been localized yet.
///
/// # Safety
/// `s` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_target_pose(s: *const SlSession, out: *mut SlTarget) -> c_int {
    if s.is_null() || out.is_null() {
        return -1;
    }
    let aligner = (*s).session.aligner();
    let Some(pose) = aligner.last_target_pose() else {
        return -1;
    };
    let target = aligner.get_target_in_local_frame();
    out.write(SlTarget {
        pose: pose_to_c(&target.position(), &target.rotation()),
        fov: pose.fov,
        aspect: pose.aspect,
    });
    0
}

/// Pop the next event. Returns 1 when `out` was written, 0 when the queue is empty.
///
/// # Safety
/// `s` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_poll_event(s: *mut SlSession, out: *mut SlEvent) -> c_int {
    if s.is_null() || out.is_null() {
        return 0;
    }
    match (*s).events.try_recv() {
        Some(event) => {
            out.write(event_to_c(event));
            1
        }
        None => 0,
    }
}

/// # Safety
/// `s` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_set_capture_enabled(s: *mut SlSession, enabled: bool) {
    if let Some(s) = s.as_mut() {
        s.session.set_capture_enabled(enabled);
    }
}

/// # Safety
/// `s` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_reset_alignment(s: *mut SlSession) {
    if let Some(s) = s.as_mut() {
        s.session.reset_alignment();
    }
}

/// Inject a map-frame target pose, bypassing the service.
/// Returns 0 on success, -1 on an invalid pose.
///
/// # Safety
/// `s` and `pose` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_set_manual_pose(s: *mut SlSession, pose: *const SlPose) -> c_int {
    let (Some(s), Some(pose)) = (s.as_mut(), pose.as_ref()) else {
        return -1;
    };
    let Some(p) = pose_from_c(pose) else {
        LAST_ERROR.set(&crate::ScenelockError::InvalidTransform);
        return -1;
    };
    s.session
        .set_manual_pose(&RigidTransform::from_parts(&p.position, &p.rotation));
    0
}

/// The overlay was dismissed; guidance resumes after the cooldown.
///
/// # Safety
/// `s` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_overlay_hidden(s: *mut SlSession) {
    if let Some(s) = s.as_mut() {
        s.session.overlay_hidden();
    }
}

/// Ping the service; the answer arrives as a `ServerReachable` event.
///
/// # Safety
/// `s` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn sl_probe_server(s: *mut SlSession) {
    if let Some(s) = s.as_mut() {
        s.session.probe_server();
    }
}

/// Display text for a hint. The pointer is static.
#[no_mangle]
pub extern "C" fn sl_hint_text(hint: Hint) -> *const c_char {
    hint.c_text().as_ptr()
}

/// Display text for a status. The pointer is static.
#[no_mangle]
pub extern "C" fn sl_status_text(status: GuidanceStatus) -> *const c_char {
    status.c_text().as_ptr()
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next scenelock API call.
#[no_mangle]
pub extern "C" fn sl_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GuidanceUpdate;

    fn create() -> *mut SlSession {
        // Nothing listens on port 9; only the manual path is exercised.
        let url = c"http://127.0.0.1:9/upload";
        let config = cr#"{"capture":{"interval_s":1000}}"#;
        unsafe { sl_session_create(url.as_ptr(), config.as_ptr()) }
    }

    #[test]
    fn test_manual_pose_drives_guidance() {
        let s = create();
        assert!(!s.is_null());
        unsafe {
            let device = SlPose {
                position: [0.0, 0.0, 0.0],
                rotation: [1.0, 0.0, 0.0, 0.0],
            };
            sl_set_device_pose(s, &device);
            let target = SlPose {
                position: [0.0, 0.0, 3.0],
                rotation: [1.0, 0.0, 0.0, 0.0],
            };
            assert_eq!(sl_set_manual_pose(s, &target), 0);

            let bits = sl_tick(s, 0.016);
            assert!(GuidanceUpdate::from_bits_truncate(bits).contains(GuidanceUpdate::HINT));

            let mut g = std::mem::MaybeUninit::<SlGuidance>::uninit();
            assert_eq!(sl_guidance(s, g.as_mut_ptr()), 0);
            let g = g.assume_init();
            assert!(g.active);
            assert!((g.distance_m - 3.0).abs() < 1e-9);
            assert_eq!(g.hint, Hint::GoStraight);

            let mut t = SlTarget::default();
            assert_eq!(sl_target_pose(s, &mut t), 0);
            assert!((t.pose.position[2] - 3.0).abs() < 1e-9);

            let mut kinds = Vec::new();
            let mut ev = SlEvent::of(SlEventKind::Error);
            while sl_poll_event(s, &mut ev) == 1 {
                kinds.push(ev.kind);
            }
            assert!(kinds.contains(&SlEventKind::Localized));
            assert!(kinds.contains(&SlEventKind::GuidanceVisible));
            assert!(kinds.contains(&SlEventKind::HintChanged));

            sl_session_destroy(s);
        }
    }

    #[test]
    fn test_invalid_inputs() {
        unsafe {
            let bad = c"https://example.com/upload";
            assert!(sl_session_create(bad.as_ptr(), std::ptr::null()).is_null());
            assert!(!sl_last_error().is_null());

            let s = create();
            let zero = SlPose::default();
            assert_eq!(sl_set_manual_pose(s, &zero), -1);
            let mut t = SlTarget::default();
            assert_eq!(sl_target_pose(s, &mut t), -1);
            assert_eq!(sl_tick(std::ptr::null_mut(), 0.016), 0);
            sl_session_destroy(s);
        }
    }

    #[test]
    fn test_text_lookups() {
        let text = unsafe { CStr::from_ptr(sl_hint_text(Hint::TurnLeft)) };
        assert_eq!(text.to_str().unwrap(), Hint::TurnLeft.text());
        let text = unsafe { CStr::from_ptr(sl_status_text(GuidanceStatus::NearTarget)) };
        assert_eq!(text.to_str().unwrap(), GuidanceStatus::NearTarget.text());
    }
}
