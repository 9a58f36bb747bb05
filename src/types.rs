use crate::transform::RigidTransform;
use nalgebra::{UnitQuaternion, Vector3};
use std::ffi::CStr;

/// Camera pose resolved by the localization service (map frame) or injected
/// manually. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    /// Camera center in meters.
    pub position: Vector3<f64>,
    /// Camera-to-world rotation.
    pub rotation: UnitQuaternion<f64>,
    /// Localization confidence [0..1]. Fixed placeholder for server poses.
    pub confidence: f64,
    /// Vertical field of view in degrees.
    pub fov: f64,
    pub aspect: f64,
    /// Label of the producer ("film", "manual_input", ...).
    pub source_id: String,
}

impl Pose {
    /// Pose as a homogeneous transform with unit scale.
    pub fn to_transform(&self) -> RigidTransform {
        RigidTransform::from_parts(&self.position, &self.rotation)
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.rotation.coords.iter().all(|v| v.is_finite())
            && self.fov.is_finite()
            && self.aspect.is_finite()
    }
}

/// Device pose in the local tracking frame.
///
/// Axis convention: +X right, +Y up, +Z forward (camera looks down +Z).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevicePose {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl DevicePose {
    pub fn new(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }

    /// Unit forward vector in the local frame.
    pub fn forward(&self) -> Vector3<f64> {
        self.rotation * Vector3::z()
    }

    pub fn to_transform(&self) -> RigidTransform {
        RigidTransform::from_parts(&self.position, &self.rotation)
    }
}

/// Pinhole intrinsics in pixels, valid for an image of `width` x `height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

/// An already-encoded image (PNG/JPEG) ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    /// MIME type, e.g. "image/png".
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn png(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            mime: "image/png".into(),
            width,
            height,
        }
    }
}

/// Live camera frame with the intrinsics reported by the camera, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub image: EncodedImage,
    pub intrinsics: Option<Intrinsics>,
}

/// The target frame the user picked, and where it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSelection {
    pub movie: String,
    pub scene: String,
    pub frame_id: String,
    /// Static image chosen from the album. Only uploaded once per handshake.
    pub album_image: Option<EncodedImage>,
    pub is_album: bool,
}

/// Directional hint shown to the user.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    GoStraight = 0,
    AlmostThere = 1,
    TurnRight = 2,
    TurnSlightlyRight = 3,
    TurnLeft = 4,
    TurnSlightlyLeft = 5,
    AdjustDirection = 6,
}

impl Hint {
    pub fn text(self) -> &'static str {
        self.c_text().to_str().unwrap_or_default()
    }

    /// NUL-terminated form of [`Hint::text`] for the C ABI.
    pub fn c_text(self) -> &'static CStr {
        match self {
            Hint::GoStraight => c"Keep going straight",
            Hint::AlmostThere => c"Almost there!",
            Hint::TurnRight => c"Turn right",
            Hint::TurnSlightlyRight => c"Turn slightly right",
            Hint::TurnLeft => c"Turn left",
            Hint::TurnSlightlyLeft => c"Turn slightly left",
            Hint::AdjustDirection => c"Adjust direction",
        }
    }
}

/// Coarse navigation status.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidanceStatus {
    Navigating = 0,
    NearTarget = 1,
}

impl GuidanceStatus {
    pub fn text(self) -> &'static str {
        self.c_text().to_str().unwrap_or_default()
    }

    pub fn c_text(self) -> &'static CStr {
        match self {
            GuidanceStatus::Navigating => c"Navigating...",
            GuidanceStatus::NearTarget => c"Near target - Ready for overlay",
        }
    }
}

bitflags::bitflags! {
    /// Which guidance outputs changed during a tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(C)]
    pub struct GuidanceUpdate: u32 {
        const DISTANCE = 1 << 0;
        const HINT     = 1 << 1;
        const STATUS   = 1 << 2;
        const ARROW    = 1 << 3;
        const OVERLAY  = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_device_forward_follows_yaw() {
        let pose = DevicePose::new(
            Vector3::zeros(),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::FRAC_PI_2),
        );
        let f = pose.forward();
        assert_abs_diff_eq!(f.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pose_is_finite() {
        let mut pose = Pose {
            position: Vector3::new(0.0, 0.0, 2.0),
            rotation: UnitQuaternion::identity(),
            confidence: 1.0,
            fov: 60.0,
            aspect: 16.0 / 9.0,
            source_id: "film".into(),
        };
        assert!(pose.is_finite());
        pose.position.x = f64::NAN;
        assert!(!pose.is_finite());
    }

    #[test]
    fn test_hint_texts_are_distinct() {
        let all = [
            Hint::GoStraight,
            Hint::AlmostThere,
            Hint::TurnRight,
            Hint::TurnSlightlyRight,
            Hint::TurnLeft,
            Hint::TurnSlightlyLeft,
            Hint::AdjustDirection,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.text(), b.text());
            }
        }
    }

    #[test]
    fn test_texts_match_c_texts() {
        assert_eq!(Hint::AlmostThere.text(), "Almost there!");
        let hint = Hint::TurnSlightlyLeft;
        assert_eq!(hint.c_text().to_bytes(), hint.text().as_bytes());
        assert_eq!(GuidanceStatus::Navigating.text(), "Navigating...");
        assert!(!GuidanceStatus::NearTarget.text().is_empty());
    }
}
