use crate::config::CaptureConfig;
use crate::types::{DevicePose, EncodedImage, FrameSelection, Intrinsics, Pose};
use crate::{Result, ScenelockError};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

// -- Session defaults (not carried on the wire) --
pub const DEFAULT_FOV_DEG: f64 = 60.0;
pub const DEFAULT_ASPECT: f64 = 16.0 / 9.0;
pub const DEFAULT_CONFIDENCE: f64 = 1.0;
pub const SERVER_SOURCE_ID: &str = "film";
pub const MANUAL_SOURCE_ID: &str = "manual_input";
pub const MOCK_SOURCE_ID: &str = "mock_frame_001";

pub const DEFAULT_REJECTION: &str = "Server returned success=false";

// -- Multipart field names --
pub const IMAGE_FIELD: &str = "image";
pub const META_FIELD: &str = "meta_json";

pub const INTRINSICS_MODEL: &str = "pinhole";
pub const COORD_UNITY: &str = "Unity(+Z forward)";
pub const COORD_OPENCV: &str = "OpenCV(+Z forward)";

/// Below this norm a wire quaternion is treated as garbage.
const MIN_QUATERNION_NORM: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notes {
    #[serde(rename = "mirrorY_applied")]
    pub mirror_y_applied: bool,
    pub coord: String,
}

/// JSON metadata sent next to the image in every upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub timestamp_ms: i64,
    /// Camera-to-world rotation [x, y, z, w].
    pub rotation_xyzw: [f64; 4],
    /// Camera center [x, y, z] in meters.
    pub translation_m: [f64; 3],
    pub image_size: ImageSize,
    pub intrinsics: WireIntrinsics,
    pub notes: Notes,
    #[serde(rename = "movieName")]
    pub movie_name: String,
    #[serde(rename = "sceneName")]
    pub scene_name: String,
    #[serde(rename = "frameId")]
    pub frame_id: String,
    #[serde(rename = "isFromAlbum")]
    pub is_from_album: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPose {
    pub translation: [f64; 3],
    pub rotation_xyzw: [f64; 4],
}

/// Body of a localization response. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_pose: Option<SessionPose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "firstAlbumFrame", default, skip_serializing_if = "Option::is_none")]
    pub first_album_frame: Option<bool>,
}

/// Reorder a wire quaternion `[x, y, z, w]` into internal order `[w, x, y, z]`.
pub fn wire_to_internal(xyzw: [f64; 4]) -> [f64; 4] {
    [xyzw[3], xyzw[0], xyzw[1], xyzw[2]]
}

/// Reorder an internal quaternion `[w, x, y, z]` into wire order `[x, y, z, w]`.
pub fn internal_to_wire(wxyz: [f64; 4]) -> [f64; 4] {
    [wxyz[1], wxyz[2], wxyz[3], wxyz[0]]
}

/// Build a unit quaternion from internal `[w, x, y, z]` order.
pub fn quaternion_from_internal(wxyz: [f64; 4]) -> Result<UnitQuaternion<f64>> {
    let q = Quaternion::new(wxyz[0], wxyz[1], wxyz[2], wxyz[3]);
    UnitQuaternion::try_new(q, MIN_QUATERNION_NORM)
        .ok_or_else(|| ScenelockError::Parse("degenerate rotation quaternion".into()))
}

/// Wire order `[x, y, z, w]` of a unit quaternion.
pub fn quaternion_to_wire(q: &UnitQuaternion<f64>) -> [f64; 4] {
    internal_to_wire([q.w, q.i, q.j, q.k])
}

/// Rescale intrinsics to the delivered image size and flip `cy` to a
/// bottom-left origin, as the service expects.
///
/// Missing intrinsics are sent as zeros.
pub fn wire_intrinsics(intrinsics: Option<&Intrinsics>, width: u32, height: u32) -> WireIntrinsics {
    let (mut fx, mut fy, mut cx, mut cy) = (0.0, 0.0, 0.0, 0.0);
    if let Some(intr) = intrinsics {
        fx = intr.fx;
        fy = intr.fy;
        cx = intr.cx;
        cy = intr.cy;
        if intr.width > 0 && intr.height > 0 && (intr.width != width || intr.height != height) {
            let sx = width as f64 / intr.width as f64;
            let sy = height as f64 / intr.height as f64;
            fx *= sx;
            fy *= sy;
            cx *= sx;
            cy *= sy;
        }
    }
    WireIntrinsics {
        fx,
        fy,
        cx,
        cy: (height as f64 - 1.0) - cy,
        model: INTRINSICS_MODEL.into(),
    }
}

/// Assemble upload metadata for one capture.
///
/// Pose, size and intrinsics always describe the live camera frame, even when
/// the uploaded image is the album image.
pub fn build_metadata(
    timestamp_ms: i64,
    device: &DevicePose,
    frame_image: &EncodedImage,
    intrinsics: Option<&Intrinsics>,
    selection: &FrameSelection,
    config: &CaptureConfig,
) -> UploadMetadata {
    let mut rotation = device.rotation;
    if config.convert_to_opencv {
        rotation *= UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::PI);
    }
    let p = device.position;

    UploadMetadata {
        timestamp_ms,
        rotation_xyzw: quaternion_to_wire(&rotation),
        translation_m: [p.x, p.y, p.z],
        image_size: ImageSize {
            width: frame_image.width,
            height: frame_image.height,
        },
        intrinsics: wire_intrinsics(intrinsics, frame_image.width, frame_image.height),
        notes: Notes {
            mirror_y_applied: config.mirror_y_applied,
            coord: if config.convert_to_opencv { COORD_OPENCV } else { COORD_UNITY }.into(),
        },
        movie_name: selection.movie.clone(),
        scene_name: selection.scene.clone(),
        frame_id: selection.frame_id.clone(),
        is_from_album: selection.is_album,
    }
}

/// One upload: image plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    /// Monotonic per-session request number.
    pub id: u64,
    pub metadata: UploadMetadata,
    pub image: EncodedImage,
    /// True when `image` is the album image anchoring the handshake.
    pub album_first: bool,
}

impl UploadRequest {
    /// File name reported for the image part.
    pub fn file_name(&self) -> String {
        let ext = match self.image.mime.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            _ => "png",
        };
        format!("frame_{}.{}", self.metadata.timestamp_ms, ext)
    }

    /// Encode as `multipart/form-data` with the given boundary.
    pub fn encode_multipart(&self, boundary: &str) -> Result<Vec<u8>> {
        let meta = serde_json::to_string(&self.metadata)?;
        let mut body = Vec::with_capacity(self.image.bytes.len() + meta.len() + 512);

        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"{n}\"\r\nContent-Type: {m}\r\n\r\n",
                b = boundary,
                f = IMAGE_FIELD,
                n = self.file_name(),
                m = self.image.mime,
            )
            .as_bytes(),
        );
        body.extend_from_slice(&self.image.bytes);
        body.extend_from_slice(
            format!(
                "\r\n--{b}\r\nContent-Disposition: form-data; name=\"{f}\"\r\n\r\n",
                b = boundary,
                f = META_FIELD,
            )
            .as_bytes(),
        );
        body.extend_from_slice(meta.as_bytes());
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        Ok(body)
    }
}

/// Everything a single response means for the rest of the session.
#[derive(Debug)]
pub struct ProtocolReply {
    pub outcome: Result<Pose>,
    /// The service finished processing the first album image.
    pub album_first_frame_processed: bool,
    /// Capturing should stop (successful result and stop-on-success set).
    pub disable_capture: bool,
}

/// Interprets localization responses.
#[derive(Debug, Clone, Default)]
pub struct ProtocolClient {
    stop_capture_on_success: bool,
}

impl ProtocolClient {
    pub fn new(stop_capture_on_success: bool) -> Self {
        Self {
            stop_capture_on_success,
        }
    }

    pub fn process_response(&self, raw: &str) -> ProtocolReply {
        let response: LocalizeResponse = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Unparseable localization response: {}", e);
                return ProtocolReply {
                    outcome: Err(ScenelockError::Parse(e.to_string())),
                    album_first_frame_processed: false,
                    disable_capture: false,
                };
            }
        };

        let album_first_frame_processed = response.first_album_frame.unwrap_or(false);
        if album_first_frame_processed {
            log::info!("Service acknowledged the first album frame");
        }

        if !response.success {
            let reason = response
                .reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REJECTION.to_string());
            log::debug!("Localization rejected: {}", reason);
            return ProtocolReply {
                outcome: Err(ScenelockError::ServerRejected(reason)),
                album_first_frame_processed,
                disable_capture: false,
            };
        }

        let outcome = match response.session_pose {
            Some(sp) => pose_from_session(&sp),
            None => Err(ScenelockError::Parse("success without session_pose".into())),
        };
        let disable_capture = outcome.is_ok() && self.stop_capture_on_success;

        if let Ok(pose) = &outcome {
            log::info!(
                "Localized: t=[{:.3}, {:.3}, {:.3}]",
                pose.position.x,
                pose.position.y,
                pose.position.z
            );
        }

        ProtocolReply {
            outcome,
            album_first_frame_processed,
            disable_capture,
        }
    }

    /// Reference pose for exercising the pipeline without a server:
    /// identity rotation, 2 m along +Z.
    pub fn mock_pose() -> Pose {
        Pose {
            position: Vector3::new(0.0, 0.0, 2.0),
            rotation: UnitQuaternion::identity(),
            confidence: 0.95,
            fov: DEFAULT_FOV_DEG,
            aspect: DEFAULT_ASPECT,
            source_id: MOCK_SOURCE_ID.into(),
        }
    }
}

fn pose_from_session(sp: &SessionPose) -> Result<Pose> {
    let rotation = quaternion_from_internal(wire_to_internal(sp.rotation_xyzw))?;
    let t = sp.translation;
    Ok(Pose {
        position: Vector3::new(t[0], t[1], t[2]),
        rotation,
        confidence: DEFAULT_CONFIDENCE,
        fov: DEFAULT_FOV_DEG,
        aspect: DEFAULT_ASPECT,
        source_id: SERVER_SOURCE_ID.into(),
    })
}
