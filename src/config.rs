use crate::{Result, ScenelockError};
use serde::Deserialize;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000/upload";

/// Upper bound for `request_timeout_s`.
pub const MAX_REQUEST_TIMEOUT_S: f64 = 3600.0;

/// Capture throttling and metadata options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Seconds between capture attempts.
    pub interval_s: f64,
    /// Rotate the reported camera 180° about +Y (OpenCV +Z forward).
    pub convert_to_opencv: bool,
    /// Whether the host delivers vertically mirrored images.
    pub mirror_y_applied: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_s: 3.0,
            convert_to_opencv: false,
            mirror_y_applied: true,
        }
    }
}

/// Guidance smoothing and thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    /// Low-pass rate per 1/60 s; higher means less smoothing.
    pub smooth_factor: f64,
    /// |yaw| below which the user is heading straight at the target.
    pub aligned_angle_deg: f64,
    /// "Almost there" fires below 1.5x this distance.
    pub near_distance_m: f64,
    pub overlay_distance_m: f64,
    pub overlay_angle_deg: f64,
    /// Seconds after a trigger reset during which the overlay cannot fire.
    pub overlay_cooldown_s: f64,
    pub arrow_distance_m: f64,
    pub arrow_height_offset_m: f64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            smooth_factor: 0.15,
            aligned_angle_deg: 10.0,
            near_distance_m: 0.5,
            overlay_distance_m: 0.5,
            overlay_angle_deg: 6.0,
            overlay_cooldown_s: 2.0,
            arrow_distance_m: 1.5,
            arrow_height_offset_m: -0.2,
        }
    }
}

/// Top-level session configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upload endpoint, e.g. `http://192.168.8.109:5000/upload`.
    pub server_url: String,
    pub request_timeout_s: f64,
    /// Compute ΔT from the first successful localization.
    pub auto_compute_delta_t: bool,
    /// Stop uploading once a localization succeeds.
    pub stop_capture_on_success: bool,
    pub capture: CaptureConfig,
    pub guidance: GuidanceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            request_timeout_s: 10.0,
            auto_compute_delta_t: true,
            stop_capture_on_success: false,
            capture: CaptureConfig::default(),
            guidance: GuidanceConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `SCENELOCK_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `SCENELOCK_*` overrides in place. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SCENELOCK_SERVER_URL") {
            let url = url.trim();
            if !url.is_empty() {
                self.server_url = url.to_string();
            }
        }
        self.capture.interval_s =
            read_env_f64("SCENELOCK_CAPTURE_INTERVAL", self.capture.interval_s);
        self.request_timeout_s = read_env_f64("SCENELOCK_TIMEOUT", self.request_timeout_s);
        self.stop_capture_on_success =
            read_env_bool("SCENELOCK_STOP_ON_SUCCESS", self.stop_capture_on_success);
        self.capture.convert_to_opencv =
            read_env_bool("SCENELOCK_OPENCV_CAMERA", self.capture.convert_to_opencv);
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.capture.interval_s > 0.0 && self.capture.interval_s.is_finite()) {
            return Err(ScenelockError::Config(format!(
                "capture.interval_s must be positive and finite, got {}",
                self.capture.interval_s
            )));
        }
        if !(self.request_timeout_s > 0.0 && self.request_timeout_s <= MAX_REQUEST_TIMEOUT_S) {
            return Err(ScenelockError::Config(format!(
                "request_timeout_s must be in (0, {}], got {}",
                MAX_REQUEST_TIMEOUT_S, self.request_timeout_s
            )));
        }
        let g = &self.guidance;
        if !(g.smooth_factor > 0.0 && g.smooth_factor <= 1.0) {
            return Err(ScenelockError::Config(format!(
                "guidance.smooth_factor must be in (0, 1], got {}",
                g.smooth_factor
            )));
        }
        let thresholds = [
            ("aligned_angle_deg", g.aligned_angle_deg),
            ("near_distance_m", g.near_distance_m),
            ("overlay_distance_m", g.overlay_distance_m),
            ("overlay_angle_deg", g.overlay_angle_deg),
            ("overlay_cooldown_s", g.overlay_cooldown_s),
        ];
        for (name, value) in thresholds {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ScenelockError::Config(format!(
                    "guidance.{} must be non-negative and finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

fn read_env_f64(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(v) => match v.trim().parse::<f64>() {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("Invalid {}='{}', using default {}", name, v, default);
                default
            }
        },
        Err(_) => default,
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                log::warn!("Invalid {}='{}', using default {}", name, v, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.capture.interval_s, 3.0);
        assert_eq!(config.guidance.overlay_distance_m, 0.5);
        assert_eq!(config.guidance.overlay_angle_deg, 6.0);
        assert_eq!(config.guidance.overlay_cooldown_s, 2.0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{"server_url":"http://10.0.0.2:5000/upload","guidance":{"overlay_angle_deg":4}}"#,
        )
        .unwrap();
        assert_eq!(config.server_url, "http://10.0.0.2:5000/upload");
        assert_eq!(config.guidance.overlay_angle_deg, 4.0);
        assert_eq!(config.guidance.smooth_factor, 0.15);
        assert_eq!(config.capture, CaptureConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let err = SessionConfig::from_json_str(r#"{"capture":{"interval_s":0}}"#).unwrap_err();
        assert!(matches!(err, ScenelockError::Config(_)));
        let err =
            SessionConfig::from_json_str(r#"{"guidance":{"smooth_factor":1.5}}"#).unwrap_err();
        assert!(matches!(err, ScenelockError::Config(_)));
        let err =
            SessionConfig::from_json_str(r#"{"guidance":{"overlay_distance_m":-1}}"#).unwrap_err();
        assert!(matches!(err, ScenelockError::Config(_)));
    }

    #[test]
    fn test_validation_rejects_unbounded_timeouts() {
        let err = SessionConfig::from_json_str(r#"{"request_timeout_s":1e300}"#).unwrap_err();
        assert!(matches!(err, ScenelockError::Config(_)));

        let mut config = SessionConfig::default();
        config.request_timeout_s = f64::INFINITY;
        assert!(matches!(config.validate(), Err(ScenelockError::Config(_))));
        config.request_timeout_s = f64::NAN;
        assert!(config.validate().is_err());
        config.request_timeout_s = MAX_REQUEST_TIMEOUT_S;
        config.validate().unwrap();

        config.capture.interval_s = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_helpers_fall_back_on_garbage() {
        std::env::set_var("SCENELOCK_TEST_F64", "not-a-number");
        assert_eq!(read_env_f64("SCENELOCK_TEST_F64", 1.5), 1.5);
        std::env::set_var("SCENELOCK_TEST_F64", " 2.25 ");
        assert_eq!(read_env_f64("SCENELOCK_TEST_F64", 1.5), 2.25);
        std::env::set_var("SCENELOCK_TEST_BOOL", "YES");
        assert!(read_env_bool("SCENELOCK_TEST_BOOL", false));
        std::env::set_var("SCENELOCK_TEST_BOOL", "maybe");
        assert!(!read_env_bool("SCENELOCK_TEST_BOOL", false));
        assert!(read_env_bool("SCENELOCK_TEST_UNSET_BOOL", true));
    }
}
