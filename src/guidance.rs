//! Navigation guidance toward the aligned target.
//!
//! Turns the device pose and the target (both in the local frame) into a
//! smoothed distance and heading, a directional hint, a status line, an arrow
//! pose and a one-shot overlay trigger.

use crate::config::GuidanceConfig;
use crate::transform::RigidTransform;
use crate::types::{DevicePose, GuidanceStatus, GuidanceUpdate, Hint};
use nalgebra::{UnitQuaternion, Vector3};

/// Distances at or beyond this are shown as unknown.
pub const MAX_DISPLAY_DISTANCE_M: f64 = 100.0;

const STRAIGHT_LIMIT_DEG: f64 = 45.0;
const SLIGHT_LIMIT_DEG: f64 = 15.0;
const ALMOST_THERE_FACTOR: f64 = 1.5;
const MIN_DIRECTION_NORM: f64 = 0.01;
const ARROW_MOVE_EPS_M: f64 = 0.01;
const ARROW_TURN_EPS_RAD: f64 = 0.0175;

/// Output of one active guidance tick.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceFrame {
    /// Outputs that changed on this tick.
    pub updates: GuidanceUpdate,
    pub distance_m: f64,
    pub raw_distance_m: f64,
    /// Smoothed heading error, positive when the target is to the right.
    pub yaw_deg: f64,
    pub distance_label: String,
    pub hint: Hint,
    pub status: GuidanceStatus,
    pub arrow: DevicePose,
}

impl GuidanceFrame {
    pub fn overlay_fired(&self) -> bool {
        self.updates.contains(GuidanceUpdate::OVERLAY)
    }
}

pub struct GuidanceCoordinator {
    config: GuidanceConfig,
    active: bool,
    target: RigidTransform,
    smoothed: Option<(f64, f64)>,
    overlay_triggered: bool,
    clock: f64,
    cooldown_until: f64,
    last: Option<GuidanceFrame>,
}

impl GuidanceCoordinator {
    pub fn new(config: GuidanceConfig) -> Self {
        Self {
            config,
            active: false,
            target: RigidTransform::identity(),
            smoothed: None,
            overlay_triggered: false,
            clock: 0.0,
            cooldown_until: f64::NEG_INFINITY,
            last: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn overlay_triggered(&self) -> bool {
        self.overlay_triggered
    }

    pub fn target(&self) -> &RigidTransform {
        &self.target
    }

    /// Most recent active frame.
    pub fn last_frame(&self) -> Option<&GuidanceFrame> {
        self.last.as_ref()
    }

    /// A successful localization arrived with its aligned local-frame target.
    ///
    /// Unless `preserve_trigger` is set, a previous overlay firing is cleared
    /// so the overlay may fire again for this target.
    pub fn on_pose(&mut self, target: RigidTransform, preserve_trigger: bool) {
        if !self.active {
            self.smoothed = None;
        }
        self.target = target;
        self.active = true;
        if !preserve_trigger {
            self.overlay_triggered = false;
        }
        log::debug!("Guidance target updated, active");
    }

    /// Guide toward an explicit local-frame target.
    pub fn set_target(&mut self, target: RigidTransform) {
        if !self.active {
            self.smoothed = None;
        }
        self.target = target;
        self.active = true;
        log::info!("Guidance target set manually");
    }

    pub fn set_active(&mut self, active: bool) {
        if active && !self.active {
            self.smoothed = None;
        }
        self.active = active;
        if active {
            self.reset_overlay_trigger();
        }
        log::info!("Guidance active: {}", active);
    }

    /// Re-arm the overlay. The cooldown starts now.
    pub fn reset_overlay_trigger(&mut self) {
        self.overlay_triggered = false;
        self.cooldown_until = self.clock + self.config.overlay_cooldown_s;
        log::info!(
            "Overlay trigger reset, cooldown: {}s",
            self.config.overlay_cooldown_s
        );
    }

    /// Advance the cooldown clock without evaluating guidance, for frames
    /// without a device pose.
    pub fn advance(&mut self, dt: f64) {
        self.clock += dt.max(0.0);
    }

    /// Advance by `dt` seconds. Returns `None` while inactive.
    pub fn tick(&mut self, dt: f64, device: &DevicePose) -> Option<GuidanceFrame> {
        let dt = dt.max(0.0);
        self.advance(dt);
        if !self.active {
            return None;
        }

        let target_pos = self.target.position();
        let raw_distance = (device.position - target_pos).norm();
        let direction = horizontal(&(target_pos - device.position));
        let raw_yaw = signed_yaw_deg(&horizontal(&device.forward()), &direction);

        let (distance, yaw) = match self.smoothed {
            None => (raw_distance, raw_yaw),
            Some((d, y)) => {
                let rate = (self.config.smooth_factor * dt * 60.0).clamp(0.0, 1.0);
                (lerp(d, raw_distance, rate), lerp(y, raw_yaw, rate))
            }
        };
        self.smoothed = Some((distance, yaw));

        let hint = self.classify(yaw, distance);
        let status = if raw_distance < self.config.overlay_distance_m {
            GuidanceStatus::NearTarget
        } else {
            GuidanceStatus::Navigating
        };
        let arrow = self.arrow_pose(device, &direction);
        let distance_label = distance_label(distance);

        let mut updates = GuidanceUpdate::empty();
        match &self.last {
            None => {
                updates |= GuidanceUpdate::DISTANCE
                    | GuidanceUpdate::HINT
                    | GuidanceUpdate::STATUS
                    | GuidanceUpdate::ARROW;
            }
            Some(prev) => {
                if prev.distance_label != distance_label {
                    updates |= GuidanceUpdate::DISTANCE;
                }
                if prev.hint != hint {
                    updates |= GuidanceUpdate::HINT;
                }
                if prev.status != status {
                    updates |= GuidanceUpdate::STATUS;
                }
                if arrow_moved(&prev.arrow, &arrow) {
                    updates |= GuidanceUpdate::ARROW;
                }
            }
        }

        if self.check_overlay(distance, yaw) {
            updates |= GuidanceUpdate::OVERLAY;
        }

        log::trace!("Guidance: distance {:.2}m, yaw {:.1}°", distance, yaw);

        let frame = GuidanceFrame {
            updates,
            distance_m: distance,
            raw_distance_m: raw_distance,
            yaw_deg: yaw,
            distance_label,
            hint,
            status,
            arrow,
        };
        // Keep the previously reported arrow so small drifts accumulate.
        let mut stored = frame.clone();
        if let Some(prev) = &self.last {
            if !updates.contains(GuidanceUpdate::ARROW) {
                stored.arrow = prev.arrow;
            }
        }
        self.last = Some(stored);
        Some(frame)
    }

    fn classify(&self, yaw: f64, distance: f64) -> Hint {
        if yaw.abs() < self.config.aligned_angle_deg {
            if distance < self.config.near_distance_m * ALMOST_THERE_FACTOR {
                Hint::AlmostThere
            } else {
                Hint::GoStraight
            }
        } else if yaw > STRAIGHT_LIMIT_DEG {
            Hint::TurnRight
        } else if yaw > SLIGHT_LIMIT_DEG {
            Hint::TurnSlightlyRight
        } else if yaw < -STRAIGHT_LIMIT_DEG {
            Hint::TurnLeft
        } else if yaw < -SLIGHT_LIMIT_DEG {
            Hint::TurnSlightlyLeft
        } else {
            Hint::AdjustDirection
        }
    }

    fn check_overlay(&mut self, distance: f64, yaw: f64) -> bool {
        if self.overlay_triggered {
            return false;
        }
        if self.clock < self.cooldown_until {
            log::trace!(
                "Overlay cooldown active: {:.1}s remaining",
                self.cooldown_until - self.clock
            );
            return false;
        }
        if distance < self.config.overlay_distance_m && yaw.abs() < self.config.overlay_angle_deg {
            self.overlay_triggered = true;
            log::info!("Overlay triggered! Distance: {:.2}m, Yaw: {:.1}°", distance, yaw);
            return true;
        }
        false
    }

    fn arrow_pose(&self, device: &DevicePose, direction: &Vector3<f64>) -> DevicePose {
        let mut position = device.position + device.forward() * self.config.arrow_distance_m;
        position.y += self.config.arrow_height_offset_m;

        let rotation = if direction.norm() > MIN_DIRECTION_NORM {
            UnitQuaternion::face_towards(direction, &Vector3::y())
        } else {
            match &self.last {
                Some(prev) => prev.arrow.rotation,
                None => device.rotation,
            }
        };
        DevicePose::new(position, rotation)
    }
}

/// `"Distance: 1.2m"`, or `"Distance: ---"` when out of range.
pub fn distance_label(distance: f64) -> String {
    if distance.is_finite() && distance < MAX_DISPLAY_DISTANCE_M {
        format!("Distance: {:.1}m", distance)
    } else {
        "Distance: ---".to_string()
    }
}

/// Signed angle in degrees from `from` to `to` about +Y, positive to the right.
///
/// Degenerate (near-zero) inputs give 0.
pub fn signed_yaw_deg(from: &Vector3<f64>, to: &Vector3<f64>) -> f64 {
    if from.norm() < 1e-9 || to.norm() < 1e-9 {
        return 0.0;
    }
    let sin = Vector3::y().dot(&from.cross(to));
    let cos = from.dot(to);
    sin.atan2(cos).to_degrees()
}

fn horizontal(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.x, 0.0, v.z)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn arrow_moved(prev: &DevicePose, next: &DevicePose) -> bool {
    (prev.position - next.position).norm() > ARROW_MOVE_EPS_M
        || prev.rotation.angle_to(&next.rotation) > ARROW_TURN_EPS_RAD
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn target_at(x: f64, y: f64, z: f64) -> RigidTransform {
        RigidTransform::from_parts(&Vector3::new(x, y, z), &UnitQuaternion::identity())
    }

    /// Device at the origin, looking down +Z, rotated by `yaw_deg` about +Y.
    fn device_facing(yaw_deg: f64) -> DevicePose {
        DevicePose::new(
            Vector3::zeros(),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw_deg.to_radians()),
        )
    }

    /// Target `distance` meters ahead, `yaw_deg` to the right of straight.
    fn target_relative(distance: f64, yaw_deg: f64) -> RigidTransform {
        let a = yaw_deg.to_radians();
        target_at(distance * a.sin(), 0.0, distance * a.cos())
    }

    fn coordinator() -> GuidanceCoordinator {
        GuidanceCoordinator::new(GuidanceConfig::default())
    }

    #[test]
    fn test_signed_yaw_positive_to_the_right() {
        let forward = Vector3::new(0.0, 0.0, 1.0);
        let right = signed_yaw_deg(&forward, &Vector3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(right, 90.0, epsilon = 1e-9);
        let front_left = signed_yaw_deg(&forward, &Vector3::new(-1.0, 0.0, 1.0));
        assert_abs_diff_eq!(front_left, -45.0, epsilon = 1e-9);
        assert_eq!(signed_yaw_deg(&forward, &Vector3::zeros()), 0.0);
    }

    #[test]
    fn test_inactive_tick_produces_nothing() {
        let mut g = coordinator();
        assert!(g.tick(0.016, &DevicePose::identity()).is_none());
    }

    #[test]
    fn test_overlay_fires_within_thresholds() {
        let mut g = coordinator();
        g.on_pose(target_relative(0.4, 3.0), false);
        let frame = g.tick(0.016, &DevicePose::identity()).unwrap();
        assert_abs_diff_eq!(frame.distance_m, 0.4, epsilon = 1e-9);
        assert_abs_diff_eq!(frame.yaw_deg, 3.0, epsilon = 1e-9);
        assert!(frame.overlay_fired());
        assert!(g.overlay_triggered());
    }

    #[test]
    fn test_overlay_does_not_fire_when_too_far() {
        for yaw in [0.0, 3.0, -2.0] {
            let mut g = coordinator();
            g.on_pose(target_relative(0.6, yaw), false);
            for _ in 0..10 {
                assert!(!g.tick(0.016, &DevicePose::identity()).unwrap().overlay_fired());
            }
        }
    }

    #[test]
    fn test_overlay_fires_once_until_reset_and_cooldown() {
        let mut g = coordinator();
        g.on_pose(target_relative(0.3, 0.0), false);
        let device = DevicePose::identity();
        let fired = (0..100)
            .filter(|_| g.tick(0.016, &device).unwrap().overlay_fired())
            .count();
        assert_eq!(fired, 1);

        // Overlay hidden: re-armed but cooling down for 2 s.
        g.set_active(true);
        for _ in 0..100 {
            assert!(!g.tick(0.016, &device).unwrap().overlay_fired());
        }
        let fired = (0..100)
            .filter(|_| g.tick(0.016, &device).unwrap().overlay_fired())
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_preserved_trigger_survives_new_pose() {
        let mut g = coordinator();
        let device = DevicePose::identity();
        g.on_pose(target_relative(0.3, 0.0), false);
        assert!(g.tick(0.016, &device).unwrap().overlay_fired());

        g.on_pose(target_relative(0.3, 0.0), true);
        assert!(!g.tick(0.016, &device).unwrap().overlay_fired());

        g.on_pose(target_relative(0.3, 0.0), false);
        assert!(g.tick(0.016, &device).unwrap().overlay_fired());
    }

    #[test]
    fn test_hint_classification() {
        let cases = [
            (0.0, 5.0, Hint::GoStraight),
            (0.0, 0.5, Hint::AlmostThere),
            (60.0, 5.0, Hint::TurnRight),
            (30.0, 5.0, Hint::TurnSlightlyRight),
            (45.0, 5.0, Hint::TurnSlightlyRight),
            (-60.0, 5.0, Hint::TurnLeft),
            (-30.0, 5.0, Hint::TurnSlightlyLeft),
            (-45.0, 5.0, Hint::TurnSlightlyLeft),
            (12.0, 5.0, Hint::AdjustDirection),
            (-15.0, 5.0, Hint::AdjustDirection),
        ];
        for (yaw, distance, expected) in cases {
            let g = coordinator();
            assert_eq!(g.classify(yaw, distance), expected, "yaw {} distance {}", yaw, distance);
        }
    }

    #[test]
    fn test_hint_and_status_only_flagged_on_change() {
        let mut g = coordinator();
        g.on_pose(target_relative(5.0, 60.0), false);
        let device = DevicePose::identity();
        let first = g.tick(0.016, &device).unwrap();
        assert_eq!(first.hint, Hint::TurnRight);
        assert_eq!(first.status, GuidanceStatus::Navigating);
        assert!(first.updates.contains(GuidanceUpdate::HINT | GuidanceUpdate::STATUS));

        let second = g.tick(0.016, &device).unwrap();
        assert!(!second.updates.intersects(GuidanceUpdate::HINT | GuidanceUpdate::STATUS));

        // Turn to face the target.
        let mut turned = None;
        for _ in 0..200 {
            let frame = g.tick(0.016, &device_facing(60.0)).unwrap();
            if frame.updates.contains(GuidanceUpdate::HINT) {
                turned = Some(frame.hint);
            }
        }
        assert_eq!(g.last_frame().unwrap().hint, Hint::GoStraight);
        assert!(turned.is_some());
    }

    #[test]
    fn test_smoothing_is_frame_rate_independent() {
        let device = DevicePose::identity();
        let run = |dt: f64, steps: usize| {
            let mut g = coordinator();
            g.on_pose(target_at(0.0, 0.0, 10.0), false);
            g.tick(dt, &device);
            g.set_target(target_at(0.0, 0.0, 4.0));
            let mut last = 0.0;
            for _ in 0..steps {
                last = g.tick(dt, &device).unwrap().distance_m;
            }
            last
        };
        // The first-order rate makes both converge; after a full second they agree closely.
        let slow = run(1.0 / 30.0, 30);
        let fast = run(1.0 / 120.0, 120);
        assert!(slow < 4.1 && fast < 4.1);
        assert_abs_diff_eq!(slow, fast, epsilon = 0.05);
    }

    #[test]
    fn test_smoothing_stays_between_previous_and_raw() {
        let device = DevicePose::identity();
        for dt in [0.05, 2.0] {
            let mut g = coordinator();
            g.on_pose(target_at(0.0, 0.0, 10.0), false);
            let prev = g.tick(0.016, &device).unwrap();
            assert_abs_diff_eq!(prev.distance_m, 10.0, epsilon = 1e-9);
            assert_abs_diff_eq!(prev.yaw_deg, 0.0, epsilon = 1e-9);

            g.set_target(target_relative(4.0, 40.0));
            let next = g.tick(dt, &device).unwrap();
            assert_abs_diff_eq!(next.raw_distance_m, 4.0, epsilon = 1e-9);
            assert!(next.raw_distance_m <= next.distance_m && next.distance_m <= prev.distance_m);
            assert!(prev.yaw_deg <= next.yaw_deg && next.yaw_deg <= 40.0 + 1e-9);
            if dt >= 1.0 {
                // A long frame lands on the raw values without overshooting.
                assert_abs_diff_eq!(next.distance_m, 4.0, epsilon = 1e-9);
                assert_abs_diff_eq!(next.yaw_deg, 40.0, epsilon = 1e-9);
            } else {
                assert!(next.distance_m > 4.0 && next.yaw_deg < 40.0);
            }
        }
    }

    #[test]
    fn test_status_uses_raw_distance() {
        let mut g = coordinator();
        g.on_pose(target_at(0.0, 0.0, 5.0), false);
        let device = DevicePose::identity();
        g.tick(0.016, &device);
        g.set_target(target_at(0.0, 0.0, 0.3));
        let frame = g.tick(0.016, &device).unwrap();
        assert!(frame.distance_m > 0.5);
        assert_eq!(frame.status, GuidanceStatus::NearTarget);
        assert_eq!(frame.status.text(), "Near target - Ready for overlay");
    }

    #[test]
    fn test_distance_label() {
        assert_eq!(distance_label(1.234), "Distance: 1.2m");
        assert_eq!(distance_label(99.9), "Distance: 99.9m");
        assert_eq!(distance_label(100.0), "Distance: ---");
        assert_eq!(distance_label(f64::INFINITY), "Distance: ---");
    }

    #[test]
    fn test_arrow_placed_ahead_and_faces_target() {
        let mut g = coordinator();
        g.on_pose(target_at(5.0, 0.0, 0.0), false);
        let frame = g.tick(0.016, &DevicePose::identity()).unwrap();
        assert_abs_diff_eq!(frame.arrow.position.z, 1.5, epsilon = 1e-9);
        assert_abs_diff_eq!(frame.arrow.position.y, -0.2, epsilon = 1e-9);
        let facing = frame.arrow.forward();
        assert_abs_diff_eq!(facing.x, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(facing.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_set_active_false_hides() {
        let mut g = coordinator();
        g.on_pose(target_at(0.0, 0.0, 3.0), false);
        assert!(g.tick(0.016, &DevicePose::identity()).is_some());
        g.set_active(false);
        assert!(!g.is_active());
        assert!(g.tick(0.016, &DevicePose::identity()).is_none());
    }
}
