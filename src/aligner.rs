//! Map-to-local alignment.
//!
//! The aligner owns ΔT, the transform taking map-frame poses into the local
//! tracking frame: `T_local = ΔT ∘ T_map`. ΔT is solved once per session from
//! a paired sample (device pose in the local frame at the moment a map-frame
//! camera pose arrives) and stays fixed until [`PoseAligner::reset_delta_t`].

use crate::protocol::{DEFAULT_ASPECT, DEFAULT_FOV_DEG, MANUAL_SOURCE_ID};
use crate::source::TrackingSource;
use crate::transform::{self, RigidTransform};
use crate::types::Pose;
use crate::{Result, ScenelockError};

/// What [`PoseAligner::apply_server_pose`] did with a pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOutcome {
    /// Absent or unusable pose; nothing changed.
    Ignored,
    /// Cached as the new target; ΔT left as is.
    Cached,
    /// Cached, and ΔT was solved from it.
    Computed,
}

#[derive(Debug, Clone)]
pub struct PoseAligner {
    delta_t: RigidTransform,
    computed: bool,
    failed: bool,
    auto_compute: bool,
    last_target: Option<Pose>,
}

impl Default for PoseAligner {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PoseAligner {
    pub fn new(auto_compute: bool) -> Self {
        log::debug!("Pose aligner initialized, ΔT = identity");
        Self {
            delta_t: RigidTransform::identity(),
            computed: false,
            failed: false,
            auto_compute,
            last_target: None,
        }
    }

    /// Cache a localized camera pose as the target and, on the first one,
    /// solve ΔT against the current device pose.
    ///
    /// An error means the pose was cached but ΔT could not be solved.
    pub fn apply_server_pose(
        &mut self,
        pose: Option<&Pose>,
        tracking: &dyn TrackingSource,
    ) -> Result<AlignOutcome> {
        let pose = match pose {
            Some(p) if p.is_finite() => p,
            Some(_) => {
                log::warn!("Ignoring non-finite server pose");
                return Ok(AlignOutcome::Ignored);
            }
            None => {
                log::warn!("Ignoring absent server pose");
                return Ok(AlignOutcome::Ignored);
            }
        };

        self.last_target = Some(pose.clone());

        if self.auto_compute && !self.computed && !self.failed {
            self.calculate_delta_t(pose, tracking)?;
            return Ok(AlignOutcome::Computed);
        }
        Ok(AlignOutcome::Cached)
    }

    /// Solve `ΔT = T_local_cam ∘ T_map_cam⁻¹`.
    ///
    /// A non-finite result leaves ΔT at identity and marks the alignment as
    /// failed until the next reset.
    pub fn calculate_delta_t(
        &mut self,
        server_pose: &Pose,
        tracking: &dyn TrackingSource,
    ) -> Result<()> {
        let device = tracking
            .device_pose()
            .ok_or(ScenelockError::TrackingUnavailable)?;

        let t_local_cam = device.to_transform();
        let t_map_cam = server_pose.to_transform();
        let delta_t = transform::compose(&t_local_cam, &transform::invert(&t_map_cam));

        if !transform::is_valid(&delta_t) {
            log::error!("Calculated ΔT is invalid, using identity");
            self.delta_t = RigidTransform::identity();
            self.computed = false;
            self.failed = true;
            return Err(ScenelockError::InvalidTransform);
        }

        self.delta_t = delta_t;
        self.computed = true;
        self.failed = false;

        let p = delta_t.position();
        log::info!("ΔT calculated: t=[{:.3}, {:.3}, {:.3}]", p.x, p.y, p.z);
        Ok(())
    }

    /// `ΔT ∘ T_map_target`, or identity when no target has been localized.
    pub fn get_target_in_local_frame(&self) -> RigidTransform {
        match &self.last_target {
            Some(target) => transform::compose(&self.delta_t, &target.to_transform()),
            None => {
                log::trace!("No target pose yet, returning identity");
                RigidTransform::identity()
            }
        }
    }

    /// Inject a target pose directly, bypassing the network.
    ///
    /// Marks ΔT as computed so the next server pose does not silently
    /// re-solve it. Returns the pose to republish.
    pub fn set_manual_pose(&mut self, pose: &RigidTransform) -> Pose {
        let (position, rotation, _) = transform::decompose(pose);
        let manual = Pose {
            position,
            rotation,
            confidence: 1.0,
            fov: DEFAULT_FOV_DEG,
            aspect: DEFAULT_ASPECT,
            source_id: MANUAL_SOURCE_ID.into(),
        };
        self.last_target = Some(manual.clone());
        self.computed = true;
        self.failed = false;
        log::info!("Manual target pose injected");
        manual
    }

    /// Override ΔT explicitly.
    pub fn set_delta_t(&mut self, delta_t: RigidTransform) -> Result<()> {
        if !delta_t.is_valid() {
            return Err(ScenelockError::InvalidTransform);
        }
        self.delta_t = delta_t;
        self.computed = true;
        self.failed = false;
        log::info!("ΔT set manually");
        Ok(())
    }

    /// Back to identity; the next server pose solves ΔT again.
    pub fn reset_delta_t(&mut self) {
        self.delta_t = RigidTransform::identity();
        self.computed = false;
        self.failed = false;
        log::info!("ΔT reset to identity");
    }

    pub fn delta_t(&self) -> RigidTransform {
        self.delta_t
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    /// The last solve produced a non-finite transform.
    pub fn alignment_failed(&self) -> bool {
        self.failed
    }

    pub fn last_target_pose(&self) -> Option<&Pose> {
        self.last_target.as_ref()
    }
}
