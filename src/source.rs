use crate::types::{CameraFrame, DevicePose, FrameSelection};

/// Source of the device pose in the local tracking frame.
pub trait TrackingSource {
    /// Current device pose, or `None` while tracking is not established.
    fn device_pose(&self) -> Option<DevicePose>;
}

/// Source of images to localize.
pub trait ImageSource {
    /// The frame the user is currently navigating toward.
    fn selection(&mut self) -> FrameSelection;

    /// Latest live camera frame, if one is available.
    fn camera_frame(&mut self) -> Option<CameraFrame>;
}

/// Push-based tracking and image source.
///
/// The host writes the latest pose, camera frame and selection each frame;
/// the session reads them on its tick.
#[derive(Debug, Clone, Default)]
pub struct HostFeed {
    pose: Option<DevicePose>,
    frame: Option<CameraFrame>,
    selection: FrameSelection,
}

impl HostFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_device_pose(&mut self, pose: DevicePose) {
        self.pose = Some(pose);
    }

    /// Tracking lost.
    pub fn clear_device_pose(&mut self) {
        self.pose = None;
    }

    pub fn set_camera_frame(&mut self, frame: CameraFrame) {
        self.frame = Some(frame);
    }

    pub fn clear_camera_frame(&mut self) {
        self.frame = None;
    }

    pub fn set_selection(&mut self, selection: FrameSelection) {
        self.selection = selection;
    }

    pub fn current_selection(&self) -> &FrameSelection {
        &self.selection
    }
}

impl TrackingSource for HostFeed {
    fn device_pose(&self) -> Option<DevicePose> {
        self.pose
    }
}

impl ImageSource for HostFeed {
    fn selection(&mut self) -> FrameSelection {
        self.selection.clone()
    }

    fn camera_frame(&mut self) -> Option<CameraFrame> {
        self.frame.clone()
    }
}

impl TrackingSource for DevicePose {
    fn device_pose(&self) -> Option<DevicePose> {
        Some(*self)
    }
}

/// A pose sampled once per tick; `None` means tracking is lost.
impl TrackingSource for Option<DevicePose> {
    fn device_pose(&self) -> Option<DevicePose> {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EncodedImage;
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn test_host_feed_reports_latest_state() {
        let mut feed = HostFeed::new();
        assert!(feed.device_pose().is_none());
        assert!(feed.camera_frame().is_none());

        let pose = DevicePose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity());
        feed.set_device_pose(pose);
        feed.set_camera_frame(CameraFrame {
            image: EncodedImage::png(vec![0], 1, 1),
            intrinsics: None,
        });
        assert_eq!(feed.device_pose(), Some(pose));
        assert_eq!(feed.camera_frame().unwrap().image.width, 1);

        feed.clear_device_pose();
        assert!(feed.device_pose().is_none());
    }
}
