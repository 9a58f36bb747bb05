//! Capture throttling and the album handshake.
//!
//! The coordinator is ticked by the host loop. Every `interval_s` it decides
//! whether to upload, and what: the live camera frame, or (once per
//! handshake) the album image the user picked. While the service is still
//! resolving the album image, further uploads are suppressed until the
//! service acknowledges it.

use crate::config::CaptureConfig;
use crate::protocol::{self, UploadRequest};
use crate::source::{ImageSource, TrackingSource};
use crate::Result;
use std::time::{SystemTime, UNIX_EPOCH};

/// Anything that can carry an upload to the service.
///
/// `send` only hands the request off; the outcome arrives later and must be
/// reported back through [`CaptureCoordinator::complete`].
pub trait UploadSink {
    fn send(&mut self, request: UploadRequest) -> Result<()>;
}

/// Mutable throttling state, owned by the coordinator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadSession {
    pub interval_timer: f64,
    pub in_flight: bool,
    pub album_mode: bool,
    pub album_first_sent: bool,
    pub album_first_acked: bool,
}

/// Result of one coordinator tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Disabled,
    /// Capture interval not reached yet.
    Waiting,
    /// A previous upload is still in flight; tick dropped.
    Busy,
    /// Album image sent but not yet acknowledged; tick dropped.
    Suppressed,
    NotTracking,
    NoCameraFrame,
    MissingAlbumImage,
    Uploaded { request_id: u64, album_first: bool },
}

pub struct CaptureCoordinator {
    config: CaptureConfig,
    state: UploadSession,
    enabled: bool,
    next_id: u64,
    pending: Option<u64>,
}

impl CaptureCoordinator {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: UploadSession::default(),
            enabled: true,
            next_id: 1,
            pending: None,
        }
    }

    pub fn state(&self) -> &UploadSession {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling stops the interval clock; an upload already in flight
    /// still completes normally.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            log::info!("Capture {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    pub fn in_flight(&self) -> bool {
        self.state.in_flight
    }

    /// Request id currently in flight.
    pub fn pending_request(&self) -> Option<u64> {
        self.pending
    }

    pub fn tick(
        &mut self,
        dt: f64,
        tracking: &dyn TrackingSource,
        images: &mut dyn ImageSource,
        sink: &mut dyn UploadSink,
    ) -> Result<TickOutcome> {
        if !self.enabled {
            return Ok(TickOutcome::Disabled);
        }

        self.state.interval_timer += dt.max(0.0);
        if self.state.interval_timer < self.config.interval_s {
            return Ok(TickOutcome::Waiting);
        }
        self.state.interval_timer = 0.0;

        if self.state.in_flight {
            log::trace!("Upload still in flight, skipping capture");
            return Ok(TickOutcome::Busy);
        }

        let selection = images.selection();
        self.state.album_mode = selection.is_album;

        let album_first = self.state.album_mode && !self.state.album_first_sent;
        if self.state.album_mode && self.state.album_first_sent && !self.state.album_first_acked {
            log::debug!("Album mode: waiting for the service to finish the first frame");
            return Ok(TickOutcome::Suppressed);
        }

        let Some(device) = tracking.device_pose() else {
            log::debug!("Tracking not established, skipping capture");
            return Ok(TickOutcome::NotTracking);
        };
        let Some(frame) = images.camera_frame() else {
            log::warn!("No camera frame available, skipping capture");
            return Ok(TickOutcome::NoCameraFrame);
        };

        let metadata = protocol::build_metadata(
            unix_millis(),
            &device,
            &frame.image,
            frame.intrinsics.as_ref(),
            &selection,
            &self.config,
        );

        let image = if album_first {
            match selection.album_image {
                Some(img) => img,
                None => {
                    log::warn!("Album mode without an album image, skipping capture");
                    return Ok(TickOutcome::MissingAlbumImage);
                }
            }
        } else {
            frame.image
        };

        let request_id = self.next_id;
        self.next_id += 1;
        let request = UploadRequest {
            id: request_id,
            metadata,
            image,
            album_first,
        };

        if album_first {
            log::info!("Album mode: sending first album frame");
            self.state.album_first_sent = true;
            self.state.album_first_acked = false;
        }
        self.state.in_flight = true;
        self.pending = Some(request_id);

        if let Err(e) = sink.send(request) {
            log::error!("Upload #{} could not be issued: {}", request_id, e);
            self.state.in_flight = false;
            self.pending = None;
            if album_first {
                self.state.album_first_sent = false;
            }
            return Err(e);
        }

        log::debug!("Upload #{} issued (album_first={})", request_id, album_first);
        Ok(TickOutcome::Uploaded {
            request_id,
            album_first,
        })
    }

    /// Report that an upload finished, successfully or not.
    ///
    /// Returns false for an id that is not the one in flight.
    pub fn complete(&mut self, request_id: u64) -> bool {
        if self.pending != Some(request_id) {
            log::warn!("Completion for unknown upload #{}", request_id);
            return false;
        }
        self.pending = None;
        self.state.in_flight = false;
        true
    }

    /// The service finished processing the first album image.
    pub fn acknowledge_album_first_frame(&mut self) {
        self.state.album_first_acked = true;
        log::info!("Album first frame processed, resuming capture");
    }

    /// Start a fresh handshake, e.g. after a new album image was picked.
    pub fn reset_album_handshake(&mut self) {
        self.state.album_first_sent = false;
        self.state.album_first_acked = false;
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::HostFeed;
    use crate::types::{CameraFrame, DevicePose, EncodedImage, FrameSelection};
    use crate::ScenelockError;

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<UploadRequest>,
        fail: bool,
    }

    impl UploadSink for RecordingSink {
        fn send(&mut self, request: UploadRequest) -> Result<()> {
            if self.fail {
                return Err(ScenelockError::WorkerStopped);
            }
            self.sent.push(request);
            Ok(())
        }
    }

    fn live_feed() -> HostFeed {
        let mut feed = HostFeed::new();
        feed.set_device_pose(DevicePose::identity());
        feed.set_camera_frame(CameraFrame {
            image: EncodedImage::png(b"live".to_vec(), 640, 480),
            intrinsics: None,
        });
        feed
    }

    fn album_feed() -> HostFeed {
        let mut feed = live_feed();
        feed.set_selection(FrameSelection {
            movie: "m".into(),
            scene: "s".into(),
            frame_id: "f".into(),
            album_image: Some(EncodedImage::png(b"album".to_vec(), 320, 240)),
            is_album: true,
        });
        feed
    }

    fn coordinator() -> CaptureCoordinator {
        CaptureCoordinator::new(CaptureConfig {
            interval_s: 1.0,
            ..CaptureConfig::default()
        })
    }

    fn tick(
        c: &mut CaptureCoordinator,
        feed: &mut HostFeed,
        sink: &mut RecordingSink,
    ) -> TickOutcome {
        let tracking = feed.clone();
        c.tick(1.0, &tracking, feed, sink).unwrap()
    }

    #[test]
    fn test_interval_gates_capture() {
        let mut c = coordinator();
        let mut feed = live_feed();
        let mut sink = RecordingSink::default();
        let tracking = feed.clone();
        assert_eq!(c.tick(0.4, &tracking, &mut feed, &mut sink).unwrap(), TickOutcome::Waiting);
        assert_eq!(c.tick(0.4, &tracking, &mut feed, &mut sink).unwrap(), TickOutcome::Waiting);
        assert!(matches!(
            c.tick(0.4, &tracking, &mut feed, &mut sink).unwrap(),
            TickOutcome::Uploaded { album_first: false, .. }
        ));
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(c.state().interval_timer, 0.0);
    }

    #[test]
    fn test_in_flight_drops_ticks() {
        let mut c = coordinator();
        let mut feed = live_feed();
        let mut sink = RecordingSink::default();
        let TickOutcome::Uploaded { request_id, .. } = tick(&mut c, &mut feed, &mut sink) else {
            panic!("expected upload");
        };
        for _ in 0..5 {
            assert_eq!(tick(&mut c, &mut feed, &mut sink), TickOutcome::Busy);
        }
        assert_eq!(sink.sent.len(), 1);

        assert!(!c.complete(request_id + 100));
        assert!(c.in_flight());
        assert!(c.complete(request_id));
        assert!(!c.in_flight());
        assert!(matches!(tick(&mut c, &mut feed, &mut sink), TickOutcome::Uploaded { .. }));
        assert_eq!(sink.sent.len(), 2);
    }

    #[test]
    fn test_album_handshake_suppresses_until_ack() {
        let mut c = coordinator();
        let mut feed = album_feed();
        let mut sink = RecordingSink::default();

        let TickOutcome::Uploaded {
            request_id,
            album_first,
        } = tick(&mut c, &mut feed, &mut sink)
        else {
            panic!("expected upload");
        };
        assert!(album_first);
        assert_eq!(sink.sent[0].image.bytes, b"album");
        assert!(sink.sent[0].metadata.is_from_album);
        // Metadata still describes the live frame.
        assert_eq!(sink.sent[0].metadata.image_size.width, 640);
        c.complete(request_id);

        for _ in 2..=6 {
            assert_eq!(tick(&mut c, &mut feed, &mut sink), TickOutcome::Suppressed);
        }
        assert_eq!(sink.sent.len(), 1);

        c.acknowledge_album_first_frame();
        assert!(matches!(
            tick(&mut c, &mut feed, &mut sink),
            TickOutcome::Uploaded { album_first: false, .. }
        ));
        assert_eq!(sink.sent.len(), 2);
        assert_eq!(sink.sent[1].image.bytes, b"live");
    }

    #[test]
    fn test_reset_album_handshake_resends_album_image() {
        let mut c = coordinator();
        let mut feed = album_feed();
        let mut sink = RecordingSink::default();
        let TickOutcome::Uploaded { request_id, .. } = tick(&mut c, &mut feed, &mut sink) else {
            panic!("expected upload");
        };
        c.complete(request_id);
        c.reset_album_handshake();
        assert!(matches!(
            tick(&mut c, &mut feed, &mut sink),
            TickOutcome::Uploaded { album_first: true, .. }
        ));
    }

    #[test]
    fn test_missing_inputs_skip_without_state_change() {
        let mut c = coordinator();
        let mut sink = RecordingSink::default();

        let mut feed = album_feed();
        feed.clear_device_pose();
        assert_eq!(tick(&mut c, &mut feed, &mut sink), TickOutcome::NotTracking);

        let mut feed = album_feed();
        feed.clear_camera_frame();
        assert_eq!(tick(&mut c, &mut feed, &mut sink), TickOutcome::NoCameraFrame);

        assert!(!c.state().album_first_sent);
        assert!(!c.in_flight());
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn test_send_failure_clears_in_flight() {
        let mut c = coordinator();
        let mut feed = album_feed();
        let mut sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let tracking = feed.clone();
        assert!(c.tick(1.0, &tracking, &mut feed, &mut sink).is_err());
        assert!(!c.in_flight());
        assert!(!c.state().album_first_sent);

        sink.fail = false;
        assert!(matches!(
            tick(&mut c, &mut feed, &mut sink),
            TickOutcome::Uploaded { album_first: true, .. }
        ));
    }

    #[test]
    fn test_disabled_does_not_accumulate() {
        let mut c = coordinator();
        let mut feed = live_feed();
        let mut sink = RecordingSink::default();
        c.set_enabled(false);
        for _ in 0..3 {
            assert_eq!(tick(&mut c, &mut feed, &mut sink), TickOutcome::Disabled);
        }
        assert_eq!(c.state().interval_timer, 0.0);
        c.set_enabled(true);
        assert!(matches!(tick(&mut c, &mut feed, &mut sink), TickOutcome::Uploaded { .. }));
    }
}
