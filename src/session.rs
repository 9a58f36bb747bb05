//! One localization session: the aligner, capture coordinator, protocol
//! client and guidance coordinator, driven from the host's frame loop.
//!
//! All state changes happen inside [`LocalizationSession::tick`] and the
//! explicit control methods, on the caller's thread. Network completions
//! queued by the uploader are drained at the start of each tick.

use crate::aligner::{AlignOutcome, PoseAligner};
use crate::capture::{CaptureCoordinator, TickOutcome};
use crate::config::SessionConfig;
use crate::events::{EventBus, SessionEvent, Subscription};
use crate::guidance::{GuidanceCoordinator, GuidanceFrame};
use crate::protocol::ProtocolClient;
use crate::source::{ImageSource, TrackingSource};
use crate::transform::RigidTransform;
use crate::types::{GuidanceUpdate, Pose};
use crate::worker::{UploadWorker, Uploader, WorkerEvent};
use crate::{Result, ScenelockError};
use std::time::Duration;

pub struct LocalizationSession<U: Uploader = UploadWorker> {
    config: SessionConfig,
    aligner: PoseAligner,
    capture: CaptureCoordinator,
    protocol: ProtocolClient,
    guidance: GuidanceCoordinator,
    uploader: U,
    events: EventBus<SessionEvent>,
    /// Localized pose whose ΔT solve is waiting for tracking.
    deferred: Option<Pose>,
}

impl LocalizationSession<UploadWorker> {
    /// Session uploading over HTTP to `config.server_url`.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let timeout = Duration::try_from_secs_f64(config.request_timeout_s)
            .map_err(|e| ScenelockError::Config(format!("request_timeout_s: {}", e)))?;
        let worker = UploadWorker::http(&config.server_url, timeout)?;
        log::info!("Session connected to {}", config.server_url);
        Self::with_uploader(config, worker)
    }
}

impl<U: Uploader> LocalizationSession<U> {
    pub fn with_uploader(config: SessionConfig, uploader: U) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            aligner: PoseAligner::new(config.auto_compute_delta_t),
            capture: CaptureCoordinator::new(config.capture.clone()),
            protocol: ProtocolClient::new(config.stop_capture_on_success),
            guidance: GuidanceCoordinator::new(config.guidance.clone()),
            uploader,
            events: EventBus::new(),
            deferred: None,
            config,
        })
    }

    /// Register a listener. Dropping the handle unsubscribes it.
    pub fn subscribe(&mut self) -> Subscription<SessionEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn aligner(&self) -> &PoseAligner {
        &self.aligner
    }

    pub fn capture(&self) -> &CaptureCoordinator {
        &self.capture
    }

    pub fn guidance(&self) -> &GuidanceCoordinator {
        &self.guidance
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    pub fn uploader_mut(&mut self) -> &mut U {
        &mut self.uploader
    }

    /// Advance one frame against a source that provides both the device pose
    /// and images.
    pub fn tick<S: TrackingSource + ImageSource>(
        &mut self,
        dt: f64,
        source: &mut S,
    ) -> Option<GuidanceFrame> {
        let device = source.device_pose();
        self.tick_with(dt, &device, source)
    }

    /// Advance one frame.
    ///
    /// Order: finished uploads are processed first, then capture may issue a
    /// new upload, then guidance is evaluated.
    pub fn tick_with(
        &mut self,
        dt: f64,
        tracking: &dyn TrackingSource,
        images: &mut dyn ImageSource,
    ) -> Option<GuidanceFrame> {
        self.drain_completions(tracking);
        self.retry_deferred_alignment(tracking);

        match self.capture.tick(dt, tracking, images, &mut self.uploader) {
            Ok(TickOutcome::Uploaded {
                request_id,
                album_first,
            }) => self.events.publish(SessionEvent::CaptureStarted {
                request_id,
                album_first,
            }),
            Ok(_) => {}
            Err(e) => self.report(e),
        }

        let Some(device) = tracking.device_pose() else {
            self.guidance.advance(dt);
            return None;
        };
        let frame = self.guidance.tick(dt, &device)?;
        self.publish_guidance(&frame);
        Some(frame)
    }

    /// Treat `pose` as a successful localization result.
    ///
    /// Without tracking the ΔT solve is deferred to the next tick that has a
    /// device pose, and guidance stays off until then.
    pub fn apply_localization(&mut self, pose: Pose, tracking: &dyn TrackingSource) {
        let outcome = self.aligner.apply_server_pose(Some(&pose), tracking);
        if matches!(outcome, Ok(AlignOutcome::Ignored)) {
            return;
        }
        self.deferred = None;
        self.events.publish(SessionEvent::Localized(pose.clone()));
        self.finish_alignment(outcome, pose);
    }

    /// A localized pose is waiting for tracking before ΔT can be solved.
    pub fn alignment_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    /// Inject a target pose in the map frame, bypassing the service.
    pub fn set_manual_pose(&mut self, pose: &RigidTransform) -> Pose {
        self.deferred = None;
        let manual = self.aligner.set_manual_pose(pose);
        self.events.publish(SessionEvent::Localized(manual.clone()));
        self.activate_guidance(&manual);
        manual
    }

    /// Guide toward a target given directly in the local frame.
    pub fn set_guidance_target(&mut self, target: RigidTransform) {
        let was_active = self.guidance.is_active();
        self.guidance.set_target(target);
        if !was_active {
            self.events.publish(SessionEvent::GuidanceVisible(true));
        }
    }

    pub fn set_guidance_active(&mut self, active: bool) {
        let was_active = self.guidance.is_active();
        self.guidance.set_active(active);
        if was_active != active {
            self.events.publish(SessionEvent::GuidanceVisible(active));
        }
    }

    /// The overlay was dismissed: guidance resumes and the overlay re-arms
    /// after the cooldown.
    pub fn overlay_hidden(&mut self) {
        log::info!("Overlay hidden, resuming guidance");
        self.set_guidance_active(true);
    }

    pub fn set_capture_enabled(&mut self, enabled: bool) {
        if self.capture.is_enabled() != enabled {
            self.capture.set_enabled(enabled);
            self.events.publish(SessionEvent::CaptureEnabled(enabled));
        }
    }

    /// A new album image was picked; send it again on the next capture.
    pub fn reset_album_handshake(&mut self) {
        self.capture.reset_album_handshake();
        log::info!("Album handshake reset");
    }

    /// Back to identity ΔT; the next localization solves it again.
    pub fn reset_alignment(&mut self) {
        self.deferred = None;
        self.aligner.reset_delta_t();
        self.events.publish(SessionEvent::AlignmentReset);
    }

    /// Ask the uploader to ping the service. The answer arrives as
    /// [`SessionEvent::ServerReachable`] on a later tick.
    pub fn probe_server(&mut self) {
        if let Err(e) = self.uploader.ping() {
            self.report(e);
        }
    }

    fn drain_completions(&mut self, tracking: &dyn TrackingSource) {
        while let Some(event) = self.uploader.poll() {
            match event {
                WorkerEvent::Uploaded { request_id, result } => {
                    self.capture.complete(request_id);
                    match result {
                        Ok(body) => self.handle_response(&body, tracking),
                        Err(e) => self.report(e),
                    }
                }
                WorkerEvent::Pinged(result) => {
                    let reachable = match result {
                        Ok(ok) => ok,
                        Err(e) => {
                            log::warn!("Ping failed: {}", e);
                            false
                        }
                    };
                    log::info!("Server reachable: {}", reachable);
                    self.events.publish(SessionEvent::ServerReachable(reachable));
                }
            }
        }
    }

    fn handle_response(&mut self, body: &str, tracking: &dyn TrackingSource) {
        let reply = self.protocol.process_response(body);

        if reply.album_first_frame_processed {
            self.capture.acknowledge_album_first_frame();
            self.events.publish(SessionEvent::AlbumFirstFrameProcessed);
        }

        match reply.outcome {
            Ok(pose) => {
                if reply.disable_capture {
                    self.set_capture_enabled(false);
                }
                self.apply_localization(pose, tracking);
            }
            Err(e) => self.report(e),
        }
    }

    fn retry_deferred_alignment(&mut self, tracking: &dyn TrackingSource) {
        if tracking.device_pose().is_none() {
            return;
        }
        let Some(pose) = self.deferred.take() else {
            return;
        };
        log::info!("Tracking available, solving deferred alignment");
        let outcome = self.aligner.apply_server_pose(Some(&pose), tracking);
        self.finish_alignment(outcome, pose);
    }

    fn finish_alignment(&mut self, outcome: Result<AlignOutcome>, pose: Pose) {
        match outcome {
            Ok(AlignOutcome::Ignored) => return,
            Ok(_) => {}
            Err(ScenelockError::TrackingUnavailable) => {
                log::info!("No device pose, alignment deferred");
                self.deferred = Some(pose);
                return;
            }
            Err(e) => self.report(e),
        }
        self.activate_guidance(&pose);
    }

    fn activate_guidance(&mut self, pose: &Pose) {
        let transform = self.aligner.get_target_in_local_frame();
        self.events.publish(SessionEvent::TargetPose {
            transform,
            fov: pose.fov,
            aspect: pose.aspect,
        });

        let was_active = self.guidance.is_active();
        self.guidance.on_pose(transform, was_active);
        if !was_active {
            self.events.publish(SessionEvent::GuidanceVisible(true));
        }
    }

    fn publish_guidance(&mut self, frame: &GuidanceFrame) {
        if frame.updates.contains(GuidanceUpdate::DISTANCE) {
            self.events.publish(SessionEvent::Distance {
                meters: frame.distance_m,
                label: frame.distance_label.clone(),
            });
        }
        if frame.updates.contains(GuidanceUpdate::HINT) {
            self.events.publish(SessionEvent::HintChanged(frame.hint));
        }
        if frame.updates.contains(GuidanceUpdate::STATUS) {
            self.events.publish(SessionEvent::StatusChanged(frame.status));
        }
        if frame.updates.contains(GuidanceUpdate::ARROW) {
            self.events.publish(SessionEvent::Arrow(frame.arrow));
        }
        if frame.overlay_fired() {
            self.events.publish(SessionEvent::OverlayShow {
                distance: frame.distance_m,
                yaw_deg: frame.yaw_deg,
            });
        }
    }

    fn report(&mut self, error: ScenelockError) {
        match &error {
            ScenelockError::ServerRejected(reason) => {
                log::info!("Localization rejected: {}", reason)
            }
            other => log::warn!("Session error: {}", other),
        }
        self.events.publish(SessionEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}
