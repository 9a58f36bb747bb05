//! Listener registration with owned handles.
//!
//! Every [`Subscription`] owns the receiving end of its own bounded channel.
//! Dropping the handle disconnects it, and the bus prunes disconnected
//! listeners on the next publish, so no callback can outlive its owner.

use crate::error::ErrorKind;
use crate::transform::RigidTransform;
use crate::types::{DevicePose, GuidanceStatus, Hint, Pose};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Per-listener queue depth. Events beyond this are dropped for that listener.
pub const SUBSCRIPTION_CAPACITY: usize = 256;

/// Discrete state transitions published by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An upload was issued.
    CaptureStarted { request_id: u64, album_first: bool },
    CaptureEnabled(bool),
    /// A successful localization (server or manual).
    Localized(Pose),
    AlbumFirstFrameProcessed,
    /// Aligned target for frustum visualization.
    TargetPose {
        transform: RigidTransform,
        fov: f64,
        aspect: f64,
    },
    AlignmentReset,
    HintChanged(Hint),
    StatusChanged(GuidanceStatus),
    Distance { meters: f64, label: String },
    Arrow(DevicePose),
    GuidanceVisible(bool),
    /// One-shot overlay trigger.
    OverlayShow { distance: f64, yaw_deg: f64 },
    ServerReachable(bool),
    Error { kind: ErrorKind, message: String },
}

/// Receiving handle for published events.
pub struct Subscription<T> {
    receiver: Receiver<T>,
}

impl<T> Subscription<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Receive with a timeout. `None` on timeout or when the bus is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(ev) => Some(ev),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take everything queued right now.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }
}

/// Fan-out of cloned events to every live subscription.
pub struct EventBus<T> {
    listeners: Vec<Sender<T>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Subscription<T> {
        let (sender, receiver) = crossbeam_channel::bounded(SUBSCRIPTION_CAPACITY);
        self.listeners.push(sender);
        Subscription { receiver }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn publish(&mut self, event: T) {
        self.listeners.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("Subscription queue full, dropping event");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
