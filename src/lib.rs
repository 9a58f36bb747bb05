//! # scenelock - map-to-local pose alignment and guidance for AR hosts
//!
//! Localizes camera frames against a remote mapping service and guides the
//! user to the localized spot. Provides:
//! - ΔT alignment between the service's map frame and the device's local
//!   tracking frame
//! - Throttled capture/upload with the album-image handshake
//! - Guidance (distance, heading hint, arrow) with a one-shot overlay trigger
//! - C FFI for integration with C/C++/Unity/Swift
//!
//! ## Quick Start
//! ```no_run
//! use scenelock::{DevicePose, HostFeed, LocalizationSession, SessionConfig};
//!
//! let mut session = LocalizationSession::connect(SessionConfig::from_env()).unwrap();
//! let events = session.subscribe();
//! let mut feed = HostFeed::new();
//!
//! loop {
//!     feed.set_device_pose(DevicePose::identity());
//!     if let Some(frame) = session.tick(1.0 / 60.0, &mut feed) {
//!         println!("{} - {}", frame.distance_label, frame.hint.text());
//!     }
//!     for event in events.drain() {
//!         println!("{:?}", event);
//!     }
//! #   break;
//! }
//! ```

pub mod error;
pub mod types;
pub mod transform;
pub mod aligner;
pub mod capture;
pub mod protocol;
pub mod guidance;
pub mod source;
pub mod http;
pub mod worker;
pub mod events;
pub mod config;
pub mod session;
pub mod ffi;

pub use aligner::PoseAligner;
pub use capture::CaptureCoordinator;
pub use config::{CaptureConfig, GuidanceConfig, SessionConfig};
pub use error::{ErrorKind, ScenelockError};
pub use events::{SessionEvent, Subscription};
pub use guidance::{GuidanceCoordinator, GuidanceFrame};
pub use protocol::ProtocolClient;
pub use session::LocalizationSession;
pub use source::{HostFeed, ImageSource, TrackingSource};
pub use transform::RigidTransform;
pub use types::*;
pub use worker::UploadWorker;

/// Result type alias for scenelock operations.
pub type Result<T> = std::result::Result<T, ScenelockError>;
