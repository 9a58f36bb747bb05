use std::fmt;

/// Errors raised by the localization core.
///
/// None of these are fatal to the tick loop: the session reports them as
/// events and keeps ticking.
#[derive(Debug, thiserror::Error)]
pub enum ScenelockError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("Response parse failed: {0}")]
    Parse(String),

    #[error("{0}")]
    ServerRejected(String),

    #[error("Alignment transform is not finite, falling back to identity")]
    InvalidTransform,

    #[error("Device tracking is not available")]
    TrackingUnavailable,

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upload worker stopped")]
    WorkerStopped,

    #[error("An upload is already in flight")]
    Busy,
}

/// Coarse error classes reported to the presentation layer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network = 0,
    Parse = 1,
    ServerRejected = 2,
    InvalidTransform = 3,
    Tracking = 4,
    Internal = 5,
}

impl ScenelockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScenelockError::Network(_)
            | ScenelockError::Http { .. }
            | ScenelockError::Io(_)
            | ScenelockError::InvalidUrl(_) => ErrorKind::Network,
            ScenelockError::Parse(_) | ScenelockError::Json(_) => ErrorKind::Parse,
            ScenelockError::ServerRejected(_) => ErrorKind::ServerRejected,
            ScenelockError::InvalidTransform => ErrorKind::InvalidTransform,
            ScenelockError::TrackingUnavailable => ErrorKind::Tracking,
            ScenelockError::Config(_) | ScenelockError::WorkerStopped | ScenelockError::Busy => {
                ErrorKind::Internal
            }
        }
    }
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &ScenelockError) {
        self.set_message(err);
    }

    pub fn set_message(&self, msg: impl fmt::Display) {
        if let Ok(mut slot) = self.message.lock() {
            // Interior NULs would truncate the C string early.
            let text = msg.to_string().replace('\0', " ");
            *slot = fmt::format(format_args!("{}\0", text));
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ScenelockError::Network("x".into()).kind(), ErrorKind::Network);
        assert_eq!(
            ScenelockError::Http { status: 429, reason: "queue full".into() }.kind(),
            ErrorKind::Network
        );
        assert_eq!(ScenelockError::Parse("x".into()).kind(), ErrorKind::Parse);
        assert_eq!(
            ScenelockError::ServerRejected("please keep scanning".into()).kind(),
            ErrorKind::ServerRejected
        );
        assert_eq!(ScenelockError::InvalidTransform.kind(), ErrorKind::InvalidTransform);
        assert_eq!(ScenelockError::WorkerStopped.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_server_rejected_displays_reason_verbatim() {
        let err = ScenelockError::ServerRejected("queue full".into());
        assert_eq!(err.to_string(), "queue full");
    }

    #[test]
    fn test_last_error_is_nul_terminated() {
        let slot = LastError::new();
        assert!(slot.as_ptr().is_null());
        slot.set(&ScenelockError::Busy);
        let text = unsafe { std::ffi::CStr::from_ptr(slot.as_ptr()) };
        assert_eq!(text.to_str().unwrap(), "An upload is already in flight");
    }
}
