//! Error kinds surfaced to callers when a session request is rejected.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The named reasons a pending request can be rejected with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// License missing, unreachable or invalid.
    UnableToUnlock,
    /// The editor engine could not be constructed (corrupt state, bad configuration shape).
    UnableToLoad,
    /// Writing the export or the serialization failed.
    UnableToExport,
    /// Another session is already active on this bridge.
    SessionBusy,
    /// The session was torn down before it produced a result.
    SessionCancelled,
}

impl ErrorKind {
    /// Stable code for log lines and embedding layers.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::UnableToUnlock => "E_UNABLE_TO_UNLOCK",
            ErrorKind::UnableToLoad => "E_UNABLE_TO_LOAD",
            ErrorKind::UnableToExport => "E_UNABLE_TO_EXPORT",
            ErrorKind::SessionBusy => "E_SESSION_BUSY",
            ErrorKind::SessionCancelled => "E_SESSION_CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A human-readable failure with the rendered description of its cause, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an `anyhow` chain, rendered with all of its contexts.
    pub fn with_cause(message: impl Into<String>, cause: &anyhow::Error) -> Self {
        Self {
            message: message.into(),
            cause: Some(format!("{cause:#}")),
        }
    }

    pub fn with_error(message: impl Into<String>, cause: &dyn std::error::Error) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&error_string(&self.message, self.cause.as_deref()))
    }
}

/// Render `message`, suffixed with the cause description when one is present.
pub fn error_string(message: &str, cause: Option<&str>) -> String {
    match cause.map(str::trim) {
        Some(cause) if !cause.is_empty() => format!("{message}: {cause}"),
        _ => message.to_string(),
    }
}

/// Rejection payload of a session request.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("{kind}: {detail}")]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub detail: ErrorDetail,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, detail: ErrorDetail) -> Self {
        Self { kind, detail }
    }

    pub fn busy() -> Self {
        Self::new(
            ErrorKind::SessionBusy,
            ErrorDetail::new("Another editor session is already active."),
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionCancelled, ErrorDetail::new(message))
    }

    /// Message embedding the cause, as handed to the caller.
    pub fn message(&self) -> String {
        self.detail.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_string_appends_cause() {
        assert_eq!(error_string("Unable to export", None), "Unable to export");
        assert_eq!(
            error_string("Unable to export", Some("disk full")),
            "Unable to export: disk full"
        );
        assert_eq!(error_string("Unable to export", Some("  ")), "Unable to export");
    }

    #[test]
    fn detail_renders_full_anyhow_chain() {
        let err = anyhow::anyhow!("permission denied").context("write /tmp/x.jpg");
        let detail = ErrorDetail::with_cause("Unable to export image", &err);
        assert_eq!(
            detail.to_string(),
            "Unable to export image: write /tmp/x.jpg: permission denied"
        );
    }

    #[test]
    fn bridge_error_display_carries_code() {
        let err = BridgeError::busy();
        assert!(err.to_string().starts_with("E_SESSION_BUSY: "));
        assert_eq!(err.kind, ErrorKind::SessionBusy);
    }
}
