//! Bridge between a host application and a modal image or video editor.
//!
//! The host opens a session with a loosely-typed configuration; the bridge checks
//! the license, merges configuration, drives the editor engine and packages the
//! exported artifact into a single settled outcome.

pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod license;
pub mod model;
pub mod packager;
pub mod session;

pub use config::{BridgeConfig, MediaKind};
pub use error::{BridgeError, ErrorDetail, ErrorKind};
pub use license::{LicenseInput, LicenseVerifier, StandardVerifier};
pub use model::{ExportPayload, ExportResult, SerializationOutput, SessionOutcome};
pub use session::{EditorBridge, OpenRequest, SessionState};
