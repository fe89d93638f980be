//! Editor session orchestration.
//!
//! [`EditorBridge`] is the caller-facing handle. A controller task owns the single
//! active session and processes opens, dismissals and engine signals in order;
//! handles only exchange messages with it.

mod controller;
mod state;

pub use controller::OpenRequest;
pub use state::{FinishKind, SessionState};

use crate::config::BridgeConfig;
use crate::engine::EngineFactory;
use crate::error::BridgeError;
use crate::license::LicenseInput;
use crate::model::SessionOutcome;
use controller::{Command, Controller};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Handle to a running bridge. Cheap to clone; the controller stops once every
/// handle is dropped, cancelling a session that is still open.
#[derive(Debug, Clone)]
pub struct EditorBridge {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl EditorBridge {
    /// Start the controller task. Must be called from within a Tokio runtime.
    pub fn spawn(config: BridgeConfig, factory: Arc<dyn EngineFactory>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(Controller::new(config, factory).run(cmd_rx));
        Self { cmd_tx }
    }

    /// Open an editor session and wait for its single outcome.
    ///
    /// Fails immediately with `E_SESSION_BUSY` while another session is active.
    pub async fn open(&self, request: OpenRequest) -> Result<SessionOutcome, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Open { request, reply })
            .map_err(|_| shut_down())?;
        rx.await.unwrap_or_else(|_| Err(shut_down()))
    }

    /// Close the active session. The pending open resolves with `E_SESSION_CANCELLED`
    /// unless packaging is already underway, in which case it completes first.
    pub fn dismiss(&self, animated: bool) {
        let _ = self.cmd_tx.send(Command::Dismiss { animated });
    }

    /// License used by later sessions whose request carries none.
    pub fn unlock_with_license(&self, license: LicenseInput) {
        let _ = self.cmd_tx.send(Command::Unlock(license));
    }

    /// Delete temporary files produced for the export with this identifier.
    pub fn release_temporary_data(&self, identifier: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Release {
            identifier: identifier.into(),
        });
    }

    pub async fn state(&self) -> SessionState {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::State(tx)).is_err() {
            return SessionState::Idle;
        }
        rx.await.unwrap_or(SessionState::Idle)
    }
}

fn shut_down() -> BridgeError {
    BridgeError::cancelled("The editor bridge shut down.")
}
