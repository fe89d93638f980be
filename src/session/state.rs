use crate::error::BridgeError;
use crate::model::SessionOutcome;
use serde::Serialize;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinishKind {
    Export,
    Cancel,
}

/// Where the bridge's single session currently is.
///
/// `Dismissed` is only observable from inside the controller; once teardown
/// completes the bridge reports `Idle` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Validating,
    Configuring,
    Presenting,
    Editing,
    Finishing(FinishKind),
    Dismissed,
}

impl SessionState {
    /// States in which the engine may still deliver its terminal event.
    pub fn awaits_engine(self) -> bool {
        matches!(self, SessionState::Presenting | SessionState::Editing)
    }
}

pub(crate) type Reply = oneshot::Sender<Result<SessionOutcome, BridgeError>>;

/// The caller's continuation. Settles at most once; later attempts are no-ops.
pub(crate) struct Pending(Option<Reply>);

impl Pending {
    pub(crate) fn new(reply: Reply) -> Self {
        Self(Some(reply))
    }

    /// Returns `false` when already settled.
    pub(crate) fn settle(&mut self, result: Result<SessionOutcome, BridgeError>) -> bool {
        match self.0.take() {
            Some(reply) => {
                // A caller that stopped waiting is not an error for the session.
                let _ = reply.send(result);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_settles_once() {
        let (tx, mut rx) = oneshot::channel();
        let mut pending = Pending::new(tx);
        assert!(pending.settle(Ok(SessionOutcome::Cancelled)));
        assert!(!pending.settle(Err(BridgeError::busy())));
        assert_eq!(rx.try_recv().unwrap(), Ok(SessionOutcome::Cancelled));
    }

    #[test]
    fn only_presenting_and_editing_await_engine() {
        assert!(SessionState::Presenting.awaits_engine());
        assert!(SessionState::Editing.awaits_engine());
        assert!(!SessionState::Finishing(FinishKind::Export).awaits_engine());
        assert!(!SessionState::Validating.awaits_engine());
    }
}
