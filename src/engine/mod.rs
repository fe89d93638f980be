//! Editor engine collaborator.
//!
//! The engine renders the editing UI and produces the artifact; the bridge only
//! constructs it, presents it, asks it for its serialized state and dismisses it.
//! Lifecycle signals travel back over a channel created per session.

mod headless;

pub use headless::{HeadlessEngine, HeadlessFactory};

use crate::model::{Artifact, EngineEvent, MediaSource, SerializationState, Size};
use anyhow::Result;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;

/// A live editor instance owned by the session controller.
pub trait EditorEngine: Send {
    /// Put the editor on screen. Report [`EngineEvents::presented`] once interactive.
    fn present(&mut self) -> Result<()>;

    /// Current editing state, optionally embedding the source image.
    fn serialize(&mut self, embed_source_image: bool) -> Result<SerializationState>;

    /// Tear the editor down. Must tolerate being called more than once.
    fn dismiss(&mut self, animated: bool);
}

/// Everything an engine is constructed from for one session.
#[derive(Debug, Clone, Copy)]
pub struct Launch<'a> {
    /// `None` when the request named no source; engines may supply their own.
    pub source: Option<&'a MediaSource>,
    /// Output size of a composition. Never set for single assets.
    pub video_size: Option<Size>,
    pub configuration: &'a Value,
    pub state: Option<&'a SerializationState>,
}

/// Builds engines from the effective configuration and optional prior state.
pub trait EngineFactory: Send + Sync {
    fn create(&self, launch: Launch<'_>, events: EngineEvents) -> Result<Box<dyn EditorEngine>>;
}

/// Sending half of a session's event channel.
///
/// Any number of `presented` calls may be made, but only the first terminal
/// event (`exported` or `cancelled`) is delivered; later ones are dropped.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    tx: mpsc::UnboundedSender<EngineEvent>,
    finished: Arc<AtomicBool>,
}

impl EngineEvents {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                finished: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn presented(&self) {
        if !self.finished.load(Ordering::Acquire) {
            let _ = self.tx.send(EngineEvent::Presented);
        }
    }

    /// Returns `false` when a terminal event was already delivered.
    pub fn exported(&self, artifact: Artifact) -> bool {
        self.finish(EngineEvent::Exported(Box::new(artifact)))
    }

    /// Returns `false` when a terminal event was already delivered.
    pub fn cancelled(&self) -> bool {
        self.finish(EngineEvent::Cancelled)
    }

    fn finish(&self, event: EngineEvent) -> bool {
        debug_assert!(event.is_terminal());
        if self.finished.swap(true, Ordering::AcqRel) {
            tracing::debug!(?event, "dropping duplicate terminal engine event");
            return false;
        }
        self.tx.send(event).is_ok()
    }
}
