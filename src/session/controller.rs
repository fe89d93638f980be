//! Session lifecycle controller.
//!
//! Owns the single active session and drives it from open through export or
//! cancellation to teardown. Bridge commands and engine signals are handled one at
//! a time on the controller task, so transitions never interleave.

use super::state::{FinishKind, Pending, Reply, SessionState};
use crate::config::{merge, plan_export, BridgeConfig, ExportPlan};
use crate::convert::to_media_source;
use crate::engine::{EditorEngine, EngineEvents, EngineFactory, Launch};
use crate::error::{BridgeError, ErrorDetail, ErrorKind};
use crate::license::{LicenseGate, LicenseInput, LicenseOutcome};
use crate::model::{
    EngineEvent, ExportPayload, ExportResult, SerializationOutput, SerializationState,
    SessionOutcome, Size,
};
use crate::packager;
use rand::RngCore;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

/// Inbound request: what to edit, caller configuration and optional prior state.
#[derive(Debug, Clone, Default)]
pub struct OpenRequest {
    /// A URI, `{ "uri": ... }`, or a list of URIs and `{ "videoURI", ... }` clips
    /// for a composition. `Null` leaves the choice to the engine.
    pub source: Value,
    /// Output size of a composition; ignored for single assets.
    pub video_size: Option<Size>,
    pub configuration: Value,
    pub serialization: Option<SerializationState>,
    /// Takes precedence over the license unlocked on the bridge.
    pub license: Option<LicenseInput>,
}

/// Messages from [`super::EditorBridge`] handles.
pub(crate) enum Command {
    Open { request: OpenRequest, reply: Reply },
    Dismiss { animated: bool },
    Unlock(LicenseInput),
    Release { identifier: String },
    State(oneshot::Sender<SessionState>),
}

type Packaged = Result<ExportResult, ErrorDetail>;

/// One bridge invocation, from open until its continuation is settled and the
/// engine released.
struct SessionRequest {
    id: String,
    state: SessionState,
    pending: Pending,
    request: Option<OpenRequest>,
    plan: Option<ExportPlan>,
    engine: Option<Box<dyn EditorEngine>>,
    events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    validation: Option<JoinHandle<LicenseOutcome>>,
    packaging: Option<JoinHandle<Packaged>>,
    /// Dismissal that arrived while packaging was in flight; carries `animated`.
    deferred_dismiss: Option<bool>,
}

enum Step {
    Validated(Result<LicenseOutcome, JoinError>),
    Packaged(Result<Packaged, JoinError>),
    Engine(Option<EngineEvent>),
}

impl SessionRequest {
    /// Wait for whatever the current state is waiting on.
    ///
    /// Only polls handles by reference, so losing a `select!` race drops nothing.
    async fn next_step(&mut self) -> Step {
        if let Some(h) = self.validation.as_mut() {
            return Step::Validated(h.await);
        }
        if let Some(h) = self.packaging.as_mut() {
            return Step::Packaged(h.await);
        }
        if let Some(rx) = self.events.as_mut() {
            return Step::Engine(rx.recv().await);
        }
        futures::future::pending().await
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(session = %self.id, from = ?self.state, to = ?next, "session transition");
        self.state = next;
    }
}

/// Generate a correlation id for a session.
fn gen_session_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    b.iter().map(|x| format!("{x:02x}")).collect()
}

pub(crate) struct Controller {
    config: BridgeConfig,
    gate: LicenseGate,
    factory: Arc<dyn EngineFactory>,
    license: Option<LicenseInput>,
    active: Option<SessionRequest>,
    temp_files: HashMap<String, Vec<PathBuf>>,
}

impl Controller {
    pub(crate) fn new(config: BridgeConfig, factory: Arc<dyn EngineFactory>) -> Self {
        let gate = LicenseGate::new(config.verifier.clone());
        let license = config.license.clone();
        Self {
            config,
            gate,
            factory,
            license,
            active: None,
            temp_files: HashMap::new(),
        }
    }

    /// Process commands and session steps until every bridge handle is dropped.
    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                step = async {
                    match self.active.as_mut() {
                        Some(session) => session.next_step().await,
                        None => futures::future::pending().await,
                    }
                } => self.handle_step(step),
            }
        }

        if self.active.is_some() {
            self.finish(Err(BridgeError::cancelled("The editor bridge shut down.")), false);
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Open { request, reply } => self.open(request, reply),
            Command::Dismiss { animated } => self.dismiss(animated),
            Command::Unlock(license) => {
                tracing::info!("license updated");
                self.license = Some(license);
            }
            Command::Release { identifier } => self.release(&identifier),
            Command::State(reply) => {
                let _ = reply.send(self.state());
            }
        }
    }

    fn handle_step(&mut self, step: Step) {
        match step {
            Step::Validated(joined) => self.on_validated(joined),
            Step::Packaged(joined) => self.on_packaged(joined),
            Step::Engine(event) => self.on_engine_event(event),
        }
    }

    fn state(&self) -> SessionState {
        self.active
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    fn open(&mut self, request: OpenRequest, reply: Reply) {
        if let Some(active) = &self.active {
            tracing::warn!(active = %active.id, state = ?active.state, "open rejected: session busy");
            let _ = reply.send(Err(BridgeError::busy()));
            return;
        }

        let id = gen_session_id();
        let license = request.license.clone().or_else(|| self.license.clone());
        let gate = self.gate.clone();
        let validation = tokio::spawn(async move { gate.validate(license.as_ref()).await });
        tracing::info!(session = %id, "opening editor session");

        let mut session = SessionRequest {
            id,
            state: SessionState::Idle,
            pending: Pending::new(reply),
            request: Some(request),
            plan: None,
            engine: None,
            events: None,
            validation: Some(validation),
            packaging: None,
            deferred_dismiss: None,
        };
        session.transition(SessionState::Validating);
        self.active = Some(session);
    }

    fn on_validated(&mut self, joined: Result<LicenseOutcome, JoinError>) {
        let Some(session) = self.active.as_mut() else {
            return;
        };
        session.validation = None;

        let outcome = joined.unwrap_or_else(|e| LicenseOutcome {
            valid: false,
            error: Some(ErrorDetail::with_error("License validation did not complete", &e)),
        });
        if !outcome.valid {
            let detail = outcome
                .error
                .unwrap_or_else(|| ErrorDetail::new("Unable to unlock with license"));
            self.finish(Err(BridgeError::new(ErrorKind::UnableToUnlock, detail)), false);
            return;
        }

        session.transition(SessionState::Configuring);
        if let Err(detail) = self.configure() {
            self.finish(Err(BridgeError::new(ErrorKind::UnableToLoad, detail)), false);
        }
    }

    /// Merge configuration, plan the export, build and present the engine.
    fn configure(&mut self) -> Result<(), ErrorDetail> {
        let Some(session) = self.active.as_mut() else {
            return Ok(());
        };
        let request = session.request.take().unwrap_or_default();

        let source = match &request.source {
            Value::Null => None,
            value => Some(
                to_media_source(value, &self.config.source_dir)
                    .ok_or_else(|| ErrorDetail::new(format!("Invalid editor source {value}")))?,
            ),
        };
        let video_size = match (&source, request.video_size) {
            (Some(source), Some(size)) if source.is_composition() => Some(size),
            (_, Some(_)) => {
                tracing::warn!(session = %session.id, "ignoring video size, only compositions take one");
                None
            }
            (_, None) => None,
        };

        let effective = merge(&request.configuration, &self.config.overrides);
        let plan = plan_export(
            &effective,
            self.config.media,
            &self.config.temp_dir,
            &session.id,
        )?;

        let (events, rx) = EngineEvents::channel();
        let launch = Launch {
            source: source.as_ref(),
            video_size,
            configuration: &effective,
            state: request.serialization.as_ref(),
        };
        let mut engine = self
            .factory
            .create(launch, events)
            .map_err(|e| ErrorDetail::with_cause("Unable to load editor", &e))?;

        if let Some(hook) = &self.config.will_present {
            hook(engine.as_mut());
        }
        if let Err(e) = engine.present() {
            engine.dismiss(false);
            return Err(ErrorDetail::with_cause("Unable to present editor", &e));
        }

        session.plan = Some(plan);
        session.engine = Some(engine);
        session.events = Some(rx);
        session.transition(SessionState::Presenting);
        Ok(())
    }

    fn on_engine_event(&mut self, event: Option<EngineEvent>) {
        let Some(session) = self.active.as_mut() else {
            return;
        };

        match event {
            None => {
                session.events = None;
                if session.state.awaits_engine() {
                    tracing::warn!(session = %session.id, "editor went away without a result");
                    self.finish(
                        Err(BridgeError::cancelled("The editor closed without a result.")),
                        false,
                    );
                }
            }
            Some(EngineEvent::Presented) => {
                if session.state == SessionState::Presenting {
                    session.transition(SessionState::Editing);
                }
            }
            Some(event) if !session.state.awaits_engine() => {
                tracing::debug!(session = %session.id, state = ?session.state, ?event, "ignoring late engine event");
            }
            Some(EngineEvent::Cancelled) => {
                session.transition(SessionState::Finishing(FinishKind::Cancel));
                self.finish(Ok(SessionOutcome::Cancelled), true);
            }
            Some(EngineEvent::Exported(artifact)) => {
                session.transition(SessionState::Finishing(FinishKind::Export));
                self.start_packaging(*artifact);
            }
        }
    }

    fn start_packaging(&mut self, artifact: crate::model::Artifact) {
        let Some(session) = self.active.as_mut() else {
            return;
        };
        let Some(plan) = session.plan.clone() else {
            self.finish(
                Err(BridgeError::new(
                    ErrorKind::UnableToExport,
                    ErrorDetail::new("Export finished before the session was configured"),
                )),
                true,
            );
            return;
        };

        let serialized = if plan.serialization.enabled {
            let embed = plan.serialization.embed_source_image;
            let result = match session.engine.as_mut() {
                Some(engine) => engine.serialize(embed),
                None => Err(anyhow::anyhow!("no editor instance")),
            };
            match result {
                Ok(state) => Some(state),
                Err(e) => {
                    self.finish(
                        Err(BridgeError::new(
                            ErrorKind::UnableToExport,
                            ErrorDetail::with_cause("Unable to serialize editor state", &e),
                        )),
                        true,
                    );
                    return;
                }
            }
        } else {
            None
        };

        let id = session.id.clone();
        tracing::debug!(session = %id, destination = ?plan.export.destination, "packaging export");
        session.packaging = Some(tokio::task::spawn_blocking(move || {
            packager::package(&artifact, &plan, serialized.as_ref(), &id)
        }));
    }

    fn on_packaged(&mut self, joined: Result<Packaged, JoinError>) {
        let Some(session) = self.active.as_mut() else {
            return;
        };
        session.packaging = None;
        let animated = session.deferred_dismiss.unwrap_or(true);

        let result = match joined {
            Ok(Ok(export)) => {
                self.remember_temp_files(&export);
                Ok(SessionOutcome::Exported {
                    export: Box::new(export),
                })
            }
            Ok(Err(detail)) => Err(BridgeError::new(ErrorKind::UnableToExport, detail)),
            Err(e) => Err(BridgeError::new(
                ErrorKind::UnableToExport,
                ErrorDetail::with_error("Packaging did not complete", &e),
            )),
        };
        self.finish(result, animated);
    }

    fn dismiss(&mut self, animated: bool) {
        let Some(session) = self.active.as_mut() else {
            tracing::debug!("dismiss without an active session");
            return;
        };
        if session.packaging.is_some() {
            tracing::info!(session = %session.id, "dismiss deferred until packaging completes");
            session.deferred_dismiss = Some(animated);
            return;
        }
        tracing::info!(session = %session.id, state = ?session.state, "dismissing editor session");
        self.finish(Err(BridgeError::cancelled("The editor was dismissed.")), animated);
    }

    /// Tear the session down and settle its continuation. Every exit path ends here.
    fn finish(&mut self, result: Result<SessionOutcome, BridgeError>, animated: bool) {
        let Some(mut session) = self.active.take() else {
            return;
        };

        match &result {
            Ok(SessionOutcome::Exported { .. }) => {
                tracing::info!(session = %session.id, "session exported")
            }
            Ok(SessionOutcome::Cancelled) => {
                tracing::info!(session = %session.id, "session cancelled by user")
            }
            Err(e) => {
                tracing::warn!(session = %session.id, kind = %e.kind, error = %e.message(), "session failed")
            }
        }
        session.transition(SessionState::Dismissed);
        if let Some(h) = session.validation.take() {
            h.abort();
        }
        if let Some(h) = session.packaging.take() {
            h.abort();
        }
        if let Some(mut engine) = session.engine.take() {
            engine.dismiss(animated);
        }

        if !session.pending.settle(result) {
            tracing::warn!(session = %session.id, "session was already settled");
        }
    }

    fn remember_temp_files(&mut self, export: &ExportResult) {
        let mut urls = Vec::new();
        if let ExportPayload::File { url } = &export.export {
            urls.push(url.as_str());
        }
        if let Some(SerializationOutput::File { url }) = &export.serialization {
            urls.push(url.as_str());
        }
        let paths: Vec<PathBuf> = urls
            .into_iter()
            .filter_map(|u| Url::parse(u).ok()?.to_file_path().ok())
            .filter(|p| p.starts_with(&self.config.temp_dir))
            .collect();
        if !paths.is_empty() {
            self.temp_files.insert(export.identifier.clone(), paths);
        }
    }

    /// Deletion runs off the controller task; the files may be large.
    fn release(&mut self, identifier: &str) {
        let Some(paths) = self.temp_files.remove(identifier) else {
            tracing::debug!(identifier, "no temporary data to release");
            return;
        };
        tokio::spawn(async move {
            for path in paths {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => tracing::debug!(path = %path.display(), "released temporary file"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to release temporary file")
                    }
                }
            }
        });
    }
}
