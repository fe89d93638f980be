//! Engine without a UI: "edits" by passing the source file through.
//!
//! Used by the command-line front end and handy for wiring tests. Its serialized
//! state is a small JSON document that it also accepts back as prior state.

use super::{EditorEngine, EngineEvents, EngineFactory, Launch};
use crate::model::{Artifact, FileKind, MediaSource, SerializationState, Size, VideoSegment};
use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

const STATE_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeadlessState {
    version: String,
    source: String,
    #[serde(default)]
    operations: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

/// Creates [`HeadlessEngine`]s for whatever source each session names.
///
/// Only local files are accepted. A composition exports its first clip and
/// reports every clip as a segment.
#[derive(Debug, Clone, Default)]
pub struct HeadlessFactory {
    /// Finish with a cancellation instead of an export.
    pub cancel: bool,
}

fn kind_of(path: &Path) -> Result<FileKind> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(FileKind::from_extension)
        .with_context(|| format!("unsupported source type {}", path.display()))
}

impl EngineFactory for HeadlessFactory {
    fn create(&self, launch: Launch<'_>, events: EngineEvents) -> Result<Box<dyn EditorEngine>> {
        let source = launch.source.context("no source to edit")?;
        let paths = source
            .urls()
            .into_iter()
            .map(|url| {
                url.to_file_path()
                    .map_err(|_| anyhow!("source {url} is not a local file"))
            })
            .collect::<Result<Vec<PathBuf>>>()?;
        let first = paths.first().context("composition has no clips")?.clone();

        let kind = kind_of(&first)?;
        for path in &paths {
            if source.is_composition() && !kind_of(path)?.is_video() {
                bail!("composition clip {} is not a video", path.display());
            }
            if !path.is_file() {
                bail!("source {} does not exist", path.display());
            }
        }

        let segments = match source {
            MediaSource::Asset(_) => None,
            MediaSource::Composition(clips) => Some(
                clips
                    .iter()
                    .map(|c| VideoSegment {
                        video_uri: c.url.to_string(),
                        start_time: c.start_time,
                        end_time: c.end_time,
                    })
                    .collect(),
            ),
        };

        let operations = match launch.state {
            Some(state) => {
                let prior: HeadlessState = serde_json::from_slice(state.as_bytes())
                    .context("decode serialization state")?;
                if prior.version != STATE_VERSION {
                    bail!("unsupported serialization version {}", prior.version);
                }
                prior.operations
            }
            None => Vec::new(),
        };

        let manifest = launch
            .configuration
            .get("manifest")
            .cloned()
            .filter(|v| !v.is_null());

        Ok(Box::new(HeadlessEngine {
            source: first,
            kind,
            segments,
            size: launch.video_size,
            operations,
            manifest,
            cancel: self.cancel,
            events,
            loaded: Arc::new(OnceLock::new()),
            dismissed: false,
        }))
    }
}

pub struct HeadlessEngine {
    source: PathBuf,
    kind: FileKind,
    segments: Option<Vec<VideoSegment>>,
    size: Option<Size>,
    operations: Vec<Value>,
    manifest: Option<Value>,
    cancel: bool,
    events: EngineEvents,
    /// Source bytes, filled in by the reader before the export is reported.
    loaded: Arc<OnceLock<Bytes>>,
    dismissed: bool,
}

impl EditorEngine for HeadlessEngine {
    /// Reports presentation right away; the source is read on the blocking pool
    /// and the export follows once it is in memory.
    fn present(&mut self) -> Result<()> {
        self.events.presented();
        if self.cancel {
            self.events.cancelled();
            return Ok(());
        }

        let mut artifact = Artifact::new(Bytes::new(), self.kind);
        artifact.has_changes = !self.operations.is_empty();
        artifact.manifest = self.manifest.clone();
        artifact.segments = self.segments.clone();
        artifact.size = self.size;

        let path = self.source.clone();
        let events = self.events.clone();
        let loaded = self.loaded.clone();
        tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(data) => {
                artifact.data = loaded.get_or_init(|| Bytes::from(data)).clone();
                events.exported(artifact);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "unable to read source");
                events.cancelled();
            }
        });
        Ok(())
    }

    fn serialize(&mut self, embed_source_image: bool) -> Result<SerializationState> {
        let image = match (embed_source_image, self.loaded.get()) {
            (true, Some(data)) => Some(base64::engine::general_purpose::STANDARD.encode(data)),
            (true, None) => bail!("source image is not loaded"),
            (false, _) => None,
        };
        let state = HeadlessState {
            version: STATE_VERSION.into(),
            source: self.source.display().to_string(),
            operations: self.operations.clone(),
            image,
        };
        let bytes = serde_json::to_vec(&state).context("encode serialization state")?;
        Ok(SerializationState(Bytes::from(bytes)))
    }

    fn dismiss(&mut self, animated: bool) {
        if !self.dismissed {
            tracing::debug!(animated, source = %self.source.display(), "headless editor dismissed");
            self.dismissed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EngineEvent, SourceClip};
    use reqwest::Url;
    use serde_json::json;

    fn write(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> Url {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        Url::from_file_path(path).unwrap()
    }

    static NO_CONFIGURATION: Value = Value::Null;

    fn launch<'a>(source: &'a MediaSource, state: Option<&'a SerializationState>) -> Launch<'a> {
        Launch {
            source: Some(source),
            video_size: None,
            configuration: &NO_CONFIGURATION,
            state,
        }
    }

    #[tokio::test]
    async fn exports_source_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = MediaSource::Asset(write(&dir, "photo.png", b"\x89PNG fake"));
        let (events, mut rx) = EngineEvents::channel();
        let mut engine = HeadlessFactory::default()
            .create(launch(&source, None), events)
            .unwrap();
        engine.present().unwrap();

        assert!(matches!(rx.recv().await, Some(EngineEvent::Presented)));
        match rx.recv().await {
            Some(EngineEvent::Exported(a)) => {
                assert_eq!(&a.data[..], b"\x89PNG fake");
                assert_eq!(a.kind, FileKind::Png);
                assert!(!a.has_changes);
                assert!(a.segments.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        let state = engine.serialize(true).unwrap();
        let decoded: Value = serde_json::from_slice(state.as_bytes()).unwrap();
        assert!(decoded["image"].is_string());
    }

    #[tokio::test]
    async fn composition_reports_segments_and_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let clips = vec![
            SourceClip {
                url: write(&dir, "a.mp4", b"first clip"),
                start_time: Some(0.5),
                end_time: None,
            },
            SourceClip {
                url: write(&dir, "b.mov", b"second clip"),
                start_time: None,
                end_time: Some(2.0),
            },
        ];
        let source = MediaSource::Composition(clips);
        let mut l = launch(&source, None);
        l.video_size = Some(Size {
            width: 1920.0,
            height: 1080.0,
        });
        let (events, mut rx) = EngineEvents::channel();
        let mut engine = HeadlessFactory::default().create(l, events).unwrap();
        engine.present().unwrap();

        rx.recv().await;
        match rx.recv().await {
            Some(EngineEvent::Exported(a)) => {
                assert_eq!(&a.data[..], b"first clip");
                let segments = a.segments.unwrap();
                assert_eq!(segments.len(), 2);
                assert!(segments[1].video_uri.ends_with("/b.mov"));
                assert_eq!(segments[1].end_time, Some(2.0));
                assert_eq!(a.size.unwrap().width, 1920.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unusable_sources() {
        let dir = tempfile::TempDir::new().unwrap();
        let factory = HeadlessFactory::default();
        let create = |source: &MediaSource| {
            let (events, _rx) = EngineEvents::channel();
            factory.create(launch(source, None), events).map(|_| ())
        };

        let missing = MediaSource::Asset(Url::from_file_path(dir.path().join("gone.jpg")).unwrap());
        assert!(create(&missing).is_err());

        let remote = MediaSource::Asset(Url::parse("https://cdn.example.com/a.jpg").unwrap());
        assert!(create(&remote).is_err());

        let still = MediaSource::Composition(vec![SourceClip {
            url: write(&dir, "still.jpg", b"jpeg"),
            start_time: None,
            end_time: None,
        }]);
        assert!(create(&still).is_err());

        let (events, _rx) = EngineEvents::channel();
        let none = Launch {
            source: None,
            ..launch(&still, None)
        };
        assert!(factory.create(none, events).is_err());
    }

    #[test]
    fn state_round_trips_and_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = MediaSource::Asset(write(&dir, "photo.png", b"\x89PNG fake"));
        let factory = HeadlessFactory::default();
        let prior = SerializationState::from_json(&json!({
            "version": "1",
            "source": "x",
            "operations": [{ "tool": "crop" }]
        }))
        .unwrap();
        let (events, _rx) = EngineEvents::channel();
        let mut engine = factory.create(launch(&source, Some(&prior)), events).unwrap();
        let state = engine.serialize(false).unwrap();
        let decoded: Value = serde_json::from_slice(state.as_bytes()).unwrap();
        assert_eq!(decoded["operations"], json!([{ "tool": "crop" }]));
        assert!(decoded.get("image").is_none());
        assert!(engine.serialize(true).is_err());

        let (events, _rx) = EngineEvents::channel();
        let bad = SerializationState(Bytes::from_static(b"{not json"));
        assert!(factory.create(launch(&source, Some(&bad)), events).is_err());
    }
}
