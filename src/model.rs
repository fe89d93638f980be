use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// File types the bridge can export or is asked to validate targets against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Jpeg,
    Png,
    Heif,
    Tiff,
    Mp4,
    Mov,
    Json,
}

impl FileKind {
    pub const ALL: [FileKind; 7] = [
        FileKind::Jpeg,
        FileKind::Png,
        FileKind::Heif,
        FileKind::Tiff,
        FileKind::Mp4,
        FileKind::Mov,
        FileKind::Json,
    ];

    pub fn mime(self) -> &'static str {
        match self {
            FileKind::Jpeg => "image/jpeg",
            FileKind::Png => "image/png",
            FileKind::Heif => "image/heif",
            FileKind::Tiff => "image/tiff",
            FileKind::Mp4 => "video/mp4",
            FileKind::Mov => "video/quicktime",
            FileKind::Json => "application/json",
        }
    }

    /// Accepted extensions, preferred one first.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FileKind::Jpeg => &["jpg", "jpeg"],
            FileKind::Png => &["png"],
            FileKind::Heif => &["heic", "heif"],
            FileKind::Tiff => &["tiff", "tif"],
            FileKind::Mp4 => &["mp4", "m4v"],
            FileKind::Mov => &["mov", "qt"],
            FileKind::Json => &["json"],
        }
    }

    pub fn extension(self) -> &'static str {
        self.extensions()[0]
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.mime() == mime)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.extensions().contains(&ext.as_str()))
    }

    pub fn is_video(self) -> bool {
        matches!(self, FileKind::Mp4 | FileKind::Mov)
    }
}

/// Where an exported artifact ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationKind {
    #[serde(rename = "file-url")]
    FileUrl,
    #[serde(rename = "data-url")]
    EmbeddedData,
    #[serde(rename = "object")]
    StructuredObject,
}

impl DestinationKind {
    /// Parse the configuration value; unknown values yield `None`.
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s {
            "file-url" => Some(DestinationKind::FileUrl),
            "data-url" => Some(DestinationKind::EmbeddedData),
            "object" => Some(DestinationKind::StructuredObject),
            _ => None,
        }
    }
}

/// Export destination derived from the effective configuration.
///
/// `target_url` is only meaningful for [`DestinationKind::FileUrl`]; it has been
/// validated against `expected_kind` when set.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSpec {
    pub destination: DestinationKind,
    pub target_url: Option<Url>,
    pub expected_kind: FileKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializationKind {
    #[serde(rename = "file-url")]
    FileUrl,
    #[serde(rename = "object")]
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SerializationOptions {
    pub enabled: bool,
    pub kind: SerializationKind,
    /// File target for [`SerializationKind::FileUrl`]; `None` means a derived path.
    pub destination_url: Option<Url>,
    pub embed_source_image: bool,
}

impl Default for SerializationOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: SerializationKind::FileUrl,
            destination_url: None,
            embed_source_image: false,
        }
    }
}

/// Opaque editor state produced by a previous export, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationState(pub Bytes);

impl SerializationState {
    pub fn from_json(value: &serde_json::Value) -> serde_json::Result<Self> {
        serde_json::to_vec(value).map(|v| Self(Bytes::from(v)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSegment {
    #[serde(rename = "videoURI")]
    pub video_uri: String,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
}

/// One clip of a video composition, resolved to a local or remote URL.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceClip {
    pub url: Url,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

/// What an editor session opens.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    Asset(Url),
    /// Ordered clips edited as one video.
    Composition(Vec<SourceClip>),
}

impl MediaSource {
    pub fn is_composition(&self) -> bool {
        matches!(self, MediaSource::Composition(_))
    }

    /// Every URL the source refers to, in order.
    pub fn urls(&self) -> Vec<&Url> {
        match self {
            MediaSource::Asset(url) => vec![url],
            MediaSource::Composition(clips) => clips.iter().map(|c| &c.url).collect(),
        }
    }
}

/// What the engine hands over on export.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub data: Bytes,
    pub kind: FileKind,
    pub has_changes: bool,
    /// Structured form of the artifact, when the engine can provide one.
    pub manifest: Option<serde_json::Value>,
    pub segments: Option<Vec<VideoSegment>>,
    pub size: Option<Size>,
}

impl Artifact {
    pub fn new(data: impl Into<Bytes>, kind: FileKind) -> Self {
        Self {
            data: data.into(),
            kind,
            has_changes: true,
            manifest: None,
            segments: None,
            size: None,
        }
    }
}

/// Lifecycle signals emitted by an editor engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// On screen and interactive.
    Presented,
    Exported(Box<Artifact>),
    Cancelled,
}

impl EngineEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineEvent::Presented)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExportPayload {
    File {
        url: String,
    },
    Data {
        #[serde(skip)]
        data: Bytes,
        #[serde(rename = "dataURL")]
        data_url: String,
    },
    Object {
        manifest: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SerializationOutput {
    File { url: String },
    Object { state: serde_json::Value },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub export: ExportPayload,
    pub has_changes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serialization: Option<SerializationOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<VideoSegment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    /// Correlation id of the session that produced this result.
    pub identifier: String,
}

/// Successful settlement of a session request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionOutcome {
    Exported {
        export: Box<ExportResult>,
    },
    Cancelled,
}

impl SessionOutcome {
    pub fn export(&self) -> Option<&ExportResult> {
        match self {
            SessionOutcome::Exported { export } => Some(export),
            SessionOutcome::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_lookups() {
        assert_eq!(FileKind::from_mime("IMAGE/PNG"), Some(FileKind::Png));
        assert_eq!(FileKind::from_mime("video/quicktime"), Some(FileKind::Mov));
        assert_eq!(FileKind::from_mime("text/plain"), None);
        assert_eq!(FileKind::from_extension("JPEG"), Some(FileKind::Jpeg));
        assert_eq!(FileKind::Heif.extension(), "heic");
        assert!(FileKind::Mp4.is_video());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let v = serde_json::to_value(SessionOutcome::Cancelled).unwrap();
        assert_eq!(v, serde_json::json!({ "status": "cancelled" }));

        let outcome = SessionOutcome::Exported {
            export: Box::new(ExportResult {
                export: ExportPayload::File {
                    url: "file:///tmp/a.jpg".into(),
                },
                has_changes: true,
                serialization: None,
                segments: None,
                size: None,
                identifier: "abc".into(),
            }),
        };
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["status"], "exported");
        assert_eq!(v["export"]["export"]["kind"], "file");
        assert_eq!(v["export"]["hasChanges"], true);
    }
}
