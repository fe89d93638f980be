//! Configuration merging and the bridge-wide setup object.

use crate::convert::{lookup, lookup_bool, lookup_str, to_export_file_url};
use crate::engine::EditorEngine;
use crate::error::ErrorDetail;
use crate::license::{LicenseInput, LicenseVerifier};
use crate::model::{
    DestinationKind, ExportSpec, FileKind, SerializationKind, SerializationOptions,
};
use reqwest::Url;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Called with the freshly constructed engine right before it is presented.
pub type WillPresentHook = Arc<dyn Fn(&mut dyn EditorEngine) + Send + Sync>;

/// Which kind of editor the bridge drives; selects configuration keys and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn section(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    fn default_format(self) -> FileKind {
        match self {
            MediaKind::Image => FileKind::Jpeg,
            MediaKind::Video => FileKind::Mp4,
        }
    }
}

/// Set-once setup supplied by the embedding application before any session.
#[derive(Clone)]
pub struct BridgeConfig {
    pub media: MediaKind,
    /// Layered over every caller configuration; wins on conflicts.
    pub overrides: Map<String, Value>,
    pub will_present: Option<WillPresentHook>,
    /// License used when a request does not carry its own.
    pub license: Option<LicenseInput>,
    pub verifier: Arc<dyn LicenseVerifier>,
    /// Base for exports without a filename or with a relative one.
    pub temp_dir: PathBuf,
    /// Base for relative editor sources.
    pub source_dir: PathBuf,
}

impl BridgeConfig {
    pub fn new(media: MediaKind, verifier: Arc<dyn LicenseVerifier>) -> Self {
        let temp_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("editor-bridge");
        Self {
            media,
            overrides: Map::new(),
            will_present: None,
            license: None,
            verifier,
            source_dir: std::env::current_dir().unwrap_or_else(|_| temp_dir.clone()),
            temp_dir,
        }
    }

    pub fn with_overrides(mut self, overrides: Value) -> Self {
        if let Value::Object(map) = overrides {
            self.overrides = map;
        }
        self
    }

    pub fn with_license(mut self, license: LicenseInput) -> Self {
        self.license = Some(license);
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    pub fn on_will_present(
        mut self,
        hook: impl Fn(&mut dyn EditorEngine) + Send + Sync + 'static,
    ) -> Self {
        self.will_present = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("media", &self.media)
            .field("overrides", &self.overrides)
            .field("will_present", &self.will_present.is_some())
            .field("license", &self.license.is_some())
            .field("temp_dir", &self.temp_dir)
            .field("source_dir", &self.source_dir)
            .finish()
    }
}

/// Structural merge: nested maps combine key by key, `overrides` wins on leaves.
///
/// A caller configuration that is not a map counts as empty.
pub fn merge(caller: &Value, overrides: &Map<String, Value>) -> Value {
    let mut out = match caller {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    merge_into(&mut out, overrides);
    Value::Object(out)
}

fn merge_into(base: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_into(existing, nested),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Everything the packager needs to know about one session's outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPlan {
    pub export: ExportSpec,
    pub serialization: SerializationOptions,
    /// Whether the result keeps the segment manifest reported by the engine.
    pub include_segments: bool,
}

fn file_stamp() -> String {
    let fmt = time::macros::format_description!("[year][month][day]-[hour][minute][second]");
    time::OffsetDateTime::now_utc()
        .format(&fmt)
        .unwrap_or_else(|_| "now".into())
}

fn temp_file_url(dir: &Path, stem: &str, id: &str, kind: FileKind) -> Option<Url> {
    let name = format!("{stem}-{}-{id}.{}", file_stamp(), kind.extension());
    Url::from_file_path(dir.join(name)).ok()
}

/// Derive export and serialization targets from the effective configuration.
///
/// Unknown enum values fall back to defaults; an invalid filename is an error
/// because nothing could be written.
pub fn plan_export(
    effective: &Value,
    media: MediaKind,
    temp_dir: &Path,
    id: &str,
) -> Result<ExportPlan, ErrorDetail> {
    let section = media.section();

    let type_key = format!("export.{section}.exportType");
    let destination = match lookup_str(effective, &type_key) {
        None => DestinationKind::FileUrl,
        Some(s) => DestinationKind::from_config_str(s).unwrap_or_else(|| {
            tracing::warn!(value = s, "unknown export type, using file-url");
            DestinationKind::FileUrl
        }),
    };

    let format_key = format!("export.{section}.format");
    let expected_kind = match lookup_str(effective, &format_key) {
        None => media.default_format(),
        Some(mime) => FileKind::from_mime(mime).unwrap_or_else(|| {
            tracing::warn!(value = mime, "unknown export format, using default");
            media.default_format()
        }),
    };

    let target_url = if destination == DestinationKind::FileUrl {
        let url = match lookup(effective, "export.filename").filter(|v| !v.is_null()) {
            Some(value) => to_export_file_url(value, expected_kind, temp_dir).ok_or_else(|| {
                ErrorDetail::new(format!(
                    "Invalid export filename {value} for {}",
                    expected_kind.mime()
                ))
            })?,
            None => temp_file_url(temp_dir, "export", id, expected_kind)
                .ok_or_else(|| ErrorDetail::new("Unable to create a temporary export file"))?,
        };
        Some(url)
    } else {
        None
    };

    let serialization = plan_serialization(effective, target_url.as_ref(), temp_dir, id)?;

    Ok(ExportPlan {
        export: ExportSpec {
            destination,
            target_url,
            expected_kind,
        },
        serialization,
        include_segments: lookup_bool(effective, "export.video.segments", false),
    })
}

fn plan_serialization(
    effective: &Value,
    export_target: Option<&Url>,
    temp_dir: &Path,
    id: &str,
) -> Result<SerializationOptions, ErrorDetail> {
    let enabled = lookup_bool(effective, "export.serialization.enabled", false);
    let kind = match lookup_str(effective, "export.serialization.exportType") {
        Some("object") => SerializationKind::Object,
        _ => SerializationKind::FileUrl,
    };
    let embed_source_image = lookup_bool(effective, "export.serialization.embedSourceImage", false);

    let destination_url = if enabled && kind == SerializationKind::FileUrl {
        let filename = lookup(effective, "export.serialization.filename").filter(|v| !v.is_null());
        let url = match filename {
            Some(value) => to_export_file_url(value, FileKind::Json, temp_dir).ok_or_else(|| {
                ErrorDetail::new(format!("Invalid serialization filename {value}"))
            })?,
            None => export_target
                .and_then(|u| u.to_file_path().ok())
                .and_then(|p| Url::from_file_path(p.with_extension(FileKind::Json.extension())).ok())
                .or_else(|| temp_file_url(temp_dir, "serialization", id, FileKind::Json))
                .ok_or_else(|| ErrorDetail::new("Unable to create a temporary serialization file"))?,
        };
        Some(url)
    } else {
        None
    };

    Ok(SerializationOptions {
        enabled,
        kind,
        destination_url,
        embed_source_image,
    })
}
