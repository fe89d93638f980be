//! Result packaging after an export.
//!
//! Writes or encodes the artifact according to the export destination and,
//! independently, stores the editor's serialized state. Either failing fails the
//! whole package; partial success is not reported.

use crate::config::ExportPlan;
use crate::convert::write_atomically;
use crate::error::ErrorDetail;
use crate::model::{
    Artifact, DestinationKind, ExportPayload, ExportResult, SerializationKind,
    SerializationOutput, SerializationState,
};
use base64::Engine as _;
use reqwest::Url;
use std::path::PathBuf;

fn file_path(url: Option<&Url>, what: &str) -> Result<PathBuf, ErrorDetail> {
    url.and_then(|u| u.to_file_path().ok())
        .ok_or_else(|| ErrorDetail::new(format!("No valid {what} file target")))
}

fn package_export(artifact: &Artifact, plan: &ExportPlan) -> Result<ExportPayload, ErrorDetail> {
    let spec = &plan.export;
    if artifact.kind != spec.expected_kind {
        tracing::warn!(
            produced = artifact.kind.mime(),
            expected = spec.expected_kind.mime(),
            "engine produced a different file type than configured"
        );
    }

    match spec.destination {
        DestinationKind::FileUrl => {
            let path = file_path(spec.target_url.as_ref(), "export")?;
            write_atomically(&artifact.data, &path, true)
                .map_err(|e| ErrorDetail::with_cause("Unable to write export", &e))?;
            let url = Url::from_file_path(&path)
                .map_err(|_| ErrorDetail::new("Unable to write export: invalid path"))?;
            Ok(ExportPayload::File {
                url: url.to_string(),
            })
        }
        DestinationKind::EmbeddedData => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&artifact.data);
            Ok(ExportPayload::Data {
                data: artifact.data.clone(),
                data_url: format!("data:{};base64,{encoded}", artifact.kind.mime()),
            })
        }
        DestinationKind::StructuredObject => {
            let manifest = match &artifact.manifest {
                Some(m) => m.clone(),
                None => serde_json::from_slice(&artifact.data).map_err(|e| {
                    ErrorDetail::with_error("Unable to decode export as a structured object", &e)
                })?,
            };
            Ok(ExportPayload::Object { manifest })
        }
    }
}

fn package_serialization(
    plan: &ExportPlan,
    state: Option<&SerializationState>,
) -> Result<Option<SerializationOutput>, ErrorDetail> {
    let options = &plan.serialization;
    if !options.enabled {
        return Ok(None);
    }
    let state = state.ok_or_else(|| ErrorDetail::new("Editor did not provide a serialization"))?;

    match options.kind {
        SerializationKind::FileUrl => {
            let path = file_path(options.destination_url.as_ref(), "serialization")?;
            write_atomically(state.as_bytes(), &path, true)
                .map_err(|e| ErrorDetail::with_cause("Unable to write serialization", &e))?;
            let url = Url::from_file_path(&path)
                .map_err(|_| ErrorDetail::new("Unable to write serialization: invalid path"))?;
            Ok(Some(SerializationOutput::File {
                url: url.to_string(),
            }))
        }
        SerializationKind::Object => {
            let value = serde_json::from_slice(state.as_bytes()).map_err(|e| {
                ErrorDetail::with_error("Unable to decode serialization as an object", &e)
            })?;
            Ok(Some(SerializationOutput::Object { state: value }))
        }
    }
}

/// Package one export. Blocking: performs filesystem writes.
pub fn package(
    artifact: &Artifact,
    plan: &ExportPlan,
    state: Option<&SerializationState>,
    identifier: &str,
) -> Result<ExportResult, ErrorDetail> {
    let export = package_export(artifact, plan)?;
    let serialization = package_serialization(plan, state)?;

    Ok(ExportResult {
        export,
        has_changes: artifact.has_changes,
        serialization,
        segments: if plan.include_segments {
            artifact.segments.clone()
        } else {
            None
        },
        size: artifact.size,
        identifier: identifier.to_string(),
    })
}
