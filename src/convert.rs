//! Conversion utilities.
//!
//! Normalizes loosely-typed caller input (URLs, paths, request descriptors, key-path
//! lookups into the configuration map) into typed values. Malformed input yields
//! `None` or the supplied default; nothing here fails on bad caller data.

use crate::model::{FileKind, MediaSource, SourceClip};
use anyhow::{Context, Result};
use rand::RngCore;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub use crate::error::error_string;

/// A validated request descriptor: url + method + headers.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
}

/// Extract the string form of a url-ish value (`"..."` or `{ "uri": "..." }`).
fn url_string(value: &Value) -> Option<&str> {
    let s = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("uri").and_then(Value::as_str)?,
        _ => return None,
    };
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

/// Resolve a value to an absolute `file://` URL.
///
/// Accepts `file://` URLs, absolute paths, and relative paths (resolved against
/// `relative_base`). Any other scheme is unsupported.
pub fn to_export_url(value: &Value, relative_base: &Path) -> Option<Url> {
    let s = url_string(value)?;
    let path = Path::new(s);
    if path.is_absolute() {
        return Url::from_file_path(path).ok();
    }
    match Url::parse(s) {
        Ok(url) if url.scheme() == "file" => {
            // Round-trip through the path form to reject `file://host/...` urls.
            url.to_file_path().ok()?;
            Some(url)
        }
        Ok(_) => None,
        Err(_) => Url::from_file_path(relative_base.join(path)).ok(),
    }
}

/// Like [`to_export_url`], additionally requiring the path to denote a file of
/// `expected` type.
///
/// A missing extension gets the preferred extension for `expected` appended; a
/// different extension, or a path naming an existing directory, is invalid.
pub fn to_export_file_url(value: &Value, expected: FileKind, relative_base: &Path) -> Option<Url> {
    let url = to_export_url(value, relative_base)?;
    let mut path = url.to_file_path().ok()?;
    if path.is_dir() {
        return None;
    }
    match path.extension().and_then(|e| e.to_str()) {
        None => {
            path.set_extension(expected.extension());
        }
        Some(ext) => {
            if FileKind::from_extension(ext) != Some(expected) {
                return None;
            }
        }
    }
    Url::from_file_path(path).ok()
}

fn to_request(value: &Value) -> Option<RequestSpec> {
    let (url, method, headers) = match value {
        Value::String(s) => (s.as_str(), None, None),
        Value::Object(map) => (
            map.get("url").and_then(Value::as_str)?,
            map.get("method"),
            map.get("headers"),
        ),
        _ => return None,
    };

    let url = Url::parse(url.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https" | "file") {
        return None;
    }

    let method = match method {
        None | Some(Value::Null) => Method::GET,
        Some(Value::String(m)) => Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok()?,
        Some(_) => return None,
    };

    let mut header_map = HeaderMap::new();
    match headers {
        None | Some(Value::Null) => {}
        Some(Value::Object(h)) => {
            for (name, value) in h {
                let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
                let value = HeaderValue::from_str(value.as_str()?).ok()?;
                header_map.append(name, value);
            }
        }
        Some(_) => return None,
    }

    Some(RequestSpec {
        url,
        method,
        headers: header_map,
    })
}

/// Validate a sequence of request descriptors, preserving order.
///
/// A single invalid element invalidates the whole list.
pub fn to_request_list(value: &Value) -> Option<Vec<RequestSpec>> {
    value.as_array()?.iter().map(to_request).collect()
}

/// Normalize what an editor session opens.
///
/// A single URI (or `{ "uri": ... }`) is an asset. A non-empty list is a
/// composition whose elements are URIs or `{ "videoURI", "startTime", "endTime" }`
/// clips. One invalid element invalidates the whole source.
pub fn to_media_source(value: &Value, relative_base: &Path) -> Option<MediaSource> {
    match value {
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => items
            .iter()
            .map(|item| to_source_clip(item, relative_base))
            .collect::<Option<Vec<_>>>()
            .map(MediaSource::Composition),
        _ => to_export_url(value, relative_base).map(MediaSource::Asset),
    }
}

fn to_source_clip(value: &Value, relative_base: &Path) -> Option<SourceClip> {
    let time = |key: &str| match value.get(key) {
        None | Some(Value::Null) => Some(None),
        Some(v) => v.as_f64().filter(|t| *t >= 0.0).map(Some),
    };
    let url = match value.get("videoURI") {
        Some(uri) => to_export_url(uri, relative_base)?,
        None => to_export_url(value, relative_base)?,
    };
    let (start_time, end_time) = (time("startTime")?, time("endTime")?);
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end <= start {
            return None;
        }
    }
    Some(SourceClip {
        url,
        start_time,
        end_time,
    })
}

/// Resolve a dot-delimited key path through nested maps.
pub fn lookup<'a>(map: &'a Value, key_path: &str) -> Option<&'a Value> {
    key_path
        .split('.')
        .try_fold(map, |node, key| node.as_object()?.get(key))
}

/// [`lookup`] with a fallback for absent segments and explicit nulls.
pub fn lookup_or(map: &Value, key_path: &str, default: Value) -> Value {
    match lookup(map, key_path) {
        Some(Value::Null) | None => default,
        Some(v) => v.clone(),
    }
}

pub fn lookup_str<'a>(map: &'a Value, key_path: &str) -> Option<&'a str> {
    lookup(map, key_path).and_then(Value::as_str)
}

pub fn lookup_bool(map: &Value, key_path: &str, default: bool) -> bool {
    lookup(map, key_path)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut suffix = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut suffix);
    let tag: String = suffix.iter().map(|b| format!("{b:02x}")).collect();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{tag}.tmp"))
}

/// Write `bytes` to `path`, replacing any existing file.
///
/// Data goes to a sibling temporary file first and is renamed into place, so a
/// failed write never leaves a truncated target behind.
pub fn write_atomically(bytes: &[u8], path: &Path, create_directories: bool) -> Result<()> {
    replace_with(path, create_directories, |tmp| std::fs::write(tmp, bytes))
}

fn replace_with(
    path: &Path,
    create_directories: bool,
    write: impl FnOnce(&Path) -> std::io::Result<()>,
) -> Result<()> {
    if create_directories {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }

    let tmp = temp_sibling(path);
    let written = write(&tmp)
        .with_context(|| format!("write {}", path.display()))
        .and_then(|()| {
            std::fs::rename(&tmp, path)
                .with_context(|| format!("move into place {}", path.display()))
        });
    if written.is_err() {
        // The temporary file may hold a partial write.
        let _ = std::fs::remove_file(&tmp);
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn export_url_accepts_paths_and_file_urls() {
        let base = Path::new("/var/tmp/bridge");
        let u = to_export_url(&json!("/data/out.jpg"), base).unwrap();
        assert_eq!(u.as_str(), "file:///data/out.jpg");

        let u = to_export_url(&json!("file:///data/out.jpg"), base).unwrap();
        assert_eq!(u.to_file_path().unwrap(), PathBuf::from("/data/out.jpg"));

        let u = to_export_url(&json!({ "uri": "exports/out.png" }), base).unwrap();
        assert_eq!(
            u.to_file_path().unwrap(),
            PathBuf::from("/var/tmp/bridge/exports/out.png")
        );
    }

    #[test]
    fn export_url_rejects_unsupported_input() {
        let base = Path::new("/tmp");
        assert!(to_export_url(&json!("https://example.com/a.jpg"), base).is_none());
        assert!(to_export_url(&json!(""), base).is_none());
        assert!(to_export_url(&json!(42), base).is_none());
        assert!(to_export_url(&json!({ "path": "/a" }), base).is_none());
    }

    #[test]
    fn export_file_url_checks_kind() {
        let base = Path::new("/tmp");
        let u = to_export_file_url(&json!("/out/photo"), FileKind::Jpeg, base).unwrap();
        assert_eq!(u.as_str(), "file:///out/photo.jpg");

        assert!(to_export_file_url(&json!("/out/photo.JPEG"), FileKind::Jpeg, base).is_some());
        assert!(to_export_file_url(&json!("/out/photo.png"), FileKind::Jpeg, base).is_none());
        assert!(to_export_file_url(&json!("https://x/photo.jpg"), FileKind::Jpeg, base).is_none());
    }

    #[test]
    fn export_file_url_rejects_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("clip.mp4");
        std::fs::create_dir(&target).unwrap();
        let value = json!(target.to_string_lossy());
        assert!(to_export_file_url(&value, FileKind::Mp4, dir.path()).is_none());
    }

    #[test]
    fn media_source_accepts_assets_and_compositions() {
        let base = Path::new("/media");
        assert_eq!(
            to_media_source(&json!({ "uri": "/media/a.mp4" }), base),
            Some(MediaSource::Asset(Url::parse("file:///media/a.mp4").unwrap()))
        );

        let source = to_media_source(
            &json!([
                "intro.mp4",
                { "videoURI": "file:///media/main.mov", "startTime": 1.5, "endTime": 4 }
            ]),
            base,
        )
        .unwrap();
        match source {
            MediaSource::Composition(clips) => {
                assert_eq!(clips.len(), 2);
                assert_eq!(clips[0].url.as_str(), "file:///media/intro.mp4");
                assert_eq!(clips[0].start_time, None);
                assert_eq!(clips[1].start_time, Some(1.5));
                assert_eq!(clips[1].end_time, Some(4.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn media_source_rejects_bad_elements() {
        let base = Path::new("/media");
        assert!(to_media_source(&json!([]), base).is_none());
        assert!(to_media_source(&json!("https://cdn.example.com/a.mp4"), base).is_none());
        assert!(to_media_source(&json!(["/a.mp4", 7]), base).is_none());
        assert!(to_media_source(&json!([{ "videoURI": "/a.mp4", "startTime": -1 }]), base).is_none());
        assert!(
            to_media_source(&json!([{ "videoURI": "/a.mp4", "startTime": 3, "endTime": 2 }]), base)
                .is_none()
        );
    }

    #[test]
    fn request_list_validates_every_element() {
        let list = to_request_list(&json!([
            "https://cdn.example.com/a.json",
            {
                "url": "https://cdn.example.com/b.json",
                "method": "post",
                "headers": { "Authorization": "Bearer t" }
            }
        ]))
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].method, Method::GET);
        assert_eq!(list[1].method, Method::POST);
        assert_eq!(list[1].headers["authorization"], "Bearer t");

        assert!(to_request_list(&json!(["https://ok", "ftp://nope"])).is_none());
        assert!(to_request_list(&json!([{ "url": "https://ok", "headers": { "x": 1 } }])).is_none());
        assert!(to_request_list(&json!("https://ok")).is_none());
        assert!(to_request_list(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn lookup_is_total() {
        let cfg = json!({ "export": { "image": { "format": "image/png" }, "flag": null } });
        assert_eq!(lookup_str(&cfg, "export.image.format"), Some("image/png"));
        assert!(lookup(&cfg, "export.image.format.deeper").is_none());
        assert!(lookup(&cfg, "missing.path").is_none());
        assert!(lookup(&json!([1, 2]), "0").is_none());
        assert!(lookup(&cfg, "").is_none());
        assert_eq!(lookup_or(&cfg, "export.flag", json!(true)), json!(true));
        assert_eq!(lookup_or(&cfg, "export.nope", json!("d")), json!("d"));
        assert!(lookup_bool(&cfg, "export.image", true));
    }

    #[test]
    fn write_atomically_creates_directories_and_overwrites() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/out.bin");

        assert!(write_atomically(b"first", &path, false).is_err());
        write_atomically(b"first", &path, true).unwrap();
        write_atomically(b"second", &path, true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_write_removes_partial_temp_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.bin");

        let err = replace_with(&path, false, |tmp| {
            std::fs::write(tmp, b"half of the")?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"))
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("no space left"));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
