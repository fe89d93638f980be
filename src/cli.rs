use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use editor_bridge::engine::HeadlessFactory;
use editor_bridge::model::{SerializationState, Size};
use editor_bridge::{
    BridgeConfig, EditorBridge, LicenseInput, MediaKind, OpenRequest, StandardVerifier,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Media {
    Image,
    Video,
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "editor-bridge",
    version,
    about = "Run one headless editor session and print its outcome as JSON"
)]
pub struct Cli {
    /// Source file handed to the editor; repeat for a video composition
    #[arg(long, required = true)]
    pub source: Vec<String>,

    /// Output size of a composition, as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size)]
    pub video_size: Option<Size>,

    /// Session configuration: inline JSON or a path to a JSON file
    #[arg(long)]
    pub config: Option<String>,

    /// Prior editor state to restore: inline JSON or a path to a JSON file
    #[arg(long)]
    pub serialization: Option<String>,

    /// License: file path, file:// or http(s):// URL, or inline license JSON
    #[arg(long)]
    pub license: Option<String>,

    /// Product the license must cover
    #[arg(long, default_value = "pesdk")]
    pub product: String,

    /// Application identifier the license must list, if it lists any
    #[arg(long)]
    pub app_id: Option<String>,

    /// Editor flavour; selects configuration keys and default export format
    #[arg(long, value_enum, default_value_t = Media::Image)]
    pub media: Media,

    /// Configuration layered over --config, winning on conflicts (JSON or path)
    #[arg(long)]
    pub overrides: Option<String>,

    /// Directory for temporary exports
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Make the editor cancel instead of exporting
    #[arg(long)]
    pub cancel: bool,
}

fn parse_size(raw: &str) -> Result<Size, String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{raw}`"))?;
    let dim = |v: &str| {
        v.trim()
            .parse::<f64>()
            .ok()
            .filter(|d| *d > 0.0)
            .ok_or_else(|| format!("invalid dimension `{v}`"))
    };
    Ok(Size {
        width: dim(w)?,
        height: dim(h)?,
    })
}

/// Parse `raw` as JSON when it looks like an object, otherwise read it as a file.
fn json_arg(raw: &str) -> Result<Value> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).context("parse inline JSON");
    }
    let text = std::fs::read_to_string(Path::new(raw))
        .with_context(|| format!("read {raw}"))?;
    serde_json::from_str(&text).with_context(|| format!("parse {raw}"))
}

/// Build the bridge setup from CLI arguments.
pub fn build_config(args: &Cli) -> Result<BridgeConfig> {
    let media = match args.media {
        Media::Image => MediaKind::Image,
        Media::Video => MediaKind::Video,
    };
    let mut verifier = StandardVerifier::new(args.product.clone());
    verifier.app_identifier = args.app_id.clone();

    let mut config = BridgeConfig::new(media, Arc::new(verifier));
    if let Some(raw) = args.overrides.as_deref() {
        config = config.with_overrides(json_arg(raw).context("load overrides")?);
    }
    if let Some(dir) = args.temp_dir.clone() {
        config = config.with_temp_dir(dir);
    }
    if let Some(raw) = args.license.as_deref() {
        let license = LicenseInput::from_json(&Value::from(raw))
            .context("unrecognised license argument")?;
        config = config.with_license(license);
    }
    Ok(config)
}

pub async fn run(args: Cli) -> Result<()> {
    let config = build_config(&args)?;
    let configuration = match args.config.as_deref() {
        Some(raw) => json_arg(raw).context("load configuration")?,
        None => Value::Object(Default::default()),
    };
    let serialization = match args.serialization.as_deref() {
        Some(raw) => {
            let value = json_arg(raw).context("load serialization")?;
            Some(SerializationState::from_json(&value).context("encode serialization")?)
        }
        None => None,
    };
    let source = match args.source.as_slice() {
        [single] => Value::from(single.as_str()),
        clips => Value::from(clips.to_vec()),
    };

    let factory = HeadlessFactory { cancel: args.cancel };
    let bridge = EditorBridge::spawn(config, Arc::new(factory));

    let interrupt = bridge.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, dismissing editor");
            interrupt.dismiss(false);
        }
    });

    let outcome = bridge
        .open(OpenRequest {
            source,
            video_size: args.video_size,
            configuration,
            serialization,
            license: None,
        })
        .await?;

    let out = serde_json::to_string_pretty(&outcome)?;
    println!("{out}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_size_parses_dimensions() {
        let size = parse_size("1920x1080").unwrap();
        assert_eq!((size.width, size.height), (1920.0, 1080.0));
        assert!(parse_size("1920").is_err());
        assert!(parse_size("0x10").is_err());
    }

    #[test]
    fn json_arguments_are_inline_or_files() {
        assert_eq!(json_arg(r#"{"version":"1"}"#).unwrap()["version"], "1");

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"operations":[]}"#).unwrap();
        assert!(json_arg(&path.display().to_string()).unwrap()["operations"].is_array());
        assert!(json_arg("/definitely/missing.json").is_err());
    }
}
