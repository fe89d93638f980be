//! License gate.
//!
//! A license arrives as a document reference (local file or remote URL), as inline
//! license text, or as the already-decoded object. All three resolve to the same
//! [`Credential`], which a [`LicenseVerifier`] then accepts or rejects.

use crate::convert::{to_request_list, RequestSpec};
use crate::error::ErrorDetail;
use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// The three accepted license shapes.
#[derive(Debug, Clone)]
pub enum LicenseInput {
    /// `file://` or `http(s)://` document holding the license text.
    Document(RequestSpec),
    /// License text (JSON) passed verbatim.
    Inline(String),
    /// Decoded license object.
    Object(Value),
}

impl LicenseInput {
    /// Classify a loosely-typed license value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::from_str_value(s)),
            Value::Object(map) if map.contains_key("url") => {
                let mut list = to_request_list(&Value::Array(vec![value.clone()]))?;
                list.pop().map(LicenseInput::Document)
            }
            Value::Object(_) => Some(LicenseInput::Object(value.clone())),
            _ => None,
        }
    }

    fn from_str_value(s: &str) -> Self {
        let trimmed = s.trim();
        if let Some(mut list) = to_request_list(&Value::Array(vec![Value::from(trimmed)])) {
            if let Some(spec) = list.pop() {
                return LicenseInput::Document(spec);
            }
        }
        let path = Path::new(trimmed);
        if path.is_absolute() {
            if let Ok(url) = Url::from_file_path(path) {
                return LicenseInput::Document(RequestSpec {
                    url,
                    method: reqwest::Method::GET,
                    headers: Default::default(),
                });
            }
        }
        LicenseInput::Inline(s.to_string())
    }
}

/// Decoded license contents.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub app_identifiers: Vec<String>,
    /// Unix seconds.
    #[serde(default)]
    pub issued_at: Option<i64>,
    /// Unix seconds; `None` never expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub signature: String,
}

/// Decides whether a decoded credential unlocks the editor.
pub trait LicenseVerifier: Send + Sync {
    fn verify(&self, credential: &Credential) -> Result<()>;
}

/// Checks signature presence, expiry, product coverage and (optionally) the app id.
#[derive(Debug, Clone)]
pub struct StandardVerifier {
    pub product: String,
    pub app_identifier: Option<String>,
}

impl StandardVerifier {
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            app_identifier: None,
        }
    }
}

impl LicenseVerifier for StandardVerifier {
    fn verify(&self, credential: &Credential) -> Result<()> {
        if credential.signature.trim().is_empty() {
            bail!("license is not signed");
        }
        if let Some(expires_at) = credential.expires_at {
            let now = time::OffsetDateTime::now_utc().unix_timestamp();
            if expires_at <= now {
                bail!("license expired at {expires_at}");
            }
        }
        if !credential.products.iter().any(|p| p == &self.product) {
            bail!("license does not cover product `{}`", self.product);
        }
        if let Some(app_id) = self.app_identifier.as_deref() {
            if !credential.app_identifiers.is_empty()
                && !credential.app_identifiers.iter().any(|a| a == app_id)
            {
                bail!("license is not valid for application `{app_id}`");
            }
        }
        Ok(())
    }
}

/// Result of one validation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct LicenseOutcome {
    pub valid: bool,
    pub error: Option<ErrorDetail>,
}

impl LicenseOutcome {
    fn passed() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn failed(error: ErrorDetail) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }
}

/// Resolves license inputs and runs the verifier. Cheap to clone.
#[derive(Clone)]
pub struct LicenseGate {
    http: reqwest::Client,
    verifier: Arc<dyn LicenseVerifier>,
}

impl LicenseGate {
    pub fn new(verifier: Arc<dyn LicenseVerifier>) -> Self {
        Self {
            http: reqwest::Client::new(),
            verifier,
        }
    }

    /// Validate a license. Nothing is cached; every call re-reads the document.
    pub async fn validate(&self, input: Option<&LicenseInput>) -> LicenseOutcome {
        let Some(input) = input else {
            return LicenseOutcome::failed(ErrorDetail::new(
                "Unable to unlock with license: no license was provided",
            ));
        };
        let checked = match self.resolve(input).await {
            Ok(credential) => self.verifier.verify(&credential),
            Err(e) => Err(e),
        };
        match checked {
            Ok(()) => LicenseOutcome::passed(),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "license rejected");
                LicenseOutcome::failed(ErrorDetail::with_cause(
                    "Unable to unlock with license",
                    &e,
                ))
            }
        }
    }

    /// Turn any input shape into a decoded credential.
    pub async fn resolve(&self, input: &LicenseInput) -> Result<Credential> {
        match input {
            LicenseInput::Document(spec) => {
                let text = self.fetch_document(spec).await?;
                decode(&text)
            }
            LicenseInput::Inline(text) => decode(text),
            LicenseInput::Object(value) => {
                Credential::deserialize(value).context("decode license object")
            }
        }
    }

    async fn fetch_document(&self, spec: &RequestSpec) -> Result<String> {
        if spec.url.scheme() == "file" {
            let path = spec
                .url
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("invalid license path {}", spec.url))?;
            return tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("read license {}", path.display()));
        }
        let resp = self
            .http
            .request(spec.method.clone(), spec.url.clone())
            .headers(spec.headers.clone())
            .send()
            .await
            .with_context(|| format!("fetch license {}", spec.url))?
            .error_for_status()
            .with_context(|| format!("fetch license {}", spec.url))?;
        resp.text().await.context("read license response")
    }
}

fn decode(text: &str) -> Result<Credential> {
    serde_json::from_str(text.trim()).context("decode license document")
}
