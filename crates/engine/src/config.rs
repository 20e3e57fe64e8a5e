//! Configuration loading and validation for `sops-decrypt`.
//!
//! All values are read from `SOPS_`-prefixed environment variables at
//! startup. The process exits with a clear error message if any required
//! variable is missing or invalid.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use common::document::DocumentFormat;
use serde::Deserialize;

use crate::key::BackendKind;
use crate::rotation::DEFAULT_ROTATION_MAX_AGE_DAYS;
use crate::session::SessionOptions;

/// Validated decrypt configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path of the encrypted document. **Required.**
    pub input_path: String,

    /// Output format (`yaml` or `json`). Inferred from the input path if unset.
    #[serde(default)]
    pub output_format: Option<String>,

    /// Comma-separated key backends, tried in order.
    #[serde(default = "default_key_backends")]
    pub key_backends: String,

    /// gpg executable used by the PGP backend.
    #[serde(default = "default_gpg_exec")]
    pub gpg_exec: String,

    /// Override for the AWS KMS endpoint.
    #[serde(default)]
    pub kms_endpoint_url: Option<String>,

    /// Override for the GCP Cloud KMS endpoint.
    #[serde(default)]
    pub gcp_kms_endpoint_url: Option<String>,

    /// Skip integrity verification. Leaves are still authenticated.
    #[serde(default)]
    pub ignore_mac: bool,

    /// Allow documents written with the pre-0.9 cumulative AAD scheme.
    #[serde(default)]
    pub legacy_aad: bool,

    /// Age in days after which key-wrapping entries are reported as stale.
    #[serde(default = "default_rotation_max_age_days")]
    pub rotation_max_age_days: u32,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_key_backends() -> String {
    "gcp_kms,kms,pgp".into()
}
fn default_gpg_exec() -> String {
    "gpg".into()
}
fn default_rotation_max_age_days() -> u32 {
    DEFAULT_ROTATION_MAX_AGE_DAYS
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::with_prefix("SOPS"))
    }

    fn load(source: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(source.try_parsing(true))
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.input_path.trim().is_empty() {
            anyhow::bail!("SOPS_INPUT_PATH is required and must not be empty");
        }
        if self.gpg_exec.trim().is_empty() {
            anyhow::bail!("SOPS_GPG_EXEC must not be empty");
        }
        if let Some(format) = &self.output_format {
            if DocumentFormat::from_name(format).is_none() {
                anyhow::bail!("SOPS_OUTPUT_FORMAT must be `yaml` or `json`, got `{format}`");
            }
        }
        if self.rotation_max_age_days == 0 {
            anyhow::bail!("SOPS_ROTATION_MAX_AGE_DAYS must be > 0");
        }
        self.backend_order()?;
        Ok(())
    }

    /// Parsed backend list, in lookup order.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty list, an unknown name or a duplicate.
    pub fn backend_order(&self) -> Result<Vec<BackendKind>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for name in self.key_backends.split(',').filter(|s| !s.trim().is_empty()) {
            let kind: BackendKind = name
                .parse()
                .map_err(|e: String| anyhow::anyhow!("SOPS_KEY_BACKENDS: {e}"))?;
            if !seen.insert(kind) {
                anyhow::bail!("SOPS_KEY_BACKENDS lists `{kind}` more than once");
            }
            order.push(kind);
        }
        if order.is_empty() {
            anyhow::bail!("SOPS_KEY_BACKENDS must name at least one backend");
        }
        Ok(order)
    }

    /// Format of the rendered plaintext document.
    pub fn output_format(&self) -> DocumentFormat {
        self.output_format
            .as_deref()
            .and_then(DocumentFormat::from_name)
            .unwrap_or_else(|| DocumentFormat::from_path(Path::new(&self.input_path)))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            ignore_mac: self.ignore_mac,
            legacy_aad: self.legacy_aad,
            capture_stash: false,
            rotation_max_age_days: self.rotation_max_age_days,
        }
    }
}
