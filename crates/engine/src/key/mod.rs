//! Data-key acquisition from the document's key-wrapping entries.
//!
//! # Lifecycle
//!
//! 1. [`KeyProvider::from_config`] builds the ordered backend list once per
//!    process (GCP and AWS KMS clients, gpg agent channel). A cloud client
//!    that cannot be built is logged and left out of the order.
//! 2. For each document, [`KeyProvider::acquire`] walks the backends in order
//!    and, within a backend, the entries in document order. The first entry
//!    that unwraps to exactly 32 bytes wins.
//! 3. Every failed entry is logged at `warn` and collected; if nothing
//!    succeeds the collected failures are returned in
//!    [`DecryptError::KeyUnavailable`].
//!
//! # Security invariants
//!
//! - Unwrapped key bytes are never logged or included in errors.
//! - Intermediate buffers are zeroed once copied into a [`DataKey`].

pub mod gcp_kms;
pub mod kms;
pub mod pgp;

pub use gcp_kms::{GcpKmsBackend, GcpKmsClient};
pub use kms::{KmsBackend, KmsClient};
pub use pgp::{AgentChannel, GpgAgent, PgpBackend};

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use common::{DecryptError, KeyEntry, Metadata, ProviderError};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::crypto::{DataKey, KeyError};

/// A key-wrapping backend, named after its metadata branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Kms,
    GcpKms,
    Pgp,
}

impl BackendKind {
    /// Every backend kind.
    pub const ALL: [BackendKind; 3] = [BackendKind::Kms, BackendKind::GcpKms, BackendKind::Pgp];

    /// Name of the metadata branch holding this backend's entries.
    pub fn branch(self) -> &'static str {
        match self {
            BackendKind::Kms => "kms",
            BackendKind::GcpKms => "gcp_kms",
            BackendKind::Pgp => "pgp",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.branch())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kms" => Ok(BackendKind::Kms),
            "gcp_kms" => Ok(BackendKind::GcpKms),
            "pgp" => Ok(BackendKind::Pgp),
            other => Err(format!("unknown key backend `{other}`")),
        }
    }
}

/// Failure of one backend on one entry.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The entry has no resource identifier to address the backend with.
    #[error("entry has no resource identifier")]
    MissingResourceId,

    /// The wrapped key could not be decoded.
    #[error("invalid wrapped key: {0}")]
    InvalidCiphertext(String),

    /// The key service rejected or failed the request.
    #[error("key service error: {0}")]
    Service(String),

    /// The local decryption agent failed.
    #[error("decryption agent error: {0}")]
    Agent(String),

    /// The unwrapped material is not a usable data key.
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// One key-retrieval backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyBackend: Send + Sync {
    /// Which metadata branch this backend consumes.
    fn kind(&self) -> BackendKind;

    /// Unwrap the data key held by `entry`, returning raw key bytes.
    async fn unwrap_key(&self, entry: &KeyEntry) -> Result<Vec<u8>, BackendError>;
}

/// Ordered set of backends tried against a document's metadata.
pub struct KeyProvider {
    backends: Vec<Box<dyn KeyBackend>>,
}

impl KeyProvider {
    pub fn new(backends: Vec<Box<dyn KeyBackend>>) -> Self {
        Self { backends }
    }

    /// Build the production backends in the order configured.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot be initialised.
    pub async fn from_config(cfg: &Config) -> Result<Self> {
        let mut backends: Vec<Box<dyn KeyBackend>> = Vec::new();
        for kind in cfg.backend_order()? {
            match kind {
                BackendKind::Kms => {
                    let client = kms::aws_client(cfg.kms_endpoint_url.as_deref()).await;
                    backends.push(Box::new(KmsBackend::new(client)));
                }
                BackendKind::GcpKms => {
                    match gcp_kms::gcp_client(cfg.gcp_kms_endpoint_url.as_deref()).await {
                        Ok(client) => backends.push(Box::new(GcpKmsBackend::new(client))),
                        Err(e) => warn!(error = ?e, "GCP KMS backend unavailable; skipping"),
                    }
                }
                BackendKind::Pgp => {
                    backends.push(Box::new(PgpBackend::new(GpgAgent::new(&cfg.gpg_exec))));
                }
            }
        }
        info!(backends = ?cfg.key_backends, "key provider initialised");
        Ok(Self::new(backends))
    }

    /// Obtain the document's data key.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError::KeyUnavailable`] carrying every per-entry
    /// failure if no entry of any backend yields a valid key.
    pub async fn acquire(&self, metadata: &Metadata) -> Result<DataKey, DecryptError> {
        let mut failures = Vec::new();

        for backend in &self.backends {
            let kind = backend.kind();
            for (idx, slot) in metadata.entries(kind.branch()).iter().enumerate() {
                let Some(entry) = slot else {
                    warn!(backend = %kind, entry = idx, "skipping empty key entry");
                    continue;
                };
                match unwrap_entry(backend.as_ref(), entry).await {
                    Ok(key) => {
                        info!(backend = %kind, entry = idx, "data key acquired");
                        return Ok(key);
                    }
                    Err(e) => {
                        warn!(backend = %kind, entry = idx, error = %e, "key entry failed");
                        failures.push(ProviderError {
                            backend: kind.to_string(),
                            entry: idx,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        Err(DecryptError::KeyUnavailable { failures })
    }
}

async fn unwrap_entry(backend: &dyn KeyBackend, entry: &KeyEntry) -> Result<DataKey, BackendError> {
    let mut raw = backend.unwrap_key(entry).await?;
    let key = DataKey::from_slice(&raw);
    raw.iter_mut().for_each(|b| *b = 0);
    Ok(key?)
}
