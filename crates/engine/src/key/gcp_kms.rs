//! GCP Cloud KMS backend: unwraps the data key with a `Decrypt` call against
//! the crypto key named by the entry's `resource_id`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::KeyEntry;
use google_cloud_kms_v1::client::KeyManagementService;

use super::{BackendError, BackendKind, KeyBackend};

/// The one Cloud KMS operation the engine needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GcpKmsClient: Send + Sync {
    /// Decrypt `ciphertext` with the crypto key `resource_id`
    /// (`projects/*/locations/*/keyRings/*/cryptoKeys/*`).
    async fn decrypt_data_key(&self, resource_id: &str, ciphertext: Vec<u8>) -> Result<Vec<u8>, BackendError>;
}

#[async_trait]
impl GcpKmsClient for KeyManagementService {
    async fn decrypt_data_key(&self, resource_id: &str, ciphertext: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let resp = self
            .decrypt()
            .set_name(resource_id)
            .set_ciphertext(ciphertext)
            .send()
            .await
            .map_err(|e| BackendError::Service(e.to_string()))?;

        if resp.plaintext.is_empty() {
            return Err(BackendError::Service("decrypt response contained no plaintext".into()));
        }
        Ok(resp.plaintext.to_vec())
    }
}

/// Build a Cloud KMS client from Application Default Credentials.
///
/// `endpoint_url` overrides the service endpoint (emulators, private
/// service connect).
///
/// # Errors
///
/// Returns an error if credentials cannot be resolved or the client cannot be
/// constructed.
pub async fn gcp_client(endpoint_url: Option<&str>) -> Result<KeyManagementService> {
    let mut builder = KeyManagementService::builder();
    if let Some(url) = endpoint_url {
        builder = builder.with_endpoint(url);
    }
    builder
        .build()
        .await
        .context("failed to build GCP KMS client")
}

/// Reads the `gcp_kms` branch: `resource_id` plus base64 `enc`.
pub struct GcpKmsBackend<C> {
    client: C,
}

impl<C: GcpKmsClient> GcpKmsBackend<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: GcpKmsClient> KeyBackend for GcpKmsBackend<C> {
    fn kind(&self) -> BackendKind {
        BackendKind::GcpKms
    }

    async fn unwrap_key(&self, entry: &KeyEntry) -> Result<Vec<u8>, BackendError> {
        let name = entry.resource_name().ok_or(BackendError::MissingResourceId)?;
        let enc = entry
            .ciphertext()
            .ok_or_else(|| BackendError::InvalidCiphertext("entry has no `enc` value".into()))?;
        let ciphertext = STANDARD
            .decode(enc.trim())
            .map_err(|e| BackendError::InvalidCiphertext(e.to_string()))?;

        self.client.decrypt_data_key(name, ciphertext).await
    }
}
