//! AWS KMS backend: unwraps the data key with a networked `Decrypt` call.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::primitives::Blob;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::KeyEntry;

use super::{BackendError, BackendKind, KeyBackend};

/// The one KMS operation the engine needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Decrypt `ciphertext` with the key identified by `key_id`.
    async fn decrypt_data_key(&self, key_id: &str, ciphertext: Vec<u8>) -> Result<Vec<u8>, BackendError>;
}

#[async_trait]
impl KmsClient for aws_sdk_kms::Client {
    async fn decrypt_data_key(&self, key_id: &str, ciphertext: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let resp = self
            .decrypt()
            .key_id(key_id)
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await
            .map_err(|e| BackendError::Service(e.to_string()))?;

        resp.plaintext()
            .map(|p| p.as_ref().to_vec())
            .ok_or_else(|| BackendError::Service("decrypt response contained no plaintext".into()))
    }
}

/// Build a KMS client from the standard AWS credential chain.
///
/// `endpoint_url` overrides the service endpoint (local emulators, VPC
/// endpoints).
pub async fn aws_client(endpoint_url: Option<&str>) -> aws_sdk_kms::Client {
    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let mut builder = aws_sdk_kms::config::Builder::from(&config);
    if let Some(url) = endpoint_url {
        builder = builder.endpoint_url(url);
    }
    aws_sdk_kms::Client::from_conf(builder.build())
}

/// Reads the `kms` branch: `arn` (or `resource_id`) plus base64 `enc`.
pub struct KmsBackend<C> {
    client: C,
}

impl<C: KmsClient> KmsBackend<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: KmsClient> KeyBackend for KmsBackend<C> {
    fn kind(&self) -> BackendKind {
        BackendKind::Kms
    }

    async fn unwrap_key(&self, entry: &KeyEntry) -> Result<Vec<u8>, BackendError> {
        let key_id = entry.aws_key_id().ok_or(BackendError::MissingResourceId)?;
        let enc = entry
            .ciphertext()
            .ok_or_else(|| BackendError::InvalidCiphertext("entry has no `enc` value".into()))?;
        let ciphertext = STANDARD
            .decode(enc.trim())
            .map_err(|e| BackendError::InvalidCiphertext(e.to_string()))?;

        self.client.decrypt_data_key(key_id, ciphertext).await
    }
}
