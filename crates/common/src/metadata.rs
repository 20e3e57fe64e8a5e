//! Typed view of the reserved metadata branch of an encrypted document.
//!
//! The branch is never decrypted as a tree value. It is read by the key
//! provider (key-wrapping entries), the integrity verifier (`mac`,
//! `lastmodified`) and the rotation advisory (`created_at`).

use serde::{Deserialize, Deserializer};

use crate::document::{Node, METADATA_KEY};
use crate::error::DecryptError;

/// Metadata branch of an encrypted document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    /// AWS KMS key-wrapping entries, in document order.
    #[serde(default)]
    pub kms: Option<Vec<Option<KeyEntry>>>,

    /// GCP Cloud KMS key-wrapping entries, in document order.
    #[serde(default)]
    pub gcp_kms: Option<Vec<Option<KeyEntry>>>,

    /// PGP key-wrapping entries, in document order.
    #[serde(default)]
    pub pgp: Option<Vec<Option<KeyEntry>>>,

    /// Encrypted document MAC.
    #[serde(default)]
    pub mac: Option<String>,

    /// Last-modified timestamp; also the AAD of the encrypted MAC.
    #[serde(default)]
    pub lastmodified: Option<String>,

    /// Format version that wrote the document.
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: Option<String>,
}

/// One key-wrapping entry: the data key encrypted for a single recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KeyEntry {
    /// Encrypted data key (base64 for KMS, ASCII-armored for PGP).
    #[serde(default)]
    pub enc: Option<String>,

    /// AWS KMS key ARN.
    #[serde(default)]
    pub arn: Option<String>,

    /// Backend resource identifier (GCP KMS key name, or an AWS key id).
    #[serde(default)]
    pub resource_id: Option<String>,

    /// RFC 3339 creation timestamp of this entry.
    #[serde(default)]
    pub created_at: Option<String>,

    /// PGP key fingerprint, informational only.
    #[serde(default)]
    pub fp: Option<String>,
}

impl KeyEntry {
    /// The encrypted data key, if this entry carries one.
    pub fn ciphertext(&self) -> Option<&str> {
        self.enc.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// The AWS key to address: `arn`, falling back to `resource_id`.
    /// Blank values count as absent.
    pub fn aws_key_id(&self) -> Option<&str> {
        non_blank(self.arn.as_deref()).or_else(|| non_blank(self.resource_id.as_deref()))
    }

    /// The non-blank `resource_id`, used as a GCP KMS key name.
    pub fn resource_name(&self) -> Option<&str> {
        non_blank(self.resource_id.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Metadata {
    /// Extract and deserialise the metadata branch from a document root.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError::InvalidDocument`] if the root is not a mapping,
    /// has no metadata branch, or the branch has an unexpected shape.
    pub fn from_document(root: &Node) -> Result<Self, DecryptError> {
        let branch = root.get(METADATA_KEY).ok_or_else(|| {
            DecryptError::InvalidDocument(format!("no `{METADATA_KEY}` metadata branch"))
        })?;
        if !matches!(branch, Node::Mapping(_)) {
            return Err(DecryptError::InvalidDocument(format!(
                "`{METADATA_KEY}` must be a mapping"
            )));
        }
        let value = serde_yaml::to_value(branch)
            .map_err(|e| DecryptError::InvalidDocument(format!("metadata: {e}")))?;
        serde_yaml::from_value(value)
            .map_err(|e| DecryptError::InvalidDocument(format!("metadata: {e}")))
    }

    /// Key-wrapping entries for a backend branch name (`kms`, `gcp_kms`,
    /// `pgp`).
    pub fn entries(&self, branch: &str) -> &[Option<KeyEntry>] {
        let list = match branch {
            "kms" => self.kms.as_deref(),
            "gcp_kms" => self.gcp_kms.as_deref(),
            "pgp" => self.pgp.as_deref(),
            _ => None,
        };
        list.unwrap_or(&[])
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    }))
}
