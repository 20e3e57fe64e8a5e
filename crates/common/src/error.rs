//! Common error types shared across crates.

use std::fmt;

use thiserror::Error;

/// Top-level decrypt error type.
///
/// Every variant is fatal for the document being decrypted: no partial
/// plaintext tree is returned. Variants map to process exit codes used by the
/// `sops-decrypt` binary:
/// - [`DecryptError::UnknownValueType`] → 23
/// - [`DecryptError::ChecksumFailed`] → 51
/// - [`DecryptError::MissingIntegrityField`] → 52
/// - [`DecryptError::KeyUnavailable`] → 128
/// - everything else → 1
#[derive(Debug, Error)]
pub enum DecryptError {
    /// No configured backend could unwrap the data key.
    #[error("could not retrieve the data key: {}", summarize(.failures))]
    KeyUnavailable {
        /// Per-entry failures collected while trying every backend.
        failures: Vec<ProviderError>,
    },

    /// AEAD authentication or framing failure on a single leaf.
    #[error("failed to decrypt value at `{path}`: {reason}")]
    DecryptionFailed {
        /// Dot-notation path of the offending leaf.
        path: String,
        /// Short description of the failure.
        reason: String,
    },

    /// An encrypted value declared a type tag this engine does not know.
    #[error("unknown value type `{tag}` at `{path}`")]
    UnknownValueType { path: String, tag: String },

    /// The decrypted text does not parse as the declared type.
    #[error("value at `{path}` is not a valid {value_type}")]
    InvalidPlaintext { path: String, value_type: String },

    /// A field required for integrity verification is absent.
    #[error("'{0}' not found, unable to verify file integrity")]
    MissingIntegrityField(String),

    /// The computed document digest does not match the stored MAC.
    #[error("checksum verification failed: expected {expected} but got {actual}")]
    ChecksumFailed { expected: String, actual: String },

    /// A version string is not a dotted sequence of non-negative integers.
    #[error("invalid version string: {0:?}")]
    InvalidVersionString(String),

    /// The document uses a format that requires legacy compatibility mode.
    #[error("format version {version} uses the legacy AAD scheme; enable legacy compatibility to decrypt it")]
    UnsupportedFormatVersion { version: String },

    /// The input is not a decryptable document (parse failure, missing metadata).
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl DecryptError {
    /// Returns the process exit code that should be used for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DecryptError::UnknownValueType { .. } => 23,
            DecryptError::ChecksumFailed { .. } => 51,
            DecryptError::MissingIntegrityField(_) => 52,
            DecryptError::KeyUnavailable { .. } => 128,
            DecryptError::DecryptionFailed { .. }
            | DecryptError::InvalidPlaintext { .. }
            | DecryptError::InvalidVersionString(_)
            | DecryptError::UnsupportedFormatVersion { .. }
            | DecryptError::InvalidDocument(_) => 1,
        }
    }

    /// The offending leaf path, when the error is tied to a single leaf.
    pub fn leaf_path(&self) -> Option<&str> {
        match self {
            DecryptError::DecryptionFailed { path, .. }
            | DecryptError::UnknownValueType { path, .. }
            | DecryptError::InvalidPlaintext { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// A non-fatal failure of one key-wrapping entry.
///
/// Collected by the key provider and only surfaced as part of
/// [`DecryptError::KeyUnavailable`] once every entry has been tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Backend name (`kms`, `pgp`).
    pub backend: String,
    /// Position of the entry within its backend's list.
    pub entry: usize,
    /// Human-readable failure reason.
    pub reason: String,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} entry {}: {}", self.backend, self.entry, self.reason)
    }
}

fn summarize(failures: &[ProviderError]) -> String {
    if failures.is_empty() {
        return "no key-wrapping entries found".into();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
