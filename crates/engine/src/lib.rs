//! Read path of the SOPS encrypted-document format.
//!
//! A [`DecryptionSession`] takes a parsed document, unwraps its data key via a
//! [`KeyProvider`], decrypts every leaf under AAD bound to the leaf's path,
//! verifies the document MAC and returns the plaintext tree with the metadata
//! branch removed.

pub mod config;
pub mod crypto;
pub mod integrity;
pub mod key;
pub mod rotation;
pub mod session;
pub mod telemetry;
pub mod version;
pub mod walker;

#[cfg(test)]
pub(crate) mod test_support;

pub use key::{BackendKind, KeyBackend, KeyProvider};
pub use rotation::RotationAdvisory;
pub use session::{DecryptedDocument, DecryptionSession, SessionOptions};
