//! Document-wide integrity: a streaming SHA-512 over every leaf's plaintext,
//! compared against the encrypted MAC stored in the metadata branch.
//!
//! The stored MAC is trustworthy because it is encrypted under the data key
//! and authenticated with the `lastmodified` timestamp as AAD.

use common::{DecryptError, Metadata, Scalar};
use sha2::{Digest, Sha512};

use crate::crypto::cipher::decode_value;
use crate::crypto::{DataKey, ScalarClass};

/// Leaf path reported when the MAC itself fails to decrypt.
const MAC_PATH: &str = "sops.mac";

/// Running digest over leaf plaintexts, fed in traversal order.
#[derive(Debug, Clone, Default)]
pub struct DocumentDigest(Sha512);

impl DocumentDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    /// Finish the digest as upper-case hex.
    pub fn finalize_hex(self) -> String {
        format!("{:X}", self.0.finalize())
    }
}

/// Compare a computed digest against the document's stored MAC.
///
/// # Errors
///
/// - [`DecryptError::MissingIntegrityField`] if `mac` or `lastmodified` is absent.
/// - [`DecryptError::DecryptionFailed`] if the stored MAC does not decrypt.
/// - [`DecryptError::ChecksumFailed`] if the values differ.
pub fn verify_mac(
    computed: &str,
    metadata: &Metadata,
    key: &DataKey,
    carries_type_tags: bool,
) -> Result<(), DecryptError> {
    let mac = non_empty(metadata.mac.as_deref())
        .ok_or_else(|| DecryptError::MissingIntegrityField("mac".into()))?;
    let lastmodified = non_empty(metadata.lastmodified.as_deref())
        .ok_or_else(|| DecryptError::MissingIntegrityField("lastmodified".into()))?;

    let stored = match ScalarClass::classify(mac).map_err(|e| e.at(MAC_PATH))? {
        ScalarClass::Encrypted(enc) => {
            let cleartext = enc
                .decrypt(key, lastmodified.as_bytes())
                .map_err(|e| e.at(MAC_PATH))?;
            let value_type = enc
                .resolved_type(carries_type_tags)
                .map_err(|e| e.at(MAC_PATH))?;
            decode_value(&cleartext, value_type).map_err(|e| e.at(MAC_PATH))?
        }
        ScalarClass::Plain(_) => {
            return Err(DecryptError::DecryptionFailed {
                path: MAC_PATH.into(),
                reason: "stored MAC is not an encrypted value".into(),
            })
        }
    };

    let Scalar::String(stored) = stored else {
        return Err(DecryptError::DecryptionFailed {
            path: MAC_PATH.into(),
            reason: "stored MAC is not a string".into(),
        });
    };

    if !stored.trim().eq_ignore_ascii_case(computed) {
        return Err(DecryptError::ChecksumFailed {
            expected: stored,
            actual: computed.to_owned(),
        });
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
