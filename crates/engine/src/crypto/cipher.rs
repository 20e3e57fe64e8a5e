//! Classification, AES-256-GCM decryption and typed decoding of one scalar.
//!
//! **Nonce sizes:** documents written by sops use a 32-byte
//! IV; 12-byte IVs are accepted as well. Both run through the same GCM
//! construction with a 16-byte tag.

use std::str::FromStr;

use aes_gcm::{
    aead::{
        consts::{U12, U32},
        Aead, KeyInit, Payload,
    },
    aes::Aes256,
    AesGcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{DecryptError, Scalar};
use thiserror::Error;

use super::DataKey;

/// Framing prefix of every encrypted scalar.
pub const ENC_PREFIX: &str = "ENC[AES256_GCM,";

/// Byte length of the IV written by sops.
pub const SOPS_IV_LEN: usize = 32;

/// Byte length of a standard GCM nonce.
pub const STANDARD_IV_LEN: usize = 12;

/// Byte length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with the 32-byte nonce used in encrypted documents.
pub(crate) type SopsGcm = AesGcm<Aes256, U32>;

type StandardGcm = AesGcm<Aes256, U12>;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The value is framed as encrypted but a field is missing or undecodable.
    #[error("malformed encrypted value: {0}")]
    InvalidFormat(String),

    /// AES-GCM authentication failed (wrong key, tampered data, or wrong AAD).
    #[error("authentication failed")]
    AeadFailure,

    /// The declared value type is not one this engine decodes.
    #[error("unknown value type `{0}`")]
    UnknownValueType(String),

    /// The decrypted text is not valid for the declared value type.
    #[error("decrypted text is not a valid {0}")]
    InvalidPlaintext(ValueType),
}

impl CipherError {
    /// Attach the offending leaf path, producing the crate-wide error.
    pub fn at(self, path: &str) -> DecryptError {
        let path = path.to_owned();
        match self {
            CipherError::UnknownValueType(tag) => DecryptError::UnknownValueType { path, tag },
            CipherError::InvalidPlaintext(value_type) => DecryptError::InvalidPlaintext {
                path,
                value_type: value_type.to_string(),
            },
            other @ (CipherError::InvalidFormat(_) | CipherError::AeadFailure) => {
                DecryptError::DecryptionFailed {
                    path,
                    reason: other.to_string(),
                }
            }
        }
    }
}

/// Declared type of an encrypted scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bytes,
    Str,
    Int,
    Float,
    Bool,
}

impl FromStr for ValueType {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(ValueType::Bytes),
            "str" => Ok(ValueType::Str),
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "bool" => Ok(ValueType::Bool),
            other => Err(CipherError::UnknownValueType(other.to_owned())),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ValueType::Bytes => "bytes",
            ValueType::Str => "str",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Bool => "bool",
        })
    }
}

/// A parsed encrypted scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedScalar {
    /// Raw ciphertext bytes, without the tag.
    pub data: Vec<u8>,
    /// Raw IV bytes.
    pub iv: Vec<u8>,
    /// Raw authentication tag bytes.
    pub tag: Vec<u8>,
    /// Declared value type, verbatim. `None` for legacy untyped values.
    pub value_type: Option<String>,
}

/// Result of classifying a scalar string, computed once per leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarClass<'a> {
    /// The value carries the encrypted framing.
    Encrypted(EncryptedScalar),
    /// Anything else; returned unchanged by the decrypt path.
    Plain(&'a str),
}

impl<'a> ScalarClass<'a> {
    /// Classify a scalar string as encrypted or plain.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidFormat`] if the value has the encrypted
    /// framing but its fields cannot be decoded.
    pub fn classify(value: &'a str) -> Result<Self, CipherError> {
        match value
            .strip_prefix(ENC_PREFIX)
            .and_then(|rest| rest.strip_suffix(']'))
        {
            Some(fields) => EncryptedScalar::parse_fields(fields).map(ScalarClass::Encrypted),
            None => Ok(ScalarClass::Plain(value)),
        }
    }
}

impl EncryptedScalar {
    fn parse_fields(fields: &str) -> Result<Self, CipherError> {
        let mut data = None;
        let mut iv = None;
        let mut tag = None;
        let mut value_type = None;

        for field in fields.split(',') {
            let (name, value) = field
                .split_once(':')
                .ok_or_else(|| CipherError::InvalidFormat(format!("field without name: {field:?}")))?;
            match name {
                "data" => data = Some(decode_b64(name, value)?),
                "iv" => iv = Some(decode_b64(name, value)?),
                "tag" => tag = Some(decode_b64(name, value)?),
                "type" => value_type = Some(value.to_owned()),
                other => {
                    return Err(CipherError::InvalidFormat(format!("unexpected field `{other}`")))
                }
            }
        }

        let data = data.ok_or_else(|| CipherError::InvalidFormat("missing `data`".into()))?;
        let iv = iv.ok_or_else(|| CipherError::InvalidFormat("missing `iv`".into()))?;
        let tag = tag.ok_or_else(|| CipherError::InvalidFormat("missing `tag`".into()))?;

        if iv.len() != SOPS_IV_LEN && iv.len() != STANDARD_IV_LEN {
            return Err(CipherError::InvalidFormat(format!(
                "unsupported iv length {}",
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(CipherError::InvalidFormat(format!(
                "tag must be {TAG_LEN} bytes, got {}",
                tag.len()
            )));
        }

        Ok(Self {
            data,
            iv,
            tag,
            value_type,
        })
    }

    /// Decrypt the ciphertext under `key` and `aad`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::AeadFailure`] if authentication fails.
    pub fn decrypt(&self, key: &DataKey, aad: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut msg = Vec::with_capacity(self.data.len() + self.tag.len());
        msg.extend_from_slice(&self.data);
        msg.extend_from_slice(&self.tag);
        let payload = Payload { msg: &msg, aad };

        let result = if self.iv.len() == SOPS_IV_LEN {
            SopsGcm::new_from_slice(key.as_bytes())
                .map_err(|_| CipherError::AeadFailure)?
                .decrypt(Nonce::<U32>::from_slice(&self.iv), payload)
        } else {
            StandardGcm::new_from_slice(key.as_bytes())
                .map_err(|_| CipherError::AeadFailure)?
                .decrypt(Nonce::<U12>::from_slice(&self.iv), payload)
        };
        result.map_err(|_| CipherError::AeadFailure)
    }

    /// Resolve the value type used to decode the cleartext.
    ///
    /// Untyped values, and every value of a format that predates type tags,
    /// decode as `str`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::UnknownValueType`] for an unrecognised tag.
    pub fn resolved_type(&self, carries_type_tags: bool) -> Result<ValueType, CipherError> {
        match (&self.value_type, carries_type_tags) {
            (Some(tag), true) => tag.parse(),
            _ => Ok(ValueType::Str),
        }
    }
}

fn decode_b64(name: &str, value: &str) -> Result<Vec<u8>, CipherError> {
    STANDARD
        .decode(value)
        .map_err(|e| CipherError::InvalidFormat(format!("`{name}` is not base64: {e}")))
}

/// Decode decrypted bytes according to the declared value type.
///
/// `str` values that are not valid UTF-8 fall back to raw bytes, which keeps
/// documents written by byte-oriented encryptors readable.
///
/// # Errors
///
/// Returns [`CipherError::InvalidPlaintext`] if an `int`, `float` or `bool`
/// value does not parse.
pub fn decode_value(cleartext: &[u8], value_type: ValueType) -> Result<Scalar, CipherError> {
    let text = move || {
        std::str::from_utf8(cleartext)
            .map(str::trim)
            .map_err(|_| CipherError::InvalidPlaintext(value_type))
    };
    match value_type {
        ValueType::Bytes => Ok(Scalar::Bytes(cleartext.to_vec())),
        ValueType::Str => Ok(match String::from_utf8(cleartext.to_vec()) {
            Ok(s) => Scalar::String(s),
            Err(e) => Scalar::Bytes(e.into_bytes()),
        }),
        ValueType::Int => text()?
            .parse()
            .map(Scalar::Int)
            .map_err(|_| CipherError::InvalidPlaintext(value_type)),
        ValueType::Float => text()?
            .parse()
            .map(Scalar::Float)
            .map_err(|_| CipherError::InvalidPlaintext(value_type)),
        ValueType::Bool => {
            let t = text()?;
            if t.eq_ignore_ascii_case("true") {
                Ok(Scalar::Bool(true))
            } else if t.eq_ignore_ascii_case("false") {
                Ok(Scalar::Bool(false))
            } else {
                Err(CipherError::InvalidPlaintext(value_type))
            }
        }
    }
}
