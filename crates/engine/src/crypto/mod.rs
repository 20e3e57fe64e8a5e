//! AES-256-GCM leaf decryption primitives.
//!
//! This module is intentionally free of key-backend and tree-walking logic.
//! It classifies one scalar, decrypts it under a caller-supplied AAD and
//! decodes the recovered bytes according to the declared value type.
//!
//! # Ciphertext format
//!
//! ```text
//! ENC[AES256_GCM,data:<b64>,iv:<b64>,tag:<b64>,type:<bytes|str|int|float|bool>]
//! ```
//!
//! The `type` field is absent in documents written before format 0.8.

pub mod cipher;
pub mod data_key;

pub use cipher::{CipherError, EncryptedScalar, ScalarClass, ValueType};
pub use data_key::{DataKey, KeyError};

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;
