//! Structured logging setup.
//!
//! # Telemetry invariants
//!
//! - **No key material or plaintext** may appear in any log field. Leaf paths
//!   and backend names are fine; values are not.
//! - Logs go to stderr; stdout carries only the decrypted document.
//! - Log level is configurable via `SOPS_LOG_LEVEL` (default: `info`) and
//!   overridden by `RUST_LOG`.

pub mod init;

pub use init::init_telemetry;
