//! Common types, document model, and errors shared across `sops-decrypt` crates.

pub mod document;
pub mod error;
pub mod metadata;

pub use document::{LeafPath, Node, PathSegment, Scalar};
pub use error::{DecryptError, ProviderError};
pub use metadata::{KeyEntry, Metadata};
