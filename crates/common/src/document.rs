//! Generic document tree shared by the parser, the decrypt engine, and the
//! output writer.
//!
//! A document is a [`Node`]: a mapping with ordered, unique string keys, a
//! sequence, or a scalar leaf. Decryption only ever replaces scalar leaves;
//! the structural shape of a tree never changes.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::DecryptError;

/// Top-level key holding the encryption metadata branch.
pub const METADATA_KEY: &str = "sops";

/// A node of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Ordered key → node pairs. Keys are unique.
    Mapping(Vec<(String, Node)>),
    /// Ordered list of nodes.
    Sequence(Vec<Node>),
    /// A leaf value.
    Scalar(Scalar),
}

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    /// Wide enough for both the signed and unsigned 64-bit ranges.
    Int(i128),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Bytes fed into the document digest when this value passes through
    /// without being decrypted.
    pub fn digest_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Scalar::Null => Cow::Borrowed(&[]),
            Scalar::Bool(true) => Cow::Borrowed(b"True"),
            Scalar::Bool(false) => Cow::Borrowed(b"False"),
            Scalar::Int(i) => Cow::Owned(i.to_string().into_bytes()),
            Scalar::Float(f) => Cow::Owned(format_float(*f).into_bytes()),
            Scalar::String(s) => Cow::Borrowed(s.as_bytes()),
            Scalar::Bytes(b) => Cow::Borrowed(b),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

impl Node {
    /// Convenience constructor for a string leaf.
    pub fn string(s: impl Into<String>) -> Self {
        Node::Scalar(Scalar::String(s.into()))
    }

    /// Look up a direct child of a mapping by key.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Mapping(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Remove a direct child of a mapping by key, returning it.
    pub fn remove(&mut self, key: &str) -> Option<Node> {
        match self {
            Node::Mapping(entries) => {
                let idx = entries.iter().position(|(k, _)| k == key)?;
                Some(entries.remove(idx).1)
            }
            _ => None,
        }
    }

    /// Borrow the scalar value of a leaf node.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Build a tree from a parsed YAML value.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError::InvalidDocument`] for mapping keys that are not
    /// scalars.
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self, DecryptError> {
        use serde_yaml::Value;

        Ok(match value {
            Value::Null => Node::Scalar(Scalar::Null),
            Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Node::Scalar(match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Scalar::Int(i.into()),
                (None, Some(u)) => Scalar::Int(u.into()),
                _ => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
            }),
            Value::String(s) => Node::Scalar(Scalar::String(s)),
            Value::Sequence(items) => Node::Sequence(
                items
                    .into_iter()
                    .map(Node::from_yaml)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Mapping(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (k, v) in map {
                    entries.push((mapping_key(k)?, Node::from_yaml(v)?));
                }
                Node::Mapping(entries)
            }
            Value::Tagged(tagged) => Node::from_yaml(tagged.value)?,
        })
    }
}

fn mapping_key(key: serde_yaml::Value) -> Result<String, DecryptError> {
    use serde_yaml::Value;

    match key {
        Value::String(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok("null".into()),
        Value::Tagged(tagged) => mapping_key(tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => Err(DecryptError::InvalidDocument(
            "mapping keys must be scalars".into(),
        )),
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Node::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Scalar(s) => s.serialize(serializer),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Int(i) => match (i64::try_from(*i), u64::try_from(*i)) {
                (Ok(i), _) => serializer.serialize_i64(i),
                (_, Ok(u)) => serializer.serialize_u64(u),
                _ => serializer.serialize_i128(*i),
            },
            Scalar::Float(f) => serializer.serialize_f64(*f),
            Scalar::String(s) => serializer.serialize_str(s),
            Scalar::Bytes(b) => serializer.serialize_str(&STANDARD.encode(b)),
        }
    }
}

// ---------------------------------------------------------------------------
// Leaf paths
// ---------------------------------------------------------------------------

/// One step from a parent node to a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Path from the document root to a node, rendered as `a.b[0].c`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafPath(Vec<PathSegment>);

impl LeafPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    pub fn pop(&mut self) {
        self.0.pop();
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for LeafPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i == 0 => f.write_str(k)?,
                PathSegment::Key(k) => write!(f, ".{k}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parsing and output
// ---------------------------------------------------------------------------

/// Serialisation format of a document on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Infer the format from a file extension, defaulting to YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }

    /// Parse a format name (`yaml`, `yml`, `json`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            "json" => Some(DocumentFormat::Json),
            _ => None,
        }
    }
}

/// Parse raw document bytes into a tree.
///
/// JSON input is accepted as a subset of YAML; key order is preserved.
///
/// # Errors
///
/// Returns [`DecryptError::InvalidDocument`] if the bytes are not valid UTF-8
/// YAML/JSON.
pub fn parse_document(raw: &[u8]) -> Result<Node, DecryptError> {
    let value: serde_yaml::Value = serde_yaml::from_slice(raw)
        .map_err(|e| DecryptError::InvalidDocument(format!("parse error: {e}")))?;
    Node::from_yaml(value)
}

/// Serialise a tree in the requested format.
///
/// # Errors
///
/// Returns [`DecryptError::InvalidDocument`] if the serialiser rejects the tree.
pub fn render_document(node: &Node, format: DocumentFormat) -> Result<String, DecryptError> {
    match format {
        DocumentFormat::Yaml => serde_yaml::to_string(node)
            .map_err(|e| DecryptError::InvalidDocument(format!("yaml output: {e}"))),
        DocumentFormat::Json => serde_json::to_string_pretty(node)
            .map(|mut s| {
                s.push('\n');
                s
            })
            .map_err(|e| DecryptError::InvalidDocument(format!("json output: {e}"))),
    }
}
