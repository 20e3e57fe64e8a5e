//! Recursive in-place decryption of a document tree.
//!
//! Traversal order is deterministic (mapping keys in declared order, sequence
//! items by index) because the integrity digest depends on it. The metadata
//! branch at the root is skipped entirely.

use common::document::METADATA_KEY;
use common::{DecryptError, LeafPath, Node, PathSegment, Scalar};
use tracing::trace;

use crate::crypto::cipher::decode_value;
use crate::crypto::{DataKey, ScalarClass};
use crate::integrity::DocumentDigest;
use crate::version::AadScheme;

/// Keys ending in this suffix mark their whole subtree as plaintext.
pub const UNENCRYPTED_SUFFIX: &str = "_unencrypted";

/// Decryption artifacts captured for one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    pub iv: Vec<u8>,
    pub aad: Vec<u8>,
    pub cleartext: Vec<u8>,
}

/// Captured artifacts in traversal order, keyed by leaf path.
pub type Stash = Vec<(LeafPath, StashEntry)>;

/// Per-document traversal settings derived from the format version and the
/// caller's options.
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    pub scheme: AadScheme,
    pub carries_type_tags: bool,
    /// Accumulate the integrity digest. Off in integrity-ignoring mode.
    pub compute_digest: bool,
    pub capture_stash: bool,
}

/// What a completed walk produced besides the mutated tree.
#[derive(Debug)]
pub struct WalkOutcome {
    /// Upper-case hex digest, when digest accumulation was enabled.
    pub digest: Option<String>,
    pub stash: Option<Stash>,
}

/// Single-use walker over one document.
pub struct TreeWalker<'k> {
    key: &'k DataKey,
    options: WalkOptions,
    digest: Option<DocumentDigest>,
    stash: Option<Stash>,
    path: LeafPath,
}

impl<'k> TreeWalker<'k> {
    pub fn new(key: &'k DataKey, options: WalkOptions) -> Self {
        Self {
            key,
            options,
            digest: options.compute_digest.then(DocumentDigest::new),
            stash: options.capture_stash.then(Vec::new),
            path: LeafPath::new(),
        }
    }

    /// Decrypt every leaf of `root` in place.
    ///
    /// # Errors
    ///
    /// Fails on the first leaf that cannot be decrypted or decoded. The tree
    /// is then partially mutated and must be discarded by the caller.
    pub fn walk(mut self, root: &mut Node) -> Result<WalkOutcome, DecryptError> {
        match root {
            Node::Mapping(entries) => self.walk_mapping(entries, &[], false, true)?,
            other => self.walk_node(other, &[], false)?,
        }
        Ok(WalkOutcome {
            digest: self.digest.map(DocumentDigest::finalize_hex),
            stash: self.stash,
        })
    }

    fn walk_mapping(
        &mut self,
        entries: &mut [(String, Node)],
        aad: &[u8],
        unencrypted: bool,
        is_root: bool,
    ) -> Result<(), DecryptError> {
        // Legacy scheme only: one buffer shared by every sibling at this level.
        let mut carry = aad.to_vec();

        for (key, value) in entries.iter_mut() {
            if is_root && key == METADATA_KEY {
                continue;
            }
            let unencrypted = unencrypted || key.ends_with(UNENCRYPTED_SUFFIX);
            let child_aad = match self.options.scheme {
                AadScheme::Scoped => scoped_aad(aad, key),
                AadScheme::LegacyCumulative => {
                    carry.extend_from_slice(key.as_bytes());
                    carry.clone()
                }
            };

            self.path.push(PathSegment::Key(key.clone()));
            self.walk_node(value, &child_aad, unencrypted)?;
            self.path.pop();
        }
        Ok(())
    }

    fn walk_node(&mut self, node: &mut Node, aad: &[u8], unencrypted: bool) -> Result<(), DecryptError> {
        match node {
            Node::Mapping(entries) => self.walk_mapping(entries, aad, unencrypted, false),
            Node::Sequence(items) => {
                // Items inherit the sequence's AAD unchanged.
                for (idx, item) in items.iter_mut().enumerate() {
                    self.path.push(PathSegment::Index(idx));
                    self.walk_node(item, aad, unencrypted)?;
                    self.path.pop();
                }
                Ok(())
            }
            Node::Scalar(scalar) => self.visit_leaf(scalar, aad, unencrypted),
        }
    }

    fn visit_leaf(&mut self, scalar: &mut Scalar, aad: &[u8], unencrypted: bool) -> Result<(), DecryptError> {
        if unencrypted {
            if let Some(digest) = self.digest.as_mut() {
                digest.update(&scalar.digest_bytes());
            }
            return Ok(());
        }

        let Scalar::String(raw) = &*scalar else {
            return Ok(());
        };
        let enc = match ScalarClass::classify(raw).map_err(|e| e.at(&self.path.to_string()))? {
            ScalarClass::Encrypted(enc) => enc,
            ScalarClass::Plain(_) => return Ok(()),
        };

        let cleartext = enc
            .decrypt(self.key, aad)
            .map_err(|e| e.at(&self.path.to_string()))?;
        let value_type = enc
            .resolved_type(self.options.carries_type_tags)
            .map_err(|e| e.at(&self.path.to_string()))?;
        let value = decode_value(&cleartext, value_type).map_err(|e| e.at(&self.path.to_string()))?;
        trace!(path = %self.path, %value_type, "leaf decrypted");

        if let Some(digest) = self.digest.as_mut() {
            digest.update(&cleartext);
        }
        if let Some(stash) = self.stash.as_mut() {
            stash.push((
                self.path.clone(),
                StashEntry {
                    iv: enc.iv,
                    aad: aad.to_vec(),
                    cleartext,
                },
            ));
        }
        *scalar = value;
        Ok(())
    }
}

/// AAD of a child under the scoped scheme: `parent || key || ":"`.
pub fn scoped_aad(parent: &[u8], key: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(parent.len() + key.len() + 1);
    aad.extend_from_slice(parent);
    aad.extend_from_slice(key.as_bytes());
    aad.push(b':');
    aad
}
