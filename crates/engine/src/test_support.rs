//! Test-only fixture encryptor mirroring the read path.

use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::{
    aead::{consts::U12, consts::U32, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::document::METADATA_KEY;
use common::{Node, Scalar};

use crate::crypto::cipher::{SopsGcm, SOPS_IV_LEN, TAG_LEN};
use crate::crypto::DataKey;
use crate::integrity::DocumentDigest;
use crate::key::{BackendKind, KeyProvider, MockKeyBackend};
use crate::version::{AadScheme, FormatVersion, CURRENT_FORMAT_VERSION};
use crate::walker::{scoped_aad, UNENCRYPTED_SUFFIX};

static NEXT_IV: AtomicU64 = AtomicU64::new(1);

pub(crate) fn test_key() -> DataKey {
    DataKey::from_slice(&[0x42; 32]).unwrap()
}

pub(crate) fn seal(key: &DataKey, plaintext: &[u8], aad: &[u8], value_type: Option<&str>) -> String {
    seal_with_iv_len(key, plaintext, aad, value_type, SOPS_IV_LEN)
}

pub(crate) fn seal_with_iv_len(
    key: &DataKey,
    plaintext: &[u8],
    aad: &[u8],
    value_type: Option<&str>,
    iv_len: usize,
) -> String {
    let counter = NEXT_IV.fetch_add(1, Ordering::Relaxed).to_be_bytes();
    let iv: Vec<u8> = counter.iter().copied().cycle().take(iv_len).collect();
    let payload = Payload { msg: plaintext, aad };

    let mut sealed = if iv_len == SOPS_IV_LEN {
        SopsGcm::new_from_slice(key.as_bytes())
            .unwrap()
            .encrypt(Nonce::<U32>::from_slice(&iv), payload)
            .unwrap()
    } else {
        Aes256Gcm::new_from_slice(key.as_bytes())
            .unwrap()
            .encrypt(Nonce::<U12>::from_slice(&iv), payload)
            .unwrap()
    };
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    let mut out = format!(
        "ENC[AES256_GCM,data:{},iv:{},tag:{}",
        STANDARD.encode(&sealed),
        STANDARD.encode(&iv),
        STANDARD.encode(&tag)
    );
    if let Some(t) = value_type {
        out.push_str(",type:");
        out.push_str(t);
    }
    out.push(']');
    out
}

struct Sealer<'k> {
    key: &'k DataKey,
    scheme: AadScheme,
    type_tags: bool,
    digest: DocumentDigest,
}

impl Sealer<'_> {
    fn mapping(&mut self, entries: &[(String, Node)], aad: &[u8], unencrypted: bool) -> Node {
        let mut carry = aad.to_vec();
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let child_aad = match self.scheme {
                AadScheme::Scoped => scoped_aad(aad, key),
                AadScheme::LegacyCumulative => {
                    carry.extend_from_slice(key.as_bytes());
                    carry.clone()
                }
            };
            let unencrypted = unencrypted || key.ends_with(UNENCRYPTED_SUFFIX);
            out.push((key.clone(), self.node(value, &child_aad, unencrypted)));
        }
        Node::Mapping(out)
    }

    fn node(&mut self, node: &Node, aad: &[u8], unencrypted: bool) -> Node {
        match node {
            Node::Mapping(entries) => self.mapping(entries, aad, unencrypted),
            Node::Sequence(items) => {
                Node::Sequence(items.iter().map(|i| self.node(i, aad, unencrypted)).collect())
            }
            Node::Scalar(scalar) if unencrypted => {
                self.digest.update(&scalar.digest_bytes());
                node.clone()
            }
            Node::Scalar(Scalar::Null) => node.clone(),
            Node::Scalar(scalar) => {
                let value_type = match scalar {
                    Scalar::Bool(_) => "bool",
                    Scalar::Int(_) => "int",
                    Scalar::Float(_) => "float",
                    Scalar::Bytes(_) => "bytes",
                    _ => "str",
                };
                let cleartext = scalar.digest_bytes();
                self.digest.update(&cleartext);
                Node::string(seal(
                    self.key,
                    &cleartext,
                    aad,
                    self.type_tags.then_some(value_type),
                ))
            }
        }
    }
}

/// Encrypt every leaf of `plain` the way the walker expects to read it,
/// returning the encrypted tree and its digest.
pub(crate) fn encrypt_tree(plain: &Node, key: &DataKey, scheme: AadScheme) -> (Node, String) {
    seal_tree(plain, key, scheme, true)
}

fn seal_tree(plain: &Node, key: &DataKey, scheme: AadScheme, type_tags: bool) -> (Node, String) {
    let mut sealer = Sealer {
        key,
        scheme,
        type_tags,
        digest: DocumentDigest::new(),
    };
    let tree = sealer.node(plain, &[], false);
    (tree, sealer.digest.finalize_hex())
}

/// Shape of the metadata branch written by [`encrypted_document`].
pub(crate) struct Fixture {
    pub version: Option<String>,
    pub with_mac: bool,
    pub lastmodified: String,
    pub created_at: String,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            version: Some(CURRENT_FORMAT_VERSION.into()),
            with_mac: true,
            lastmodified: "2026-10-01T09:30:00Z".into(),
            created_at: "2026-10-01T09:30:00Z".into(),
        }
    }
}

/// A complete encrypted document: sealed tree plus metadata branch with one
/// KMS entry and, optionally, an encrypted MAC.
pub(crate) fn encrypted_document(plain: &Node, key: &DataKey, fixture: &Fixture) -> Node {
    let version: FormatVersion = fixture
        .version
        .as_deref()
        .unwrap_or(CURRENT_FORMAT_VERSION)
        .parse()
        .unwrap();
    let type_tags = version.carries_type_tags();
    let (tree, digest) = seal_tree(plain, key, version.aad_scheme(), type_tags);

    let mut sops = vec![
        (
            "kms".to_string(),
            Node::Sequence(vec![Node::Mapping(vec![
                (
                    "arn".into(),
                    Node::string("arn:aws:kms:eu-west-1:111122223333:key/fixture"),
                ),
                ("created_at".into(), Node::string(fixture.created_at.clone())),
                ("enc".into(), Node::string(STANDARD.encode(b"wrapped data key"))),
            ])]),
        ),
        ("lastmodified".to_string(), Node::string(fixture.lastmodified.clone())),
    ];
    if fixture.with_mac {
        let mac = seal(
            key,
            digest.as_bytes(),
            fixture.lastmodified.as_bytes(),
            type_tags.then_some("str"),
        );
        sops.push(("mac".into(), Node::string(mac)));
    }
    if let Some(v) = &fixture.version {
        sops.push(("version".into(), Node::string(v.clone())));
    }

    let Node::Mapping(mut entries) = tree else {
        panic!("fixture documents must have a mapping root");
    };
    entries.push((METADATA_KEY.into(), Node::Mapping(sops)));
    Node::Mapping(entries)
}

/// Mutable fields of the `sops` branch of a document built by
/// [`encrypted_document`].
pub(crate) fn metadata_mut(doc: &mut Node) -> &mut Vec<(String, Node)> {
    let Node::Mapping(entries) = doc else {
        panic!("fixture documents must have a mapping root");
    };
    match entries.iter_mut().find(|(k, _)| k == METADATA_KEY) {
        Some((_, Node::Mapping(fields))) => fields,
        _ => panic!("fixture documents carry a `sops` mapping"),
    }
}

/// A provider whose single backend always yields `key`.
pub(crate) fn mock_provider(key: DataKey) -> KeyProvider {
    let bytes = key.as_bytes().to_vec();
    let mut backend = MockKeyBackend::new();
    backend.expect_kind().return_const(BackendKind::Kms);
    backend
        .expect_unwrap_key()
        .returning(move |_| Ok(bytes.clone()));
    KeyProvider::new(vec![Box::new(backend)])
}
