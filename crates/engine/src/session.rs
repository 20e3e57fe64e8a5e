//! One-document decrypt orchestration.
//!
//! Stages run strictly in order and any fatal error aborts the session
//! before a plaintext tree is returned:
//!
//! ```text
//! Parsed → KeyAcquired → RotationChecked → Walked+Verified → MetadataStripped
//! ```

use chrono::{DateTime, Duration, Utc};
use common::document::{parse_document, METADATA_KEY};
use common::{DecryptError, Metadata, Node};
use tracing::{debug, info_span, warn, Instrument};

use crate::integrity::verify_mac;
use crate::key::KeyProvider;
use crate::rotation::{check_rotation, RotationAdvisory, DEFAULT_ROTATION_MAX_AGE_DAYS};
use crate::version::{AadScheme, FormatVersion, CURRENT_FORMAT_VERSION};
use crate::walker::{Stash, TreeWalker, WalkOptions};

/// Per-session behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Skip digest accumulation and MAC verification.
    pub ignore_mac: bool,
    /// Accept documents older than format 0.9.
    pub legacy_aad: bool,
    /// Record per-leaf decryption artifacts.
    pub capture_stash: bool,
    pub rotation_max_age_days: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ignore_mac: false,
            legacy_aad: false,
            capture_stash: false,
            rotation_max_age_days: DEFAULT_ROTATION_MAX_AGE_DAYS,
        }
    }
}

/// A successfully decrypted document.
#[derive(Debug)]
pub struct DecryptedDocument {
    /// Plaintext tree with the metadata branch removed.
    pub tree: Node,
    pub advisories: Vec<RotationAdvisory>,
    /// Present only when [`SessionOptions::capture_stash`] is set.
    pub stash: Option<Stash>,
}

/// Decrypts documents with a fixed key provider and options.
///
/// Sessions hold no per-document state; one instance may decrypt any number
/// of documents, concurrently if needed.
pub struct DecryptionSession {
    provider: KeyProvider,
    options: SessionOptions,
}

impl DecryptionSession {
    pub fn new(provider: KeyProvider, options: SessionOptions) -> Self {
        Self { provider, options }
    }

    /// Parse raw document bytes, then [`decrypt`](Self::decrypt) them.
    ///
    /// # Errors
    ///
    /// See [`decrypt`](Self::decrypt); parse failures are
    /// [`DecryptError::InvalidDocument`].
    pub async fn decrypt_bytes(&self, raw: &[u8]) -> Result<DecryptedDocument, DecryptError> {
        let tree = parse_document(raw)?;
        debug!(stage = "parsed", "document parsed");
        self.decrypt(tree).await
    }

    /// Decrypt a parsed document.
    ///
    /// # Errors
    ///
    /// Any key, leaf, or integrity failure. No plaintext is returned on error.
    pub async fn decrypt(&self, tree: Node) -> Result<DecryptedDocument, DecryptError> {
        self.decrypt_at(tree, Utc::now()).await
    }

    /// [`decrypt`](Self::decrypt) with an explicit clock for the rotation check.
    pub async fn decrypt_at(&self, mut tree: Node, now: DateTime<Utc>) -> Result<DecryptedDocument, DecryptError> {
        let span = info_span!("decrypt_document");
        async move {
            if !matches!(tree, Node::Mapping(_)) {
                return Err(DecryptError::InvalidDocument(
                    "document root must be a mapping".into(),
                ));
            }
            let metadata = Metadata::from_document(&tree)?;
            let version = self.format_version(&metadata)?;
            let scheme = version.aad_scheme();
            if scheme == AadScheme::LegacyCumulative && !self.options.legacy_aad {
                return Err(DecryptError::UnsupportedFormatVersion {
                    version: version.to_string(),
                });
            }

            let key = self.provider.acquire(&metadata).await?;
            debug!(stage = "key_acquired", "data key acquired");

            let advisories = check_rotation(
                &metadata,
                now,
                Duration::days(i64::from(self.options.rotation_max_age_days)),
            );
            debug!(stage = "rotation_checked", advisories = advisories.len(), "rotation checked");

            let carries_type_tags = version.carries_type_tags();
            let outcome = TreeWalker::new(
                &key,
                WalkOptions {
                    scheme,
                    carries_type_tags,
                    compute_digest: !self.options.ignore_mac,
                    capture_stash: self.options.capture_stash,
                },
            )
            .walk(&mut tree)?;

            match &outcome.digest {
                Some(digest) => verify_mac(digest, &metadata, &key, carries_type_tags)?,
                None => warn!("integrity verification skipped"),
            }
            debug!(stage = "walked", "leaves decrypted and verified");

            tree.remove(METADATA_KEY);
            debug!(stage = "metadata_stripped", "decrypt complete");

            Ok(DecryptedDocument {
                tree,
                advisories,
                stash: outcome.stash,
            })
        }
        .instrument(span)
        .await
    }

    fn format_version(&self, metadata: &Metadata) -> Result<FormatVersion, DecryptError> {
        match metadata.version.as_deref() {
            Some(v) => v.parse(),
            None => {
                warn!("document has no format version, assuming current format");
                CURRENT_FORMAT_VERSION.parse()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::gcp_kms::MockGcpKmsClient;
    use crate::key::pgp::MockAgentChannel;
    use crate::key::{BackendError, BackendKind, GcpKmsBackend, MockKeyBackend, PgpBackend};
    use crate::test_support::{encrypted_document, metadata_mut, mock_provider, test_key, Fixture};
    use common::{KeyEntry, Scalar};

    const PLAIN: &[u8] = br#"
app:
  name: billing
  replicas: 3
  debug: false
  ratio: 0.5
database:
  password: hunter2
  hosts:
    - db1.internal
    - db2.internal
public_unencrypted:
  region: eu-west-1
"#;

    fn plain() -> Node {
        parse_document(PLAIN).unwrap()
    }

    fn session(options: SessionOptions) -> DecryptionSession {
        DecryptionSession::new(mock_provider(test_key()), options)
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-17T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn round_trip_strips_metadata() {
        let doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        let out = session(SessionOptions::default()).decrypt_at(doc, now()).await.unwrap();
        assert_eq!(out.tree, plain());
        assert!(out.tree.get(METADATA_KEY).is_none());
        assert!(out.advisories.is_empty());
        assert!(out.stash.is_none());
    }

    #[tokio::test]
    async fn decrypt_bytes_parses_json() {
        let doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        let json = common::document::render_document(&doc, common::document::DocumentFormat::Json).unwrap();
        let out = session(SessionOptions::default())
            .decrypt_bytes(json.as_bytes())
            .await
            .unwrap();
        assert_eq!(out.tree, plain());
    }

    #[tokio::test]
    async fn tampered_passthrough_value_fails_checksum() {
        let mut doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        if let Node::Mapping(entries) = &mut doc {
            let (_, public) = entries
                .iter_mut()
                .find(|(k, _)| k == "public_unencrypted")
                .unwrap();
            *public = Node::Mapping(vec![("region".into(), Node::string("us-east-1"))]);
        }
        let err = session(SessionOptions::default()).decrypt_at(doc, now()).await.unwrap_err();
        assert!(matches!(err, DecryptError::ChecksumFailed { .. }));
        assert_eq!(err.exit_code(), 51);
    }

    #[tokio::test]
    async fn ignore_mac_skips_verification() {
        let mut doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        if let Node::Mapping(entries) = &mut doc {
            entries.push(("extra_unencrypted".into(), Node::string("added later")));
        }
        let options = SessionOptions {
            ignore_mac: true,
            ..SessionOptions::default()
        };
        let out = session(options).decrypt_at(doc, now()).await.unwrap();
        assert_eq!(out.tree.get("extra_unencrypted"), Some(&Node::string("added later")));
    }

    #[tokio::test]
    async fn missing_mac_is_fatal() {
        let fixture = Fixture {
            with_mac: false,
            ..Fixture::default()
        };
        let doc = encrypted_document(&plain(), &test_key(), &fixture);
        let err = session(SessionOptions::default()).decrypt_at(doc, now()).await.unwrap_err();
        assert!(matches!(err, DecryptError::MissingIntegrityField(ref f) if f == "mac"));
        assert_eq!(err.exit_code(), 52);
    }

    #[tokio::test]
    async fn missing_mac_is_tolerated_when_ignoring_integrity() {
        let fixture = Fixture {
            with_mac: false,
            ..Fixture::default()
        };
        let doc = encrypted_document(&plain(), &test_key(), &fixture);
        let options = SessionOptions {
            ignore_mac: true,
            ..SessionOptions::default()
        };
        assert!(session(options).decrypt_at(doc, now()).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_key_fails_on_first_leaf() {
        let doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        let other = crate::crypto::DataKey::from_slice(&[0x13; 32]).unwrap();
        let err = DecryptionSession::new(mock_provider(other), SessionOptions::default())
            .decrypt_at(doc, now())
            .await
            .unwrap_err();
        assert_eq!(err.leaf_path(), Some("app.name"));
    }

    #[tokio::test]
    async fn key_unavailable_aborts_before_walking() {
        let doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        let mut backend = MockKeyBackend::new();
        backend.expect_kind().return_const(BackendKind::Kms);
        backend
            .expect_unwrap_key()
            .returning(|_| Err(BackendError::Service("AccessDenied".into())));
        let session = DecryptionSession::new(KeyProvider::new(vec![Box::new(backend)]), SessionOptions::default());
        let err = session.decrypt_at(doc, now()).await.unwrap_err();
        assert_eq!(err.exit_code(), 128);
    }

    #[tokio::test]
    async fn stale_entry_is_advisory_only() {
        let fixture = Fixture {
            created_at: "2026-03-31T00:00:00Z".into(),
            ..Fixture::default()
        };
        let doc = encrypted_document(&plain(), &test_key(), &fixture);
        let out = session(SessionOptions::default()).decrypt_at(doc, now()).await.unwrap();
        assert_eq!(out.advisories.len(), 1);
        assert_eq!(out.advisories[0].age_days, 200);
        assert_eq!(out.tree, plain());
    }

    #[tokio::test]
    async fn gcp_kms_only_document_decrypts() {
        const KEY_NAME: &str = "projects/acme/locations/global/keyRings/sops/cryptoKeys/app";
        let mut doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        let fields = metadata_mut(&mut doc);
        fields.retain(|(k, _)| k != "kms");
        fields.push((
            "gcp_kms".into(),
            Node::Sequence(vec![Node::Mapping(vec![
                ("resource_id".into(), Node::string(KEY_NAME)),
                ("created_at".into(), Node::string("2026-10-01T09:30:00Z")),
                ("enc".into(), Node::string("d3JhcHBlZA==")),
            ])]),
        ));

        let mut client = MockGcpKmsClient::new();
        client
            .expect_decrypt_data_key()
            .withf(|name, ciphertext| name == KEY_NAME && ciphertext == b"wrapped")
            .times(1)
            .returning(|_, _| Ok(test_key().as_bytes().to_vec()));
        let provider = KeyProvider::new(vec![
            Box::new(PgpBackend::new(MockAgentChannel::new())),
            Box::new(GcpKmsBackend::new(client)),
        ]);
        let out = DecryptionSession::new(provider, SessionOptions::default())
            .decrypt_at(doc, now())
            .await
            .unwrap();
        assert_eq!(out.tree, plain());
        assert!(out.advisories.is_empty());
    }

    #[tokio::test]
    async fn stale_entry_does_not_block_a_valid_one() {
        let mut doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        // Prepend a stale entry that cannot be unwrapped.
        let (_, kms) = metadata_mut(&mut doc).iter_mut().find(|(k, _)| k == "kms").unwrap();
        if let Node::Sequence(list) = kms {
            list.insert(
                0,
                Node::Mapping(vec![
                    ("arn".into(), Node::string("arn:aws:kms:eu-west-1:1:key/old")),
                    ("enc".into(), Node::string("stale")),
                    ("created_at".into(), Node::string("2026-03-31T00:00:00Z")),
                ]),
            );
        }
        let mut backend = MockKeyBackend::new();
        backend.expect_kind().return_const(BackendKind::Kms);
        backend.expect_unwrap_key().returning(|entry: &KeyEntry| {
            match entry.enc.as_deref() {
                Some("stale") => Err(BackendError::Service("key disabled".into())),
                _ => Ok(test_key().as_bytes().to_vec()),
            }
        });
        let session = DecryptionSession::new(KeyProvider::new(vec![Box::new(backend)]), SessionOptions::default());
        let out = session.decrypt_at(doc, now()).await.unwrap();
        assert_eq!(out.advisories.len(), 1);
        assert_eq!(out.advisories[0].entry, 0);
        assert_eq!(out.tree, plain());
    }

    #[tokio::test]
    async fn legacy_documents_require_opt_in() {
        let fixture = Fixture {
            version: Some("0.8".into()),
            ..Fixture::default()
        };
        let doc = encrypted_document(&plain(), &test_key(), &fixture);

        let err = session(SessionOptions::default())
            .decrypt_at(doc.clone(), now())
            .await
            .unwrap_err();
        assert!(matches!(err, DecryptError::UnsupportedFormatVersion { ref version } if version == "0.8"));

        let options = SessionOptions {
            legacy_aad: true,
            ..SessionOptions::default()
        };
        let out = session(options).decrypt_at(doc, now()).await.unwrap();
        assert_eq!(out.tree, plain());
    }

    #[tokio::test]
    async fn pre_type_tag_documents_decode_as_strings() {
        let fixture = Fixture {
            version: Some("0.7".into()),
            ..Fixture::default()
        };
        let doc = encrypted_document(&plain(), &test_key(), &fixture);
        let options = SessionOptions {
            legacy_aad: true,
            ..SessionOptions::default()
        };
        let out = session(options).decrypt_at(doc, now()).await.unwrap();
        let app = out.tree.get("app").unwrap();
        assert_eq!(app.get("replicas"), Some(&Node::string("3")));
        assert_eq!(app.get("debug"), Some(&Node::string("False")));
    }

    #[tokio::test]
    async fn missing_version_assumes_current_format() {
        let fixture = Fixture {
            version: None,
            ..Fixture::default()
        };
        let doc = encrypted_document(&plain(), &test_key(), &fixture);
        let out = session(SessionOptions::default()).decrypt_at(doc, now()).await.unwrap();
        assert_eq!(out.tree.get("app").unwrap().get("replicas"), Some(&Node::Scalar(Scalar::Int(3))));
    }

    #[tokio::test]
    async fn malformed_version_is_rejected() {
        let mut doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        let (_, version) = metadata_mut(&mut doc)
            .iter_mut()
            .find(|(k, _)| k == "version")
            .unwrap();
        *version = Node::string("3.x");
        assert!(matches!(
            session(SessionOptions::default()).decrypt_at(doc, now()).await,
            Err(DecryptError::InvalidVersionString(_))
        ));
    }

    #[tokio::test]
    async fn stash_is_captured_on_request() {
        let doc = encrypted_document(&plain(), &test_key(), &Fixture::default());
        let options = SessionOptions {
            capture_stash: true,
            ..SessionOptions::default()
        };
        let stash = session(options).decrypt_at(doc, now()).await.unwrap().stash.unwrap();
        let paths: Vec<_> = stash.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(
            paths,
            [
                "app.name",
                "app.replicas",
                "app.debug",
                "app.ratio",
                "database.password",
                "database.hosts[0]",
                "database.hosts[1]",
            ]
        );
        assert_eq!(stash[6].1.aad, b"database:hosts:");
    }

    #[tokio::test]
    async fn document_without_metadata_is_invalid() {
        let err = session(SessionOptions::default())
            .decrypt_at(plain(), now())
            .await
            .unwrap_err();
        assert!(matches!(err, DecryptError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn non_mapping_root_is_invalid() {
        let err = session(SessionOptions::default())
            .decrypt_at(Node::Sequence(vec![]), now())
            .await
            .unwrap_err();
        assert!(matches!(err, DecryptError::InvalidDocument(_)));
    }
}
