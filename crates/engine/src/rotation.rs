//! Advisory scan for stale key-wrapping entries. Never affects decrypt outcome.

use chrono::{DateTime, Duration, Utc};
use common::Metadata;
use tracing::{debug, warn};

use crate::key::BackendKind;

/// Age in days after which a key-wrapping entry should be rotated.
pub const DEFAULT_ROTATION_MAX_AGE_DAYS: u32 = 183;

/// A key-wrapping entry older than the rotation threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationAdvisory {
    pub backend: BackendKind,
    pub entry: usize,
    pub created_at: DateTime<Utc>,
    pub age_days: i64,
}

/// Report every entry, across all backends, whose `created_at` is older than
/// `max_age` at `now`.
pub fn check_rotation(metadata: &Metadata, now: DateTime<Utc>, max_age: Duration) -> Vec<RotationAdvisory> {
    let mut advisories = Vec::new();

    for backend in BackendKind::ALL {
        for (idx, entry) in metadata.entries(backend.branch()).iter().enumerate() {
            let Some(raw) = entry.as_ref().and_then(|e| e.created_at.as_deref()) else {
                continue;
            };
            let created_at = match DateTime::parse_from_rfc3339(raw.trim()) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    debug!(backend = %backend, entry = idx, error = %e, "unparsable created_at, skipping");
                    continue;
                }
            };

            let age = now - created_at;
            if age > max_age {
                warn!(
                    backend = %backend,
                    entry = idx,
                    age_days = age.num_days(),
                    "key-wrapping entry is due for rotation"
                );
                advisories.push(RotationAdvisory {
                    backend,
                    entry: idx,
                    created_at,
                    age_days: age.num_days(),
                });
            }
        }
    }
    advisories
}
