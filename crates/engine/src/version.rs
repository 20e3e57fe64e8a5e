//! Format-version comparison and the behaviour it gates.
//!
//! Two thresholds matter to the decrypt path:
//! - `0.8`: encrypted scalars carry an explicit `type:` tag.
//! - `0.9`: AAD is scoped per key (`parent || "<key>:"`). Older documents use
//!   the legacy cumulative scheme, see [`AadScheme::LegacyCumulative`].

use std::fmt;
use std::str::FromStr;

use common::DecryptError;

/// First format version whose encrypted scalars carry a type tag.
pub const TYPE_TAG_THRESHOLD: &str = "0.8";

/// First format version using per-key scoped AAD.
pub const SCOPED_AAD_THRESHOLD: &str = "0.9";

/// Version assumed for documents whose metadata carries none.
pub const CURRENT_FORMAT_VERSION: &str = "3.7.3";

/// A dotted numeric version, e.g. `3.7.3`.
///
/// Ordering is componentwise; when one version is a strict prefix of the
/// other, the longer one is newer (`1.1.2 > 1.1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FormatVersion(Vec<u64>);

impl FromStr for FormatVersion {
    type Err = DecryptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DecryptError::InvalidVersionString(s.to_owned()));
        }
        trimmed
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| DecryptError::InvalidVersionString(s.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(FormatVersion)
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// How a leaf's AAD is derived from its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AadScheme {
    /// Each child appends `"<key>:"` to its parent's AAD.
    Scoped,
    /// Historical pre-0.9 behaviour: siblings at one mapping level share a
    /// growing buffer, so each sibling's AAD contains every earlier sibling's
    /// key with no separators. Kept bit-for-bit for old documents only.
    LegacyCumulative,
}

impl FormatVersion {
    /// Whether encrypted scalars in this format declare their value type.
    pub fn carries_type_tags(&self) -> bool {
        *self >= threshold(TYPE_TAG_THRESHOLD)
    }

    /// AAD derivation rule for this format.
    pub fn aad_scheme(&self) -> AadScheme {
        if *self >= threshold(SCOPED_AAD_THRESHOLD) {
            AadScheme::Scoped
        } else {
            AadScheme::LegacyCumulative
        }
    }
}

fn threshold(s: &str) -> FormatVersion {
    FormatVersion(s.split('.').filter_map(|p| p.parse().ok()).collect())
}

/// `true` if version `a` is newer than or equal to version `b`.
///
/// # Errors
///
/// Returns [`DecryptError::InvalidVersionString`] if either string is not a
/// dotted sequence of non-negative integers.
pub fn is_newer_or_equal(a: &str, b: &str) -> Result<bool, DecryptError> {
    Ok(a.parse::<FormatVersion>()? >= b.parse::<FormatVersion>()?)
}
