//! Change detection: snippet fingerprints and the table generation counter.
//!
//! A [`Fingerprint`] is a SHA-256 over the concatenation, in declaration
//! order, of every role entry's ARN, RBAC name and groups, followed by the
//! same for every user entry. No separators are hashed and nothing is sorted,
//! so reordering entries or groups yields a different fingerprint even when
//! the declared set is the same. The controller treats that as a change and
//! re-applies, which is harmless because applying is idempotent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::{EntryKind, Snippet, SnippetSpec};

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 of a snippet's declared content (64 chars).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of a declaration.
#[must_use]
pub fn fingerprint(spec: &SnippetSpec) -> Fingerprint {
    let mut hasher = Sha256::new();
    for kind in EntryKind::ALL {
        for entry in spec.entries(kind) {
            hasher.update(entry.principal_arn.as_bytes());
            hasher.update(entry.rbac_name.as_bytes());
            for group in &entry.groups {
                hasher.update(group.as_bytes());
            }
        }
    }
    Fingerprint(hex(&hasher.finalize()))
}

/// `true` if the snippet's declaration differs from what was last applied.
///
/// A snippet that was never applied has no recorded fingerprint and always
/// counts as changed.
#[must_use]
pub fn has_changed(snippet: &Snippet) -> bool {
    snippet.status.fingerprint.as_ref() != Some(&fingerprint(&snippet.spec))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Monotonic write counter of the shared table.
///
/// Stored on the resource as a decimal string. A freshly bootstrapped table is
/// at [`Generation::ZERO`]; every successful write moves it to
/// [`Generation::next`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// Generation of a table that was never written.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw counter value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The following generation, or `None` at `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Generation {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MappingEntry, SnippetId};

    fn spec(roles: Vec<MappingEntry>, users: Vec<MappingEntry>) -> SnippetSpec {
        SnippetSpec {
            map_roles: roles,
            map_users: users,
        }
    }

    #[test]
    fn fingerprint_is_64_hex_chars_and_stable() {
        let s = spec(
            vec![MappingEntry::new("arn:aws:iam::1:role/a", "a", &["g1"])],
            vec![],
        );
        let fp = fingerprint(&s);
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fingerprint(&s.clone()));
    }

    #[test]
    fn empty_spec_hashes_empty_input() {
        assert_eq!(
            fingerprint(&SnippetSpec::default()).as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn group_order_changes_fingerprint() {
        let a = spec(
            vec![MappingEntry::new("arn:aws:iam::1:role/a", "a", &["g1", "g2"])],
            vec![],
        );
        let b = spec(
            vec![MappingEntry::new("arn:aws:iam::1:role/a", "a", &["g2", "g1"])],
            vec![],
        );
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn entry_order_changes_fingerprint() {
        let x = MappingEntry::new("arn:aws:iam::1:role/x", "x", &[]);
        let y = MappingEntry::new("arn:aws:iam::1:role/y", "y", &[]);
        let a = spec(vec![x.clone(), y.clone()], vec![]);
        let b = spec(vec![y, x], vec![]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn has_changed_tracks_recorded_fingerprint() {
        let mut snippet = crate::model::Snippet::new(
            SnippetId::new("ns", "a").unwrap(),
            spec(vec![], vec![MappingEntry::new("arn:aws:iam::1:user/u", "u", &[])]),
        );
        assert!(has_changed(&snippet));
        snippet.status.fingerprint = Some(fingerprint(&snippet.spec));
        assert!(!has_changed(&snippet));
        snippet.spec.map_users[0].groups.push("new".into());
        assert!(has_changed(&snippet));
    }

    #[test]
    fn generation_next_is_checked() {
        assert_eq!(Generation::ZERO.next(), Some(Generation::new(1)));
        assert_eq!(Generation::new(u64::MAX).next(), None);
        assert!(Generation::new(2) > Generation::new(1));
    }

    #[test]
    fn generation_parses_decimal_strings() {
        assert_eq!("42".parse::<Generation>().unwrap(), Generation::new(42));
        assert_eq!(" 3 ".parse::<Generation>().unwrap(), Generation::new(3));
        assert!("abc".parse::<Generation>().is_err());
        assert!("-1".parse::<Generation>().is_err());
        assert_eq!(Generation::new(9).to_string(), "9");
    }
}
