//! Drift detection: where the table disagrees with a snippet's intent.

use std::fmt;

use crate::model::{EntryKind, MappingEntry, SharedTable, Snippet, ValidationError};

use super::apply::apply;
use super::claims::Claims;
use super::policy::MergePolicy;

/// One key whose value differs between two tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyChange {
    /// Entry kind.
    pub kind: EntryKind,
    /// The key.
    pub arn: String,
    /// Value in the first table, if present.
    pub before: Option<MappingEntry>,
    /// Value in the second table, if present.
    pub after: Option<MappingEntry>,
}

impl fmt::Display for KeyChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match (&self.before, &self.after) {
            (None, Some(_)) => "add",
            (Some(_), None) => "delete",
            _ => "update",
        };
        write!(f, "{verb} {} {}", self.kind, self.arn)
    }
}

/// Keys whose entries differ between `before` and `after`, ordered by kind
/// then ARN.
#[must_use]
pub fn diff(before: &SharedTable, after: &SharedTable) -> Vec<KeyChange> {
    let mut changes = Vec::new();
    for kind in EntryKind::ALL {
        let old = before.entries(kind);
        let new = after.entries(kind);
        let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
        keys.sort();
        keys.dedup();
        for arn in keys {
            let (b, a) = (old.get(arn), new.get(arn));
            if b != a {
                changes.push(KeyChange {
                    kind,
                    arn: arn.clone(),
                    before: b.cloned(),
                    after: a.cloned(),
                });
            }
        }
    }
    changes
}

/// What [`apply`] would change in `current` for this snippet.
///
/// Empty means the table already reflects the snippet's declaration.
///
/// # Errors
/// Returns a [`ValidationError`] if the declaration is malformed.
pub fn drift(
    current: &SharedTable,
    snippet: &Snippet,
    claims: &Claims,
    policy: &MergePolicy,
) -> Result<Vec<KeyChange>, ValidationError> {
    let outcome = apply(current, snippet, claims, policy)?;
    Ok(diff(current, &outcome.table))
}
