//! The shared table every snippet merges into.

use std::collections::BTreeMap;

use super::entry::{EntryKind, MappingEntry};
use crate::version::Generation;

/// Decoded content of the shared resource.
///
/// Entries are keyed by principal ARN within their kind. The generation
/// counter moves only when the controller writes; merge operations leave it
/// untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SharedTable {
    /// Role entries by role ARN.
    pub roles: BTreeMap<String, MappingEntry>,
    /// User entries by user ARN.
    pub users: BTreeMap<String, MappingEntry>,
    /// Write counter of the shared resource.
    pub generation: Generation,
}

impl SharedTable {
    /// Entries of one kind.
    #[must_use]
    pub const fn entries(&self, kind: EntryKind) -> &BTreeMap<String, MappingEntry> {
        match kind {
            EntryKind::Role => &self.roles,
            EntryKind::User => &self.users,
        }
    }

    /// Mutable entries of one kind.
    pub const fn entries_mut(&mut self, kind: EntryKind) -> &mut BTreeMap<String, MappingEntry> {
        match kind {
            EntryKind::Role => &mut self.roles,
            EntryKind::User => &mut self.users,
        }
    }

    /// Look up one entry.
    #[must_use]
    pub fn get(&self, kind: EntryKind, arn: &str) -> Option<&MappingEntry> {
        self.entries(kind).get(arn)
    }

    /// Insert or fully replace the entry keyed by its ARN.
    pub fn upsert(&mut self, kind: EntryKind, entry: MappingEntry) {
        self.entries_mut(kind)
            .insert(entry.principal_arn.clone(), entry);
    }

    /// Remove one entry, returning it if it was present.
    pub fn remove(&mut self, kind: EntryKind, arn: &str) -> Option<MappingEntry> {
        self.entries_mut(kind).remove(arn)
    }

    /// `true` if both tables hold the same entries, ignoring generation.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.roles == other.roles && self.users == other.users
    }

    /// Total number of entries across both kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len() + self.users.len()
    }

    /// `true` if the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_whole_entry() {
        let mut table = SharedTable::default();
        table.upsert(
            EntryKind::Role,
            MappingEntry::new("arn:aws:iam::1:role/a", "old", &["g1", "g2"]),
        );
        table.upsert(
            EntryKind::Role,
            MappingEntry::new("arn:aws:iam::1:role/a", "new", &["g3"]),
        );
        let entry = table.get(EntryKind::Role, "arn:aws:iam::1:role/a").unwrap();
        assert_eq!(entry.rbac_name, "new");
        assert_eq!(entry.groups, vec!["g3".to_owned()]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn kinds_are_separate_collections() {
        let mut table = SharedTable::default();
        table.upsert(EntryKind::User, MappingEntry::new("k", "u", &[]));
        assert!(table.get(EntryKind::Role, "k").is_none());
        assert!(table.remove(EntryKind::Role, "k").is_none());
        assert!(table.remove(EntryKind::User, "k").is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn same_content_ignores_generation() {
        let a = SharedTable::default();
        let b = SharedTable {
            generation: Generation::new(7),
            ..SharedTable::default()
        };
        assert!(a.same_content(&b));
        assert_ne!(a, b);
    }
}
