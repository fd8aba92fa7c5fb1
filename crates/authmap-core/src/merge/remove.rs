//! `remove`: drop everything a snippet owns.
//!
//! Used on the finalization path, where the declaration may already be empty
//! or gone and only the recorded ownership describes what the snippet wrote.

use crate::model::{EntryKind, SharedTable, Snippet};

use super::claims::Claims;
use super::policy::MergePolicy;

/// Delete the keys in `snippet`'s owned sets from `current`.
///
/// Keys that another snippet owns or declares are left in place (the other
/// snippet took them over), as are protected entries. Keys that are already
/// absent are ignored, so running this twice is the same as running it once.
#[must_use]
pub fn remove(
    current: &SharedTable,
    snippet: &Snippet,
    claims: &Claims,
    policy: &MergePolicy,
) -> SharedTable {
    let mut table = current.clone();
    for kind in EntryKind::ALL {
        for arn in snippet.status.owned(kind) {
            if claims.is_claimed(kind, arn) {
                continue;
            }
            if table
                .get(kind, arn)
                .is_some_and(|existing| policy.is_protected(existing))
            {
                continue;
            }
            table.remove(kind, arn);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MappingEntry, Phase, SnippetSpec};

    const X: &str = "arn:aws:iam::111:role/X";
    const Z: &str = "arn:aws:iam::111:role/Z";
    const Y: &str = "arn:aws:iam::111:user/Y";

    fn table() -> SharedTable {
        let mut t = SharedTable::default();
        t.upsert(EntryKind::Role, MappingEntry::new(X, "rbacA", &["g1"]));
        t.upsert(EntryKind::Role, MappingEntry::new(Z, "other", &[]));
        t.upsert(EntryKind::User, MappingEntry::new(Y, "rbacB", &["g2"]));
        t.upsert(
            EntryKind::Role,
            MappingEntry::new("arn:aws:iam::111:role/n", "system:node:x", &[]),
        );
        t
    }

    fn deleting(id: &str, roles: &[&str]) -> Snippet {
        let mut s = Snippet::new(id.parse().unwrap(), SnippetSpec::default());
        s.phase = Phase::Deleting;
        s.status.role_arns = roles.iter().map(|r| (*r).to_owned()).collect();
        s
    }

    #[test]
    fn removes_exactly_owned_keys() {
        let a = deleting("ns/a", &[X]);
        let out = remove(&table(), &a, &Claims::default(), &MergePolicy::default());
        let mut expected = table();
        expected.remove(EntryKind::Role, X);
        assert_eq!(out, expected);
    }

    #[test]
    fn removing_absent_keys_is_noop() {
        let a = deleting("ns/a", &["arn:aws:iam::111:role/gone"]);
        let out = remove(&table(), &a, &Claims::default(), &MergePolicy::default());
        assert_eq!(out, table());
        let twice = remove(&out, &a, &Claims::default(), &MergePolicy::default());
        assert_eq!(twice, out);
    }

    #[test]
    fn keeps_protected_and_reclaimed_keys() {
        let a = deleting("ns/a", &[X, "arn:aws:iam::111:role/n"]);
        let b = Snippet::new(
            "ns/b".parse().unwrap(),
            SnippetSpec {
                map_roles: vec![MappingEntry::new(X, "rbacB", &[])],
                ..SnippetSpec::default()
            },
        );
        let policy = MergePolicy::default();
        let claims = Claims::gather([&a, &b], &a.id, &policy);
        let out = remove(&table(), &a, &claims, &policy);
        assert_eq!(out, table());
    }
}
