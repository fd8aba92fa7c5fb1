//! Ownership and declaration claims of every snippet except the one being
//! merged.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{EntryKind, Snippet, SnippetId};

use super::policy::{MergePolicy, validate};

type Key = (EntryKind, String);

/// Who else owns or declares each key.
///
/// - *owners*: snippets whose status lists the key, in any phase. A deleting
///   snippet still owns its keys until finalization removes them.
/// - *declarers*: active snippets whose spec declares the key and would pass
///   validation. A snippet that is being rejected never writes, so it does
///   not hold claims.
#[derive(Clone, Debug, Default)]
pub struct Claims {
    owners: BTreeMap<Key, BTreeSet<SnippetId>>,
    declarers: BTreeMap<Key, BTreeSet<SnippetId>>,
}

impl Claims {
    /// Collect claims from `snippets`, skipping `subject`.
    pub fn gather<'a, I>(snippets: I, subject: &SnippetId, policy: &MergePolicy) -> Self
    where
        I: IntoIterator<Item = &'a Snippet>,
    {
        let mut claims = Self::default();
        for snippet in snippets {
            if &snippet.id == subject {
                continue;
            }
            for kind in EntryKind::ALL {
                for arn in snippet.status.owned(kind) {
                    claims
                        .owners
                        .entry((kind, arn.clone()))
                        .or_default()
                        .insert(snippet.id.clone());
                }
            }
            if snippet.is_deleting() || validate(&snippet.spec, policy).is_err() {
                continue;
            }
            for kind in EntryKind::ALL {
                for entry in snippet.spec.entries(kind) {
                    claims
                        .declarers
                        .entry((kind, entry.principal_arn.clone()))
                        .or_default()
                        .insert(snippet.id.clone());
                }
            }
        }
        claims
    }

    /// Other snippets whose status lists the key.
    pub fn owners(&self, kind: EntryKind, arn: &str) -> impl Iterator<Item = &SnippetId> {
        Self::lookup(&self.owners, kind, arn)
    }

    /// Other active snippets that declare the key.
    pub fn declarers(&self, kind: EntryKind, arn: &str) -> impl Iterator<Item = &SnippetId> {
        Self::lookup(&self.declarers, kind, arn)
    }

    /// `true` if another snippet owns or declares the key.
    #[must_use]
    pub fn is_claimed(&self, kind: EntryKind, arn: &str) -> bool {
        self.owners(kind, arn).next().is_some() || self.declarers(kind, arn).next().is_some()
    }

    /// The declarer that takes precedence over `subject` for this key, if any.
    #[must_use]
    pub fn precedence_holder(
        &self,
        kind: EntryKind,
        arn: &str,
        subject: &SnippetId,
    ) -> Option<&SnippetId> {
        self.declarers(kind, arn).next().filter(|first| *first < subject)
    }

    /// Snippets declaring any key that `snippet` currently owns.
    ///
    /// These are the candidates to take over once `snippet` lets go.
    #[must_use]
    pub fn successors(&self, snippet: &Snippet) -> BTreeSet<SnippetId> {
        EntryKind::ALL
            .into_iter()
            .flat_map(|kind| {
                snippet
                    .status
                    .owned(kind)
                    .iter()
                    .flat_map(move |arn| self.declarers(kind, arn))
            })
            .cloned()
            .collect()
    }

    fn lookup<'a>(
        map: &'a BTreeMap<Key, BTreeSet<SnippetId>>,
        kind: EntryKind,
        arn: &str,
    ) -> impl Iterator<Item = &'a SnippetId> + use<'a> {
        map.get(&(kind, arn.to_owned())).into_iter().flatten()
    }
}
