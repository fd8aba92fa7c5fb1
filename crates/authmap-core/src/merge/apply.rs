//! `apply`: fold a snippet's current declaration into the table.

use std::collections::BTreeSet;

use crate::model::{
    Collision, CollisionHolder, EntryKind, SharedTable, Snippet, SnippetId, ValidationError,
};

use super::claims::Claims;
use super::policy::{MergePolicy, validate};

/// Result of [`apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The merged table. Generation is unchanged from the input.
    pub table: SharedTable,
    /// Role ARNs the snippet holds after the merge.
    pub role_arns: BTreeSet<String>,
    /// User ARNs the snippet holds after the merge.
    pub user_arns: BTreeSet<String>,
    /// Declared keys that were skipped because someone else holds them.
    pub collisions: Vec<Collision>,
    /// Other snippets affected by this merge: owners of keys taken over and
    /// declarers of keys let go. They should be reconciled again.
    pub requeue: BTreeSet<SnippetId>,
}

impl MergeOutcome {
    /// Owned ARNs of one kind.
    #[must_use]
    pub const fn owned(&self, kind: EntryKind) -> &BTreeSet<String> {
        match kind {
            EntryKind::Role => &self.role_arns,
            EntryKind::User => &self.user_arns,
        }
    }

    const fn owned_mut(&mut self, kind: EntryKind) -> &mut BTreeSet<String> {
        match kind {
            EntryKind::Role => &mut self.role_arns,
            EntryKind::User => &mut self.user_arns,
        }
    }
}

/// Merge `snippet`'s declaration into `current`.
///
/// 1. Every declared entry overwrites its key completely, unless the key is
///    a protected platform entry or another snippet has precedence on it.
/// 2. Every key the snippet owned but no longer holds is deleted, unless
///    another snippet owns or declares it, or it is protected.
///
/// Running `apply` again on its own output with the same inputs yields the
/// same table.
///
/// # Errors
/// Returns a [`ValidationError`] if the declaration is malformed; the table
/// is not touched in that case.
pub fn apply(
    current: &SharedTable,
    snippet: &Snippet,
    claims: &Claims,
    policy: &MergePolicy,
) -> Result<MergeOutcome, ValidationError> {
    validate(&snippet.spec, policy)?;

    let mut outcome = MergeOutcome {
        table: current.clone(),
        role_arns: BTreeSet::new(),
        user_arns: BTreeSet::new(),
        collisions: Vec::new(),
        requeue: BTreeSet::new(),
    };

    for kind in EntryKind::ALL {
        for entry in snippet.spec.entries(kind) {
            let arn = entry.principal_arn.as_str();

            if outcome
                .table
                .get(kind, arn)
                .is_some_and(|existing| policy.is_protected(existing))
            {
                outcome.collisions.push(Collision {
                    kind,
                    arn: arn.to_owned(),
                    holder: CollisionHolder::Protected,
                });
                continue;
            }

            if let Some(holder) = claims.precedence_holder(kind, arn, &snippet.id) {
                outcome.collisions.push(Collision {
                    kind,
                    arn: arn.to_owned(),
                    holder: CollisionHolder::Snippet(holder.clone()),
                });
                continue;
            }

            outcome.requeue.extend(claims.owners(kind, arn).cloned());
            outcome.table.upsert(kind, entry.clone());
            outcome.owned_mut(kind).insert(arn.to_owned());
        }

        let released: Vec<&String> = snippet
            .status
            .owned(kind)
            .iter()
            .filter(|arn| !outcome.owned(kind).contains(*arn))
            .collect();

        for arn in released {
            outcome.requeue.extend(claims.declarers(kind, arn).cloned());
            if claims.is_claimed(kind, arn) {
                continue;
            }
            if outcome
                .table
                .get(kind, arn)
                .is_some_and(|existing| policy.is_protected(existing))
            {
                continue;
            }
            outcome.table.remove(kind, arn);
        }
    }

    outcome.requeue.remove(&snippet.id);
    Ok(outcome)
}
