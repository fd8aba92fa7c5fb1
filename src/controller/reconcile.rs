//! One reconcile cycle for one snippet.
//!
//! ```text
//! load record ──absent──▶ done
//!     │
//!     ├─ deleting ──▶ finalize (see finalize.rs)
//!     │
//!     └─ active: validate ─▶ add finalizer
//!                 ─▶ [snapshot ─▶ gather claims ─▶ apply ─▶ unchanged?
//!                      ─▶ record intended ownership ─▶ conditional write]
//!                     └── conflict: snapshot again, up to max_conflict_retries
//!                 ─▶ record status (owned keys, fingerprint, generation)
//! ```
//!
//! Keys are listed as owned before they are written. If the final status
//! update is lost, a later deletion still removes them.
//!
//! The table is always re-read and the merge recomputed, so out-of-band edits
//! to keys a snippet declares are repaired on the next cycle for that
//! snippet. When the merged content equals what is stored nothing is
//! written and the generation stays put.

use std::collections::BTreeSet;

use authmap_core::merge::{Claims, MergeOutcome, apply, validate};
use authmap_core::model::{SharedTable, Snippet, SnippetId, SnippetStatus};
use authmap_core::store::StoreError;
use authmap_core::version::{Generation, fingerprint};
use tracing::instrument;

use super::finalize::finalize;
use super::{Context, FINALIZER};
use crate::error::ReconcileError;
use crate::snippets::SnippetStoreError;

// ---------------------------------------------------------------------------
// Cycle result
// ---------------------------------------------------------------------------

/// What a cycle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// No record exists for the identity.
    Absent,
    /// Table and status already matched the declaration.
    UpToDate,
    /// Status now reflects the declaration. `wrote` tells whether the table
    /// had to change.
    Synced {
        /// Table generation the snippet is synced at.
        generation: Generation,
        /// Whether this cycle wrote the table.
        wrote: bool,
    },
    /// The record changed or started deleting mid-cycle; nothing written.
    Cancelled,
    /// Cleanup done and finalizer released.
    Finalized {
        /// Table generation after cleanup.
        generation: Generation,
    },
    /// Deleting record that never got the finalizer; nothing to clean up.
    Released,
}

/// Result of a successful cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    /// What happened.
    pub action: Action,
    /// Other snippets that should be reconciled because of this cycle.
    pub requeue: BTreeSet<SnippetId>,
}

impl Cycle {
    pub(super) const fn only(action: Action) -> Self {
        Self {
            action,
            requeue: BTreeSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run one cycle for `id`.
///
/// On failure the snippet's status is marked unsynced with the error message
/// (best effort), except when a failpoint interrupted the cycle.
///
/// # Errors
/// See [`ReconcileError`]; [`ReconcileError::is_retryable`] tells whether to
/// requeue.
#[instrument(skip(ctx), fields(snippet = %id))]
pub fn reconcile(ctx: &Context, id: &SnippetId) -> Result<Cycle, ReconcileError> {
    let Some(snippet) = ctx.snippets.get(id)? else {
        tracing::debug!("no record, nothing to do");
        return Ok(Cycle::only(Action::Absent));
    };

    let result = if snippet.is_deleting() {
        finalize(ctx, &snippet)
    } else {
        sync(ctx, &snippet)
    };

    if let Err(e) = &result {
        record_failure(ctx, &snippet, e);
    }
    result
}

fn record_failure(ctx: &Context, snippet: &Snippet, error: &ReconcileError) {
    if matches!(error, ReconcileError::Interrupted(_)) {
        return;
    }
    // Re-read: ownership recorded earlier in this cycle must survive.
    let current = match ctx.snippets.get(&snippet.id) {
        Ok(Some(s)) => s.status,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(error = %e, "could not read snippet to record failure");
            return;
        }
    };
    let status = current.failed(error.to_string());
    if status == current {
        return;
    }
    if let Err(e) = ctx.snippets.update_status(&snippet.id, status) {
        tracing::warn!(error = %e, "could not record failure on snippet status");
    }
}

// ---------------------------------------------------------------------------
// Active path
// ---------------------------------------------------------------------------

fn sync(ctx: &Context, snippet: &Snippet) -> Result<Cycle, ReconcileError> {
    validate(&snippet.spec, &ctx.policy)?;

    if !snippet.has_finalizer(FINALIZER) {
        match ctx.snippets.add_finalizer(&snippet.id, FINALIZER) {
            Ok(()) => tracing::debug!("finalizer added"),
            Err(SnippetStoreError::NotFound { .. } | SnippetStoreError::Terminating { .. }) => {
                return Ok(Cycle::only(Action::Cancelled));
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Claims are re-read on every attempt; the conflicting writer may have
    // moved ownership.
    let mut intent = None;
    let committed = commit(
        ctx,
        &snippet.id,
        |current| {
            let all = ctx.snippets.list()?;
            let claims = Claims::gather(all.iter(), &snippet.id, &ctx.policy);
            let mut outcome = apply(current, snippet, &claims, &ctx.policy)?;
            let table = std::mem::take(&mut outcome.table);
            Ok((table, outcome))
        },
        |outcome| record_intent(ctx, snippet, outcome, &mut intent),
    )?;
    let Some(committed) = committed else {
        return Ok(Cycle::only(Action::Cancelled));
    };

    if committed.wrote {
        authmap_core::fp!("FP_RECONCILE_AFTER_WRITE")?;
    }

    let outcome = committed.value;
    let status = synced_status(snippet, &outcome, committed.generation, committed.wrote);
    for collision in &status.collisions {
        tracing::warn!(%collision, "declared key not written");
    }

    // A recorded intent always gets replaced, even by the old status.
    let changed = status != snippet.status || intent.is_some();
    let action = if !committed.wrote && !changed {
        Action::UpToDate
    } else {
        Action::Synced {
            generation: status.observed_generation,
            wrote: committed.wrote,
        }
    };

    if changed {
        match ctx.snippets.update_status(&snippet.id, status) {
            Ok(()) => {}
            Err(SnippetStoreError::NotFound { .. }) => {
                return Ok(Cycle::only(Action::Cancelled));
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Cycle {
        action,
        requeue: outcome.requeue,
    })
}

/// `true` while the record is still active with the declaration this cycle
/// merged.
fn still_current(ctx: &Context, snippet: &Snippet) -> Result<bool, ReconcileError> {
    Ok(ctx
        .snippets
        .get(&snippet.id)?
        .is_some_and(|s| !s.is_deleting() && s.spec == snippet.spec))
}

/// Record the keys about to be written as owned before the write happens.
///
/// The stored status becomes the union of what it already lists and what
/// `outcome` takes, marked unsynced. If the cycle dies after the table write,
/// a later deletion still finds every written key. Returns `false` when the
/// record changed underneath the cycle.
fn record_intent(
    ctx: &Context,
    snippet: &Snippet,
    outcome: &MergeOutcome,
    recorded: &mut Option<SnippetStatus>,
) -> Result<bool, ReconcileError> {
    if !still_current(ctx, snippet)? {
        return Ok(false);
    }
    let previous = &snippet.status;
    if outcome.role_arns.is_subset(&previous.role_arns)
        && outcome.user_arns.is_subset(&previous.user_arns)
    {
        return Ok(true);
    }

    let status = SnippetStatus {
        role_arns: previous.role_arns.union(&outcome.role_arns).cloned().collect(),
        user_arns: previous.user_arns.union(&outcome.user_arns).cloned().collect(),
        is_synced: false,
        message: Some("shared table write in progress".to_owned()),
        ..previous.clone()
    };
    if recorded.as_ref() == Some(&status) {
        return Ok(true);
    }
    match ctx.snippets.update_status(&snippet.id, status.clone()) {
        Ok(()) => {}
        Err(SnippetStoreError::NotFound { .. }) => return Ok(false),
        Err(e) => return Err(e.into()),
    }
    tracing::debug!(
        roles = status.role_arns.len(),
        users = status.user_arns.len(),
        "ownership recorded ahead of write"
    );
    *recorded = Some(status);
    Ok(true)
}

fn synced_status(
    snippet: &Snippet,
    outcome: &MergeOutcome,
    generation: Generation,
    wrote: bool,
) -> SnippetStatus {
    let previous = &snippet.status;
    let fingerprint = Some(fingerprint(&snippet.spec));
    let unchanged = previous.is_synced
        && previous.fingerprint == fingerprint
        && previous.role_arns == outcome.role_arns
        && previous.user_arns == outcome.user_arns;
    let observed_generation = if !wrote && unchanged {
        previous.observed_generation
    } else {
        generation
    };

    let collisions = outcome.collisions.clone();
    let message = (!collisions.is_empty()).then(|| {
        let listed: Vec<String> = collisions.iter().map(ToString::to_string).collect();
        format!(
            "{} declared key(s) not written: {}",
            collisions.len(),
            listed.join("; ")
        )
    });

    SnippetStatus {
        role_arns: outcome.role_arns.clone(),
        user_arns: outcome.user_arns.clone(),
        fingerprint,
        is_synced: collisions.is_empty(),
        observed_generation,
        message,
        collisions,
    }
}

// ---------------------------------------------------------------------------
// Commit loop
// ---------------------------------------------------------------------------

/// Result of [`commit`].
pub(super) struct Committed<T> {
    /// Generation of the table the merge ended up matching.
    pub generation: Generation,
    /// Whether a write happened.
    pub wrote: bool,
    /// Side result of the last `compute` call.
    pub value: T,
}

/// Snapshot, compute, conditionally write; on a stale token start over.
///
/// `compute` derives the new content from a fresh snapshot each attempt.
/// `proceed` sees the side result right before writing; `false` abandons the
/// cycle and yields `None`.
pub(super) fn commit<T>(
    ctx: &Context,
    id: &SnippetId,
    mut compute: impl FnMut(&SharedTable) -> Result<(SharedTable, T), ReconcileError>,
    mut proceed: impl FnMut(&T) -> Result<bool, ReconcileError>,
) -> Result<Option<Committed<T>>, ReconcileError> {
    for attempt in 1..=ctx.max_conflict_retries {
        let snapshot = ctx.table.snapshot_or_bootstrap()?;
        let (mut table, value) = compute(&snapshot.table)?;
        let stored = snapshot.table.generation;

        if table.same_content(&snapshot.table) {
            tracing::debug!(generation = %stored, "shared table already matches");
            return Ok(Some(Committed {
                generation: stored,
                wrote: false,
                value,
            }));
        }

        if !proceed(&value)? {
            tracing::debug!("record changed underneath the cycle, abandoning");
            return Ok(None);
        }

        table.generation = stored.next().ok_or(StoreError::GenerationRegression {
            stored,
            attempted: stored,
        })?;
        match ctx.table.conditional_write(&table, &snapshot.token) {
            Ok(_) => {
                tracing::info!(generation = %table.generation, attempt, "shared table updated");
                return Ok(Some(Committed {
                    generation: table.generation,
                    wrote: true,
                    value,
                }));
            }
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(attempt, "write conflict, re-reading shared table");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ReconcileError::Contended {
        id: id.clone(),
        attempts: ctx.max_conflict_retries,
    })
}
