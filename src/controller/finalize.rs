//! Two-phase removal of a deleting snippet.
//!
//! 1. Remove the keys recorded in the snippet's status from the table, with
//!    the same snapshot/write/retry discipline as a reconcile.
//! 2. Release the finalizer. The record disappears once no finalizers remain.
//!
//! A crash between the two steps leaves the finalizer in place, so the next
//! cycle runs step 1 again. That finds nothing left to remove, writes
//! nothing, and goes on to step 2.

use authmap_core::merge::{Claims, remove};
use authmap_core::model::Snippet;
use tracing::instrument;

use super::reconcile::{Action, Committed, Cycle, commit};
use super::{Context, FINALIZER};
use crate::error::ReconcileError;

/// Clean up after `snippet` and release its finalizer.
///
/// The returned cycle lists the snippets that declare keys this one held,
/// so they can take them over.
///
/// # Errors
/// Store failures and exhausted conflict retries; the finalizer stays.
#[instrument(skip_all, fields(snippet = %snippet.id))]
pub fn finalize(ctx: &Context, snippet: &Snippet) -> Result<Cycle, ReconcileError> {
    if !snippet.has_finalizer(FINALIZER) {
        tracing::debug!("never written, nothing to clean up");
        return Ok(Cycle::only(Action::Released));
    }

    let committed = commit(
        ctx,
        &snippet.id,
        |current| {
            let all = ctx.snippets.list()?;
            let claims = Claims::gather(all.iter(), &snippet.id, &ctx.policy);
            Ok((remove(current, snippet, &claims, &ctx.policy), claims))
        },
        |_| Ok(true),
    )?;
    let Some(Committed {
        generation,
        wrote,
        value: claims,
    }) = committed
    else {
        return Ok(Cycle::only(Action::Cancelled));
    };

    if wrote {
        authmap_core::fp!("FP_FINALIZE_AFTER_WRITE")?;
    }

    let requeue = claims.successors(snippet);
    ctx.snippets.remove_finalizer(&snippet.id, FINALIZER)?;
    tracing::info!(
        %generation,
        roles = snippet.status.role_arns.len(),
        users = snippet.status.user_arns.len(),
        "snippet finalized"
    );

    Ok(Cycle {
        action: Action::Finalized { generation },
        requeue,
    })
}
