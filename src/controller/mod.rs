//! Event-driven reconciliation controller.
//!
//! Producers call [`Controller::submit`] with change events. Each event
//! updates the snippet store and queues the snippet's identity. A pool of
//! worker threads drains the queue, running one [`reconcile::reconcile`]
//! cycle per identity at a time. Retryable failures are queued again with
//! exponential backoff; validation failures wait for the next change to the
//! declaration.
//!
//! Workers never share state except through the two stores. Cross-snippet
//! ordering on the shared table comes only from its concurrency token.

pub mod backoff;
pub mod filter;
pub mod finalize;
pub mod queue;
pub mod reconcile;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use authmap_core::merge::MergePolicy;
use authmap_core::model::{MappingEntry, SnippetId, SnippetSpec};
use authmap_core::store::{SharedResourceClient, StoreError};

use crate::config::ControllerConfig;
use crate::error::ReconcileError;
use crate::snippets::{SnippetStore, SnippetStoreError};

pub use backoff::Backoff;
pub use filter::NamespaceFilter;
pub use queue::WorkQueue;
pub use reconcile::{Action, Cycle, reconcile};

/// Finalizer placed on every snippet before its first write.
pub const FINALIZER: &str = "awsauth.io/finalizer";

// ---------------------------------------------------------------------------
// Context + events
// ---------------------------------------------------------------------------

/// What a cycle needs: both stores and the merge rules.
pub struct Context {
    /// The shared table.
    pub table: Arc<dyn SharedResourceClient>,
    /// Snippet records.
    pub snippets: Arc<dyn SnippetStore>,
    /// Protected prefixes.
    pub policy: MergePolicy,
    /// Conditional-write attempts per cycle.
    pub max_conflict_retries: u32,
}

/// An inbound change notification.
///
/// Delivery may repeat or arrive out of order; each event only says which
/// identity to look at again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A snippet was created or its declaration changed.
    Upserted {
        /// Identity.
        id: SnippetId,
        /// Declared roles.
        map_roles: Vec<MappingEntry>,
        /// Declared users.
        map_users: Vec<MappingEntry>,
    },
    /// A snippet's deletion was requested.
    DeleteRequested {
        /// Identity.
        id: SnippetId,
    },
    /// Re-check a snippet against the table (drift repair).
    Resync {
        /// Identity.
        id: SnippetId,
    },
}

impl Event {
    /// Identity the event is about.
    #[must_use]
    pub const fn id(&self) -> &SnippetId {
        match self {
            Self::Upserted { id, .. } | Self::DeleteRequested { id } | Self::Resync { id } => id,
        }
    }
}

/// What [`Controller::submit`] did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// Recorded and queued.
    Queued,
    /// The namespace is not watched; ignored.
    Filtered,
    /// The controller is shutting down; ignored.
    ShutDown,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct Shared {
    ctx: Context,
    queue: WorkQueue<SnippetId>,
    backoff: Backoff,
    failures: Mutex<HashMap<SnippetId, u32>>,
}

impl Shared {
    fn note_failure(&self, id: &SnippetId) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(id.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn forget(&self, id: &SnippetId) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn run(&self) {
        while let Some(id) = self.queue.pop() {
            self.process(&id);
            self.queue.done(&id);
        }
    }

    fn process(&self, id: &SnippetId) {
        match reconcile(&self.ctx, id) {
            Ok(cycle) => {
                self.forget(id);
                tracing::debug!(snippet = %id, action = ?cycle.action, "cycle finished");
                for other in cycle.requeue {
                    tracing::debug!(snippet = %other, cause = %id, "requeueing affected snippet");
                    self.queue.requeue(other);
                }
            }
            Err(e) if e.is_retryable() => {
                let failures = self.note_failure(id);
                let delay = self.backoff.delay(failures);
                if matches!(e, ReconcileError::Store(StoreError::Serialization { .. })) {
                    tracing::error!(snippet = %id, error = %e, "shared table is corrupt");
                }
                tracing::warn!(
                    snippet = %id,
                    error = %e,
                    failures,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconcile failed, will retry"
                );
                self.queue.add_after(id.clone(), delay);
            }
            Err(e) => {
                self.forget(id);
                tracing::warn!(snippet = %id, error = %e, "snippet rejected");
            }
        }
    }
}

/// Running controller: a work queue plus its worker threads.
///
/// Dropping the controller shuts it down and joins the workers.
pub struct Controller {
    shared: Arc<Shared>,
    filter: NamespaceFilter,
    workers: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Start `config.workers` worker threads.
    ///
    /// # Errors
    /// Returns an error if a worker thread cannot be spawned.
    pub fn start(
        ctx: Context,
        config: &ControllerConfig,
        filter: NamespaceFilter,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            ctx,
            queue: WorkQueue::new(config.queue_capacity),
            backoff: Backoff::new(config.requeue_base(), config.requeue_max()),
            failures: Mutex::new(HashMap::new()),
        });
        let mut controller = Self {
            shared,
            filter,
            workers: Vec::with_capacity(config.workers),
        };
        for n in 0..config.workers.max(1) {
            let shared = Arc::clone(&controller.shared);
            let handle = thread::Builder::new()
                .name(format!("authmap-worker-{n}"))
                .spawn(move || shared.run())?;
            controller.workers.push(handle);
        }
        tracing::info!(workers = controller.workers.len(), "controller started");
        Ok(controller)
    }

    /// The stores and policy the workers use.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.shared.ctx
    }

    /// Record an event in the snippet store and queue its identity.
    ///
    /// Blocks while the queue is full.
    ///
    /// # Errors
    /// Snippet store failures, including
    /// [`SnippetStoreError::Terminating`] for a declaration change on a
    /// deleting snippet.
    pub fn submit(&self, event: Event) -> Result<Submission, SnippetStoreError> {
        let id = event.id().clone();
        if !self.filter.admits(id.namespace()) {
            tracing::debug!(snippet = %id, "namespace not watched, ignoring event");
            return Ok(Submission::Filtered);
        }
        match event {
            Event::Upserted {
                id,
                map_roles,
                map_users,
            } => self.shared.ctx.snippets.upsert_spec(
                &id,
                SnippetSpec {
                    map_roles,
                    map_users,
                },
            )?,
            Event::DeleteRequested { id } => self.shared.ctx.snippets.mark_deleting(&id)?,
            Event::Resync { .. } => {}
        }
        if self.shared.queue.add(id) {
            Ok(Submission::Queued)
        } else {
            Ok(Submission::ShutDown)
        }
    }

    /// Queue every watched snippet for a drift check.
    ///
    /// # Errors
    /// Snippet store failures.
    pub fn resync_all(&self) -> Result<usize, SnippetStoreError> {
        let mut queued = 0;
        for snippet in self.shared.ctx.snippets.list()? {
            if self.filter.admits(snippet.id.namespace()) && self.shared.queue.add(snippet.id) {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Block until no work is queued, in flight or waiting on a retry delay.
    /// Returns `false` on timeout.
    #[must_use]
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.queue.wait_idle(timeout)
    }

    /// Stop the workers after their current cycle and join them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.queue.shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}
