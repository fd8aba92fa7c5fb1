//! Snippet records: declarations, lifecycle phase, finalizers and status.
//!
//! The store mirrors how an API server treats a custom resource:
//!
//! - `upsert_spec` creates a record or replaces its declaration.
//! - `mark_deleting` drops a record with no finalizers at once; otherwise it
//!   only moves it to [`Phase::Deleting`].
//! - Finalizers cannot be added once deletion started. Removing the last
//!   finalizer of a deleting record drops it.
//! - Status is written only by the controller, declarations only by authors.

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use authmap_core::model::{Phase, Snippet, SnippetId, SnippetSpec, SnippetStatus};

pub use file::FileSnippetStore;
pub use memory::MemorySnippetStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from a snippet store.
#[derive(Debug)]
pub enum SnippetStoreError {
    /// No record with this identity.
    NotFound {
        /// The identity that was looked up.
        id: SnippetId,
    },
    /// The record is being deleted and no longer accepts this change.
    Terminating {
        /// The identity of the record.
        id: SnippetId,
    },
    /// The backing store is temporarily unusable.
    Unavailable {
        /// Human-readable description.
        detail: String,
    },
    /// The backing file could not be parsed.
    Corrupt {
        /// The file.
        path: PathBuf,
        /// Parser message.
        detail: String,
    },
    /// I/O error on the backing file.
    Io(std::io::Error),
}

impl fmt::Display for SnippetStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "snippet {id} not found"),
            Self::Terminating { id } => {
                write!(f, "snippet {id} is being deleted and cannot be changed")
            }
            Self::Unavailable { detail } => write!(f, "snippet store unavailable: {detail}"),
            Self::Corrupt { path, detail } => {
                write!(f, "snippet store {} is corrupt: {detail}", path.display())
            }
            Self::Io(e) => write!(f, "I/O error on snippet store: {e}"),
        }
    }
}

impl std::error::Error for SnippetStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::Io(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<std::io::Error> for SnippetStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistent snippet records, shared by every worker.
pub trait SnippetStore: Send + Sync {
    /// The record, or `None` if absent.
    ///
    /// # Errors
    /// Backend failures.
    fn get(&self, id: &SnippetId) -> Result<Option<Snippet>, SnippetStoreError>;

    /// Every record, ordered by identity.
    ///
    /// # Errors
    /// Backend failures.
    fn list(&self) -> Result<Vec<Snippet>, SnippetStoreError>;

    /// Create the record or replace its declaration.
    ///
    /// # Errors
    /// [`SnippetStoreError::Terminating`] if the record is being deleted.
    fn upsert_spec(&self, id: &SnippetId, spec: SnippetSpec) -> Result<(), SnippetStoreError>;

    /// Request deletion. Absent records are ignored.
    ///
    /// # Errors
    /// Backend failures.
    fn mark_deleting(&self, id: &SnippetId) -> Result<(), SnippetStoreError>;

    /// Register a finalizer. Already present is fine.
    ///
    /// # Errors
    /// [`SnippetStoreError::NotFound`], or
    /// [`SnippetStoreError::Terminating`] once deletion started.
    fn add_finalizer(&self, id: &SnippetId, name: &str) -> Result<(), SnippetStoreError>;

    /// Release a finalizer. Absent records and finalizers are ignored.
    ///
    /// # Errors
    /// Backend failures.
    fn remove_finalizer(&self, id: &SnippetId, name: &str) -> Result<(), SnippetStoreError>;

    /// Replace the status.
    ///
    /// # Errors
    /// [`SnippetStoreError::NotFound`] if the record is gone.
    fn update_status(
        &self,
        id: &SnippetId,
        status: SnippetStatus,
    ) -> Result<(), SnippetStoreError>;
}

// ---------------------------------------------------------------------------
// Record set shared by the implementations
// ---------------------------------------------------------------------------

/// In-memory record set with the lifecycle rules applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Records(BTreeMap<SnippetId, Snippet>);

impl Records {
    pub(crate) fn from_list(list: Vec<Snippet>) -> Self {
        Self(list.into_iter().map(|s| (s.id.clone(), s)).collect())
    }

    pub(crate) fn get(&self, id: &SnippetId) -> Option<Snippet> {
        self.0.get(id).cloned()
    }

    pub(crate) fn list(&self) -> Vec<Snippet> {
        self.0.values().cloned().collect()
    }

    pub(crate) fn insert(&mut self, snippet: Snippet) {
        self.0.insert(snippet.id.clone(), snippet);
    }

    pub(crate) fn upsert_spec(
        &mut self,
        id: &SnippetId,
        spec: SnippetSpec,
    ) -> Result<(), SnippetStoreError> {
        match self.0.get_mut(id) {
            Some(s) if s.is_deleting() => Err(SnippetStoreError::Terminating { id: id.clone() }),
            Some(s) => {
                s.spec = spec;
                Ok(())
            }
            None => {
                self.0.insert(id.clone(), Snippet::new(id.clone(), spec));
                Ok(())
            }
        }
    }

    pub(crate) fn mark_deleting(&mut self, id: &SnippetId) {
        let Some(s) = self.0.get_mut(id) else {
            return;
        };
        if s.finalizers.is_empty() {
            self.0.remove(id);
        } else {
            s.phase = Phase::Deleting;
        }
    }

    pub(crate) fn add_finalizer(
        &mut self,
        id: &SnippetId,
        name: &str,
    ) -> Result<(), SnippetStoreError> {
        let s = self
            .0
            .get_mut(id)
            .ok_or_else(|| SnippetStoreError::NotFound { id: id.clone() })?;
        if s.is_deleting() {
            return Err(SnippetStoreError::Terminating { id: id.clone() });
        }
        s.finalizers.insert(name.to_owned());
        Ok(())
    }

    pub(crate) fn remove_finalizer(&mut self, id: &SnippetId, name: &str) {
        let Some(s) = self.0.get_mut(id) else {
            return;
        };
        s.finalizers.remove(name);
        if s.is_deleting() && s.finalizers.is_empty() {
            self.0.remove(id);
        }
    }

    pub(crate) fn update_status(
        &mut self,
        id: &SnippetId,
        status: SnippetStatus,
    ) -> Result<(), SnippetStoreError> {
        let s = self
            .0
            .get_mut(id)
            .ok_or_else(|| SnippetStoreError::NotFound { id: id.clone() })?;
        s.status = status;
        Ok(())
    }
}
