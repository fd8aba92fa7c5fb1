//! Errors from one reconcile or finalize cycle.
//!
//! Every variant says whether the work item should be retried. Retryable
//! failures are requeued with backoff; the rest wait for the next change to
//! the snippet.

use std::fmt;

use authmap_core::failpoints::Injected;
use authmap_core::model::{SnippetId, ValidationError};
use authmap_core::store::StoreError;

use crate::snippets::SnippetStoreError;

/// Failure of a reconcile or finalize cycle.
#[derive(Debug)]
pub enum ReconcileError {
    /// The shared table could not be read or written.
    Store(StoreError),

    /// The snippet record could not be read or updated.
    Snippets(SnippetStoreError),

    /// The declaration is malformed. Recorded on the snippet's status; the
    /// table is not written.
    Validation(ValidationError),

    /// Every conditional write in the cycle lost to a concurrent writer.
    Contended {
        /// Snippet being reconciled.
        id: SnippetId,
        /// Attempts made.
        attempts: u32,
    },

    /// The cycle stopped at an armed failpoint.
    Interrupted(Injected),
}

impl ReconcileError {
    /// `true` if the item should be requeued with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::Snippets(e) => write!(f, "{e}"),
            Self::Validation(e) => write!(f, "{e}"),
            Self::Contended { id, attempts } => write!(
                f,
                "gave up on {id} after {attempts} conflicting writes to the shared table; \
                 will retry later"
            ),
            Self::Interrupted(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Snippets(e) => Some(e),
            Self::Validation(e) => Some(e),
            Self::Interrupted(e) => Some(e),
            Self::Contended { .. } => None,
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<SnippetStoreError> for ReconcileError {
    fn from(e: SnippetStoreError) -> Self {
        Self::Snippets(e)
    }
}

impl From<ValidationError> for ReconcileError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<Injected> for ReconcileError {
    fn from(e: Injected) -> Self {
        Self::Interrupted(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authmap_core::store::TableRef;

    #[test]
    fn only_validation_is_final() {
        let id: SnippetId = "ns/a".parse().unwrap();
        assert!(
            ReconcileError::Contended {
                id: id.clone(),
                attempts: 5
            }
            .is_retryable()
        );
        assert!(
            ReconcileError::Store(StoreError::Serialization {
                resource: TableRef::default(),
                detail: "bad".into(),
            })
            .is_retryable()
        );
        assert!(
            !ReconcileError::Validation(ValidationError {
                subject: "role ARN".into(),
                value: "x".into(),
                reason: "bad".into(),
            })
            .is_retryable()
        );
    }

    #[test]
    fn contended_message_names_snippet() {
        let msg = ReconcileError::Contended {
            id: "ns/a".parse().unwrap(),
            attempts: 3,
        }
        .to_string();
        assert!(msg.contains("ns/a"));
        assert!(msg.contains('3'));
    }
}
