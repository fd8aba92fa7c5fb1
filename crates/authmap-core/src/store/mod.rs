//! Client for the shared table resource.
//!
//! The resource offers three operations: read with a concurrency token,
//! create-if-absent, and a write that only succeeds if the caller's token is
//! still current.
//!
//! # Concurrency
//!
//! [`SharedResourceClient::conditional_write`] implements optimistic
//! concurrency control. If the stored token no longer matches, the write is
//! rejected with [`StoreError::Conflict`] and nothing changes. The caller must
//! snapshot again and recompute its merge against the new base; retrying the
//! same payload would discard the other writer's change.

pub mod codec;
pub mod file;
pub mod memory;

use std::fmt;

use crate::model::SharedTable;
use crate::version::Generation;

pub use codec::{TableDocument, TableRef};
pub use file::FileTableStore;
pub use memory::MemoryTableStore;

// ---------------------------------------------------------------------------
// Token + snapshot
// ---------------------------------------------------------------------------

/// Opaque version marker of the stored resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConcurrencyToken(String);

impl ConcurrencyToken {
    /// Wrap a backend-specific token value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table content together with the token it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Decoded content.
    pub table: SharedTable,
    /// Token to pass to the next conditional write.
    pub token: ConcurrencyToken,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the shared resource.
#[derive(Debug)]
pub enum StoreError {
    /// The resource has never been created.
    NotFound {
        /// Resource that was read.
        resource: TableRef,
    },
    /// The caller's token is stale; someone else wrote first.
    Conflict {
        /// Resource that was written.
        resource: TableRef,
    },
    /// The stored content could not be decoded.
    Serialization {
        /// Resource that was read.
        resource: TableRef,
        /// What was wrong with it.
        detail: String,
    },
    /// A write did not advance the generation.
    GenerationRegression {
        /// Generation currently stored.
        stored: Generation,
        /// Generation the write carried.
        attempted: Generation,
    },
    /// The backend could not be reached or failed.
    Unavailable {
        /// Human-readable description.
        detail: String,
    },
    /// An I/O error in a file-backed store.
    Io(std::io::Error),
}

impl StoreError {
    /// `true` for failures worth retrying later without operator action.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Unavailable { .. } | Self::Io(_)
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { resource } => write!(f, "shared table {resource} does not exist"),
            Self::Conflict { resource } => write!(
                f,
                "conditional write to {resource} rejected: it was modified concurrently; \
                 snapshot again and retry"
            ),
            Self::Serialization { resource, detail } => {
                write!(f, "shared table {resource} has corrupt content: {detail}")
            }
            Self::GenerationRegression { stored, attempted } => write!(
                f,
                "write carries generation {attempted} but {stored} is already stored; \
                 generations must strictly increase"
            ),
            Self::Unavailable { detail } => write!(f, "shared table unavailable: {detail}"),
            Self::Io(e) => write!(f, "I/O error on shared table: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::Io(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// Access to the single shared table.
///
/// Implementations must be safe to call from several worker threads.
pub trait SharedResourceClient: Send + Sync {
    /// Read the table and its current token.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if the resource was never created,
    /// [`StoreError::Serialization`] if its content is corrupt.
    fn snapshot(&self) -> Result<Snapshot, StoreError>;

    /// Create an empty table at [`Generation::ZERO`] if none exists, then
    /// return a snapshot. Safe to call repeatedly and concurrently.
    ///
    /// # Errors
    /// Backend failures and corrupt content, as for [`Self::snapshot`].
    fn bootstrap(&self) -> Result<Snapshot, StoreError>;

    /// Replace the table if `token` is still current.
    ///
    /// Returns the new token on success. `table.generation` must be greater
    /// than the stored generation.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if the token is stale (no write happened),
    /// [`StoreError::GenerationRegression`] if the generation does not
    /// advance, [`StoreError::NotFound`] if the resource vanished.
    fn conditional_write(
        &self,
        table: &SharedTable,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, StoreError>;

    /// [`Self::snapshot`], bootstrapping the resource on first use.
    ///
    /// # Errors
    /// As for [`Self::snapshot`] and [`Self::bootstrap`].
    fn snapshot_or_bootstrap(&self) -> Result<Snapshot, StoreError> {
        match self.snapshot() {
            Err(StoreError::NotFound { .. }) => self.bootstrap(),
            other => other,
        }
    }
}

/// Reject a write whose generation does not move past `stored`.
pub(crate) fn check_generation(
    stored: Generation,
    attempted: Generation,
) -> Result<(), StoreError> {
    if attempted > stored {
        Ok(())
    } else {
        Err(StoreError::GenerationRegression { stored, attempted })
    }
}
