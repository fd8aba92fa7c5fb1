//! In-memory shared table.
//!
//! Holds the stored document and a revision counter that serves as the
//! concurrency token. Every successful write, including out-of-band edits
//! made through the test hooks, bumps the revision.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{
    ConcurrencyToken, SharedResourceClient, Snapshot, StoreError, TableDocument, TableRef,
    check_generation,
};
use crate::model::SharedTable;
use crate::version::Generation;

#[derive(Debug, Default)]
struct State {
    document: Option<TableDocument>,
    revision: u64,
    writes: u64,
    pending_conflicts: u32,
    unavailable: Option<String>,
}

impl State {
    fn token(&self) -> ConcurrencyToken {
        ConcurrencyToken::new(self.revision.to_string())
    }
}

/// Shared table kept in process memory.
#[derive(Debug)]
pub struct MemoryTableStore {
    resource: TableRef,
    state: Mutex<State>,
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new(TableRef::default())
    }
}

impl MemoryTableStore {
    /// An empty store; the resource does not exist until bootstrapped.
    #[must_use]
    pub fn new(resource: TableRef) -> Self {
        Self {
            resource,
            state: Mutex::new(State::default()),
        }
    }

    /// A store whose resource already holds `document`.
    #[must_use]
    pub fn with_document(document: TableDocument) -> Self {
        let store = Self::new(document.resource());
        {
            let mut state = store.lock();
            state.document = Some(document);
            state.revision = 1;
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current stored document, if the resource exists.
    #[must_use]
    pub fn document(&self) -> Option<TableDocument> {
        self.lock().document.clone()
    }

    /// Replace the stored document as an outside writer would.
    pub fn replace_document(&self, document: TableDocument) {
        let mut state = self.lock();
        state.document = Some(document);
        state.revision += 1;
    }

    /// Edit the decoded table out of band, keeping its generation.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] or [`StoreError::Serialization`] as for a
    /// snapshot.
    pub fn edit(&self, f: impl FnOnce(&mut SharedTable)) -> Result<(), StoreError> {
        let mut state = self.lock();
        let doc = state.document.as_ref().ok_or_else(|| StoreError::NotFound {
            resource: self.resource.clone(),
        })?;
        let mut table = doc.decode()?;
        f(&mut table);
        let updated = doc.encode(&table)?;
        state.document = Some(updated);
        state.revision += 1;
        Ok(())
    }

    /// Make the next `n` conditional writes fail with a conflict, as if
    /// another writer got in first each time.
    pub fn inject_conflicts(&self, n: u32) {
        self.lock().pending_conflicts = n;
    }

    /// Make every call fail with [`StoreError::Unavailable`] until cleared
    /// with `None`.
    pub fn set_unavailable(&self, detail: Option<&str>) {
        self.lock().unavailable = detail.map(str::to_owned);
    }

    /// Number of successful conditional writes.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Decoded table, for assertions.
    ///
    /// # Errors
    /// As for [`SharedResourceClient::snapshot`].
    pub fn table(&self) -> Result<SharedTable, StoreError> {
        self.snapshot().map(|s| s.table)
    }

    fn check_available(&self, state: &State) -> Result<(), StoreError> {
        match &state.unavailable {
            Some(detail) => Err(StoreError::Unavailable {
                detail: detail.clone(),
            }),
            None => Ok(()),
        }
    }

    fn snapshot_locked(&self, state: &State) -> Result<Snapshot, StoreError> {
        self.check_available(state)?;
        let doc = state.document.as_ref().ok_or_else(|| StoreError::NotFound {
            resource: self.resource.clone(),
        })?;
        Ok(Snapshot {
            table: doc.decode()?,
            token: state.token(),
        })
    }
}

impl SharedResourceClient for MemoryTableStore {
    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let state = self.lock();
        self.snapshot_locked(&state)
    }

    fn bootstrap(&self) -> Result<Snapshot, StoreError> {
        let mut state = self.lock();
        self.check_available(&state)?;
        if state.document.is_none() {
            debug!(resource = %self.resource, "creating empty shared table");
            state.document = Some(TableDocument::empty(&self.resource));
            state.revision += 1;
        }
        self.snapshot_locked(&state)
    }

    fn conditional_write(
        &self,
        table: &SharedTable,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, StoreError> {
        let mut state = self.lock();
        self.check_available(&state)?;
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            state.revision += 1;
            return Err(StoreError::Conflict {
                resource: self.resource.clone(),
            });
        }
        let doc = state.document.as_ref().ok_or_else(|| StoreError::NotFound {
            resource: self.resource.clone(),
        })?;
        if *token != state.token() {
            return Err(StoreError::Conflict {
                resource: self.resource.clone(),
            });
        }
        let stored = doc.decode().map_or(Generation::ZERO, |t| t.generation);
        check_generation(stored, table.generation)?;

        let updated = doc.encode(table)?;
        state.document = Some(updated);
        state.revision += 1;
        state.writes += 1;
        debug!(resource = %self.resource, generation = %table.generation, "shared table written");
        Ok(state.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryKind, MappingEntry};

    fn next(snapshot: &Snapshot) -> SharedTable {
        let mut t = snapshot.table.clone();
        t.generation = t.generation.next().unwrap();
        t.upsert(
            EntryKind::Role,
            MappingEntry::new("arn:aws:iam::1:role/a", "a", &[]),
        );
        t
    }

    #[test]
    fn snapshot_before_bootstrap_is_not_found() {
        let store = MemoryTableStore::default();
        assert!(matches!(store.snapshot(), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let store = MemoryTableStore::default();
        let first = store.bootstrap().unwrap();
        let second = store.bootstrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.table.generation, Generation::ZERO);
        assert!(store.snapshot_or_bootstrap().is_ok());
    }

    #[test]
    fn write_with_current_token_succeeds() {
        let store = MemoryTableStore::default();
        let snap = store.bootstrap().unwrap();
        let token = store.conditional_write(&next(&snap), &snap.token).unwrap();
        assert_ne!(token, snap.token);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.table().unwrap().generation, Generation::new(1));
        assert!(store.document().unwrap().is_managed());
    }

    #[test]
    fn stale_token_is_rejected_without_change() {
        let store = MemoryTableStore::default();
        let snap = store.bootstrap().unwrap();
        store.conditional_write(&next(&snap), &snap.token).unwrap();
        let before = store.document();
        let err = store.conditional_write(&next(&snap), &snap.token).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.document(), before);
    }

    #[test]
    fn generation_must_advance() {
        let store = MemoryTableStore::default();
        let snap = store.bootstrap().unwrap();
        let err = store.conditional_write(&snap.table, &snap.token).unwrap_err();
        assert!(matches!(err, StoreError::GenerationRegression { .. }));
    }

    #[test]
    fn injected_conflicts_invalidate_tokens() {
        let store = MemoryTableStore::default();
        let snap = store.bootstrap().unwrap();
        store.inject_conflicts(1);
        assert!(matches!(
            store.conditional_write(&next(&snap), &snap.token),
            Err(StoreError::Conflict { .. })
        ));
        let fresh = store.snapshot().unwrap();
        assert!(store.conditional_write(&next(&fresh), &fresh.token).is_ok());
    }

    #[test]
    fn out_of_band_edit_bumps_token() {
        let store = MemoryTableStore::default();
        let snap = store.bootstrap().unwrap();
        store
            .edit(|t| {
                t.upsert(EntryKind::User, MappingEntry::new("arn:aws:iam::1:user/u", "u", &[]));
            })
            .unwrap();
        assert_ne!(store.snapshot().unwrap().token, snap.token);
        assert_eq!(store.table().unwrap().users.len(), 1);
    }

    #[test]
    fn unavailable_fails_everything() {
        let store = MemoryTableStore::default();
        store.set_unavailable(Some("api down"));
        let err = store.bootstrap().unwrap_err();
        assert!(err.is_transient());
        store.set_unavailable(None);
        assert!(store.bootstrap().is_ok());
    }

    #[test]
    fn corrupt_document_fails_snapshot() {
        let mut doc = TableDocument::empty(&TableRef::default());
        doc.data.insert("mapRoles".into(), "{broken".into());
        let store = MemoryTableStore::with_document(doc);
        assert!(matches!(
            store.snapshot(),
            Err(StoreError::Serialization { .. })
        ));
    }
}
