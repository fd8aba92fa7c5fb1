//! In-memory snippet store with fault injection for tests.

use std::sync::{Mutex, MutexGuard, PoisonError};

use authmap_core::model::{Snippet, SnippetId, SnippetSpec, SnippetStatus};

use super::{Records, SnippetStore, SnippetStoreError};

#[derive(Debug, Default)]
struct State {
    records: Records,
    failing_status_updates: u32,
    unavailable: Option<String>,
}

/// Snippet records kept in process memory.
#[derive(Debug, Default)]
pub struct MemorySnippetStore {
    state: Mutex<State>,
}

impl MemorySnippetStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> Result<MutexGuard<'_, State>, SnippetStoreError> {
        let state = self.lock();
        match &state.unavailable {
            Some(detail) => Err(SnippetStoreError::Unavailable {
                detail: detail.clone(),
            }),
            None => Ok(state),
        }
    }

    /// Insert or overwrite a whole record, bypassing lifecycle rules.
    pub fn insert(&self, snippet: Snippet) {
        self.lock().records.insert(snippet);
    }

    /// Make the next `n` status updates fail with
    /// [`SnippetStoreError::Unavailable`].
    pub fn fail_status_updates(&self, n: u32) {
        self.lock().failing_status_updates = n;
    }

    /// Make every call fail until cleared with `None`.
    pub fn set_unavailable(&self, detail: Option<&str>) {
        self.lock().unavailable = detail.map(str::to_owned);
    }
}

impl SnippetStore for MemorySnippetStore {
    fn get(&self, id: &SnippetId) -> Result<Option<Snippet>, SnippetStoreError> {
        Ok(self.available()?.records.get(id))
    }

    fn list(&self) -> Result<Vec<Snippet>, SnippetStoreError> {
        Ok(self.available()?.records.list())
    }

    fn upsert_spec(&self, id: &SnippetId, spec: SnippetSpec) -> Result<(), SnippetStoreError> {
        self.available()?.records.upsert_spec(id, spec)
    }

    fn mark_deleting(&self, id: &SnippetId) -> Result<(), SnippetStoreError> {
        self.available()?.records.mark_deleting(id);
        Ok(())
    }

    fn add_finalizer(&self, id: &SnippetId, name: &str) -> Result<(), SnippetStoreError> {
        self.available()?.records.add_finalizer(id, name)
    }

    fn remove_finalizer(&self, id: &SnippetId, name: &str) -> Result<(), SnippetStoreError> {
        self.available()?.records.remove_finalizer(id, name);
        Ok(())
    }

    fn update_status(
        &self,
        id: &SnippetId,
        status: SnippetStatus,
    ) -> Result<(), SnippetStoreError> {
        let mut state = self.available()?;
        if state.failing_status_updates > 0 {
            state.failing_status_updates -= 1;
            return Err(SnippetStoreError::Unavailable {
                detail: "injected status update failure".to_owned(),
            });
        }
        state.records.update_status(id, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> SnippetId {
        "ns/a".parse().unwrap()
    }

    #[test]
    fn injected_status_failures_are_counted() {
        let store = MemorySnippetStore::new();
        store.upsert_spec(&id(), SnippetSpec::default()).unwrap();
        store.fail_status_updates(1);
        assert!(store.update_status(&id(), SnippetStatus::default()).is_err());
        assert!(store.update_status(&id(), SnippetStatus::default()).is_ok());
    }

    #[test]
    fn unavailable_blocks_reads() {
        let store = MemorySnippetStore::new();
        store.set_unavailable(Some("down"));
        assert!(matches!(
            store.list(),
            Err(SnippetStoreError::Unavailable { .. })
        ));
        store.set_unavailable(None);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn mark_deleting_is_idempotent() {
        let store = MemorySnippetStore::new();
        store.upsert_spec(&id(), SnippetSpec::default()).unwrap();
        store.add_finalizer(&id(), "f").unwrap();
        store.mark_deleting(&id()).unwrap();
        store.mark_deleting(&id()).unwrap();
        assert!(store.get(&id()).unwrap().unwrap().is_deleting());
    }
}
