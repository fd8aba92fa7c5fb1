//! Snippet records in one JSON file.
//!
//! Every mutation takes the `<file>.lock` advisory lock, reads the file,
//! applies the change and rewrites it atomically, so processes sharing the
//! file never overwrite each other's records. A missing file is an empty
//! store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use authmap_core::model::{Snippet, SnippetId, SnippetSpec, SnippetStatus};
use authmap_core::store::file::{FileLock, write_atomic};

use super::{Records, SnippetStore, SnippetStoreError};

/// File-backed snippet store.
#[derive(Debug)]
pub struct FileSnippetStore {
    path: PathBuf,
}

impl FileSnippetStore {
    /// A store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Records, SnippetStoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Records::default()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Records::default());
        }
        let list: Vec<Snippet> =
            serde_json::from_str(&text).map_err(|e| SnippetStoreError::Corrupt {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        Ok(Records::from_list(list))
    }

    fn save(&self, records: &Records) -> Result<(), SnippetStoreError> {
        let json =
            serde_json::to_string_pretty(&records.list()).map_err(|e| SnippetStoreError::Corrupt {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        write_atomic(&self.path, json.as_bytes(), true)?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Records) -> T) -> Result<T, SnippetStoreError> {
        Ok(f(&self.load()?))
    }

    fn modify(
        &self,
        f: impl FnOnce(&mut Records) -> Result<(), SnippetStoreError>,
    ) -> Result<(), SnippetStoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut records = self.load()?;
        let before = records.clone();
        f(&mut records)?;
        if records != before {
            self.save(&records)?;
        }
        Ok(())
    }
}

impl SnippetStore for FileSnippetStore {
    fn get(&self, id: &SnippetId) -> Result<Option<Snippet>, SnippetStoreError> {
        self.read(|r| r.get(id))
    }

    fn list(&self) -> Result<Vec<Snippet>, SnippetStoreError> {
        self.read(Records::list)
    }

    fn upsert_spec(&self, id: &SnippetId, spec: SnippetSpec) -> Result<(), SnippetStoreError> {
        self.modify(|r| r.upsert_spec(id, spec))
    }

    fn mark_deleting(&self, id: &SnippetId) -> Result<(), SnippetStoreError> {
        self.modify(|r| {
            r.mark_deleting(id);
            Ok(())
        })
    }

    fn add_finalizer(&self, id: &SnippetId, name: &str) -> Result<(), SnippetStoreError> {
        self.modify(|r| r.add_finalizer(id, name))
    }

    fn remove_finalizer(&self, id: &SnippetId, name: &str) -> Result<(), SnippetStoreError> {
        self.modify(|r| {
            r.remove_finalizer(id, name);
            Ok(())
        })
    }

    fn update_status(
        &self,
        id: &SnippetId,
        status: SnippetStatus,
    ) -> Result<(), SnippetStoreError> {
        self.modify(|r| r.update_status(id, status))
    }
}
