//! File-backed shared table.
//!
//! The document lives in a single JSON file. The concurrency token is the
//! SHA-256 of the file bytes, so any rewrite by any process invalidates
//! tokens handed out earlier. Writes go through a temp file in the same
//! directory, are fsynced, then renamed over the target; a crash leaves
//! either the old or the new document, never a torn one.
//!
//! Writers hold an exclusive advisory lock on `<file>.lock` from the token
//! check through the rename, so two processes sharing a state directory
//! cannot both pass the check. Readers take no lock; the rename makes every
//! read see a whole document.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use super::{
    ConcurrencyToken, SharedResourceClient, Snapshot, StoreError, TableDocument, TableRef,
    check_generation,
};
use crate::model::SharedTable;
use crate::version::hex;

/// Shared table stored as a JSON document on disk.
#[derive(Debug)]
pub struct FileTableStore {
    path: PathBuf,
    resource: TableRef,
}

impl FileTableStore {
    /// A store backed by `path`. Nothing is read or created yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, resource: TableRef) -> Self {
        Self {
            path: path.into(),
            resource,
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored document as-is, including foreign keys and annotations.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if the file is missing,
    /// [`StoreError::Serialization`] if it is not a document.
    pub fn document(&self) -> Result<TableDocument, StoreError> {
        self.read_document().map(|(doc, _)| doc)
    }

    fn read_raw(&self) -> Result<Vec<u8>, StoreError> {
        fs::read(&self.path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound {
                    resource: self.resource.clone(),
                }
            } else {
                StoreError::Io(e)
            }
        })
    }

    fn parse(&self, bytes: &[u8]) -> Result<TableDocument, StoreError> {
        let text = std::str::from_utf8(bytes).map_err(|e| StoreError::Serialization {
            resource: self.resource.clone(),
            detail: e.to_string(),
        })?;
        TableDocument::from_json(&self.resource, text)
    }

    fn read_document(&self) -> Result<(TableDocument, ConcurrencyToken), StoreError> {
        let bytes = self.read_raw()?;
        let token = token_of(&bytes);
        Ok((self.parse(&bytes)?, token))
    }
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

/// Exclusive advisory lock on the sibling `<target>.lock` file.
///
/// Released when dropped. The lock file itself is never removed.
#[derive(Debug)]
pub struct FileLock {
    file: fs::File,
}

impl FileLock {
    /// Block until the lock for `target` is held.
    ///
    /// # Errors
    /// I/O failures creating or locking the lock file.
    pub fn acquire(target: &Path) -> io::Result<Self> {
        let path = lock_path(target);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "releasing file lock failed");
        }
    }
}

/// `aws-auth.json` -> `aws-auth.json.lock`.
#[must_use]
pub fn lock_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn token_of(bytes: &[u8]) -> ConcurrencyToken {
    ConcurrencyToken::new(hex(&Sha256::digest(bytes)))
}

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// fsync, rename.
///
/// With `replace = false` the rename fails with
/// [`io::ErrorKind::AlreadyExists`] if `path` exists.
///
/// # Errors
/// Any I/O failure. The target is untouched on error.
pub fn write_atomic(path: &Path, bytes: &[u8], replace: bool) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    crate::fp!("FP_FILE_BEFORE_RENAME").map_err(io::Error::other)?;
    let persisted = if replace {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    persisted.map_err(|e| e.error)?;
    Ok(())
}

impl SharedResourceClient for FileTableStore {
    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let (doc, token) = self.read_document()?;
        Ok(Snapshot {
            table: doc.decode()?,
            token,
        })
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn bootstrap(&self) -> Result<Snapshot, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        if !self.path.exists() {
            let doc = TableDocument::empty(&self.resource);
            match write_atomic(&self.path, doc.to_json()?.as_bytes(), false) {
                Ok(()) => debug!("created empty shared table"),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.snapshot()
    }

    #[instrument(skip_all, fields(path = %self.path.display(), generation = %table.generation))]
    fn conditional_write(
        &self,
        table: &SharedTable,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let (doc, current) = self.read_document()?;
        if current != *token {
            debug!("stale token");
            return Err(StoreError::Conflict {
                resource: self.resource.clone(),
            });
        }
        let stored = doc
            .decode()
            .map_or(crate::version::Generation::ZERO, |t| t.generation);
        check_generation(stored, table.generation)?;

        let json = doc.encode(table)?.to_json()?;
        write_atomic(&self.path, json.as_bytes(), true)?;
        Ok(token_of(json.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryKind, MappingEntry};
    use crate::version::Generation;

    fn store(dir: &tempfile::TempDir) -> FileTableStore {
        FileTableStore::new(dir.path().join("aws-auth.json"), TableRef::default())
    }

    fn next(snapshot: &Snapshot) -> SharedTable {
        let mut t = snapshot.table.clone();
        t.generation = t.generation.next().unwrap();
        t.upsert(
            EntryKind::User,
            MappingEntry::new("arn:aws:iam::1:user/u", "u", &["g"]),
        );
        t
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            store(&dir).snapshot(),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn bootstrap_creates_empty_document_once() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let first = s.bootstrap().unwrap();
        assert_eq!(first.table.generation, Generation::ZERO);
        assert!(first.table.is_empty());
        let second = s.bootstrap().unwrap();
        assert_eq!(first.token, second.token);
    }

    #[test]
    fn bootstrap_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let snap = s.bootstrap().unwrap();
        s.conditional_write(&next(&snap), &snap.token).unwrap();
        let again = s.bootstrap().unwrap();
        assert_eq!(again.table.users.len(), 1);
    }

    #[test]
    fn conditional_write_roundtrips_and_returns_new_token() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let snap = s.bootstrap().unwrap();
        let table = next(&snap);
        let token = s.conditional_write(&table, &snap.token).unwrap();
        let read = s.snapshot().unwrap();
        assert_eq!(read.token, token);
        assert_eq!(read.table, table);
    }

    #[test]
    fn external_rewrite_invalidates_token() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let snap = s.bootstrap().unwrap();
        let mut doc: TableDocument =
            serde_json::from_slice(&fs::read(s.path()).unwrap()).unwrap();
        doc.metadata.annotations.insert("touched".into(), "yes".into());
        fs::write(s.path(), serde_json::to_vec(&doc).unwrap()).unwrap();

        let err = s.conditional_write(&next(&snap), &snap.token).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn separate_instances_on_one_path_lose_no_writes() {
        const WRITERS: usize = 2;
        const PER_WRITER: usize = 40;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aws-auth.json");
        FileTableStore::new(&path, TableRef::default())
            .bootstrap()
            .unwrap();
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(WRITERS));

        // One store instance per thread, as two processes would have.
        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let store = FileTableStore::new(&path, TableRef::default());
                let barrier = std::sync::Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let mut accepted = 0;
                    for i in 0..PER_WRITER {
                        loop {
                            let snap = store.snapshot().unwrap();
                            let mut t = snap.table.clone();
                            t.generation = t.generation.next().unwrap();
                            t.upsert(
                                EntryKind::Role,
                                MappingEntry::new(&format!("arn:aws:iam::1:role/w{w}-{i}"), "r", &[]),
                            );
                            match store.conditional_write(&t, &snap.token) {
                                Ok(_) => break,
                                Err(StoreError::Conflict { .. }) => {}
                                Err(e) => panic!("unexpected store error: {e}"),
                            }
                        }
                        accepted += 1;
                    }
                    accepted
                })
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        let table = FileTableStore::new(&path, TableRef::default())
            .snapshot()
            .unwrap()
            .table;
        assert_eq!(accepted, WRITERS * PER_WRITER);
        assert_eq!(table.roles.len(), accepted);
        assert_eq!(table.generation, Generation::new(u64::try_from(accepted).unwrap()));
    }

    #[test]
    fn lock_file_sits_next_to_target() {
        assert_eq!(
            lock_path(Path::new("/state/aws-auth.json")),
            PathBuf::from("/state/aws-auth.json.lock")
        );
    }

    #[test]
    fn corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        fs::write(s.path(), b"not json").unwrap();
        assert!(matches!(
            s.snapshot(),
            Err(StoreError::Serialization { .. })
        ));
    }

    #[test]
    fn write_atomic_noclobber_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        write_atomic(&path, b"one", false).unwrap();
        let err = write_atomic(&path, b"two", false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        write_atomic(&path, b"three", true).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"three");
    }
}
