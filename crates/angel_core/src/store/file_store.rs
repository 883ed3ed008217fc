//! Lock-serialized JSON document store.
//!
//! # Responsibility
//! - Map document names to `<root>/<name>.json` files.
//! - Provide whole-document read, replace, and locked read-modify-write.
//! - Track per-collection id high-water marks in the `_sequences` document.
//!
//! # Invariants
//! - Each document has a sidecar `.<name>.lock` file; holding its exclusive
//!   lock is required for any write to the document.
//! - Writes go to a staging file, are synced, then renamed over the target.
//! - A missing document reads as `T::default()`.
//! - Lock order is always collection document before `_sequences`.

use super::{StoreError, StoreResult};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

const DOCUMENT_EXTENSION: &str = "json";
const SEQUENCES_DOCUMENT: &str = "_sequences";

/// Result of a locked mutation; decides whether the document is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<R> {
    Changed(R),
    Unchanged(R),
}

/// Directory-backed JSON document store.
///
/// Cloning is cheap; clones share the same directory and therefore the same
/// on-disk locks.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a document directory.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| {
            error!(
                "event=store_open module=store status=error error_code=store_io_failed root={} error={}",
                root.display(),
                source
            );
            StoreError::Io {
                document: root.display().to_string(),
                source,
            }
        })?;
        debug!("event=store_open module=store status=ok root={}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the JSON file backing `name`.
    pub fn document_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{DOCUMENT_EXTENSION}"))
    }

    /// Reads a whole document. Missing or blank documents read as default.
    pub fn read<T>(&self, name: &str) -> StoreResult<T>
    where
        T: DeserializeOwned + Default,
    {
        validate_name(name)?;
        let path = self.document_path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(source) => {
                let err = StoreError::Io {
                    document: name.to_string(),
                    source,
                };
                log_failure("read", name, None, &err);
                return Err(err);
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        serde_json::from_slice(&bytes).map_err(|source| {
            let err = StoreError::Corrupt {
                document: name.to_string(),
                source,
            };
            log_failure("read", name, None, &err);
            err
        })
    }

    /// Replaces a whole document under its exclusive lock.
    pub fn write<T>(&self, name: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize,
    {
        validate_name(name)?;
        let started_at = Instant::now();
        let result = self
            .lock(name)
            .and_then(|_guard| self.replace(name, value));
        match &result {
            Ok(()) => log_success("write", name, started_at),
            Err(err) => log_failure("write", name, Some(started_at), err),
        }
        result
    }

    /// Runs `mutate` against the current document while holding its lock.
    ///
    /// The document is rewritten only when `mutate` returns
    /// [`Outcome::Changed`]. Errors from `mutate` abort without writing.
    pub fn update<T, R, E, F>(&self, name: &str, mutate: F) -> Result<R, E>
    where
        T: DeserializeOwned + Serialize + Default,
        E: From<StoreError>,
        F: FnOnce(&mut T) -> Result<Outcome<R>, E>,
    {
        validate_name(name)?;
        let started_at = Instant::now();
        let _guard = self.lock(name).inspect_err(|err| {
            log_failure("update", name, Some(started_at), err);
        })?;

        let mut document: T = self.read(name)?;
        match mutate(&mut document)? {
            Outcome::Changed(result) => {
                self.replace(name, &document).inspect_err(|err| {
                    log_failure("update", name, Some(started_at), err);
                })?;
                log_success("update", name, started_at);
                Ok(result)
            }
            Outcome::Unchanged(result) => Ok(result),
        }
    }

    /// Allocates the next id for `collection`.
    ///
    /// The returned id is strictly greater than both `floor` and every id
    /// previously allocated for the collection, so ids of deleted records are
    /// never handed out again. Callers must hold the collection lock.
    pub fn next_sequence(&self, collection: &str, floor: i64) -> StoreResult<i64> {
        self.update(
            SEQUENCES_DOCUMENT,
            |sequences: &mut BTreeMap<String, i64>| -> StoreResult<Outcome<i64>> {
                let last = sequences
                    .get(collection)
                    .copied()
                    .unwrap_or(0)
                    .max(floor);
                let next = last + 1;
                sequences.insert(collection.to_string(), next);
                Ok(Outcome::Changed(next))
            },
        )
    }

    fn lock(&self, name: &str) -> StoreResult<DocumentLock> {
        let path = self.root.join(format!(".{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Lock {
                document: name.to_string(),
                source,
            })?;
        file.lock().map_err(|source| StoreError::Lock {
            document: name.to_string(),
            source,
        })?;
        Ok(DocumentLock { file })
    }

    fn replace<T>(&self, name: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize,
    {
        let io_err = |source: std::io::Error| StoreError::Io {
            document: name.to_string(),
            source,
        };
        let target = self.document_path(name);
        let staging = self.root.join(format!(".{name}.{DOCUMENT_EXTENSION}.tmp"));

        let mut writer = BufWriter::new(File::create(&staging).map_err(io_err)?);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|source| {
            StoreError::Encode {
                document: name.to_string(),
                source,
            }
        })?;
        writer.write_all(b"\n").map_err(io_err)?;
        let file = writer
            .into_inner()
            .map_err(|err| io_err(err.into_error()))?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&staging, &target).map_err(io_err)?;
        Ok(())
    }
}

struct DocumentLock {
    file: File,
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn log_success(op: &str, name: &str, started_at: Instant) {
    debug!(
        "event=store_{op} module=store status=ok document={name} duration_ms={}",
        started_at.elapsed().as_millis()
    );
}

fn log_failure(op: &str, name: &str, started_at: Option<Instant>, err: &StoreError) {
    error!(
        "event=store_{op} module=store status=error document={name} duration_ms={} error_code={} error={err}",
        started_at.map_or(0, |at| at.elapsed().as_millis()),
        err.code()
    );
}

#[cfg(test)]
mod tests {
    use super::{validate_name, FileStore, Outcome};
    use crate::store::StoreError;
    use serde_json::{json, Value};

    #[test]
    fn missing_document_reads_as_empty_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let records: Vec<Value> = store.read("products").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn write_replaces_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store
            .write("ads", &vec![json!({"id": 1}), json!({"id": 2})])
            .unwrap();
        store.write("ads", &vec![json!({"id": 3})]).unwrap();

        let records: Vec<Value> = store.read("ads").unwrap();
        assert_eq!(records, vec![json!({"id": 3})]);
        assert!(!dir.path().join(".ads.json.tmp").exists());
    }

    #[test]
    fn unchanged_outcome_skips_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let touched = store
            .update("ratings", |_: &mut Vec<Value>| -> Result<_, StoreError> {
                Ok(Outcome::Unchanged(false))
            })
            .unwrap();
        assert!(!touched);
        assert!(!store.document_path("ratings").exists());
    }

    #[test]
    fn corrupt_document_is_reported_not_masked() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        std::fs::write(store.document_path("orders"), b"[{broken").unwrap();
        let err = store.read::<Vec<Value>>("orders").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn sequence_never_goes_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.next_sequence("products", 0).unwrap(), 1);
        assert_eq!(store.next_sequence("products", 0).unwrap(), 2);
        assert_eq!(store.next_sequence("products", 7).unwrap(), 8);
        assert_eq!(store.next_sequence("products", 3).unwrap(), 9);
        assert_eq!(store.next_sequence("ads", 0).unwrap(), 1);
    }

    #[test]
    fn document_names_are_restricted() {
        assert!(validate_name("products").is_ok());
        assert!(validate_name("_sequences").is_ok());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("Products").is_err());
    }
}
