use std::collections::HashMap;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{RawRecord, Scalar, validate_identifier};
use crate::error::EtlError;
use crate::fs_util;

/// Internal identifier the staging store attaches to every inserted record.
pub const STAGING_ID_COLUMN: &str = "_id";

/// Document-oriented holding area for freshly fetched records, keyed by
/// staging key. No schema is enforced.
pub trait StagingStore: Send + Sync {
    fn clear(&self, key: &str) -> Result<(), EtlError>;

    /// Appends `records`; returns how many were inserted.
    fn insert_many(&self, key: &str, records: Vec<RawRecord>) -> Result<usize, EtlError>;

    fn find_all(&self, key: &str) -> Result<Vec<RawRecord>, EtlError>;

    /// Clear followed by insert. Implementations that can swap the whole set
    /// at once should override this.
    fn replace_all(&self, key: &str, records: Vec<RawRecord>) -> Result<usize, EtlError> {
        self.clear(key)?;
        self.insert_many(key, records)
    }

    fn close(&self) -> Result<(), EtlError> {
        Ok(())
    }
}

fn assign_ids(key: &str, start: usize, records: Vec<RawRecord>) -> Vec<RawRecord> {
    records
        .into_iter()
        .enumerate()
        .map(|(offset, mut record)| {
            record.insert(
                STAGING_ID_COLUMN,
                Scalar::Text(format!("{key}:{}", start + offset)),
            );
            record
        })
        .collect()
}

fn poisoned() -> EtlError {
    EtlError::Staging("staging lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct MemoryStagingStore {
    collections: Mutex<HashMap<String, Vec<RawRecord>>>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StagingStore for MemoryStagingStore {
    fn clear(&self, key: &str) -> Result<(), EtlError> {
        self.collections.lock().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    fn insert_many(&self, key: &str, records: Vec<RawRecord>) -> Result<usize, EtlError> {
        let mut collections = self.collections.lock().map_err(|_| poisoned())?;
        let collection = collections.entry(key.to_string()).or_default();
        let inserted = records.len();
        let records = assign_ids(key, collection.len(), records);
        collection.extend(records);
        Ok(inserted)
    }

    fn find_all(&self, key: &str) -> Result<Vec<RawRecord>, EtlError> {
        let collections = self.collections.lock().map_err(|_| poisoned())?;
        Ok(collections.get(key).cloned().unwrap_or_default())
    }

    fn replace_all(&self, key: &str, records: Vec<RawRecord>) -> Result<usize, EtlError> {
        let inserted = records.len();
        let records = assign_ids(key, 0, records);
        self.collections
            .lock()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), records);
        Ok(inserted)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StagedCollection {
    key: String,
    updated_at: String,
    records: Vec<RawRecord>,
}

/// One JSON document per staging key under a root directory.
#[derive(Debug)]
pub struct FileStagingStore {
    root: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl FileStagingStore {
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, EtlError> {
        let root = root.into();
        fs_util::ensure_dir(&root).map_err(|err| EtlError::Staging(err.to_string()))?;
        debug!(root = %root, "opened staging store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn collection_path(&self, key: &str) -> Result<Utf8PathBuf, EtlError> {
        validate_identifier(key).map_err(|err| EtlError::Staging(err.to_string()))?;
        Ok(self.root.join(format!("{key}.json")))
    }

    fn load(&self, path: &Utf8Path) -> Result<Option<StagedCollection>, EtlError> {
        fs_util::read_json(path).map_err(|err| EtlError::Staging(err.to_string()))
    }

    fn store(&self, path: &Utf8Path, key: &str, records: Vec<RawRecord>) -> Result<(), EtlError> {
        let collection = StagedCollection {
            key: key.to_string(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            records,
        };
        fs_util::write_json_atomic(path, &collection)
            .map_err(|err| EtlError::Staging(err.to_string()))
    }
}

impl StagingStore for FileStagingStore {
    fn clear(&self, key: &str) -> Result<(), EtlError> {
        let path = self.collection_path(key)?;
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        fs_util::remove_if_exists(&path).map_err(|err| EtlError::Staging(err.to_string()))
    }

    fn insert_many(&self, key: &str, records: Vec<RawRecord>) -> Result<usize, EtlError> {
        let path = self.collection_path(key)?;
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let mut existing = self.load(&path)?.map(|c| c.records).unwrap_or_default();
        let inserted = records.len();
        let records = assign_ids(key, existing.len(), records);
        existing.extend(records);
        self.store(&path, key, existing)?;
        Ok(inserted)
    }

    fn find_all(&self, key: &str) -> Result<Vec<RawRecord>, EtlError> {
        let path = self.collection_path(key)?;
        Ok(self.load(&path)?.map(|c| c.records).unwrap_or_default())
    }

    /// Writes the new set to a temporary file and renames it over the old one.
    fn replace_all(&self, key: &str, records: Vec<RawRecord>) -> Result<usize, EtlError> {
        let path = self.collection_path(key)?;
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let inserted = records.len();
        self.store(&path, key, assign_ids(key, 0, records))?;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: i64) -> RawRecord {
        [("value", Scalar::Integer(value))].into_iter().collect()
    }

    fn exercise(store: &dyn StagingStore) {
        assert!(store.find_all("crime").unwrap().is_empty());

        assert_eq!(store.insert_many("crime", vec![record(1), record(2)]).unwrap(), 2);
        assert_eq!(store.insert_many("crime", vec![record(3)]).unwrap(), 1);
        let staged = store.find_all("crime").unwrap();
        assert_eq!(staged.len(), 3);
        assert_eq!(
            staged[2].get(STAGING_ID_COLUMN),
            Some(&Scalar::from("crime:2"))
        );

        assert_eq!(store.replace_all("crime", vec![record(9)]).unwrap(), 1);
        let staged = store.find_all("crime").unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].get("value"), Some(&Scalar::Integer(9)));

        store.clear("crime").unwrap();
        assert!(store.find_all("crime").unwrap().is_empty());
    }

    #[test]
    fn memory_store_semantics() {
        exercise(&MemoryStagingStore::new());
    }

    #[test]
    fn file_store_semantics() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("staging")).unwrap();
        let store = FileStagingStore::open(root).unwrap();
        exercise(&store);
        assert!(store.collection_path("../escape").is_err());
    }

    #[test]
    fn keys_are_isolated() {
        let store = MemoryStagingStore::new();
        store.insert_many("a", vec![record(1)]).unwrap();
        store.insert_many("b", vec![record(2)]).unwrap();
        store.clear("a").unwrap();
        assert_eq!(store.find_all("b").unwrap().len(), 1);
    }
}
