use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::validate_identifier;
use crate::error::EtlError;
use crate::frame::Frame;
use crate::fs_util;

/// Table-oriented store holding the cleaned output. Writes replace a table
/// wholesale; there is no append or merge.
pub trait RelationalStore: Send + Sync {
    fn replace_table(&self, table: &str, frame: &Frame) -> Result<(), EtlError>;

    fn read_table(&self, table: &str) -> Result<Frame, EtlError>;

    fn list_tables(&self) -> Result<Vec<String>, EtlError>;

    fn close(&self) -> Result<(), EtlError> {
        Ok(())
    }
}

fn poisoned() -> EtlError {
    EtlError::Warehouse("table lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Mutex<BTreeMap<String, Frame>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelationalStore for MemoryWarehouse {
    fn replace_table(&self, table: &str, frame: &Frame) -> Result<(), EtlError> {
        self.tables
            .lock()
            .map_err(|_| poisoned())?
            .insert(table.to_string(), frame.clone());
        Ok(())
    }

    fn read_table(&self, table: &str) -> Result<Frame, EtlError> {
        self.tables
            .lock()
            .map_err(|_| poisoned())?
            .get(table)
            .cloned()
            .ok_or_else(|| EtlError::TableNotFound(table.to_string()))
    }

    fn list_tables(&self) -> Result<Vec<String>, EtlError> {
        Ok(self
            .tables
            .lock()
            .map_err(|_| poisoned())?
            .keys()
            .cloned()
            .collect())
    }
}

/// One JSON file per table. The file holds nothing but the frame, so two
/// identical writes leave identical bytes on disk.
#[derive(Debug)]
pub struct FileWarehouse {
    root: Utf8PathBuf,
}

impl FileWarehouse {
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, EtlError> {
        let root = root.into();
        fs_util::ensure_dir(&root).map_err(|err| EtlError::Warehouse(err.to_string()))?;
        debug!(root = %root, "opened table store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn table_path(&self, table: &str) -> Result<Utf8PathBuf, EtlError> {
        validate_identifier(table).map_err(|err| EtlError::Warehouse(err.to_string()))?;
        Ok(self.root.join(format!("{table}.json")))
    }
}

impl RelationalStore for FileWarehouse {
    fn replace_table(&self, table: &str, frame: &Frame) -> Result<(), EtlError> {
        let path = self.table_path(table)?;
        fs_util::write_json_atomic(&path, frame).map_err(|err| EtlError::Warehouse(err.to_string()))
    }

    fn read_table(&self, table: &str) -> Result<Frame, EtlError> {
        let path = self.table_path(table)?;
        fs_util::read_json(&path)
            .map_err(|err| EtlError::Warehouse(err.to_string()))?
            .ok_or_else(|| EtlError::TableNotFound(table.to_string()))
    }

    fn list_tables(&self) -> Result<Vec<String>, EtlError> {
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| EtlError::Warehouse(err.to_string()))?;
        let mut tables = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| EtlError::Warehouse(err.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(table) = name.strip_suffix(".json") {
                if validate_identifier(table).is_ok() {
                    tables.push(table.to_string());
                }
            }
        }
        tables.sort();
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::{RawRecord, Scalar};

    fn frame(count: i64) -> Frame {
        let record: RawRecord = [("year", Scalar::Integer(2021)), ("count", Scalar::Integer(count))]
            .into_iter()
            .collect();
        Frame::from_records(&[record])
    }

    fn exercise(store: &dyn RelationalStore) {
        assert_matches!(store.read_table("crime"), Err(EtlError::TableNotFound(_)));
        store.replace_table("crime", &frame(1)).unwrap();
        store.replace_table("crime", &frame(2)).unwrap();
        assert_eq!(store.read_table("crime").unwrap(), frame(2));
        assert_eq!(store.list_tables().unwrap(), vec!["crime".to_string()]);
    }

    #[test]
    fn memory_warehouse_replaces() {
        exercise(&MemoryWarehouse::new());
    }

    #[test]
    fn file_warehouse_replaces() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("tables")).unwrap();
        exercise(&FileWarehouse::open(root).unwrap());
    }
}
