use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EtlError;

/// Serializes `value` next to `path` and renames it into place, so readers see
/// either the previous document or the new one.
pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), EtlError> {
    let parent = path
        .parent()
        .ok_or_else(|| EtlError::Filesystem(format!("invalid destination path: {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| EtlError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".crime-etl")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    temp.write_all(&content)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    Ok(())
}

/// `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, EtlError> {
    let content = match fs::read(path.as_std_path()) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(EtlError::Filesystem(format!("read {path}: {err}"))),
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|err| EtlError::Filesystem(format!("parse {path}: {err}")))
}

pub fn remove_if_exists(path: &Utf8Path) -> Result<(), EtlError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(EtlError::Filesystem(format!("remove {path}: {err}"))),
    }
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), EtlError> {
    fs::create_dir_all(path.as_std_path()).map_err(|err| EtlError::Filesystem(err.to_string()))
}
