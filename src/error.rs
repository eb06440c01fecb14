use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EtlError {
    #[error("source request failed: {0}")]
    SourceHttp(String),

    #[error("source returned status {status}: {message}")]
    SourceStatus { status: u16, message: String },

    #[error("invalid JSON-stat payload: {0}")]
    JsonStat(String),

    #[error("missing expected column: {0}")]
    MissingColumn(String),

    #[error("cannot derive {field} from {value:?}")]
    Derivation { field: String, value: String },

    #[error("staging store error: {0}")]
    Staging(String),

    #[error("table store error: {0}")]
    Warehouse(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("skipped because the upstream stage did not succeed")]
    UpstreamSkipped,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid dataset entry: {0}")]
    InvalidDataset(String),

    #[error("unknown transform variant: {0}")]
    UnknownVariant(String),

    #[error("dataset not registered: {0}")]
    DatasetNotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Coarse classification used when an error is logged at a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Fetch,
    Transform,
    Storage,
    UpstreamSkipped,
    Config,
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::SourceHttp(_) | EtlError::SourceStatus { .. } | EtlError::JsonStat(_) => {
                ErrorKind::Fetch
            }
            EtlError::MissingColumn(_)
            | EtlError::Derivation { .. }
            | EtlError::Warehouse(_)
            | EtlError::TableNotFound(_) => ErrorKind::Transform,
            EtlError::Staging(_) | EtlError::Filesystem(_) => ErrorKind::Storage,
            EtlError::UpstreamSkipped => ErrorKind::UpstreamSkipped,
            EtlError::ConfigRead(_)
            | EtlError::ConfigParse(_)
            | EtlError::InvalidDataset(_)
            | EtlError::UnknownVariant(_)
            | EtlError::DatasetNotFound(_) => ErrorKind::Config,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Fetch => write!(f, "fetch"),
            ErrorKind::Transform => write!(f, "transform"),
            ErrorKind::Storage => write!(f, "storage"),
            ErrorKind::UpstreamSkipped => write!(f, "upstream_skipped"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}
