use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{DatasetDescriptor, TransformVariant};
use crate::error::EtlError;
use crate::fetch::ClearPolicy;
use crate::pipeline::ExecutionMode;
use crate::registry::DatasetRegistry;
use crate::source::HttpSettings;

pub const DEFAULT_CONFIG_FILE: &str = "crime-etl.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub execution: Option<ExecutionMode>,
    #[serde(default)]
    pub fetch: Option<FetchConfig>,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub clear_policy: Option<ClearPolicy>,
}

/// Either the name of a built-in table or a full entry.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DatasetEntry {
    Shorthand(String),
    Detailed(DatasetEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatasetEntryObject {
    pub url: String,
    pub table_name: String,
    #[serde(default)]
    pub variant: Option<TransformVariant>,
    #[serde(default)]
    pub staging_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub execution: ExecutionMode,
    pub http: HttpSettings,
    pub clear_policy: ClearPolicy,
    pub registry: DatasetRegistry,
}

impl ResolvedConfig {
    pub fn staging_dir(&self) -> Utf8PathBuf {
        self.data_dir.join("staging")
    }

    pub fn tables_dir(&self) -> Utf8PathBuf {
        self.data_dir.join("tables")
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `crime-etl.json` in the working directory. Without an
    /// explicit path a missing file means built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, EtlError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| EtlError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| EtlError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, EtlError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(EtlError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let data_dir = match config.data_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let fetch = config.fetch.unwrap_or_default();
        let defaults = HttpSettings::default();
        let http = HttpSettings {
            timeout_secs: fetch.timeout_secs.unwrap_or(defaults.timeout_secs),
            max_retries: fetch.max_retries.unwrap_or(defaults.max_retries),
            retry_delay_ms: defaults.retry_delay_ms,
        };

        let registry = if config.datasets.is_empty() {
            DatasetRegistry::builtin()
        } else {
            let datasets = config
                .datasets
                .into_iter()
                .map(resolve_entry)
                .collect::<Result<Vec<_>, EtlError>>()?;
            DatasetRegistry::new(datasets)?
        };

        Ok(ResolvedConfig {
            schema_version,
            data_dir,
            execution: config.execution.unwrap_or_default(),
            http,
            clear_policy: fetch.clear_policy.unwrap_or_default(),
            registry,
        })
    }
}

fn resolve_entry(entry: DatasetEntry) -> Result<DatasetDescriptor, EtlError> {
    match entry {
        DatasetEntry::Shorthand(table) => DatasetRegistry::builtin_for_table(&table)
            .ok_or_else(|| EtlError::InvalidDataset(format!("no built-in dataset named {table}"))),
        DatasetEntry::Detailed(obj) => {
            let variant = obj
                .variant
                .or_else(|| TransformVariant::infer_from_table(&obj.table_name))
                .ok_or_else(|| {
                    EtlError::InvalidDataset(format!(
                        "{}: variant is required for tables without a known layout",
                        obj.table_name
                    ))
                })?;
            let descriptor = DatasetDescriptor::new(obj.url, obj.table_name, variant)?;
            match obj.staging_key {
                Some(key) => descriptor.with_staging_key(key),
                None => Ok(descriptor),
            }
        }
    }
}

/// Platform data directory, or `.crime-etl` under the working directory when
/// none can be resolved.
pub fn default_data_dir() -> Result<Utf8PathBuf, EtlError> {
    if let Some(dir) = BaseDirs::new().and_then(|dirs| {
        Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("crime-stats-etl")).ok()
    }) {
        return Ok(dir);
    }
    let cwd = std::env::current_dir().map_err(|err| EtlError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd.join(".crime-etl"))
        .map_err(|_| EtlError::Filesystem("invalid data directory path".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_builtin_registry() {
        let config = Config {
            data_dir: Some("/tmp/crime-etl".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.registry, DatasetRegistry::builtin());
        assert_eq!(resolved.clear_policy, ClearPolicy::AfterParse);
        assert_eq!(resolved.execution, ExecutionMode::Serial);
        assert_eq!(resolved.staging_dir(), Utf8PathBuf::from("/tmp/crime-etl/staging"));
    }
}
