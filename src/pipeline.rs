use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use clap::ValueEnum;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ResolvedConfig;
use crate::domain::{DatasetDescriptor, TransformVariant};
use crate::error::EtlError;
use crate::fetch::{ClearPolicy, FetchStage};
use crate::gate::StageResult;
use crate::registry::DatasetRegistry;
use crate::source::{HttpSourceClient, SourceClient};
use crate::staging::{FileStagingStore, StagingStore};
use crate::transform::TransformStage;
use crate::warehouse::{FileWarehouse, RelationalStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Serial,
    Parallel,
}

/// Progress of one dataset run. Each transition consumes one stage flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "ok", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Fetched(bool),
    Transformed(bool),
    Done,
}

impl RunState {
    pub fn next(self, result: StageResult) -> RunState {
        match self {
            RunState::Pending => RunState::Fetched(result.succeeded()),
            RunState::Fetched(_) => RunState::Transformed(result.succeeded()),
            RunState::Transformed(_) | RunState::Done => RunState::Done,
        }
    }

    pub fn finish(self) -> RunState {
        match self {
            RunState::Transformed(_) => RunState::Done,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub staging_key: String,
    pub target_table: String,
    pub variant: TransformVariant,
    pub fetched: bool,
    pub transformed: bool,
    pub state: RunState,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.fetched && self.transformed
    }
}

/// One mutex per staging key, created on first use.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn for_key(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }
}

pub struct Pipeline {
    source: Arc<dyn SourceClient>,
    staging: Arc<dyn StagingStore>,
    warehouse: Arc<dyn RelationalStore>,
    clear_policy: ClearPolicy,
    locks: KeyLocks,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn SourceClient>,
        staging: Arc<dyn StagingStore>,
        warehouse: Arc<dyn RelationalStore>,
        clear_policy: ClearPolicy,
    ) -> Self {
        Self {
            source,
            staging,
            warehouse,
            clear_policy,
            locks: KeyLocks::default(),
        }
    }

    /// HTTP source plus file-backed stores under the configured data directory.
    pub fn open(config: &ResolvedConfig) -> Result<Self, EtlError> {
        let source = HttpSourceClient::new(config.http)?;
        let staging = FileStagingStore::open(config.staging_dir())?;
        let warehouse = FileWarehouse::open(config.tables_dir())?;
        info!(data_dir = %config.data_dir, clear_policy = %config.clear_policy, "opened stores");
        Ok(Self::new(
            Arc::new(source),
            Arc::new(staging),
            Arc::new(warehouse),
            config.clear_policy,
        ))
    }

    pub fn warehouse(&self) -> &dyn RelationalStore {
        self.warehouse.as_ref()
    }

    pub fn staging(&self) -> &dyn StagingStore {
        self.staging.as_ref()
    }

    /// Fetch then Transform for one dataset. Never fails: the outcome is in the
    /// report flags and the detail is in the log.
    pub fn run_dataset(&self, descriptor: &DatasetDescriptor) -> RunReport {
        let started = Instant::now();
        let key = descriptor.staging_key();

        let lock = self.locks.for_key(key);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut state = RunState::Pending;

        let fetched = FetchStage::new(self.source.as_ref(), self.staging.as_ref(), self.clear_policy)
            .run(descriptor);
        state = state.next(fetched);
        debug!(staging_key = key, ?state, "state transition");

        let transformed =
            TransformStage::new(self.staging.as_ref(), self.warehouse.as_ref()).run(descriptor, fetched);
        state = state.next(transformed);
        debug!(staging_key = key, ?state, "state transition");

        state = state.finish();
        let report = RunReport {
            staging_key: key.to_string(),
            target_table: descriptor.target_table().to_string(),
            variant: descriptor.variant(),
            fetched: fetched.succeeded(),
            transformed: transformed.succeeded(),
            state,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            staging_key = key,
            fetched = report.fetched,
            transformed = report.transformed,
            elapsed_ms = report.elapsed_ms,
            "dataset run finished"
        );
        report
    }

    /// Runs every dataset in the registry. Reports come back in registry order
    /// in both modes.
    pub fn run_all(&self, registry: &DatasetRegistry, mode: ExecutionMode) -> Vec<RunReport> {
        info!(datasets = registry.len(), ?mode, "starting pipeline");
        match mode {
            ExecutionMode::Serial => registry
                .iter()
                .map(|descriptor| self.run_dataset(descriptor))
                .collect(),
            ExecutionMode::Parallel => registry
                .as_slice()
                .par_iter()
                .map(|descriptor| self.run_dataset(descriptor))
                .collect(),
        }
    }

    pub fn close(self) -> Result<(), EtlError> {
        self.staging.close()?;
        self.warehouse.close()?;
        debug!("closed stores");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_walks_forward() {
        let state = RunState::Pending.next(StageResult::FAILURE);
        assert_eq!(state, RunState::Fetched(false));
        let state = state.next(StageResult::FAILURE);
        assert_eq!(state, RunState::Transformed(false));
        assert_eq!(state.finish(), RunState::Done);
        assert_eq!(RunState::Pending.finish(), RunState::Pending);
    }

    #[test]
    fn key_locks_are_shared_per_key() {
        let locks = KeyLocks::default();
        let a = locks.for_key("a");
        let again = locks.for_key("a");
        let b = locks.for_key("b");
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
