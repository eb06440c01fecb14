use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::DatasetDescriptor;
use crate::error::EtlError;
use crate::gate::{Stage, StageResult};
use crate::jsonstat::JsonStatDataset;
use crate::source::SourceClient;
use crate::staging::StagingStore;

/// When the staged set for a key is cleared relative to the remote request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ClearPolicy {
    /// Clear before the request; a failed request leaves the key empty.
    BeforeRequest,
    /// Swap in the new set only once a payload has been decoded; a failed
    /// request keeps the last good snapshot.
    #[default]
    AfterParse,
}

impl fmt::Display for ClearPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearPolicy::BeforeRequest => write!(f, "before-request"),
            ClearPolicy::AfterParse => write!(f, "after-parse"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub staging_key: String,
    pub label: Option<String>,
    pub records: usize,
}

pub struct FetchStage<'a> {
    source: &'a dyn SourceClient,
    staging: &'a dyn StagingStore,
    clear_policy: ClearPolicy,
}

impl<'a> FetchStage<'a> {
    pub fn new(
        source: &'a dyn SourceClient,
        staging: &'a dyn StagingStore,
        clear_policy: ClearPolicy,
    ) -> Self {
        Self {
            source,
            staging,
            clear_policy,
        }
    }

    pub fn run(&self, descriptor: &DatasetDescriptor) -> StageResult {
        StageResult::from_outcome(
            Stage::Fetch,
            descriptor.staging_key(),
            self.try_run(descriptor),
        )
    }

    pub fn try_run(&self, descriptor: &DatasetDescriptor) -> Result<FetchSummary, EtlError> {
        let key = descriptor.staging_key();
        info!(staging_key = key, url = descriptor.source_url(), "fetching records");

        if self.clear_policy == ClearPolicy::BeforeRequest {
            self.staging.clear(key)?;
        }

        let body = self.source.fetch_document(descriptor.source_url())?;
        let dataset = JsonStatDataset::from_slice(&body)?;
        let records = dataset.to_records();
        info!(staging_key = key, records = records.len(), "fetched records");

        let inserted = match self.clear_policy {
            ClearPolicy::BeforeRequest => self.staging.insert_many(key, records)?,
            ClearPolicy::AfterParse => self.staging.replace_all(key, records)?,
        };
        info!(staging_key = key, records = inserted, "stored records in staging");

        Ok(FetchSummary {
            staging_key: key.to_string(),
            label: dataset.label,
            records: inserted,
        })
    }
}
