//! The boolean contract between pipeline stages.
//!
//! Stages work with `Result<_, EtlError>` internally and collapse the outcome
//! into a [`StageResult`] at their boundary. Only the flag travels to the next
//! stage; the error itself goes to the log.

use std::fmt;

use serde::Serialize;
use tracing::{error, warn};

use crate::error::{ErrorKind, EtlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Transform,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => write!(f, "fetch"),
            Stage::Transform => write!(f, "transform"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StageResult(bool);

impl StageResult {
    pub const SUCCESS: StageResult = StageResult(true);
    pub const FAILURE: StageResult = StageResult(false);

    pub fn succeeded(self) -> bool {
        self.0
    }

    /// Collapses a stage outcome into the flag, logging any error with the
    /// stage and key it happened in. Skips were already logged by [`gate`].
    pub fn from_outcome<T>(stage: Stage, key: &str, outcome: Result<T, EtlError>) -> Self {
        match outcome {
            Ok(_) => Self::SUCCESS,
            Err(err) if err.kind() == ErrorKind::UpstreamSkipped => Self::FAILURE,
            Err(err) => {
                error!(%stage, staging_key = key, kind = %err.kind(), error = %err, "stage failed");
                Self::FAILURE
            }
        }
    }
}

impl From<bool> for StageResult {
    fn from(value: bool) -> Self {
        StageResult(value)
    }
}

impl From<StageResult> for bool {
    fn from(value: StageResult) -> Self {
        value.0
    }
}

/// Lets a stage proceed only when its immediate predecessor succeeded.
pub fn gate(upstream: StageResult, stage: Stage, key: &str) -> Result<(), EtlError> {
    if upstream.succeeded() {
        return Ok(());
    }
    warn!(%stage, staging_key = key, "skipping since upstream stage failed");
    Err(EtlError::UpstreamSkipped)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn gate_blocks_on_failure() {
        assert!(gate(StageResult::SUCCESS, Stage::Transform, "k").is_ok());
        assert_matches!(
            gate(StageResult::FAILURE, Stage::Transform, "k"),
            Err(EtlError::UpstreamSkipped)
        );
    }

    #[test]
    fn outcomes_collapse_to_flags() {
        let ok: Result<usize, EtlError> = Ok(3);
        assert!(StageResult::from_outcome(Stage::Fetch, "k", ok).succeeded());

        let failed: Result<usize, EtlError> = Err(EtlError::JsonStat("bad".to_string()));
        assert!(!StageResult::from_outcome(Stage::Fetch, "k", failed).succeeded());

        let skipped: Result<(), EtlError> = Err(EtlError::UpstreamSkipped);
        assert_eq!(
            StageResult::from_outcome(Stage::Transform, "k", skipped),
            StageResult::FAILURE
        );
        assert!(bool::from(StageResult::from(true)));
    }
}
