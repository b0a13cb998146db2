//! Runner-facing protocol: liveness and job claims.

use chrono::Utc;
use tracing::debug;

use super::Orchestrator;
use crate::broadcast::RunProjection;
use crate::error::{Error, Result};
use crate::io::store::{ClaimedJob, RunnerRecord};

fn require_runner_id(runner_id: &str) -> Result<&str> {
    let trimmed = runner_id.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("runner_id required".to_string()));
    }
    Ok(trimmed)
}

impl Orchestrator {
    pub fn heartbeat(&self, runner_id: &str) -> Result<RunnerRecord> {
        let runner_id = require_runner_id(runner_id)?;
        let record = self.store.record_heartbeat(runner_id)?;
        debug!(runner_id, "heartbeat");
        Ok(record)
    }

    /// Lease at most one job to `runner_id`.
    ///
    /// Returns an empty list when nothing is claimable.
    pub fn poll(&self, runner_id: &str) -> Result<Vec<ClaimedJob>> {
        let runner_id = require_runner_id(runner_id)?;
        let claimed = self
            .store
            .claim_next_job(runner_id, Utc::now(), self.settings.job_lease)?;
        Ok(claimed
            .into_iter()
            .inspect(|claim| {
                self.events.run_changed(RunProjection::brief(&claim.run));
            })
            .collect())
    }

    pub fn runners(&self) -> Result<Vec<RunnerRecord>> {
        Ok(self.store.list_runners()?)
    }
}
