use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::Orchestrator;
use crate::broadcast::{RunProjection, TaskStatusChanged};
use crate::core::report::validate_report;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAccepted {
    pub task_id: String,
}

impl Orchestrator {
    /// Record a runner's terminal report for one run.
    ///
    /// The body is validated in full before the store is touched. On success
    /// the task notification (if the task moved) goes out before the run
    /// notification.
    pub fn apply_report(&self, body: &Value) -> Result<ReportAccepted> {
        let report = validate_report(body).map_err(Error::Validation)?;

        let finalized = match self.store.finalize_run(&report) {
            Ok(finalized) => finalized,
            Err(err) => {
                warn!(run_id = %report.run_id, error = %err, "report rejected");
                return Err(err.into());
            }
        };
        info!(
            run_id = %finalized.run.id,
            task_id = %finalized.run.task_id,
            status = %finalized.run.status,
            error_kind = %finalized.run.error_kind,
            artifacts = report.artifacts.len(),
            "run finished"
        );

        if let Some(update) = &finalized.task_update {
            self.events.task_changed(TaskStatusChanged::from(update));
        }
        self.events
            .run_changed(RunProjection::finished(&finalized.run));

        Ok(ReportAccepted {
            task_id: finalized.run.task_id,
        })
    }
}
