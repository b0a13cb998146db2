use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::Orchestrator;
use crate::broadcast::RunProjection;
use crate::core::payload::Payload;
use crate::core::types::RunMode;
use crate::error::{Error, Result};
use crate::io::store::NewRunJob;

/// Ids of a freshly queued run and its job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enqueued {
    pub run_id: String,
    pub job_id: String,
}

impl Orchestrator {
    /// Queue a run and its job for the worker pool.
    ///
    /// The task is not looked up; callers that accept outside input go
    /// through [`Orchestrator::enqueue_for_task`].
    pub fn enqueue(
        &self,
        task_id: &str,
        workspace_id: &str,
        mode: RunMode,
        payload: Payload,
    ) -> Result<Enqueued> {
        self.dispatch(NewRunJob::new(task_id, workspace_id, mode, payload))
    }

    /// Queue a run for an existing task from a raw `{mode, payload}` body.
    pub fn enqueue_for_task(&self, task_id: &str, body: &Value) -> Result<Enqueued> {
        let task = self.require_task(task_id)?;
        let mode = body
            .get("mode")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<RunMode>().ok());
        let payload = body.get("payload").and_then(Value::as_object);
        let (Some(mode), Some(payload)) = (mode, payload) else {
            return Err(Error::Validation("mode and payload required".to_string()));
        };
        self.enqueue(&task.id, &task.workspace_id, mode, payload.clone())
    }

    /// Insert a prepared run/job pair and announce the run.
    pub(super) fn dispatch(&self, new: NewRunJob) -> Result<Enqueued> {
        let run = self.store.insert_run_and_job(&new)?;
        info!(
            task_id = %new.task_id,
            run_id = %new.run_id,
            job_id = %new.job_id,
            mode = %new.mode,
            "enqueued job"
        );
        self.events.run_changed(RunProjection::brief(&run));
        Ok(Enqueued {
            run_id: new.run_id,
            job_id: new.job_id,
        })
    }
}
