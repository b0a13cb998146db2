//! Operator actions on a task.

use serde::Serialize;
use tracing::info;

use super::{Enqueued, Orchestrator};
use crate::broadcast::TaskStatusChanged;
use crate::core::payload::{SubmitPayload, WorkspaceRef, rebranch, retry_branch, submit_branch};
use crate::core::transition::{StatusNotice, Trigger};
use crate::core::types::{RunMode, TaskStatus};
use crate::error::{Error, Result};
use crate::io::store::{NewRunJob, Task};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplanOutcome {
    pub id: String,
    pub status: TaskStatus,
    pub plan_round: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueFixOutcome {
    pub id: String,
    pub status: TaskStatus,
    pub fix_round: u32,
}

impl Orchestrator {
    /// Queue a SUBMIT job that commits the task's work and pushes it.
    ///
    /// The branch is the one the most recent run recorded, falling back to a
    /// deterministic per-task submit branch.
    pub fn submit(&self, task_id: &str) -> Result<Enqueued> {
        let task = self.require_task(task_id)?;
        let workspace = self.require_workspace(&task.workspace_id)?;

        let branch = self
            .store
            .latest_run(&task.id)?
            .and_then(|run| run.branch_name)
            .unwrap_or_else(|| submit_branch(&self.settings.branch_prefix, &task.id));

        let payload = SubmitPayload::commit_and_push(
            WorkspaceRef {
                repo_path: workspace.repo_path,
                base_branch: workspace.default_branch,
            },
            branch,
            format!("{}{}", self.settings.commit_message_prefix, task.title),
            self.settings.remote.clone(),
        )
        .into_payload()
        .map_err(|err| Error::Infra(format!("build submit payload: {err}")))?;

        self.enqueue(&task.id, &workspace.id, RunMode::Submit, payload)
    }

    /// Start a fresh planning round. No job is queued.
    pub fn replan(&self, task_id: &str) -> Result<ReplanOutcome> {
        let task = self.apply_trigger(task_id, Trigger::Replan)?;
        Ok(ReplanOutcome {
            id: task.id,
            status: task.status,
            plan_round: task.plan_round,
        })
    }

    /// Re-run the task's most recent job on a fresh branch.
    ///
    /// The new run keeps the prior mode and a copy of the prior payload; only
    /// a string `branch` in the payload is rewritten.
    pub fn retry(&self, task_id: &str) -> Result<Enqueued> {
        let task = self.require_task(task_id)?;
        let prior = self
            .store
            .latest_job(&task.id)?
            .ok_or_else(|| Error::InvalidState("no run to retry".to_string()))?;

        let mut new = NewRunJob::new(&task.id, &prior.workspace_id, prior.mode, prior.payload);
        let branch = retry_branch(&self.settings.branch_prefix, &task.id, &new.run_id);
        rebranch(&mut new.payload, branch);
        info!(task_id = %task.id, prior_job = %prior.id, mode = %prior.mode, "retrying");
        self.dispatch(new)
    }

    /// Open another fix round by hand. No job is queued.
    pub fn continue_fix(&self, task_id: &str) -> Result<ContinueFixOutcome> {
        let task = self.apply_trigger(task_id, Trigger::ContinueFix)?;
        Ok(ContinueFixOutcome {
            id: task.id,
            status: task.status,
            fix_round: task.fix_round,
        })
    }

    /// Override a task's status without touching its rounds.
    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<Task> {
        self.apply_trigger(task_id, Trigger::SetStatus(status))
    }

    fn apply_trigger(&self, task_id: &str, trigger: Trigger<'_>) -> Result<Task> {
        let (task, notice): (Task, StatusNotice) =
            self.store.transition_task(task_id, trigger)?;
        self.events
            .task_changed(TaskStatusChanged::new(task.id.clone(), notice));
        Ok(task)
    }
}
