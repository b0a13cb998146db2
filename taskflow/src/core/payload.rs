//! Job payload shapes and branch naming.
//!
//! Payloads are opaque JSON objects owned by whoever enqueues the job. The
//! only shape this crate assumes is the SUBMIT payload it builds itself, plus
//! the top-level `branch` key that retries rewrite.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Untyped payload handed to the worker pool as-is.
pub type Payload = Map<String, Value>;

pub const BRANCH_KEY: &str = "branch";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub repo_path: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkdirStrategy {
    GitWorktree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitAction {
    Commit,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitSpec {
    pub actions: Vec<SubmitAction>,
    pub commit_message: String,
    pub remote: String,
}

/// Instructions for a SUBMIT run: commit the worktree and push the branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPayload {
    pub workspace: WorkspaceRef,
    pub workdir_strategy: WorkdirStrategy,
    pub branch: String,
    pub submit: SubmitSpec,
}

impl SubmitPayload {
    pub fn commit_and_push(
        workspace: WorkspaceRef,
        branch: String,
        commit_message: String,
        remote: String,
    ) -> Self {
        Self {
            workspace,
            workdir_strategy: WorkdirStrategy::GitWorktree,
            branch,
            submit: SubmitSpec {
                actions: vec![SubmitAction::Commit, SubmitAction::Push],
                commit_message,
                remote,
            },
        }
    }

    pub fn into_payload(self) -> Result<Payload, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "submit payload serialized to non-object {other}"
            ))),
        }
    }
}

/// Branch used when a task has no run with a recorded branch yet.
pub fn submit_branch(prefix: &str, task_id: &str) -> String {
    format!("{prefix}/task-{task_id}-submit")
}

/// Fresh branch for a retried run, unique per run id.
pub fn retry_branch(prefix: &str, task_id: &str, run_id: &str) -> String {
    format!("{prefix}/task-{task_id}-r{run_id}")
}

/// Point a cloned payload at a new branch.
///
/// Only an existing string `branch` is rewritten; payloads without one are
/// left untouched. Returns whether the payload changed.
pub fn rebranch(payload: &mut Payload, branch: String) -> bool {
    match payload.get_mut(BRANCH_KEY) {
        Some(Value::String(current)) => {
            *current = branch;
            true
        }
        _ => false,
    }
}

/// Branch a payload asks the worker to check out, if any.
pub fn payload_branch(payload: &Payload) -> Option<&str> {
    payload.get(BRANCH_KEY).and_then(Value::as_str)
}
