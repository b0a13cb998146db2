//! Operations that combine the store with the broadcaster.
//!
//! Every operation validates first, then commits its writes in one store
//! transaction, then publishes notifications. Nothing is published for a
//! failed operation.

mod actions;
mod board;
mod enqueue;
mod report;
mod runner;

pub use actions::{ContinueFixOutcome, ReplanOutcome};
pub use board::{RunWithArtifacts, TaskDetail};
pub use enqueue::Enqueued;
pub use report::ReportAccepted;

use crate::broadcast::Broadcaster;
use crate::error::{Error, Result};
use crate::io::config::{MAX_JOB_LEASE_SECS, ServerConfig};
use crate::io::store::{Store, Task, Workspace};

/// Knobs that shape dispatched jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub branch_prefix: String,
    pub remote: String,
    pub commit_message_prefix: String,
    pub job_lease: chrono::Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            branch_prefix: config.git.branch_prefix.clone(),
            remote: config.git.remote.clone(),
            commit_message_prefix: config.git.commit_message_prefix.clone(),
            job_lease: chrono::Duration::from_std(config.job_lease())
                .unwrap_or_else(|_| chrono::Duration::seconds(MAX_JOB_LEASE_SECS as i64)),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// Cloneable entry point for all task, run and job operations.
#[derive(Clone)]
pub struct Orchestrator {
    store: Store,
    events: Broadcaster,
    settings: DispatchSettings,
}

impl Orchestrator {
    pub fn new(store: Store, events: Broadcaster, settings: DispatchSettings) -> Self {
        Self {
            store,
            events,
            settings,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn events(&self) -> &Broadcaster {
        &self.events
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    fn require_task(&self, task_id: &str) -> Result<Task> {
        self.store
            .get_task(task_id)?
            .ok_or_else(|| Error::NotFound("task not found".to_string()))
    }

    fn require_workspace(&self, workspace_id: &str) -> Result<Workspace> {
        self.store
            .get_workspace(workspace_id)?
            .ok_or_else(|| Error::NotFound("workspace not found".to_string()))
    }
}
