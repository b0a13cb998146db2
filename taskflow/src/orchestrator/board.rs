//! Workspace, task and message bookkeeping plus read views.

use serde::Serialize;
use tracing::info;

use super::Orchestrator;
use crate::error::{Error, Result};
use crate::io::store::{
    Artifact, Message, NewMessage, NewTask, NewWorkspace, Run, Task, TaskFilter, Workspace,
};

/// A task with everything the board shows next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub workspace: Option<Workspace>,
    pub runs: Vec<Run>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunWithArtifacts {
    #[serde(flatten)]
    pub run: Run,
    pub artifacts: Vec<Artifact>,
}

fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} required")));
    }
    Ok(())
}

impl Orchestrator {
    pub fn create_workspace(&self, new: &NewWorkspace) -> Result<Workspace> {
        require_text(&new.name, "name")?;
        require_text(&new.repo_path, "repoPath")?;
        if let Some(branch) = &new.default_branch {
            require_text(branch, "defaultBranch")?;
        }
        let workspace = self.store.create_workspace(new)?;
        info!(workspace_id = %workspace.id, name = %workspace.name, "workspace created");
        Ok(workspace)
    }

    pub fn workspaces(&self) -> Result<Vec<Workspace>> {
        Ok(self.store.list_workspaces()?)
    }

    pub fn workspace(&self, workspace_id: &str) -> Result<Workspace> {
        self.require_workspace(workspace_id)
    }

    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        require_text(&new.workspace_id, "workspaceId")?;
        require_text(&new.title, "title")?;
        let task = self.store.create_task(new)?;
        info!(task_id = %task.id, workspace_id = %task.workspace_id, "task created");
        Ok(task)
    }

    pub fn tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.store.list_tasks(filter)?)
    }

    pub fn task(&self, task_id: &str) -> Result<Task> {
        self.require_task(task_id)
    }

    pub fn task_detail(&self, task_id: &str) -> Result<TaskDetail> {
        let task = self.require_task(task_id)?;
        let workspace = self.store.get_workspace(&task.workspace_id)?;
        let runs = self.store.list_runs(&task.id)?;
        let messages = self.store.list_messages(&task.id)?;
        Ok(TaskDetail {
            task,
            workspace,
            runs,
            messages,
        })
    }

    pub fn append_message(&self, new: &NewMessage) -> Result<Message> {
        Ok(self.store.append_message(new)?)
    }

    pub fn messages(&self, task_id: &str) -> Result<Vec<Message>> {
        let task = self.require_task(task_id)?;
        Ok(self.store.list_messages(&task.id)?)
    }

    /// Runs of a task, newest first, each with its artifacts.
    pub fn runs_with_artifacts(&self, task_id: &str) -> Result<Vec<RunWithArtifacts>> {
        self.store
            .list_runs(task_id)?
            .into_iter()
            .map(|run| {
                let artifacts = self.store.list_artifacts(&run.id)?;
                Ok(RunWithArtifacts { run, artifacts })
            })
            .collect()
    }

    pub fn artifacts(&self, run_id: &str) -> Result<Vec<Artifact>> {
        Ok(self.store.list_artifacts(run_id)?)
    }
}
