//! Stored entities, creation requests and row decoding.

use rusqlite::Row;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use serde::Serialize;
use serde_json::Value;

use crate::core::payload::Payload;
use crate::core::transition::{StatusNotice, TaskState};
use crate::core::types::{
    Author, ErrorKind, RoundType, RunMode, RunStatus, SubmitState, TaskStatus,
};

macro_rules! text_column {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|err: String| FromSqlError::Other(err.into()))
                }
            }
        )+
    };
}

text_column!(TaskStatus, SubmitState, RunMode, RunStatus, ErrorKind, RoundType, Author);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub repo_path: String,
    pub default_branch: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub plan_round: u32,
    pub fix_round: u32,
    pub submit_state: SubmitState,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    pub fn state(&self) -> TaskState {
        TaskState {
            status: self.status,
            plan_round: self.plan_round,
            fix_round: self.fix_round,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub task_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub error_kind: ErrorKind,
    pub error_message: Option<String>,
    pub worktree_path: Option<String>,
    pub branch_name: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub run_id: String,
    pub task_id: String,
    pub workspace_id: String,
    pub mode: RunMode,
    pub payload: Payload,
    pub status: RunStatus,
    pub priority: i64,
    pub available_at: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub locked_by: Option<String>,
    pub locked_until: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub task_id: String,
    pub round_type: RoundType,
    pub round_no: u32,
    pub author: Author,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
    pub meta: Option<Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerRecord {
    pub id: String,
    pub last_heartbeat: String,
}

#[derive(Debug, Clone)]
pub struct NewWorkspace {
    pub name: String,
    pub repo_path: String,
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub workspace_id: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub task_id: String,
    pub round_type: RoundType,
    pub round_no: u32,
    pub author: Author,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub workspace_id: Option<String>,
    pub status: Option<TaskStatus>,
}

/// A run and its job, inserted together.
#[derive(Debug, Clone)]
pub struct NewRunJob {
    pub run_id: String,
    pub job_id: String,
    pub task_id: String,
    pub workspace_id: String,
    pub mode: RunMode,
    pub payload: Payload,
}

impl NewRunJob {
    /// Allocate fresh run and job ids.
    pub fn new(task_id: &str, workspace_id: &str, mode: RunMode, payload: Payload) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            job_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            workspace_id: workspace_id.to_string(),
            mode,
            payload,
        }
    }
}

/// Task movement caused by a finalized run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUpdate {
    pub task_id: String,
    pub notice: StatusNotice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedRun {
    pub run: Run,
    /// `None` when the run's mode does not drive the task, or the task is gone.
    pub task_update: Option<TaskUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimedJob {
    pub job: Job,
    pub run: Run,
}

pub(super) const WORKSPACE_COLUMNS: &str =
    "id, name, repo_path, default_branch, created_at, updated_at";
pub(super) const TASK_COLUMNS: &str = "id, workspace_id, title, description, status, plan_round, \
     fix_round, submit_state, created_at, updated_at";
pub(super) const RUN_COLUMNS: &str = "id, task_id, mode, status, error_kind, error_message, \
     worktree_path, branch_name, started_at, finished_at, created_at, updated_at";
pub(super) const JOB_COLUMNS: &str = "id, run_id, task_id, workspace_id, mode, payload_json, \
     status, priority, available_at, attempts, max_attempts, locked_by, locked_until, \
     last_error, created_at, updated_at";
pub(super) const MESSAGE_COLUMNS: &str =
    "id, task_id, round_type, round_no, author, content, created_at";
pub(super) const ARTIFACT_COLUMNS: &str = "id, run_id, type, uri, meta, created_at";

pub(super) fn row_to_workspace(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        repo_path: row.get(2)?,
        default_branch: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub(super) fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        plan_round: row.get(5)?,
        fix_round: row.get(6)?,
        submit_state: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(super) fn row_to_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        task_id: row.get(1)?,
        mode: row.get(2)?,
        status: row.get(3)?,
        error_kind: row.get(4)?,
        error_message: row.get(5)?,
        worktree_path: row.get(6)?,
        branch_name: row.get(7)?,
        started_at: row.get(8)?,
        finished_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub(super) fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        run_id: row.get(1)?,
        task_id: row.get(2)?,
        workspace_id: row.get(3)?,
        mode: row.get(4)?,
        payload: payload_column(row, 5)?,
        status: row.get(6)?,
        priority: row.get(7)?,
        available_at: row.get(8)?,
        attempts: row.get(9)?,
        max_attempts: row.get(10)?,
        locked_by: row.get(11)?,
        locked_until: row.get(12)?,
        last_error: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

pub(super) fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        task_id: row.get(1)?,
        round_type: row.get(2)?,
        round_no: row.get(3)?,
        author: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub(super) fn row_to_artifact(row: &Row<'_>) -> rusqlite::Result<Artifact> {
    let meta: Option<String> = row.get(4)?;
    let meta = meta
        .map(|raw| serde_json::from_str::<Value>(&raw))
        .transpose()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err)))?;
    Ok(Artifact {
        id: row.get(0)?,
        run_id: row.get(1)?,
        kind: row.get(2)?,
        uri: row.get(3)?,
        meta,
        created_at: row.get(5)?,
    })
}

fn payload_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Payload> {
    let raw: String = row.get(idx)?;
    let decode_err =
        |err: Box<dyn std::error::Error + Send + Sync>| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err)
        };
    match serde_json::from_str::<Value>(&raw).map_err(|err| decode_err(Box::new(err)))? {
        Value::Object(map) => Ok(map),
        _ => Err(decode_err("job payload is not a JSON object".into())),
    }
}
