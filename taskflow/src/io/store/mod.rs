//! SQLite-backed store for workspaces, tasks, runs, jobs, messages and artifacts.
//!
//! The store is the only owner of durable state. Each public method is one
//! unit of work: reads see committed data only, and every method that touches
//! more than one row runs inside a single transaction, so a concurrent reader
//! never observes an updated run without its job and task.

mod error;
mod records;
mod schema;

pub use error::StoreError;
pub use records::{
    Artifact, ClaimedJob, FinalizedRun, Job, Message, NewMessage, NewRunJob, NewTask,
    NewWorkspace, Run, RunnerRecord, Task, TaskFilter, TaskUpdate, Workspace,
};

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::{debug, info, warn};

use crate::core::payload::payload_branch;
use crate::core::report::Report;
use crate::core::transition::{StatusNotice, Transition, Trigger, report_trigger, transition};
use crate::core::types::{Author, ErrorKind, RunStatus};
use records::{
    ARTIFACT_COLUMNS, JOB_COLUMNS, MESSAGE_COLUMNS, RUN_COLUMNS, TASK_COLUMNS,
    WORKSPACE_COLUMNS, row_to_artifact, row_to_job, row_to_message, row_to_run, row_to_task,
    row_to_workspace,
};

const DEFAULT_BRANCH: &str = "main";
const LEASE_EXPIRED: &str = "lease expired";

/// Format a timestamp the way every column stores it.
///
/// Fixed-width UTC with microseconds, so lexical order is chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> String {
    timestamp(Utc::now())
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Cloneable handle to one SQLite connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file and install the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA foreign_keys=ON;",
        )?;
        debug!(path = %path.display(), "opened store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        schema::install_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection.
    ///
    /// A poisoned mutex is recovered: the connection itself stays usable and
    /// any half-done transaction was rolled back when its guard dropped.
    fn with_conn<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Run `f` inside one transaction; any error rolls the whole unit back.
    fn with_tx<R>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    pub fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
    }

    pub fn create_workspace(&self, new: &NewWorkspace) -> Result<Workspace, StoreError> {
        let id = new_id();
        let now = now();
        let branch = new.default_branch.as_deref().unwrap_or(DEFAULT_BRANCH);
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO workspaces (id, name, repo_path, default_branch, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, new.name, new.repo_path, branch, now],
            )?;
            select_workspace(tx, &id)?.ok_or(StoreError::NotFound("workspace"))
        })
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<Workspace>, StoreError> {
        self.with_conn(|conn| select_workspace(conn, id))
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {WORKSPACE_COLUMNS} FROM workspaces ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_workspace)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Create a task in its initial `plan` state.
    pub fn create_task(&self, new: &NewTask) -> Result<Task, StoreError> {
        let id = new_id();
        let now = now();
        self.with_tx(|tx| {
            if select_workspace(tx, &new.workspace_id)?.is_none() {
                return Err(StoreError::NotFound("workspace"));
            }
            tx.execute(
                "INSERT INTO tasks (id, workspace_id, title, description, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id,
                    new.workspace_id,
                    new.title,
                    new.description.as_deref().unwrap_or_default(),
                    now
                ],
            )?;
            select_task(tx, &id)?.ok_or(StoreError::NotFound("task"))
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.with_conn(|conn| select_task(conn, id))
    }

    /// Tasks matching `filter`, most recently updated first.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1");
        let mut args: Vec<&dyn ToSql> = Vec::new();
        if let Some(workspace_id) = &filter.workspace_id {
            sql.push_str(" AND workspace_id = ?");
            args.push(workspace_id);
        }
        if let Some(status) = &filter.status {
            sql.push_str(" AND status = ?");
            args.push(status);
        }
        sql.push_str(" ORDER BY updated_at DESC, rowid DESC");

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(args.as_slice(), row_to_task)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn append_message(&self, new: &NewMessage) -> Result<Message, StoreError> {
        let now = now();
        self.with_tx(|tx| {
            if select_task(tx, &new.task_id)?.is_none() {
                return Err(StoreError::NotFound("task"));
            }
            let id = insert_message(tx, new, &now)?;
            select_message(tx, &id)?.ok_or(StoreError::NotFound("message"))
        })
    }

    /// Task log in append order.
    pub fn list_messages(&self, task_id: &str) -> Result<Vec<Message>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE task_id = ?1 \
                 ORDER BY created_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![task_id], row_to_message)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>, StoreError> {
        self.with_conn(|conn| select_run(conn, id))
    }

    /// Runs of a task, newest first.
    pub fn list_runs(&self, task_id: &str) -> Result<Vec<Run>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {RUN_COLUMNS} FROM runs WHERE task_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![task_id], row_to_run)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn latest_run(&self, task_id: &str) -> Result<Option<Run>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {RUN_COLUMNS} FROM runs WHERE task_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            );
            Ok(conn
                .query_row(&sql, params![task_id], row_to_run)
                .optional()?)
        })
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], row_to_job).optional()?)
        })
    }

    /// Most recently created job across all runs of a task.
    pub fn latest_job(&self, task_id: &str) -> Result<Option<Job>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE task_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            );
            Ok(conn
                .query_row(&sql, params![task_id], row_to_job)
                .optional()?)
        })
    }

    pub fn list_artifacts(&self, run_id: &str) -> Result<Vec<Artifact>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE run_id = ?1 \
                 ORDER BY created_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![run_id], row_to_artifact)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Insert a queued run and its queued job at one creation instant.
    pub fn insert_run_and_job(&self, new: &NewRunJob) -> Result<Run, StoreError> {
        let now = now();
        let payload = serde_json::to_string(&new.payload)?;
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO runs (id, task_id, mode, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![new.run_id, new.task_id, new.mode, RunStatus::Queued, now],
            )?;
            tx.execute(
                "INSERT INTO jobs (id, run_id, task_id, workspace_id, mode, payload_json, status, \
                 available_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?8)",
                params![
                    new.job_id,
                    new.run_id,
                    new.task_id,
                    new.workspace_id,
                    new.mode,
                    payload,
                    RunStatus::Queued,
                    now
                ],
            )?;
            select_run(tx, &new.run_id)?.ok_or(StoreError::NotFound("run"))
        })
    }

    /// Record a terminal report and drive the task, all in one transaction.
    ///
    /// A run that already reached a terminal status is rejected with
    /// [`StoreError::InvalidState`] and nothing is written.
    pub fn finalize_run(&self, report: &Report) -> Result<FinalizedRun, StoreError> {
        let now = now();
        let artifact_meta = report
            .artifacts
            .iter()
            .map(|artifact| artifact.meta.as_ref().map(serde_json::to_string).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        self.with_tx(|tx| {
            let run = select_run(tx, &report.run_id)?.ok_or(StoreError::NotFound("run"))?;
            if run.status.is_terminal() {
                return Err(StoreError::InvalidState(format!(
                    "run {} already {}",
                    run.id, run.status
                )));
            }

            let status = RunStatus::from(report.status);
            let error_kind = report.error_kind_or_default();
            tx.execute(
                "UPDATE runs SET status = ?1, error_kind = ?2, error_message = ?3, \
                 finished_at = ?4, updated_at = ?4, \
                 branch_name = COALESCE(?5, branch_name), \
                 worktree_path = COALESCE(?6, worktree_path) \
                 WHERE id = ?7",
                params![
                    status,
                    error_kind,
                    report.summary,
                    now,
                    report.branch,
                    report.worktree_path,
                    run.id
                ],
            )?;

            for (artifact, meta) in report.artifacts.iter().zip(&artifact_meta) {
                tx.execute(
                    "INSERT INTO artifacts (id, run_id, type, uri, meta, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![new_id(), run.id, artifact.kind, artifact.uri, meta, now],
                )?;
            }

            let last_error = match status {
                RunStatus::Failed => Some(report.summary.as_deref().unwrap_or_default()),
                _ => None,
            };
            let jobs = tx.execute(
                "UPDATE jobs SET status = ?1, locked_until = NULL, last_error = ?2, updated_at = ?3 \
                 WHERE run_id = ?4",
                params![status, last_error, now, run.id],
            )?;
            if jobs != 1 {
                debug!(run_id = %run.id, jobs, "unexpected job count for run");
            }

            let task_update = match select_task(tx, &run.task_id)? {
                None => None,
                Some(task) => report_trigger(run.mode, report.status, error_kind, report.summary.as_deref())
                    .map(|trigger| -> Result<TaskUpdate, StoreError> {
                        let step = transition(task.state(), trigger);
                        write_transition(tx, &task.id, &step, &now)?;
                        Ok(TaskUpdate {
                            task_id: task.id.clone(),
                            notice: step.notice,
                        })
                    })
                    .transpose()?,
            };

            let run = select_run(tx, &run.id)?.ok_or(StoreError::NotFound("run"))?;
            Ok(FinalizedRun { run, task_update })
        })
    }

    /// Apply an operator trigger to a task and append its round message.
    pub fn transition_task(
        &self,
        task_id: &str,
        trigger: Trigger<'_>,
    ) -> Result<(Task, StatusNotice), StoreError> {
        let now = now();
        self.with_tx(|tx| {
            let task = select_task(tx, task_id)?.ok_or(StoreError::NotFound("task"))?;
            let step = transition(task.state(), trigger);
            write_transition(tx, &task.id, &step, &now)?;
            let task = select_task(tx, task_id)?.ok_or(StoreError::NotFound("task"))?;
            Ok((task, step.notice))
        })
    }

    /// Lease the next dispatchable job to `runner_id`.
    ///
    /// A job is dispatchable when it is available, not under a live lease and
    /// has attempts left. Jobs whose lease expired while `running` are handed
    /// out again; those that have no attempts left are failed together with
    /// their run as an infra failure.
    pub fn claim_next_job(
        &self,
        runner_id: &str,
        at: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<Option<ClaimedJob>, StoreError> {
        let now = timestamp(at);
        let lease_until = timestamp(at + lease);
        self.with_tx(|tx| {
            fail_exhausted_jobs(tx, &now)?;

            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs \
                 WHERE status IN ('queued', 'running') AND available_at <= ?1 \
                 AND (locked_until IS NULL OR locked_until < ?1) \
                 AND attempts < max_attempts \
                 ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT 1"
            );
            let Some(job) = tx.query_row(&sql, params![now], row_to_job).optional()? else {
                return Ok(None);
            };

            tx.execute(
                "UPDATE jobs SET status = ?1, locked_by = ?2, locked_until = ?3, \
                 attempts = attempts + 1, updated_at = ?4 WHERE id = ?5",
                params![RunStatus::Running, runner_id, lease_until, now, job.id],
            )?;
            tx.execute(
                "UPDATE runs SET status = ?1, started_at = ?2, updated_at = ?2, \
                 branch_name = COALESCE(?3, branch_name) WHERE id = ?4",
                params![RunStatus::Running, now, payload_branch(&job.payload), job.run_id],
            )?;

            let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
            let job = tx.query_row(&sql, params![job.id], row_to_job)?;
            let run = select_run(tx, &job.run_id)?.ok_or(StoreError::NotFound("run"))?;
            info!(job_id = %job.id, run_id = %run.id, runner_id, attempts = job.attempts, "claimed job");
            Ok(Some(ClaimedJob { job, run }))
        })
    }

    pub fn record_heartbeat(&self, runner_id: &str) -> Result<RunnerRecord, StoreError> {
        let now = now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO runners (id, last_heartbeat) VALUES (?1, ?2) \
                 ON CONFLICT(id) DO UPDATE SET last_heartbeat = excluded.last_heartbeat",
                params![runner_id, now],
            )?;
            Ok(RunnerRecord {
                id: runner_id.to_string(),
                last_heartbeat: now,
            })
        })
    }

    pub fn list_runners(&self) -> Result<Vec<RunnerRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, last_heartbeat FROM runners ORDER BY last_heartbeat DESC")?;
            let rows = stmt.query_map([], |row| {
                Ok(RunnerRecord {
                    id: row.get(0)?,
                    last_heartbeat: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

/// Fail `running` jobs whose lease lapsed on their last allowed attempt.
fn fail_exhausted_jobs(tx: &Transaction<'_>, now: &str) -> Result<(), StoreError> {
    const EXHAUSTED: &str = "status = 'running' AND locked_until IS NOT NULL \
                             AND locked_until < ?1 AND attempts >= max_attempts";

    let runs = tx.execute(
        &format!(
            "UPDATE runs SET status = ?2, error_kind = ?3, error_message = ?4, \
             finished_at = ?1, updated_at = ?1 \
             WHERE status = 'running' AND id IN (SELECT run_id FROM jobs WHERE {EXHAUSTED})"
        ),
        params![now, RunStatus::Failed, ErrorKind::InfraFailed, LEASE_EXPIRED],
    )?;
    let jobs = tx.execute(
        &format!(
            "UPDATE jobs SET status = ?2, last_error = ?3, locked_until = NULL, \
             updated_at = ?1 WHERE {EXHAUSTED}"
        ),
        params![now, RunStatus::Failed, LEASE_EXPIRED],
    )?;
    if jobs > 0 {
        warn!(jobs, runs, "failed jobs with expired lease and no attempts left");
    }
    Ok(())
}

fn select_workspace(conn: &Connection, id: &str) -> Result<Option<Workspace>, StoreError> {
    let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], row_to_workspace)
        .optional()?)
}

fn select_task(conn: &Connection, id: &str) -> Result<Option<Task>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_task).optional()?)
}

fn select_run(conn: &Connection, id: &str) -> Result<Option<Run>, StoreError> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_run).optional()?)
}

fn select_message(conn: &Connection, id: &str) -> Result<Option<Message>, StoreError> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], row_to_message)
        .optional()?)
}

fn insert_message(conn: &Connection, new: &NewMessage, now: &str) -> Result<String, StoreError> {
    let id = new_id();
    conn.execute(
        "INSERT INTO messages (id, task_id, round_type, round_no, author, content, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            new.task_id,
            new.round_type,
            new.round_no,
            new.author,
            new.content,
            now
        ],
    )?;
    Ok(id)
}

fn write_transition(
    conn: &Connection,
    task_id: &str,
    step: &Transition,
    now: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE tasks SET status = ?1, plan_round = ?2, fix_round = ?3, updated_at = ?4 \
         WHERE id = ?5",
        params![
            step.next.status,
            step.next.plan_round,
            step.next.fix_round,
            now,
            task_id
        ],
    )?;
    if let Some(message) = &step.message {
        insert_message(
            conn,
            &NewMessage {
                task_id: task_id.to_string(),
                round_type: message.round_type,
                round_no: message.round_no,
                author: Author::System,
                content: message.content.clone(),
            },
            now,
        )?;
    }
    info!(
        task_id,
        status = %step.next.status,
        plan_round = step.next.plan_round,
        fix_round = step.next.fix_round,
        "task transitioned"
    );
    Ok(())
}
