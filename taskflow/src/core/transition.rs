//! Task state machine.
//!
//! Every change to a task's status or round counters goes through
//! [`transition`]. The function is pure: callers persist `next`, append
//! `message` and publish `notice` themselves.

use crate::core::types::{ErrorKind, ReportStatus, RoundType, RunMode, TaskStatus};

/// The part of a task the state machine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskState {
    pub status: TaskStatus,
    pub plan_round: u32,
    pub fix_round: u32,
}

/// Something that may move a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger<'a> {
    /// A VERIFY run reached a terminal outcome.
    Verified {
        outcome: ReportStatus,
        error_kind: ErrorKind,
        summary: Option<&'a str>,
    },
    /// Operator asked for a fresh planning round.
    Replan,
    /// Operator asked for another fix round.
    ContinueFix,
    /// Operator overrode the status directly.
    SetStatus(TaskStatus),
}

/// System message to append to the task log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundMessage {
    pub round_type: RoundType,
    pub round_no: u32,
    pub content: String,
}

/// Payload of a `task_status_changed` notification, minus the task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusNotice {
    pub status: TaskStatus,
    /// Set only when the fix round moved.
    pub fix_round: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: TaskState,
    pub message: Option<RoundMessage>,
    pub notice: StatusNotice,
}

/// Map a finished run onto a task trigger.
///
/// Only VERIFY outcomes move the task. CODE_CHANGE and SUBMIT results are
/// recorded on the run and job alone.
pub fn report_trigger<'a>(
    mode: RunMode,
    outcome: ReportStatus,
    error_kind: ErrorKind,
    summary: Option<&'a str>,
) -> Option<Trigger<'a>> {
    match mode {
        RunMode::Verify => Some(Trigger::Verified {
            outcome,
            error_kind,
            summary,
        }),
        RunMode::CodeChange | RunMode::Submit => None,
    }
}

/// Compute the next task state for `trigger`.
pub fn transition(current: TaskState, trigger: Trigger<'_>) -> Transition {
    match trigger {
        Trigger::Verified {
            outcome: ReportStatus::Succeeded,
            ..
        } => status_only(current, TaskStatus::Done),
        Trigger::Verified {
            outcome: ReportStatus::Failed,
            error_kind,
            summary,
        } if error_kind.is_recoverable() => {
            let round = current.fix_round + 1;
            fix_round(
                current,
                round,
                format!("Fix Round #{}\n{}", round, summary.unwrap_or_default()),
            )
        }
        Trigger::Verified {
            outcome: ReportStatus::Failed,
            ..
        } => status_only(current, TaskStatus::Failed),
        Trigger::ContinueFix => {
            let round = current.fix_round + 1;
            fix_round(current, round, format!("Continue Fix: Round #{}", round))
        }
        Trigger::Replan => {
            let round = current.plan_round + 1;
            Transition {
                next: TaskState {
                    status: TaskStatus::Plan,
                    plan_round: round,
                    ..current
                },
                message: Some(RoundMessage {
                    round_type: RoundType::Plan,
                    round_no: round,
                    content: format!("Re-plan: Round #{}", round),
                }),
                notice: StatusNotice {
                    status: TaskStatus::Plan,
                    fix_round: None,
                },
            }
        }
        Trigger::SetStatus(status) => status_only(current, status),
    }
}

fn status_only(current: TaskState, status: TaskStatus) -> Transition {
    Transition {
        next: TaskState { status, ..current },
        message: None,
        notice: StatusNotice {
            status,
            fix_round: None,
        },
    }
}

fn fix_round(current: TaskState, round: u32, content: String) -> Transition {
    Transition {
        next: TaskState {
            status: TaskStatus::InProgress,
            fix_round: round,
            ..current
        },
        message: Some(RoundMessage {
            round_type: RoundType::Fix,
            round_no: round,
            content,
        }),
        notice: StatusNotice {
            status: TaskStatus::InProgress,
            fix_round: Some(round),
        },
    }
}
