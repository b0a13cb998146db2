//! Shared vocabularies for tasks, runs, jobs and messages.
//!
//! Every enum here has a stable text label. The label is what goes over the
//! wire and into the store, so renaming a label is a breaking change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! labeled_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw {
                    $($label => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

labeled_enum! {
    /// Lifecycle position of a task on the board.
    pub enum TaskStatus {
        Plan => "plan",
        Pending => "pending",
        InProgress => "in_progress",
        Review => "review",
        Testing => "testing",
        Done => "done",
        Failed => "failed",
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Plan
    }
}

labeled_enum! {
    pub enum SubmitState {
        NotSubmitted => "not_submitted",
        Committed => "committed",
        Pushed => "pushed",
        PrOpened => "pr_opened",
    }
}

impl Default for SubmitState {
    fn default() -> Self {
        Self::NotSubmitted
    }
}

labeled_enum! {
    /// What a run is asked to do.
    pub enum RunMode {
        /// Produce a change.
        CodeChange => "CODE_CHANGE",
        /// Check correctness. The only mode whose outcome moves the task.
        Verify => "VERIFY",
        /// Finalize and publish.
        Submit => "SUBMIT",
    }
}

labeled_enum! {
    /// Status shared by runs and their jobs.
    ///
    /// A job always mirrors its run: both start `queued`, both move to
    /// `running` when a runner claims the job, and both end on the reported
    /// terminal status.
    pub enum RunStatus {
        Queued => "queued",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
    }
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

labeled_enum! {
    /// Terminal outcome a runner may report.
    pub enum ReportStatus {
        Succeeded => "succeeded",
        Failed => "failed",
    }
}

impl From<ReportStatus> for RunStatus {
    fn from(status: ReportStatus) -> Self {
        match status {
            ReportStatus::Succeeded => RunStatus::Succeeded,
            ReportStatus::Failed => RunStatus::Failed,
        }
    }
}

labeled_enum! {
    pub enum ErrorKind {
        None => "none",
        CodeFailed => "code_failed",
        TestFailed => "test_failed",
        InfraFailed => "infra_failed",
    }
}

impl Default for ErrorKind {
    fn default() -> Self {
        Self::None
    }
}

impl ErrorKind {
    /// Failures the agent can fix by taking another round.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::CodeFailed | Self::TestFailed)
    }
}

labeled_enum! {
    pub enum RoundType {
        Plan => "plan",
        Fix => "fix",
    }
}

labeled_enum! {
    pub enum Author {
        User => "user",
        System => "system",
        Agent => "agent",
    }
}
