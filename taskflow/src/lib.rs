//! Task/run state machine and job dispatch core.
//!
//! Tasks move through a lifecycle driven by the outcomes of runs. Each run is
//! paired with a job that an external runner claims, executes and reports on.
//! The crate is split the same way throughout:
//!
//! - **[`core`]**: Pure logic (vocabularies, report validation, the task
//!   transition table, job payload shapes). No I/O.
//! - **[`io`]**: Side effects (SQLite store, TOML config).
//! - **[`broadcast`]**: In-process notification fan-out.
//! - **[`orchestrator`]**: Operations that validate, commit through the store
//!   and then publish.

pub mod broadcast;
pub mod core;
pub mod error;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use broadcast::{Broadcaster, Notification, Subscription};
pub use error::{Error, Result};
pub use orchestrator::{DispatchSettings, Orchestrator};
