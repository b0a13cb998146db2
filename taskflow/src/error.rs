use thiserror::Error;

use crate::io::store::StoreError;

/// Failures surfaced by orchestrator operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input; nothing was written.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    /// The request conflicts with current state, e.g. a second report for a
    /// finished run.
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Infra(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Error::NotFound(format!("{what} not found")),
            StoreError::InvalidState(reason) => Error::InvalidState(reason),
            other => Error::Infra(other.to_string()),
        }
    }
}
