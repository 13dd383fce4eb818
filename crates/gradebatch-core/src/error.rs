//! Error types for Gradebatch.

use thiserror::Error;

use crate::job::{JobAction, JobState};

#[derive(Debug, Error)]
pub enum Error {
    /// Bad submission or registration input. No state was created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested action is not legal in the job's current state.
    /// The job is left untouched.
    #[error("invalid transition: cannot {action} a job that is {state}")]
    InvalidTransition { state: JobState, action: JobAction },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Systemic dispatch failure; the job has been moved to Failed.
    #[error("dispatch failed: {0}")]
    DispatchFatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
