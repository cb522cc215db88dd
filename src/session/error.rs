//! Session lifecycle errors

use crate::api::ApiError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("{field} is required")]
    InvalidInput { field: &'static str },
    #[error("Could not start session: {0}")]
    NetworkFailure(#[from] ApiError),
    #[error("A session start is already in progress")]
    StartInProgress,
    #[error("Session start was superseded by a reset")]
    Superseded,
}
