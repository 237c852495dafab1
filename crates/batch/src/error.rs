//! Scheduler error types.

use thiserror::Error;

use credence_core::CredenceError;

use crate::types::RequestId;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Queue is full (max: {max})")]
    QueueFull { max: usize },

    #[error("Too many requests in one submission: {count} (max: {max})")]
    TooManyRequests { count: usize, max: usize },

    /// An outcome was published twice for the same request. This is a bug in
    /// the scheduler, never a caller error.
    #[error("Outcome already published for request {0}")]
    DuplicateOutcome(RequestId),

    #[error(transparent)]
    Config(#[from] CredenceError),
}
