use chrono::{DateTime, Utc};
use thiserror::Error;

/// Type-erased error carried by store backends and failing handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures reported by a [`JobStore`](crate::store::JobStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage engine rejected or failed the operation.
    #[error("Store backend error: {0}")]
    Backend(#[source] BoxError),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row could not be turned back into a [`Job`](crate::types::Job).
    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Errors produced by the scheduler.
///
/// Only `InvalidDate`, `RecurringDateNotInFuture` and `Store` are ever
/// returned to a caller. Everything raised inside the claim/dispatch cycle
/// goes to the error sink instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The submitted due date does not describe a real instant.
    #[error("Invalid date: {input}")]
    InvalidDate { input: String },

    /// A fired job has no handler registered under its name.
    #[error("Unknown job {name}")]
    UnknownJob { name: String },

    /// A handler returned an error.
    #[error("Job {name} failed: {source}")]
    Handler {
        name: String,
        #[source]
        source: BoxError,
    },

    /// A handler panicked while running.
    #[error("Job {name} panicked: {message}")]
    HandlerPanicked { name: String, message: String },

    /// `every` computed a next occurrence that is not after the current time.
    #[error("Next date {date} of recurring job {name} is not in the future")]
    RecurringDateNotInFuture { name: String, date: DateTime<Utc> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    /// Short machine-readable code, handy for log filtering.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidDate { .. } => "INVALID_DATE",
            SchedulerError::UnknownJob { .. } => "UNKNOWN_JOB",
            SchedulerError::Handler { .. } => "HANDLER_FAILED",
            SchedulerError::HandlerPanicked { .. } => "HANDLER_PANICKED",
            SchedulerError::RecurringDateNotInFuture { .. } => "RECURRING_DATE_IN_PAST",
            SchedulerError::Store(_) => "STORE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
