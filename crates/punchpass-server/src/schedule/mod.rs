//! Notification scheduling.
//!
//! - [`RecurrenceCalculator`] computes the next run of a repeating schedule
//! - [`NotificationScheduler`] finds due notifications on each tick and advances them
//! - [`Dispatcher`] fans one notification out across wallet channels

pub mod dispatcher;
pub mod recurrence;
pub mod scheduler;

pub use dispatcher::{DispatchSummary, Dispatcher};
pub use recurrence::{RecurrenceCalcError, RecurrenceCalculator};
pub use scheduler::{NotificationScheduler, TickOutcome, TickReport, spawn_scheduler};

use punchpass_core::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Notification not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Recurrence(#[from] crate::notification::RecurrenceError),

    #[error(transparent)]
    Calculation(#[from] RecurrenceCalcError),
}
