//! SQLite storage for the Punchpass server.
//!
//! Holds the loyalty card read model, device registrations, per-pass update
//! watermarks, notifications and their delivery logs.

mod db;
mod models;
mod queries_cards;
mod queries_notifications;
mod queries_registrations;

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests;

pub use db::ServerDatabase;
pub use models::*;
pub use punchpass_core::DatabaseError;
pub use queries_notifications::{LogOutcome, NewLog};
pub use queries_registrations::{NewRegistration, RegistrationOutcome};
