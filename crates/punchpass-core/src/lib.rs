//! `Punchpass` Core Library
//!
//! Shared functionality for `Punchpass` components:
//! - `SQLite` pool creation and the `define_database!` macro
//! - Millisecond clock and RFC 3339 conversion helpers
//! - Tracing subscriber initialisation

pub mod db;
pub mod time;
pub mod tracing_init;

pub use db::DatabaseError;
