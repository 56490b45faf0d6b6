//! Punchpass server library
//!
//! Backend for loyalty cards delivered as wallet passes:
//! - Device registry and the wallet client web service
//! - APNs wake-up pushes and dead-token pruning
//! - Notification scheduling and multi-channel dispatch

pub mod assets;
pub mod config;
pub mod notification;
pub mod passes;
pub mod push;
pub mod registry;
pub mod schedule;
pub mod server;
pub mod storage;
pub mod updates;
pub mod wallet;

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod test_support;
