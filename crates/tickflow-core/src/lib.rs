//! # Tickflow Core
//!
//! Shared building blocks for the scheduler and workflow crates:
//! the error taxonomy, TOML configuration, atomic JSON persistence
//! and a millisecond wall clock.

pub mod config;
pub mod error;
pub mod persist;

pub use config::TickflowConfig;
pub use error::{Result, TickflowError};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
