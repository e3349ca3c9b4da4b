//! Shared utilities for the termhub crates.
//!
//! Provides poison-tolerant lock helpers and tracing setup.

#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod sync;
pub mod telemetry;

pub use sync::mutex_lock_or_recover;
pub use sync::poison_recovery_count;
pub use sync::rwlock_read_or_recover;
pub use sync::rwlock_write_or_recover;
pub use telemetry::TelemetryGuard;
pub use telemetry::init_tracing;
