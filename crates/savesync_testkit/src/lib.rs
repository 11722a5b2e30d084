//! # SaveSync Testkit
//!
//! Test utilities for SaveSync.
//!
//! This crate provides:
//! - Test environments with temporary storage roots and a manual clock
//! - Property-based test generators using proptest
//! - Lease contention and upload stress helpers
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use savesync_testkit::prelude::*;
//! use savesync_core::UserId;
//!
//! let env = TestEnv::new();
//! let game = env.create_game(UserId(1), "Outer Wilds");
//! let receipt = env.upload(UserId(1), game.id, b"loop 42").unwrap();
//! assert_eq!(receipt.record.revision.0, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;

/// Installs a test-friendly `tracing` subscriber.
///
/// Filters with `RUST_LOG` (default: debug for the savesync crates). Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("savesync_core=debug,savesync_server=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
