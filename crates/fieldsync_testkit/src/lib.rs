//! # Fieldsync Testkit
//!
//! Test utilities for fieldsync.
//!
//! This crate provides:
//! - Test fixtures: engines with automatic cleanup, delta builders, scenarios
//! - Property-based test generators using proptest
//! - Fault injection for storage backends
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use fieldsync_testkit::prelude::*;
//! use fieldsync_protocol::DeviceId;
//!
//! with_temp_engine(|engine| {
//!     let zone = entity("zone");
//!     engine
//!         .process_sync_batch(DeviceId::random(), vec![create(&zone, "north")])
//!         .unwrap();
//!     assert_eq!(engine.version_of(&zone).get(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
