//! # PageLog Testkit
//!
//! Test utilities for PageLog.
//!
//! This crate provides:
//! - Test fixtures and log helpers
//! - Property-based test generators using proptest
//! - Crash simulation and fault injection over the in-memory store
//! - Cross-crate integration test helpers
//! - Stress testing utilities
//! - On-disk format test vectors
//!
//! ## Usage
//!
//! ```rust
//! use pagelog_testkit::prelude::*;
//!
//! with_temp_log(|log| {
//!     let address = log.write(1, 7, b"payload").unwrap();
//!     assert_eq!(log.read(address).unwrap().structure_id(), 7);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
pub use vectors::*;
