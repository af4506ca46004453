//! # redoplay testkit
//!
//! Test utilities for redoplay.
//!
//! This crate provides:
//! - Segment fixtures written to temporary directories
//! - A recording mailbox store with injectable failures and delays
//! - A halt policy that records instead of exiting
//! - Property-based generators for interleaved transaction logs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use redoplay_testkit::prelude::*;
//!
//! let fixture = SegmentFixture::new();
//! fixture.archive(1, &LogBuilder::new().committed(1, Some(7)).build());
//! let segments = fixture.select(&ReplayConfig::new());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod store;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::store::*;
    pub use redoplay_core::{
        EntityId, OperationRecord, ReplayConfig, ReplayEngine, ReplayOutcome, SequenceNumber,
        TransactionId,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use store::*;
