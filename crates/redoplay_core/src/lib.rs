//! # redoplay core
//!
//! Redo log replay engine.
//!
//! This crate provides:
//! - The segment format (header, framed records, reader, writer)
//! - Segment selection by sequence and time range
//! - Two-phase decoding of `Start`/`Commit`/`Abort` records
//! - Range filtering by commit time and entity
//! - Dispatch to a worker pool with per-entity ordering and bounded queues
//! - Failure classification, shutdown, and crash recovery
//!
//! The operations themselves are opaque: a [`MailboxStore`] supplied by the
//! caller applies them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
mod config;
pub mod controller;
pub mod decoder;
pub mod dispatcher;
mod engine;
mod error;
pub mod filter;
pub mod recovery;
pub mod segment;
mod store;
mod types;
mod unit;
pub mod worker;

pub use catalog::{Segment, SegmentCatalog};
pub use config::{RecoveryConfig, ReplayConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT};
pub use controller::{ReplayOutcome, ReplaySummary};
pub use decoder::{DecodeStats, SegmentDecoder};
pub use engine::ReplayEngine;
pub use error::{CoreError, CoreResult, ErrorClass};
pub use filter::{EntityRemap, RangeFilter, RangePredicate};
pub use recovery::{recover_uncommitted, RecoveryReport, Resolution};
pub use segment::{OperationRecord, SegmentHeader, SegmentReader, SegmentWriter};
pub use store::{ApplyError, ExitProcess, HaltPolicy, MailboxStore, HALT_EXIT_CODE};
pub use types::{EntityId, SequenceNumber, Timestamp, TransactionId};
pub use unit::{ReplayUnit, Scope};
