//! Redo log segment format.
//!
//! A segment is one physical log file: a fixed-size header followed by a
//! stream of framed operation records.
//!
//! ## Header Format
//!
//! ```text
//! | magic (4) | version (2) | flags (1) | reserved (1) | sequence (8) | first_op_ts (8) | last_op_ts (8) | crc32 (4) |
//! ```
//!
//! Flags:
//! - `0x01` = open (the segment is still being written)
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! ## Damage Policy
//!
//! - A torn final record in an **open** segment ends the segment cleanly
//!   (the writer crashed mid-append)
//! - A torn final record in a **closed** segment is a corrupt record
//! - Bad magic, CRC mismatch, unknown type, or an undecodable payload yield a
//!   corrupt record; the reader then skips the framed record, or rescans for
//!   the next record magic when the frame itself cannot be trusted

mod header;
mod reader;
mod record;
mod writer;

pub use header::{SegmentHeader, HEADER_SIZE, SEGMENT_MAGIC, SEGMENT_VERSION};
pub use reader::SegmentReader;
pub use record::{
    encode_record, FormatError, OperationRecord, RecordType, ENVELOPE_SIZE, RECORD_MAGIC,
    RECORD_VERSION,
};
pub use writer::SegmentWriter;
