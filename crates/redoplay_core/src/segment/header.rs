//! Segment header encoding.

use crate::segment::record::FormatError;
use crate::types::{SequenceNumber, Timestamp};

/// Magic bytes identifying a segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"RDLG";

/// Current segment header version.
pub const SEGMENT_VERSION: u16 = 1;

/// Encoded size of the segment header.
pub const HEADER_SIZE: usize = 38;

const FLAG_OPEN: u8 = 0x01;

/// Metadata at the start of every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Sequence number of the segment.
    pub sequence: SequenceNumber,
    /// True while the segment is still being written.
    pub is_open: bool,
    /// Timestamp of the earliest record, `Timestamp::MAX` when empty.
    pub first_op_timestamp: Timestamp,
    /// Timestamp of the latest record, `Timestamp::MIN` when empty.
    ///
    /// Provisional while the segment is open.
    pub last_op_timestamp: Timestamp,
}

impl SegmentHeader {
    /// Creates the header of a new, empty, open segment.
    #[must_use]
    pub const fn new(sequence: SequenceNumber) -> Self {
        Self {
            sequence,
            is_open: true,
            first_op_timestamp: Timestamp::MAX,
            last_op_timestamp: Timestamp::MIN,
        }
    }

    /// Returns true if no record has been written to the segment.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.first_op_timestamp > self.last_op_timestamp
    }

    /// Widens the recorded time span to include `timestamp`.
    pub fn observe(&mut self, timestamp: Timestamp) {
        self.first_op_timestamp = self.first_op_timestamp.min(timestamp);
        self.last_op_timestamp = self.last_op_timestamp.max(timestamp);
    }

    /// Returns true if the segment may contain operations in `[from, to]`.
    ///
    /// An open segment always may, because its last timestamp can still grow.
    #[must_use]
    pub const fn may_overlap(&self, from: Timestamp, to: Timestamp) -> bool {
        if self.is_open {
            return true;
        }
        !(self.last_op_timestamp < from || self.first_op_timestamp > to)
    }

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..6].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf[6] = if self.is_open { FLAG_OPEN } else { 0 };
        buf[8..16].copy_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf[16..24].copy_from_slice(&self.first_op_timestamp.to_le_bytes());
        buf[24..32].copy_from_slice(&self.last_op_timestamp.to_le_bytes());
        let crc = crc32fast::hash(&buf[..HEADER_SIZE - 4]);
        buf[HEADER_SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a header.
    ///
    /// # Errors
    ///
    /// Returns an error on short input, bad magic, an unsupported version,
    /// or a checksum mismatch.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::new(format!(
                "header too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != SEGMENT_MAGIC {
            return Err(FormatError::new("invalid segment magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version > SEGMENT_VERSION {
            return Err(FormatError::new(format!(
                "unsupported segment version {version}"
            )));
        }
        let stored = read_u32(&bytes[HEADER_SIZE - 4..HEADER_SIZE]);
        let computed = crc32fast::hash(&bytes[..HEADER_SIZE - 4]);
        if stored != computed {
            return Err(FormatError::new(format!(
                "header checksum mismatch: expected {stored:08x}, got {computed:08x}"
            )));
        }

        Ok(Self {
            sequence: SequenceNumber::new(read_u64(&bytes[8..16])),
            is_open: bytes[6] & FLAG_OPEN != 0,
            first_op_timestamp: read_u64(&bytes[16..24]) as i64,
            last_op_timestamp: read_u64(&bytes[24..32]) as i64,
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}
