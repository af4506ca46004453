//! Operation record types and serialization.

use crate::types::{EntityId, Timestamp, TransactionId};
use thiserror::Error;

/// Magic bytes identifying an operation record.
pub const RECORD_MAGIC: [u8; 4] = *b"RDOP";

/// Current record format version.
pub const RECORD_VERSION: u16 = 1;

/// Size of the record envelope without payload.
/// magic (4) + version (2) + type (1) + length (4) + crc32 (4) = 15 bytes
pub const ENVELOPE_SIZE: usize = ENVELOPE_HEADER_SIZE + CRC_SIZE;

pub(crate) const ENVELOPE_HEADER_SIZE: usize = 11;
pub(crate) const CRC_SIZE: usize = 4;

/// A record or header that does not match the segment format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FormatError {
    message: String,
}

impl FormatError {
    /// Creates a format error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Type tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Start of a transactional operation; carries the payload.
    Start = 1,
    /// Commit of a started operation.
    Commit = 2,
    /// Abort of a started operation.
    Abort = 3,
    /// Checkpoint listing the transactions active when it was written.
    Checkpoint = 4,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Start),
            2 => Some(Self::Commit),
            3 => Some(Self::Abort),
            4 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One record of a redo log segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRecord {
    /// A logged operation awaiting its commit or abort.
    Start {
        /// Transaction ID.
        txid: TransactionId,
        /// Time the operation was prepared.
        timestamp: Timestamp,
        /// Target entity, `None` for cross-entity operations.
        entity: Option<EntityId>,
        /// Opaque serialized operation.
        payload: Vec<u8>,
    },

    /// The operation of `txid` became visible.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Commit time.
        timestamp: Timestamp,
    },

    /// The operation of `txid` was rolled back.
    Abort {
        /// Transaction ID.
        txid: TransactionId,
        /// Abort time.
        timestamp: Timestamp,
    },

    /// Snapshot of the transactions still in flight.
    Checkpoint {
        /// Time of the checkpoint.
        timestamp: Timestamp,
        /// Transactions started but not yet resolved.
        active: Vec<TransactionId>,
    },
}

impl OperationRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Start { .. } => RecordType::Start,
            Self::Commit { .. } => RecordType::Commit,
            Self::Abort { .. } => RecordType::Abort,
            Self::Checkpoint { .. } => RecordType::Checkpoint,
        }
    }

    /// Returns the transaction ID if this record belongs to one.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Start { txid, .. } | Self::Commit { txid, .. } | Self::Abort { txid, .. } => {
                Some(*txid)
            }
            Self::Checkpoint { .. } => None,
        }
    }

    /// Returns the timestamp written with the record.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Start { timestamp, .. }
            | Self::Commit { timestamp, .. }
            | Self::Abort { timestamp, .. }
            | Self::Checkpoint { timestamp, .. } => *timestamp,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if a length does not fit the 4-byte length fields.
    pub fn encode_payload(&self) -> Result<Vec<u8>, FormatError> {
        let mut buf = Vec::new();

        match self {
            Self::Start {
                txid,
                timestamp,
                entity,
                payload,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&timestamp.to_le_bytes());
                match entity {
                    Some(id) => {
                        buf.push(1);
                        buf.extend_from_slice(&id.as_u64().to_le_bytes());
                    }
                    None => buf.push(0),
                }
                let len = u32::try_from(payload.len()).map_err(|_| {
                    FormatError::new(format!("operation payload too large: {} bytes", payload.len()))
                })?;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(payload);
            }

            Self::Commit { txid, timestamp } | Self::Abort { txid, timestamp } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&timestamp.to_le_bytes());
            }

            Self::Checkpoint { timestamp, active } => {
                buf.extend_from_slice(&timestamp.to_le_bytes());
                let count = u32::try_from(active.len())
                    .map_err(|_| FormatError::new("too many active transactions"))?;
                buf.extend_from_slice(&count.to_le_bytes());
                for txid in active {
                    buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                }
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is short, has trailing bytes, or
    /// carries an invalid flag.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> Result<Self, FormatError> {
        let mut cursor = Cursor::new(payload);

        let record = match record_type {
            RecordType::Start => {
                let txid = TransactionId::new(cursor.u64()?);
                let timestamp = cursor.i64()?;
                let entity = match cursor.u8()? {
                    0 => None,
                    1 => Some(EntityId::new(cursor.u64()?)),
                    flag => {
                        return Err(FormatError::new(format!("invalid entity flag {flag}")));
                    }
                };
                let len = cursor.u32()? as usize;
                let payload = cursor.bytes(len)?.to_vec();
                Self::Start {
                    txid,
                    timestamp,
                    entity,
                    payload,
                }
            }

            RecordType::Commit => Self::Commit {
                txid: TransactionId::new(cursor.u64()?),
                timestamp: cursor.i64()?,
            },

            RecordType::Abort => Self::Abort {
                txid: TransactionId::new(cursor.u64()?),
                timestamp: cursor.i64()?,
            },

            RecordType::Checkpoint => {
                let timestamp = cursor.i64()?;
                let count = cursor.u32()? as usize;
                // Bound the allocation by what the payload can actually hold.
                if count > cursor.remaining() / 8 {
                    return Err(FormatError::new(format!(
                        "checkpoint lists {count} transactions but payload holds {} bytes",
                        cursor.remaining()
                    )));
                }
                let mut active = Vec::with_capacity(count);
                for _ in 0..count {
                    active.push(TransactionId::new(cursor.u64()?));
                }
                Self::Checkpoint { timestamp, active }
            }
        };

        cursor.finish(record_type)?;
        Ok(record)
    }
}

/// Encodes a record with its envelope, ready to append to a segment.
///
/// # Errors
///
/// Returns an error if the payload cannot be encoded.
pub fn encode_record(record: &OperationRecord) -> Result<Vec<u8>, FormatError> {
    let payload = record.encode_payload()?;
    let len = u32::try_from(payload.len())
        .map_err(|_| FormatError::new("record payload too large"))?;

    let mut data = Vec::with_capacity(ENVELOPE_SIZE + payload.len());
    data.extend_from_slice(&RECORD_MAGIC);
    data.extend_from_slice(&RECORD_VERSION.to_le_bytes());
    data.push(record.record_type().as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);

    let crc = crc32fast::hash(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        if len > self.remaining() {
            return Err(FormatError::new(format!(
                "unexpected end of payload: need {len} bytes at {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, FormatError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn i64(&mut self) -> Result<i64, FormatError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    fn finish(&self, record_type: RecordType) -> Result<(), FormatError> {
        if self.remaining() != 0 {
            return Err(FormatError::new(format!(
                "trailing bytes in {record_type:?} record: expected {} bytes, got {}",
                self.pos,
                self.data.len()
            )));
        }
        Ok(())
    }
}
