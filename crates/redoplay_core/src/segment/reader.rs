//! Streaming segment reader.
//!
//! Reads records one by one through a bounded buffer, so memory use does
//! not depend on segment size. Damaged records are reported as
//! `CorruptRecord` items and the reader keeps going from the next position
//! the format allows; storage failures end iteration.

use crate::error::{CoreError, CoreResult};
use crate::segment::header::{SegmentHeader, HEADER_SIZE};
use crate::segment::record::{
    OperationRecord, RecordType, CRC_SIZE, ENVELOPE_HEADER_SIZE, RECORD_MAGIC, RECORD_VERSION,
};
use redoplay_storage::{FileBackend, StorageBackend};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A streaming iterator over the records of one segment.
///
/// Yields `(offset, record)` pairs in file order.
pub struct SegmentReader {
    backend: Box<dyn StorageBackend>,
    path: PathBuf,
    header: SegmentHeader,
    total_size: u64,
    /// Absolute offset of `buffer[buffer_pos]`.
    offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
    junk_bytes: u64,
}

impl SegmentReader {
    /// Opens a segment file read-only.
    ///
    /// # Errors
    ///
    /// Returns `SegmentUnreadable` if the file cannot be opened or its header
    /// is invalid.
    pub fn open_file(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open_read_only(path)
            .map_err(|e| CoreError::segment_unreadable(path, e.to_string()))?;
        Self::new(Box::new(backend), path)
    }

    /// Creates a reader over any backend; `path` labels errors and logs.
    ///
    /// # Errors
    ///
    /// Returns `SegmentUnreadable` if the header cannot be read or decoded.
    pub fn new(backend: Box<dyn StorageBackend>, path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let total_size = backend
            .size()
            .map_err(|e| CoreError::segment_unreadable(path.as_path(), e.to_string()))?;
        if total_size < HEADER_SIZE as u64 {
            return Err(CoreError::segment_unreadable(
                path,
                format!("file too short for a segment header: {total_size} bytes"),
            ));
        }
        let header = backend
            .read_at(0, HEADER_SIZE)
            .map_err(|e| e.to_string())
            .and_then(|bytes| SegmentHeader::decode(&bytes).map_err(|e| e.to_string()))
            .map_err(|reason| CoreError::segment_unreadable(path.as_path(), reason))?;

        Ok(Self {
            backend,
            path,
            header,
            total_size,
            offset: HEADER_SIZE as u64,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
            junk_bytes: 0,
        })
    }

    /// Returns the segment header.
    #[must_use]
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Returns the path (or label) of the segment.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the size of the segment in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.total_size
    }

    /// Bytes of torn data found at the end of an open segment.
    #[must_use]
    pub fn junk_bytes(&self) -> u64 {
        self.junk_bytes
    }

    /// Makes at least `min_bytes` available from the current position.
    ///
    /// Returns `false` if the segment ends first. The buffer grows for
    /// records larger than the default buffer size.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let remaining_in_file = self.total_size - self.offset;
        if remaining_in_file < min_bytes as u64 {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let unbuffered = remaining_in_file - available as u64;
        let room = (self.buffer.len() - self.buffer_len) as u64;
        let to_read = room.min(unbuffered) as usize;
        if to_read > 0 {
            let data = self
                .backend
                .read_at(self.offset + available as u64, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn advance(&mut self, len: usize) {
        self.buffer_pos += len;
        self.offset += len as u64;
    }

    fn skip_to_end(&mut self) {
        self.offset = self.total_size;
        self.buffer_pos = 0;
        self.buffer_len = 0;
        self.finished = true;
    }

    /// Moves past a record whose frame cannot be trusted to the next record
    /// magic. Returns the number of bytes skipped.
    fn resync(&mut self) -> CoreResult<u64> {
        let start = self.offset;
        self.advance(1);
        loop {
            if !self.ensure_buffered(RECORD_MAGIC.len())? {
                self.skip_to_end();
                return Ok(self.total_size - start);
            }
            if self.buffer[self.buffer_pos..self.buffer_pos + RECORD_MAGIC.len()] == RECORD_MAGIC {
                return Ok(self.offset - start);
            }
            self.advance(1);
        }
    }

    fn corrupt(&self, offset: u64, message: impl Into<String>) -> CoreError {
        CoreError::corrupt_record(self.header.sequence, offset, message)
    }

    /// Handles a record that runs past the end of the segment.
    fn torn_tail(&mut self, start: u64) -> CoreResult<Option<(u64, OperationRecord)>> {
        self.finished = true;
        let remaining = self.total_size - start;
        if remaining == 0 {
            return Ok(None);
        }
        if self.header.is_open {
            self.junk_bytes = remaining;
            warn!(
                segment = %self.header.sequence,
                path = %self.path.display(),
                offset = start,
                bytes = remaining,
                "junk data at end of open segment, treating as end of log"
            );
            return Ok(None);
        }
        Err(self.corrupt(
            start,
            format!("truncated record: {remaining} bytes at end of closed segment"),
        ))
    }

    /// A frame whose declared length overruns the segment is either the
    /// torn final record or a damaged length field. Only the first kind has
    /// no record magic after it.
    fn overrun(
        &mut self,
        start: u64,
        declared: usize,
    ) -> CoreResult<Option<(u64, OperationRecord)>> {
        let skipped = self.resync()?;
        if self.finished {
            return self.torn_tail(start);
        }
        Err(self.corrupt(
            start,
            format!("record length {declared} runs past end of segment, skipped {skipped} bytes"),
        ))
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, OperationRecord)>> {
        if self.finished {
            return Ok(None);
        }

        let start = self.offset;
        if !self.ensure_buffered(ENVELOPE_HEADER_SIZE)? {
            return self.torn_tail(start);
        }

        let head = &self.buffer[self.buffer_pos..self.buffer_pos + ENVELOPE_HEADER_SIZE];
        let magic_ok = head[0..4] == RECORD_MAGIC;
        let version = u16::from_le_bytes([head[4], head[5]]);
        let type_byte = head[6];
        let payload_len = u32::from_le_bytes([head[7], head[8], head[9], head[10]]) as usize;

        if !magic_ok {
            let skipped = self.resync()?;
            return Err(self.corrupt(
                start,
                format!("invalid record magic, skipped {skipped} bytes"),
            ));
        }

        let total_len = ENVELOPE_HEADER_SIZE + payload_len + CRC_SIZE;
        if !self.ensure_buffered(total_len)? {
            return self.overrun(start, payload_len);
        }

        let frame = &self.buffer[self.buffer_pos..self.buffer_pos + total_len];
        let crc_start = total_len - CRC_SIZE;
        let stored_crc = u32::from_le_bytes([
            frame[crc_start],
            frame[crc_start + 1],
            frame[crc_start + 2],
            frame[crc_start + 3],
        ]);
        let computed_crc = crc32fast::hash(&frame[..crc_start]);
        if stored_crc != computed_crc {
            // The length field is covered by the checksum, so the frame
            // boundary is not trusted either.
            let skipped = self.resync()?;
            return Err(self.corrupt(
                start,
                format!(
                    "checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}, \
                     skipped {skipped} bytes"
                ),
            ));
        }

        let decoded = if version == 0 || version > RECORD_VERSION {
            Err(format!("unsupported record version {version}"))
        } else if let Some(record_type) = RecordType::from_byte(type_byte) {
            OperationRecord::decode_payload(record_type, &frame[ENVELOPE_HEADER_SIZE..crc_start])
                .map_err(|e| e.to_string())
        } else {
            Err(format!("unknown record type {type_byte}"))
        };

        self.advance(total_len);
        match decoded {
            Ok(record) => Ok(Some((start, record))),
            Err(message) => Err(self.corrupt(start, message)),
        }
    }
}

impl Iterator for SegmentReader {
    type Item = CoreResult<(u64, OperationRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                if !e.is_recoverable() {
                    self.finished = true;
                }
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::record::encode_record;
    use crate::segment::SegmentWriter;
    use crate::types::{EntityId, SequenceNumber, TransactionId};
    use redoplay_storage::InMemoryBackend;

    fn start(txid: u64, entity: u64, payload_len: usize) -> OperationRecord {
        OperationRecord::Start {
            txid: TransactionId::new(txid),
            timestamp: txid as i64,
            entity: Some(EntityId::new(entity)),
            payload: vec![0xAB; payload_len],
        }
    }

    fn commit(txid: u64) -> OperationRecord {
        OperationRecord::Commit {
            txid: TransactionId::new(txid),
            timestamp: txid as i64 + 100,
        }
    }

    /// Builds segment bytes; `tail` is appended raw after the records.
    fn segment_bytes(records: &[OperationRecord], sealed: bool, tail: &[u8]) -> Vec<u8> {
        let mut writer =
            SegmentWriter::create(Box::new(InMemoryBackend::new()), SequenceNumber::new(3)).unwrap();
        for record in records {
            writer.append(record).unwrap();
        }
        if !tail.is_empty() {
            writer.append_raw(tail).unwrap();
        }
        if sealed {
            writer.seal().unwrap();
        }
        let backend = writer.into_backend().unwrap();
        backend.read_at(0, backend.size().unwrap() as usize).unwrap()
    }

    /// Recomputes the trailing checksum after a deliberate edit.
    fn reseal(frame: &mut [u8]) {
        let crc_start = frame.len() - CRC_SIZE;
        let crc = crc32fast::hash(&frame[..crc_start]);
        frame[crc_start..].copy_from_slice(&crc.to_le_bytes());
    }

    fn reader(bytes: Vec<u8>) -> SegmentReader {
        SegmentReader::new(Box::new(InMemoryBackend::with_data(bytes)), "<memory>").unwrap()
    }

    #[test]
    fn reads_records_in_order() {
        let records = vec![start(1, 7, 10), start(2, 8, 0), commit(2), commit(1)];
        let mut reader = reader(segment_bytes(&records, true, &[]));
        assert_eq!(reader.header().sequence, SequenceNumber::new(3));

        let read: Vec<_> = reader.by_ref().map(|r| r.unwrap().1).collect();
        assert_eq!(read, records);
        assert_eq!(reader.junk_bytes(), 0);
    }

    #[test]
    fn empty_segment() {
        let mut reader = reader(segment_bytes(&[], false, &[]));
        assert!(reader.next().is_none());
    }

    #[test]
    fn record_larger_than_buffer() {
        let records = vec![start(1, 1, READ_BUFFER_SIZE * 2), commit(1)];
        let read: Vec<_> = reader(segment_bytes(&records, true, &[]))
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(read, records);
    }

    #[test]
    fn torn_tail_in_open_segment_ends_cleanly() {
        let torn = encode_record(&commit(1)).unwrap();
        let bytes = segment_bytes(&[start(1, 1, 4)], false, &torn[..torn.len() - 3]);
        let mut reader = reader(bytes);

        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().is_none());
        assert_eq!(reader.junk_bytes(), (torn.len() - 3) as u64);
    }

    #[test]
    fn torn_tail_in_closed_segment_is_corrupt() {
        let torn = encode_record(&commit(1)).unwrap();
        let bytes = segment_bytes(&[start(1, 1, 4)], true, &torn[..5]);
        let mut reader = reader(bytes);

        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, CoreError::CorruptRecord { .. }));
        assert!(reader.next().is_none());
    }

    #[test]
    fn checksum_mismatch_skips_one_record() {
        let mut damaged = encode_record(&start(2, 2, 8)).unwrap();
        let last = damaged.len() - 1;
        damaged[last] ^= 0xFF;
        let mut bytes = segment_bytes(&[start(1, 1, 4)], true, &damaged);
        bytes.extend_from_slice(&encode_record(&commit(1)).unwrap());

        let results: Vec<_> = reader(bytes).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert_eq!(results[2].as_ref().unwrap().1, commit(1));
    }

    #[test]
    fn unknown_type_skips_framed_record() {
        let mut damaged = encode_record(&commit(5)).unwrap();
        damaged[6] = 0x7F;
        reseal(&mut damaged);
        let mut bytes = segment_bytes(&[], true, &damaged);
        bytes.extend_from_slice(&encode_record(&commit(6)).unwrap());

        let results: Vec<_> = reader(bytes).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0]
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("unknown record type 127"));
        assert_eq!(results[1].as_ref().unwrap().1, commit(6));
    }

    #[test]
    fn bad_magic_resyncs_to_next_record() {
        let garbage = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC];
        let mut bytes = segment_bytes(&[commit(1)], true, &garbage);
        let good_offset = bytes.len() as u64;
        bytes.extend_from_slice(&encode_record(&commit(2)).unwrap());

        let results: Vec<_> = reader(bytes).collect();
        assert_eq!(results.len(), 3);
        assert!(results[1]
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("skipped 13 bytes"));
        let (offset, record) = results[2].as_ref().unwrap();
        assert_eq!(*offset, good_offset);
        assert_eq!(*record, commit(2));
    }

    /// Valid records after a damaged commit whose length high byte is set.
    fn overrun_then_valid(sealed: bool) -> (Vec<u8>, Vec<OperationRecord>) {
        let mut damaged = encode_record(&commit(1)).unwrap();
        damaged[10] = 0x40;
        let after: Vec<_> = (2..=6).flat_map(|t| [start(t, t, 3), commit(t)]).collect();
        let mut tail = damaged;
        for record in &after {
            tail.extend_from_slice(&encode_record(record).unwrap());
        }
        (segment_bytes(&[start(1, 1, 2)], sealed, &tail), after)
    }

    #[test]
    fn overrunning_length_resyncs_in_open_segment() {
        let (bytes, after) = overrun_then_valid(false);
        let mut reader = reader(bytes);
        let results: Vec<_> = reader.by_ref().collect();

        assert_eq!(results.len(), 2 + after.len());
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert!(matches!(err, CoreError::CorruptRecord { .. }));
        assert!(err.to_string().contains("runs past end of segment"));
        let read: Vec<_> = results[2..].iter().map(|r| r.as_ref().unwrap().1.clone()).collect();
        assert_eq!(read, after);
        assert_eq!(reader.junk_bytes(), 0);
    }

    #[test]
    fn overrunning_length_resyncs_in_closed_segment() {
        let (bytes, after) = overrun_then_valid(true);
        let results: Vec<_> = reader(bytes).collect();

        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        let read: Vec<_> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|(_, record)| record.clone())
            .skip(1)
            .collect();
        assert_eq!(read, after);
    }

    #[test]
    fn shortened_length_does_not_swallow_next_record() {
        let mut damaged = encode_record(&start(2, 2, 16)).unwrap();
        damaged[7] = 2;
        let mut bytes = segment_bytes(&[], true, &damaged);
        bytes.extend_from_slice(&encode_record(&commit(2)).unwrap());

        let results: Vec<_> = reader(bytes).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0]
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("checksum mismatch"));
        assert_eq!(results[1].as_ref().unwrap().1, commit(2));
    }

    #[test]
    fn torn_final_record_with_overrunning_length_is_junk() {
        let mut torn = encode_record(&start(9, 1, 40)).unwrap();
        torn.truncate(20);
        let mut reader = reader(segment_bytes(&[commit(1)], false, &torn));

        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().is_none());
        assert_eq!(reader.junk_bytes(), 20);
    }

    #[test]
    fn garbage_to_end_reports_once() {
        let garbage = vec![0x5A; 40];
        let results: Vec<_> = reader(segment_bytes(&[commit(1)], true, &garbage)).collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn invalid_header_is_unreadable() {
        let mut bytes = segment_bytes(&[commit(1)], true, &[]);
        bytes[9] ^= 0x01;
        let err = SegmentReader::new(Box::new(InMemoryBackend::with_data(bytes)), "seg.log")
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::SegmentUnreadable { .. }));

        let err = SegmentReader::new(Box::new(InMemoryBackend::with_data(vec![1, 2])), "seg.log")
            .err()
            .unwrap();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = SegmentReader::open_file(&dir.path().join("nope.log"))
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::SegmentUnreadable { .. }));
    }

    mod arbitrary_tail {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn valid_prefix_survives(
                tail in proptest::collection::vec(any::<u8>(), 0..512),
                sealed in any::<bool>(),
            ) {
                let records = vec![start(1, 1, 4), commit(1)];
                let bytes = segment_bytes(&records, sealed, &tail);
                let total = bytes.len();
                let results: Vec<_> = reader(bytes).collect();

                prop_assert!(results.len() >= 2);
                prop_assert!(results.len() <= 2 + total);
                prop_assert_eq!(&results[0].as_ref().unwrap().1, &records[0]);
                prop_assert_eq!(&results[1].as_ref().unwrap().1, &records[1]);
            }
        }
    }
}
