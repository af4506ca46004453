//! Segment writer.
//!
//! Replay never writes segments; the writer exists for the log-writing side,
//! for tools, and for building test segments.

use crate::error::{CoreError, CoreResult};
use crate::segment::header::{SegmentHeader, HEADER_SIZE};
use crate::segment::record::{encode_record, OperationRecord};
use crate::types::SequenceNumber;
use redoplay_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// Appends records to one segment and keeps its header current.
pub struct SegmentWriter {
    backend: Box<dyn StorageBackend>,
    header: SegmentHeader,
}

impl SegmentWriter {
    /// Starts a new open segment on an empty backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend already holds data or the header
    /// cannot be written.
    pub fn create(mut backend: Box<dyn StorageBackend>, sequence: SequenceNumber) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::invalid_operation(format!(
                "cannot create segment {sequence} on a non-empty backend"
            )));
        }
        let header = SegmentHeader::new(sequence);
        backend.append(&header.encode())?;
        Ok(Self { backend, header })
    }

    /// Creates a new segment file at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists with content or cannot be created.
    pub fn create_file(path: &Path, sequence: SequenceNumber) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::create(Box::new(backend), sequence)
    }

    /// Reopens an existing segment to continue appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is unreadable or the segment is sealed.
    pub fn resume(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let bytes = backend.read_at(0, HEADER_SIZE)?;
        let header = SegmentHeader::decode(&bytes)
            .map_err(|e| CoreError::invalid_operation(format!("cannot resume segment: {e}")))?;
        if !header.is_open {
            return Err(CoreError::invalid_operation(format!(
                "segment {} is sealed",
                header.sequence
            )));
        }
        Ok(Self { backend, header })
    }

    /// Reopens the open segment file at `path` to continue appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, its header is
    /// unreadable, or the segment is sealed.
    pub fn resume_file(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Self::resume(Box::new(backend))
    }

    /// Returns the current header.
    #[must_use]
    pub fn header(&self) -> SegmentHeader {
        self.header
    }

    /// Appends a record and refreshes the header time span.
    ///
    /// Returns the offset where the record was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    pub fn append(&mut self, record: &OperationRecord) -> CoreResult<u64> {
        self.check_open()?;
        let data = encode_record(record).map_err(|e| CoreError::invalid_operation(e.to_string()))?;
        let offset = self.backend.append(&data)?;
        self.header.observe(record.timestamp());
        self.write_header()?;
        Ok(offset)
    }

    /// Appends bytes without framing.
    ///
    /// Only useful to reproduce torn writes and damaged segments.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn append_raw(&mut self, data: &[u8]) -> CoreResult<u64> {
        self.check_open()?;
        Ok(self.backend.append(data)?)
    }

    /// Flushes appended data.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Marks the segment closed and flushes it.
    ///
    /// Further appends are rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be rewritten.
    pub fn seal(&mut self) -> CoreResult<SegmentHeader> {
        self.header.is_open = false;
        self.write_header()?;
        self.backend.flush()?;
        Ok(self.header)
    }

    /// Flushes and returns the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn into_backend(mut self) -> CoreResult<Box<dyn StorageBackend>> {
        self.backend.flush()?;
        Ok(self.backend)
    }

    fn check_open(&self) -> CoreResult<()> {
        if !self.header.is_open {
            return Err(CoreError::invalid_operation(format!(
                "segment {} is sealed",
                self.header.sequence
            )));
        }
        Ok(())
    }

    fn write_header(&mut self) -> CoreResult<()> {
        self.backend.write_at(0, &self.header.encode())?;
        Ok(())
    }
}
