//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A segment image held in memory.
///
/// Decoder tests build segments here, and damaged images can be fed to the
/// reader through [`InMemoryBackend::with_data`].
///
/// ```rust
/// use redoplay_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.append(b"RDLG").unwrap();
/// assert_eq!(backend.size().unwrap(), 4);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing byte image.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
        }
    }

    /// Snapshot of the current image.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Consumes the backend and returns its image.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes.into_inner()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        StorageError::check_span(offset, len, bytes.len() as u64)?;
        let start = offset as usize;
        Ok(bytes[start..start + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let bytes = self.bytes.get_mut();
        let at = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(at)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let bytes = self.bytes.get_mut();
        StorageError::check_span(offset, data.len(), bytes.len() as u64)?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_report_their_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"RDLG").unwrap(), 0);
        assert_eq!(backend.append(b"RDOP").unwrap(), 4);
        assert_eq!(backend.read_at(2, 4).unwrap(), b"LGRD");
    }

    #[test]
    fn header_rewrite_keeps_length() {
        let mut backend = InMemoryBackend::with_data(b"header-body".to_vec());
        backend.write_at(0, b"HEADER").unwrap();
        assert_eq!(backend.into_inner(), b"HEADER-body");
    }

    #[test]
    fn spans_past_the_end_are_rejected() {
        let mut backend = InMemoryBackend::with_data(vec![0; 4]);
        assert!(backend.write_at(3, &[1, 2]).is_err());
        assert!(matches!(
            backend.read_at(2, 3),
            Err(StorageError::ReadPastEnd { offset: 2, len: 3, size: 4 })
        ));
        assert!(backend.read_at(u64::MAX, 1).is_err());
        assert_eq!(backend.read_at(4, 0).unwrap(), Vec::<u8>::new());
    }
}
