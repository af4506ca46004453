//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Access mode a [`FileBackend`] was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadOnly,
    ReadWrite,
}

/// Cursor-sharing state: the handle and the length it is known to have.
#[derive(Debug)]
struct Handle {
    file: File,
    len: u64,
}

/// A segment file on disk.
///
/// Replay opens segments with [`FileBackend::open_read_only`], which never
/// creates a file and rejects every write. The log-writing side (fixtures
/// and tooling) uses [`FileBackend::open`].
///
/// ```no_run
/// use redoplay_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open_read_only(Path::new("redo.log")).unwrap();
/// println!("{} bytes", backend.size().unwrap());
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    access: Access,
    handle: Mutex<Handle>,
}

impl FileBackend {
    /// Opens a segment file for writing, creating it when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::wrap(path, file, Access::ReadWrite)
    }

    /// Opens an existing segment file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        Self::wrap(path, file, Access::ReadOnly)
    }

    /// Like [`FileBackend::open`], creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    fn wrap(path: &Path, file: File, access: Access) -> StorageResult<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            access,
            handle: Mutex::new(Handle { file, len }),
        })
    }

    /// Path of the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when opened with [`FileBackend::open_read_only`].
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.access == Access::ReadOnly
    }

    fn writable(&mut self) -> StorageResult<&mut Handle> {
        match self.access {
            Access::ReadOnly => Err(StorageError::ReadOnly),
            Access::ReadWrite => Ok(self.handle.get_mut()),
        }
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut handle = self.handle.lock();
        StorageError::check_span(offset, len, handle.len)?;

        let mut out = vec![0u8; len];
        if len > 0 {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(&mut out)?;
        }
        Ok(out)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let handle = self.writable()?;
        let at = handle.len;
        if !data.is_empty() {
            handle.file.seek(SeekFrom::Start(at))?;
            handle.file.write_all(data)?;
            handle.len += data.len() as u64;
        }
        Ok(at)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let handle = self.writable()?;
        StorageError::check_span(offset, data.len(), handle.len)?;
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        if let Access::ReadWrite = self.access {
            let handle = self.handle.get_mut();
            handle.file.flush()?;
            handle.file.sync_data()?;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.handle.lock().len)
    }
}
