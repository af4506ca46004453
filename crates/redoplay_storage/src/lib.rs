//! # redoplay storage
//!
//! Byte-store backends used to read and write redo log segments.
//!
//! Backends are **opaque byte stores**: they know nothing about segment
//! headers or record envelopes. All format interpretation lives in
//! `redoplay_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and synthetic segments
//! - [`FileBackend`] - For segment files on disk
//!
//! ## Example
//!
//! ```rust
//! use redoplay_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"redo").unwrap();
//! assert_eq!(backend.read_at(offset, 4).unwrap(), b"redo");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
