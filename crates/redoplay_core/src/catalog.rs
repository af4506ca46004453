//! Segment selection.
//!
//! The catalog turns an archive directory plus the active segment into the
//! ordered list of segments a replay run reads:
//!
//! ```text
//! <archive_dir>/
//! ├─ redo-00000000000000000001.log
//! ├─ redo-00000000000000000002.log
//! └─ ...
//! <active_log>             # open segment, highest sequence
//! ```
//!
//! Archive file names carry the zero-padded sequence; the sequence in each
//! header must agree with its name.

use crate::config::ReplayConfig;
use crate::error::{CoreError, CoreResult};
use crate::segment::{SegmentHeader, SegmentReader};
use crate::types::SequenceNumber;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ARCHIVE_PREFIX: &str = "redo-";
const ARCHIVE_SUFFIX: &str = ".log";

/// Returns the archive file name of segment `sequence`.
#[must_use]
pub fn archive_file_name(sequence: SequenceNumber) -> String {
    format!("{ARCHIVE_PREFIX}{:020}{ARCHIVE_SUFFIX}", sequence.as_u64())
}

/// Parses the sequence out of an archive file name.
#[must_use]
pub fn parse_archive_file_name(name: &str) -> Option<SequenceNumber> {
    let digits = name
        .strip_prefix(ARCHIVE_PREFIX)?
        .strip_suffix(ARCHIVE_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(SequenceNumber::new)
}

/// A segment selected for replay: its location and header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    path: PathBuf,
    header: SegmentHeader,
}

impl Segment {
    /// Reads the header of the segment at `path`.
    ///
    /// # Errors
    ///
    /// Returns `SegmentUnreadable` if the file cannot be opened or its header
    /// is invalid.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let reader = SegmentReader::open_file(&path)?;
        let header = *reader.header();
        Ok(Self { path, header })
    }

    /// Returns the segment file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the header read at selection time.
    #[must_use]
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Returns the segment sequence number.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.header.sequence
    }

    /// Returns true if the segment is still being written.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.header.is_open
    }

    /// Opens a fresh reader positioned at the first record.
    ///
    /// # Errors
    ///
    /// Returns `SegmentUnreadable` if the file can no longer be opened.
    pub fn open_reader(&self) -> CoreResult<SegmentReader> {
        SegmentReader::open_file(&self.path)
    }
}

/// Selects and orders the segments of a replay run.
pub struct SegmentCatalog;

impl SegmentCatalog {
    /// Selects the archived segments plus the active segment covering the
    /// configured sequence range, in ascending sequence order.
    ///
    /// Closed segments whose time span cannot intersect the configured time
    /// range are dropped; open segments are always kept. A missing archive
    /// directory or active segment file is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `SegmentUnreadable` if a selected segment cannot be opened, its
    /// header is invalid, or an archive header disagrees with its file name.
    pub fn select(
        archive_dir: &Path,
        active: Option<&Path>,
        config: &ReplayConfig,
    ) -> CoreResult<Vec<Segment>> {
        let mut segments = Vec::new();

        for (sequence, path) in Self::list_archive(archive_dir)? {
            if !config.contains_sequence(sequence) {
                continue;
            }
            let segment = Segment::open(&path)?;
            if segment.sequence() != sequence {
                return Err(CoreError::segment_unreadable(
                    path,
                    format!(
                        "header sequence {} does not match file name sequence {}",
                        segment.sequence(),
                        sequence
                    ),
                ));
            }
            segments.push(segment);
        }

        if let Some(active) = active {
            if active.exists() {
                let segment = Segment::open(active)?;
                if config.contains_sequence(segment.sequence()) {
                    segments.push(segment);
                }
            } else {
                warn!(path = %active.display(), "active segment not found");
            }
        }

        segments.sort_by_key(Segment::sequence);
        Ok(Self::prune_by_time(segments, config))
    }

    /// Uses caller-supplied segment files in the given order.
    ///
    /// No sequence filter or sort is applied; time pruning still is.
    ///
    /// # Errors
    ///
    /// Returns `SegmentUnreadable` if any file cannot be opened.
    pub fn from_paths<P: AsRef<Path>>(
        paths: &[P],
        config: &ReplayConfig,
    ) -> CoreResult<Vec<Segment>> {
        let segments = paths
            .iter()
            .map(|p| Segment::open(p.as_ref()))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self::prune_by_time(segments, config))
    }

    /// Lists archive segment files by sequence, ascending.
    ///
    /// Files whose names do not follow the archive naming scheme are ignored.
    /// A missing directory yields an empty list and a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn list_archive(archive_dir: &Path) -> CoreResult<Vec<(SequenceNumber, PathBuf)>> {
        let entries = match fs::read_dir(archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    path = %archive_dir.display(),
                    "archive directory not found, using active segment only"
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(CoreError::segment_unreadable(archive_dir, e.to_string())),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(sequence) = name.to_str().and_then(parse_archive_file_name) else {
                continue;
            };
            if entry.file_type()?.is_file() {
                found.push((sequence, entry.path()));
            }
        }
        found.sort();
        Ok(found)
    }

    fn prune_by_time(segments: Vec<Segment>, config: &ReplayConfig) -> Vec<Segment> {
        segments
            .into_iter()
            .filter(|segment| {
                let keep = segment
                    .header
                    .may_overlap(config.from_time, config.to_time);
                if !keep {
                    debug!(
                        segment = %segment.sequence(),
                        first = segment.header.first_op_timestamp,
                        last = segment.header.last_op_timestamp,
                        "segment outside time range, skipping"
                    );
                }
                keep
            })
            .collect()
    }
}
