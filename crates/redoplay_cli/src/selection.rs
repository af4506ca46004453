//! Flags shared by commands that select segments.

use crate::time::parse_time;
use clap::Args;
use redoplay_core::{CoreResult, EntityId, ReplayConfig, Segment, SegmentCatalog, Timestamp};
use std::path::PathBuf;

/// Which segments to read and which operations to keep.
#[derive(Debug, Args)]
pub struct SelectionArgs {
    /// Directory holding archived segments
    #[arg(long, default_value = "redolog/archive")]
    pub archive_dir: PathBuf,

    /// The active (currently written) segment
    #[arg(long, default_value = "redolog/redo.log")]
    pub active_log: PathBuf,

    /// Replay exactly these segment files, in this order
    #[arg(long, num_args = 1..)]
    pub logfiles: Vec<PathBuf>,

    /// First segment sequence to replay
    #[arg(long)]
    pub from_seq: Option<u64>,

    /// Last segment sequence to replay
    #[arg(long)]
    pub to_seq: Option<u64>,

    /// Earliest commit time (RFC 3339, 'YYYY-MM-DD HH:MM:SS' UTC, or ms)
    #[arg(long, value_parser = parse_time)]
    pub from_time: Option<Timestamp>,

    /// Latest commit time (RFC 3339, 'YYYY-MM-DD HH:MM:SS' UTC, or ms)
    #[arg(long, value_parser = parse_time)]
    pub to_time: Option<Timestamp>,

    /// Only replay these entities (comma-separated or repeated)
    #[arg(long, value_delimiter = ',')]
    pub entity_id: Vec<u64>,
}

impl SelectionArgs {
    /// Builds the range part of the replay configuration.
    pub fn config(&self) -> ReplayConfig {
        let defaults = ReplayConfig::default();
        let mut config = ReplayConfig::new()
            .sequence_range(
                self.from_seq.unwrap_or(defaults.from_sequence.as_u64()),
                self.to_seq.unwrap_or(defaults.to_sequence.as_u64()),
            )
            .time_range(
                self.from_time.unwrap_or(defaults.from_time),
                self.to_time.unwrap_or(defaults.to_time),
            );
        if !self.entity_id.is_empty() {
            config = config.entities(self.entity_id.iter().copied().map(EntityId::new));
        }
        config
    }

    /// Selects segments from `--logfiles`, or from the archive directory and
    /// active segment.
    pub fn select(&self, config: &ReplayConfig) -> CoreResult<Vec<Segment>> {
        if self.logfiles.is_empty() {
            SegmentCatalog::select(&self.archive_dir, Some(&self.active_log), config)
        } else {
            SegmentCatalog::from_paths(self.logfiles.as_slice(), config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        selection: SelectionArgs,
    }

    #[test]
    fn defaults_cover_everything() {
        let args = Harness::parse_from(["playredo"]).selection;
        assert_eq!(args.config(), ReplayConfig::default());
        assert!(args.logfiles.is_empty());
    }

    #[test]
    fn flags_map_onto_config() {
        let args = Harness::parse_from([
            "playredo",
            "--from-seq",
            "3",
            "--to-seq",
            "9",
            "--from-time",
            "1970-01-01 00:00:02",
            "--to-time",
            "5000",
            "--entity-id",
            "7,8",
            "--entity-id",
            "9",
        ])
        .selection;
        let config = args.config();
        assert_eq!(config.from_sequence.as_u64(), 3);
        assert_eq!(config.to_sequence.as_u64(), 9);
        assert_eq!(config.from_time, 2_000);
        assert_eq!(config.to_time, 5_000);
        assert_eq!(config.entity_filter.map(|s| s.len()), Some(3));
    }
}
