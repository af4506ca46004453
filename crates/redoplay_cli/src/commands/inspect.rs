//! Inspect command implementation.

use crate::selection::SelectionArgs;
use crate::time::format_time;
use redoplay_core::Segment;
use serde::Serialize;

/// A selected segment for output.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// Segment sequence number.
    pub sequence: u64,
    /// File path.
    pub path: String,
    /// Whether the segment is still being written.
    pub open: bool,
    /// Earliest record time, absent for an empty segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_op_timestamp: Option<i64>,
    /// Latest record time, absent for an empty segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_op_timestamp: Option<i64>,
}

impl From<&Segment> for SegmentInfo {
    fn from(segment: &Segment) -> Self {
        let header = segment.header();
        let (first, last) = if header.is_empty() {
            (None, None)
        } else {
            (Some(header.first_op_timestamp), Some(header.last_op_timestamp))
        };
        Self {
            sequence: segment.sequence().as_u64(),
            path: segment.path().display().to_string(),
            open: header.is_open,
            first_op_timestamp: first,
            last_op_timestamp: last,
        }
    }
}

/// Runs the inspect command.
pub fn run(selection: &SelectionArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = selection.config();
    config.validate()?;
    let segments: Vec<SegmentInfo> = selection
        .select(&config)?
        .iter()
        .map(SegmentInfo::from)
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&segments)?),
        _ => print_text_output(&segments),
    }
    Ok(())
}

fn print_text_output(segments: &[SegmentInfo]) {
    println!("Selected Segments ({} total)", segments.len());
    println!("================");
    println!();

    for segment in segments {
        print!("[{:>8}] {}", segment.sequence, segment.path);
        if segment.open {
            print!(" (open)");
        }
        match (segment.first_op_timestamp, segment.last_op_timestamp) {
            (Some(first), Some(last)) => {
                print!(" {} .. {}", format_time(first), format_time(last));
            }
            _ => print!(" empty"),
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redoplay_core::{SegmentWriter, SequenceNumber};
    use tempfile::tempdir;

    #[test]
    fn empty_segment_has_no_span() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("redo.log");
        let mut writer = SegmentWriter::create_file(&path, SequenceNumber::new(12)).unwrap();
        writer.flush().unwrap();

        let info = SegmentInfo::from(&Segment::open(&path).unwrap());
        assert_eq!(info.sequence, 12);
        assert!(info.open);
        assert!(info.first_op_timestamp.is_none());
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("last_op_timestamp").is_none());
    }
}
