//! Dump command implementation.

use redoplay_core::{CoreError, OperationRecord, SegmentReader};
use serde::Serialize;
use std::path::Path;

/// One decoded record for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset in the segment file.
    pub offset: u64,
    /// Record type.
    pub record_type: &'static str,
    /// Transaction ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<u64>,
    /// Record timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Target entity of a start record; absent for global operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<u64>,
    /// Payload size of a start record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
    /// Active transactions of a checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<Vec<u64>>,
    /// Damage description of a corrupt record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordInfo {
    fn new(offset: u64, record_type: &'static str) -> Self {
        Self {
            offset,
            record_type,
            txid: None,
            timestamp: None,
            entity: None,
            payload_size: None,
            active: None,
            error: None,
        }
    }

    fn from_record(offset: u64, record: &OperationRecord) -> Self {
        match record {
            OperationRecord::Start {
                txid,
                timestamp,
                entity,
                payload,
            } => Self {
                txid: Some(txid.as_u64()),
                timestamp: Some(*timestamp),
                entity: entity.map(|e| e.as_u64()),
                payload_size: Some(payload.len()),
                ..Self::new(offset, "START")
            },
            OperationRecord::Commit { txid, timestamp } => Self {
                txid: Some(txid.as_u64()),
                timestamp: Some(*timestamp),
                ..Self::new(offset, "COMMIT")
            },
            OperationRecord::Abort { txid, timestamp } => Self {
                txid: Some(txid.as_u64()),
                timestamp: Some(*timestamp),
                ..Self::new(offset, "ABORT")
            },
            OperationRecord::Checkpoint { timestamp, active } => Self {
                timestamp: Some(*timestamp),
                active: Some(active.iter().map(|t| t.as_u64()).collect()),
                ..Self::new(offset, "CHECKPOINT")
            },
        }
    }
}

/// Reads up to `limit` records of the segment at `path`.
///
/// Corrupt records are listed in place; a storage failure ends the dump.
pub fn read_records(path: &Path, limit: Option<usize>) -> Result<Vec<RecordInfo>, CoreError> {
    let reader = SegmentReader::open_file(path)?;
    let mut records = Vec::new();
    for item in reader.take(limit.unwrap_or(usize::MAX)) {
        match item {
            Ok((offset, record)) => records.push(RecordInfo::from_record(offset, &record)),
            Err(CoreError::CorruptRecord {
                offset, message, ..
            }) => records.push(RecordInfo {
                error: Some(message),
                ..RecordInfo::new(offset, "CORRUPT")
            }),
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let header = *SegmentReader::open_file(path)?.header();
    let records = read_records(path, limit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            println!(
                "Segment {} ({}, {} records)",
                header.sequence,
                if header.is_open { "open" } else { "closed" },
                records.len()
            );
            println!("================");
            println!();
            print_text_output(&records);
        }
    }
    Ok(())
}

fn print_text_output(records: &[RecordInfo]) {
    for record in records {
        print!("[{:08}] {:10}", record.offset, record.record_type);
        if let Some(txid) = record.txid {
            print!(" txid={txid}");
        }
        if let Some(ts) = record.timestamp {
            print!(" ts={ts}");
        }
        if let Some(entity) = record.entity {
            print!(" entity={entity}");
        } else if record.record_type == "START" {
            print!(" global");
        }
        if let Some(size) = record.payload_size {
            print!(" payload={size} bytes");
        }
        if let Some(ref active) = record.active {
            print!(" active={active:?}");
        }
        if let Some(ref error) = record.error {
            print!(" error={error}");
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redoplay_core::{EntityId, SegmentWriter, SequenceNumber, TransactionId};
    use tempfile::tempdir;

    #[test]
    fn dumps_records_and_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("redo.log");
        let mut writer = SegmentWriter::create_file(&path, SequenceNumber::new(1)).unwrap();
        writer
            .append(&OperationRecord::Start {
                txid: TransactionId::new(1),
                timestamp: 5,
                entity: Some(EntityId::new(3)),
                payload: vec![0; 12],
            })
            .unwrap();
        writer.append_raw(b"RDOP\x01\x00\x09\x00\x00\x00\x00\x00\x00\x00\x00").unwrap();
        writer
            .append(&OperationRecord::Commit {
                txid: TransactionId::new(1),
                timestamp: 6,
            })
            .unwrap();
        writer.flush().unwrap();

        let records = read_records(&path, None).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].record_type, "START");
        assert_eq!(records[0].payload_size, Some(12));
        assert_eq!(records[1].record_type, "CORRUPT");
        assert_eq!(records[2].txid, Some(1));

        assert_eq!(read_records(&path, Some(1)).unwrap().len(), 1);
    }
}
