//! WAL replay for crash recovery.
//!
//! Reads [`WalHeader`] first and replays only up to its
//! `last_valid_offset`; an invalid header is treated as "WAL is empty"
//! rather than fatal, since the main lattice file is authoritative.
//! Within the bounded region, replay stops at the first malformed
//! entry — a torn tail from a crash mid-append, not itself an error —
//! the same stop-on-CRC-mismatch recovery shape as
//! `storage/log_payload.rs::replay_wal_from`.

use std::path::Path;

use tracing::warn;

use crate::error::{Error, IoOp, Result};
use crate::wal::entry::Entry;
use crate::wal::header::{WalHeader, WAL_HEADER_SIZE};

/// Outcome of a full WAL replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayResult {
    /// Entries successfully applied, in file order.
    pub entries: Vec<Entry>,
    /// Whether replay stopped early due to a malformed tail entry within
    /// the header's committed region (expected after a crash mid-flush;
    /// not itself an error).
    pub torn_tail: bool,
}

/// Reads and validates every committed entry in the WAL at `path`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read.
pub fn replay(path: &Path) -> Result<ReplayResult> {
    if !path.exists() {
        return Ok(ReplayResult::default());
    }
    let data = std::fs::read(path).map_err(|e| Error::io(IoOp::Read, e))?;

    if data.len() < WAL_HEADER_SIZE {
        return Ok(ReplayResult::default());
    }
    let header = match WalHeader::decode(&data[..WAL_HEADER_SIZE]) {
        Ok(header) => header,
        Err(_) => return Ok(ReplayResult::default()),
    };
    if header.last_valid_offset == 0 {
        return Ok(ReplayResult::default());
    }

    let body_start = WAL_HEADER_SIZE;
    let body_end = (body_start as u64 + header.last_valid_offset).min(data.len() as u64) as usize;
    let body = &data[body_start..body_end];

    let mut entries = Vec::new();
    let mut offset = 0usize;
    let mut torn_tail = false;

    while offset < body.len() {
        match Entry::decode(&body[offset..], (body_start + offset) as u64) {
            Ok((entry, consumed)) => {
                entries.push(entry);
                offset += consumed;
            }
            Err(err) => {
                warn!(%err, offset, "WAL replay stopped at malformed tail entry");
                torn_tail = true;
                break;
            }
        }
    }

    Ok(ReplayResult { entries, torn_tail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::writer::WalWriter;
    use crate::wal::entry::Op;
    use tempfile::tempdir;

    fn sample_entry(id: u64) -> Entry {
        Entry {
            seq: 0,
            op: Op::Add,
            node_id: id,
            node_type: 0,
            parent_id: 0,
            name: b"name".to_vec(),
            data: b"data".to_vec(),
        }
    }

    #[test]
    fn missing_file_replays_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.log");
        let result = replay(&path).unwrap();
        assert!(result.entries.is_empty());
        assert!(!result.torn_tail);
    }

    #[test]
    fn replays_every_committed_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut writer = WalWriter::open(&path, 100, 60_000).unwrap();
            writer.append(sample_entry(1)).unwrap();
            writer.append(sample_entry(2)).unwrap();
            writer.flush().unwrap();
        }
        let result = replay(&path).unwrap();
        assert_eq!(result.entries.len(), 2);
        assert!(!result.torn_tail);
    }

    #[test]
    fn uncommitted_bytes_past_last_valid_offset_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut writer = WalWriter::open(&path, 100, 60_000).unwrap();
            writer.append(sample_entry(1)).unwrap();
            writer.flush().unwrap();
        }
        // Simulate a header-update failure after a payload write: append
        // raw bytes past last_valid_offset without re-committing the header.
        use std::io::Write as _;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&sample_entry(2).encode()).unwrap();

        let result = replay(&path).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert!(!result.torn_tail);
    }

    #[test]
    fn missing_header_replays_empty_without_erroring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        std::fs::write(&path, b"not a wal file").unwrap();
        let result = replay(&path).unwrap();
        assert!(result.entries.is_empty());
    }
}
