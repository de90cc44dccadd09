//! Fixed-size header at the front of every WAL file.
//!
//! Tracks how far the entry log is durably committed, so recovery can
//! stop exactly at `last_valid_offset` instead of having to probe the
//! file for a torn tail. Shares [`ChecksummedStruct`] with the lattice
//! [`crate::format::Header`], following the header/entry/writer/reader
//! module split used by `ferrisdb-storage`'s `wal` module.

use crate::crc32::crc32;
use crate::error::{Error, Result};
use crate::format::ChecksummedStruct;

/// ASCII magic identifying a SYNRIX WAL file.
pub const WAL_MAGIC: &[u8; 8] = b"SYNXWAL1";

/// Current WAL format version.
pub const WAL_FORMAT_VERSION: u32 = 1;

/// Size of the WAL header block in bytes. Entries begin immediately
/// after it.
pub const WAL_HEADER_SIZE: usize = 64;

/// The fixed header block at offset 0 of a WAL file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    /// Format magic, always [`WAL_MAGIC`] for a valid WAL file.
    pub magic: [u8; 8],
    /// WAL format version.
    pub version: u32,
    /// Number of entries durably committed (flushed + header synced).
    pub commit_count: u64,
    /// Byte offset, relative to the end of this header, up to which
    /// entries are known-durable. Recovery replays only up to here.
    pub last_valid_offset: u64,
    /// CRC32 over every preceding field.
    pub checksum: u32,
}

impl WalHeader {
    /// Builds a fresh, empty WAL header.
    #[must_use]
    pub fn new() -> Self {
        let mut header = Self {
            magic: *WAL_MAGIC,
            version: WAL_FORMAT_VERSION,
            commit_count: 0,
            last_valid_offset: 0,
            checksum: 0,
        };
        header.checksum = header.calculate_checksum();
        header
    }

    /// Encodes the header into a fixed [`WAL_HEADER_SIZE`]-byte buffer,
    /// zero-padded.
    #[must_use]
    pub fn encode(&self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..20].copy_from_slice(&self.commit_count.to_le_bytes());
        buf[20..28].copy_from_slice(&self.last_valid_offset.to_le_bytes());
        buf[28..32].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decodes a header from the first [`WAL_HEADER_SIZE`] bytes of
    /// `data`. An invalid magic/version/checksum is treated by callers
    /// as "WAL is empty" rather than fatal, per spec: the main lattice
    /// file is authoritative.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFile`] if `data` is too short, the magic
    /// or version is unrecognized, or the checksum does not match.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < WAL_HEADER_SIZE {
            return Err(Error::CorruptFile(format!(
                "WAL header too small: {} bytes (expected {WAL_HEADER_SIZE})",
                data.len()
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);
        let version = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let commit_count = u64::from_le_bytes(data[12..20].try_into().unwrap());
        let last_valid_offset = u64::from_le_bytes(data[20..28].try_into().unwrap());
        let checksum = u32::from_le_bytes(data[28..32].try_into().unwrap());

        let header = Self {
            magic,
            version,
            commit_count,
            last_valid_offset,
            checksum,
        };

        if &header.magic != WAL_MAGIC {
            return Err(Error::CorruptFile("bad WAL magic".to_string()));
        }
        if header.version != WAL_FORMAT_VERSION {
            return Err(Error::CorruptFile(format!(
                "unsupported WAL version {}",
                header.version
            )));
        }
        header.verify_checksum()?;
        Ok(header)
    }
}

impl Default for WalHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksummedStruct for WalHeader {
    fn calculate_checksum(&self) -> u32 {
        let mut buf = Vec::with_capacity(28);
        buf.extend_from_slice(&self.magic);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.commit_count.to_le_bytes());
        buf.extend_from_slice(&self.last_valid_offset.to_le_bytes());
        crc32(&buf)
    }

    fn stored_checksum(&self) -> u32 {
        self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut header = WalHeader::new();
        header.commit_count = 42;
        header.last_valid_offset = 1024;
        header.checksum = header.calculate_checksum();
        let encoded = header.encode();
        let decoded = WalHeader::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let header = WalHeader::new();
        let mut encoded = header.encode();
        encoded[0] = b'X';
        assert!(WalHeader::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let header = WalHeader::new();
        let mut encoded = header.encode();
        encoded[15] ^= 0xFF;
        assert!(WalHeader::decode(&encoded).is_err());
    }
}
