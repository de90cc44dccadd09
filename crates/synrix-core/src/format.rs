//! On-disk layout of the lattice file: the fixed 4 KiB header and the
//! fixed-stride cell array that follows it.
//!
//! All multi-byte integers are little-endian. The header and cell are
//! each a fixed-size encode/decode pair, following the
//! `FileHeader`/`ChecksummedHeader` split used by `ferrisdb-storage`'s
//! WAL header, generalized into one [`ChecksummedStruct`] trait shared
//! between [`Header`] and [`crate::wal::header::WalHeader`].

use crate::crc32::crc32;
use crate::error::{Error, Result};

/// ASCII magic identifying a SYNRIX lattice file.
pub const LATTICE_MAGIC: &[u8; 8] = b"SYNRIX01";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the lattice header block in bytes. Fixed for the life of the
/// format.
pub const HEADER_SIZE: usize = 4096;

/// Hard, compiled-in maximum length of a node's `name` field. Per-call
/// validation may apply a tighter [`crate::config::EngineOptions::name_max`].
pub const NAME_MAX: usize = 256;

/// Hard, compiled-in maximum length of a node's `data` field. Per-call
/// validation may apply a tighter [`crate::config::EngineOptions::data_max`].
pub const DATA_MAX: usize = 510;

/// Fixed byte size of a cell's metadata fields, excluding `name`/`data`:
/// `flags`(1) + `type`(1) + `reserved`(2) + `name_len`(2) + `data_len`(4)
/// + `id`(8) + `parent_id`(8) + `created_at`(8) = 34.
pub const CELL_HEADER_SIZE: usize = 34;

/// A type whose on-disk encoding carries a CRC32 checksum over every
/// field except the checksum field itself.
pub trait ChecksummedStruct {
    /// Recomputes the checksum from the struct's current field values.
    fn calculate_checksum(&self) -> u32;
    /// Returns the checksum as currently stored in the struct.
    fn stored_checksum(&self) -> u32;

    /// Returns `Ok(())` if the stored checksum matches the recomputed one.
    fn verify_checksum(&self) -> Result<()> {
        let expected = self.calculate_checksum();
        let actual = self.stored_checksum();
        if expected != actual {
            return Err(Error::CorruptFile(format!(
                "checksum mismatch: expected {expected:#010x}, found {actual:#010x}"
            )));
        }
        Ok(())
    }
}

/// The fixed 4 KiB lattice header.
///
/// ```text
/// magic         : [u8; 8]   offset 0
/// version       : u32       offset 8
/// cell_size     : u32       offset 12
/// max_nodes     : u64       offset 16
/// live_count    : u64       offset 24
/// next_id       : u64       offset 32
/// created_at    : u64       offset 40
/// modified_at   : u64       offset 48
/// checksum      : u32       offset 56
/// reserved      : zero pad  offset 60 .. 4096
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format magic, always [`LATTICE_MAGIC`] for a valid file.
    pub magic: [u8; 8],
    /// On-disk format version.
    pub version: u32,
    /// Cell stride in bytes. Immutable for the life of the file.
    pub cell_size: u32,
    /// Configured maximum node count. Immutable for the life of the file.
    pub max_nodes: u64,
    /// Advisory live-node count; the authoritative count is a scan on open.
    pub live_count: u64,
    /// Monotonic node-id allocator cursor.
    pub next_id: u64,
    /// File creation timestamp (engine-epoch nanoseconds).
    pub created_at: u64,
    /// Last-modified timestamp (engine-epoch nanoseconds).
    pub modified_at: u64,
    /// CRC32 over every preceding field.
    pub checksum: u32,
}

impl Header {
    /// Builds a fresh header for a newly created lattice file.
    #[must_use]
    pub fn new(cell_size: u32, max_nodes: u64, now_ns: u64) -> Self {
        let mut header = Self {
            magic: *LATTICE_MAGIC,
            version: FORMAT_VERSION,
            cell_size,
            max_nodes,
            live_count: 0,
            next_id: 1,
            created_at: now_ns,
            modified_at: now_ns,
            checksum: 0,
        };
        header.checksum = header.calculate_checksum();
        header
    }

    /// Encodes the header into a fixed [`HEADER_SIZE`]-byte buffer,
    /// zero-padded.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.cell_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.max_nodes.to_le_bytes());
        buf[24..32].copy_from_slice(&self.live_count.to_le_bytes());
        buf[32..40].copy_from_slice(&self.next_id.to_le_bytes());
        buf[40..48].copy_from_slice(&self.created_at.to_le_bytes());
        buf[48..56].copy_from_slice(&self.modified_at.to_le_bytes());
        buf[56..60].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decodes and validates a header from the first [`HEADER_SIZE`]
    /// bytes of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFile`] if `data` is too short, the magic
    /// or version is unrecognized, or the checksum does not match.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::CorruptFile(format!(
                "lattice header too small: {} bytes (expected {HEADER_SIZE})",
                data.len()
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);
        let version = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let cell_size = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let max_nodes = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let live_count = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let next_id = u64::from_le_bytes(data[32..40].try_into().unwrap());
        let created_at = u64::from_le_bytes(data[40..48].try_into().unwrap());
        let modified_at = u64::from_le_bytes(data[48..56].try_into().unwrap());
        let checksum = u32::from_le_bytes(data[56..60].try_into().unwrap());

        let header = Self {
            magic,
            version,
            cell_size,
            max_nodes,
            live_count,
            next_id,
            created_at,
            modified_at,
            checksum,
        };

        if &header.magic != LATTICE_MAGIC {
            return Err(Error::CorruptFile(format!(
                "bad magic: expected {LATTICE_MAGIC:?}, found {:?}",
                header.magic
            )));
        }
        if header.version != FORMAT_VERSION {
            return Err(Error::CorruptFile(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                header.version
            )));
        }
        header.verify_checksum()?;

        Ok(header)
    }
}

impl ChecksummedStruct for Header {
    fn calculate_checksum(&self) -> u32 {
        let mut buf = Vec::with_capacity(56);
        buf.extend_from_slice(&self.magic);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.cell_size.to_le_bytes());
        buf.extend_from_slice(&self.max_nodes.to_le_bytes());
        buf.extend_from_slice(&self.live_count.to_le_bytes());
        buf.extend_from_slice(&self.next_id.to_le_bytes());
        buf.extend_from_slice(&self.created_at.to_le_bytes());
        buf.extend_from_slice(&self.modified_at.to_le_bytes());
        crc32(&buf)
    }

    fn stored_checksum(&self) -> u32 {
        self.checksum
    }
}

/// Cell flag bit: the slot holds a live node.
pub const FLAG_LIVE: u8 = 0b0000_0001;
/// Cell flag bit: the live node is tombstoned (logically deleted).
pub const FLAG_TOMBSTONE: u8 = 0b0000_0010;

/// Node type tag reserved by the engine for a normally-live node.
pub const TYPE_NORMAL: u8 = 0;
/// Node type tag reserved by the engine to mark a tombstoned node.
pub const TYPE_TOMBSTONE: u8 = 1;

/// In-memory view of one fixed-stride on-disk cell.
///
/// `name`/`data` are stored at their full [`NAME_MAX`]/[`DATA_MAX`]
/// capacity on disk, zero-padded past `name_len`/`data_len`; this struct
/// holds only the logical (unpadded) bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Whether the slot is occupied.
    pub live: bool,
    /// Whether the occupying node is tombstoned.
    pub tombstone: bool,
    /// Domain type tag (opaque to the engine beyond normal/tombstone).
    pub node_type: u8,
    /// Node identifier.
    pub id: u64,
    /// Optional parent reference (0 = none).
    pub parent_id: u64,
    /// Creation timestamp (engine-epoch nanoseconds).
    pub created_at: u64,
    /// Logical name bytes (unpadded).
    pub name: Vec<u8>,
    /// Logical payload bytes (unpadded).
    pub data: Vec<u8>,
}

impl Cell {
    /// Encodes the cell into a `cell_size`-byte buffer, zero-padded.
    ///
    /// # Panics
    ///
    /// Panics if `name`/`data` exceed [`NAME_MAX`]/[`DATA_MAX`], or if
    /// `cell_size` is smaller than [`CELL_HEADER_SIZE`] + [`NAME_MAX`] +
    /// [`DATA_MAX`]. Callers must validate field lengths before encoding;
    /// the engine enforces this at `add`/`update` time.
    #[must_use]
    pub fn encode(&self, cell_size: usize) -> Vec<u8> {
        assert!(self.name.len() <= NAME_MAX, "name exceeds NAME_MAX");
        assert!(self.data.len() <= DATA_MAX, "data exceeds DATA_MAX");
        assert!(
            cell_size >= CELL_HEADER_SIZE + NAME_MAX + DATA_MAX,
            "cell_size too small for NAME_MAX/DATA_MAX"
        );

        let mut buf = vec![0u8; cell_size];
        let mut flags = 0u8;
        if self.live {
            flags |= FLAG_LIVE;
        }
        if self.tombstone {
            flags |= FLAG_TOMBSTONE;
        }
        buf[0] = flags;
        buf[1] = self.node_type;
        // buf[2..4] reserved, stays zero
        buf[4..6].copy_from_slice(&(self.name.len() as u16).to_le_bytes());
        buf[6..10].copy_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf[10..18].copy_from_slice(&self.id.to_le_bytes());
        buf[18..26].copy_from_slice(&self.parent_id.to_le_bytes());
        buf[26..34].copy_from_slice(&self.created_at.to_le_bytes());

        let name_start = CELL_HEADER_SIZE;
        buf[name_start..name_start + self.name.len()].copy_from_slice(&self.name);

        let data_start = CELL_HEADER_SIZE + NAME_MAX;
        buf[data_start..data_start + self.data.len()].copy_from_slice(&self.data);

        buf
    }

    /// Decodes a cell from the first `cell_size` bytes of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFile`] if `data` is too short or the
    /// encoded `name_len`/`data_len` exceed their field capacity.
    pub fn decode(data: &[u8], cell_size: usize) -> Result<Self> {
        if data.len() < cell_size {
            return Err(Error::CorruptFile(format!(
                "cell too small: {} bytes (expected {cell_size})",
                data.len()
            )));
        }

        let flags = data[0];
        let node_type = data[1];
        let name_len = u16::from_le_bytes([data[4], data[5]]) as usize;
        let data_len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        let id = u64::from_le_bytes(data[10..18].try_into().unwrap());
        let parent_id = u64::from_le_bytes(data[18..26].try_into().unwrap());
        let created_at = u64::from_le_bytes(data[26..34].try_into().unwrap());

        if name_len > NAME_MAX || data_len > DATA_MAX {
            return Err(Error::CorruptFile(format!(
                "cell id={id} declares name_len={name_len}/data_len={data_len} beyond capacity"
            )));
        }

        let name_start = CELL_HEADER_SIZE;
        let name = data[name_start..name_start + name_len].to_vec();
        let data_start = CELL_HEADER_SIZE + NAME_MAX;
        let payload = data[data_start..data_start + data_len].to_vec();

        Ok(Self {
            live: flags & FLAG_LIVE != 0,
            tombstone: flags & FLAG_TOMBSTONE != 0,
            node_type,
            id,
            parent_id,
            created_at,
            name,
            data: payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cell() -> Cell {
        Cell {
            live: true,
            tombstone: false,
            node_type: 5,
            id: 42,
            parent_id: 0,
            created_at: 123_456,
            name: b"PATTERN:python:sort".to_vec(),
            data: b"quicksort is unstable".to_vec(),
        }
    }

    #[test]
    fn header_round_trips() {
        let header = Header::new(1024, 1000, 42);
        let encoded = header.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn header_size_is_4096() {
        assert_eq!(HEADER_SIZE, 4096);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let header = Header::new(1024, 1000, 42);
        let mut encoded = header.encode();
        encoded[0] = b'X';
        assert!(Header::decode(&encoded).is_err());
    }

    #[test]
    fn header_rejects_corrupted_checksum() {
        let header = Header::new(1024, 1000, 42);
        let mut encoded = header.encode();
        encoded[45] ^= 0xFF;
        let err = Header::decode(&encoded).unwrap_err();
        assert!(matches!(err, Error::CorruptFile(_)));
    }

    #[test]
    fn cell_round_trips_at_default_cell_size() {
        let cell = sample_cell();
        let encoded = cell.encode(1024);
        assert_eq!(encoded.len(), 1024);
        let decoded = Cell::decode(&encoded, 1024).unwrap();
        assert_eq!(cell, decoded);
    }

    #[test]
    fn cell_trailing_bytes_are_zeroed() {
        let cell = sample_cell();
        let encoded = cell.encode(1024);
        let name_start = CELL_HEADER_SIZE + cell.name.len();
        let name_end = CELL_HEADER_SIZE + NAME_MAX;
        assert!(encoded[name_start..name_end].iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_data_round_trips() {
        let mut cell = sample_cell();
        cell.data.clear();
        let encoded = cell.encode(1024);
        let decoded = Cell::decode(&encoded, 1024).unwrap();
        assert_eq!(decoded.data.len(), 0);
    }

    #[test]
    fn name_at_exact_max_round_trips() {
        let mut cell = sample_cell();
        cell.name = vec![b'a'; NAME_MAX];
        let encoded = cell.encode(1024);
        let decoded = Cell::decode(&encoded, 1024).unwrap();
        assert_eq!(decoded.name.len(), NAME_MAX);
    }

    #[test]
    fn decode_rejects_declared_len_beyond_capacity() {
        let mut buf = vec![0u8; 1024];
        buf[4..6].copy_from_slice(&(NAME_MAX as u16 + 1).to_le_bytes());
        let err = Cell::decode(&buf, 1024).unwrap_err();
        assert!(matches!(err, Error::CorruptFile(_)));
    }

    #[test]
    #[should_panic(expected = "name exceeds NAME_MAX")]
    fn encode_panics_on_oversized_name() {
        let mut cell = sample_cell();
        cell.name = vec![b'a'; NAME_MAX + 1];
        let _ = cell.encode(1024);
    }
}
