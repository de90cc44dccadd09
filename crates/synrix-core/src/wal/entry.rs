//! Wire format of one WAL entry, bit-exact per the lattice's on-disk
//! contract:
//!
//! ```text
//! seq(8) | op(1) | node_id(8) | payload | crc32(4)
//! ```
//!
//! `payload` for `Add`/`Update` is `type(1) | name_len(4) | name | data_len(4)
//! | data | parent(8)`; for `Delete` it is empty. `crc32` covers every
//! byte from `seq` through the end of `payload`. The marker-then-CRC
//! shape is grounded on `storage/log_payload.rs::store`/`replay_wal_from`,
//! extended with the `seq` counter and `type` tag the lattice format adds.

use crate::crc32::crc32;
use crate::error::{Error, Result};

/// WAL operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// A new node was added.
    Add = 1,
    /// An existing node's name/data/type was replaced.
    Update = 2,
    /// A node was removed.
    Delete = 3,
}

impl Op {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Op::Add),
            2 => Some(Op::Update),
            3 => Some(Op::Delete),
            _ => None,
        }
    }
}

/// One decoded WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Monotonic per-file sequence number.
    pub seq: u64,
    /// Which mutation this entry replays.
    pub op: Op,
    /// Target node id.
    pub node_id: u64,
    /// Domain type tag. Unused for `Delete`.
    pub node_type: u8,
    /// Parent id (zero when none). Unused for `Delete`.
    pub parent_id: u64,
    /// Node name. Empty for `Delete`.
    pub name: Vec<u8>,
    /// Node payload. Empty for `Delete`.
    pub data: Vec<u8>,
}

impl Entry {
    /// Encodes this entry, appending its CRC32 trailer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17 + 17 + self.name.len() + self.data.len() + 4);
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.push(self.op as u8);
        buf.extend_from_slice(&self.node_id.to_le_bytes());

        if self.op != Op::Delete {
            buf.push(self.node_type);
            buf.extend_from_slice(&(self.name.len() as u32).to_le_bytes());
            buf.extend_from_slice(&self.name);
            buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
            buf.extend_from_slice(&self.data);
            buf.extend_from_slice(&self.parent_id.to_le_bytes());
        }

        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes one entry from the front of `buf`, returning the entry and
    /// the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedWalEntry`] if `buf` is truncated, the
    /// op tag is unrecognized, or the trailing CRC does not match.
    /// `offset` only annotates the error with the entry's file position.
    pub fn decode(buf: &[u8], offset: u64) -> Result<(Self, usize)> {
        let malformed = |reason: &str| Error::MalformedWalEntry {
            offset,
            reason: reason.to_string(),
        };

        if buf.len() < 17 {
            return Err(malformed("truncated before seq/op/node_id"));
        }
        let seq = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let op = Op::from_u8(buf[8]).ok_or_else(|| malformed("unrecognized op tag"))?;
        let node_id = u64::from_le_bytes(buf[9..17].try_into().unwrap());

        let (entry, body_len) = if op == Op::Delete {
            (
                Self {
                    seq,
                    op,
                    node_id,
                    node_type: 0,
                    parent_id: 0,
                    name: Vec::new(),
                    data: Vec::new(),
                },
                17,
            )
        } else {
            if buf.len() < 22 {
                return Err(malformed("truncated before type/name_len"));
            }
            let node_type = buf[17];
            let name_len = u32::from_le_bytes(buf[18..22].try_into().unwrap()) as usize;

            let name_end = 22 + name_len;
            if buf.len() < name_end + 4 {
                return Err(malformed("truncated before data_len"));
            }
            let name = buf[22..name_end].to_vec();
            let data_len =
                u32::from_le_bytes(buf[name_end..name_end + 4].try_into().unwrap()) as usize;

            let data_end = name_end + 4 + data_len;
            if buf.len() < data_end + 8 {
                return Err(malformed("truncated before parent_id"));
            }
            let data = buf[name_end + 4..data_end].to_vec();
            let parent_id = u64::from_le_bytes(buf[data_end..data_end + 8].try_into().unwrap());

            (
                Self {
                    seq,
                    op,
                    node_id,
                    node_type,
                    parent_id,
                    name,
                    data,
                },
                data_end + 8,
            )
        };

        if buf.len() < body_len + 4 {
            return Err(malformed("truncated before CRC trailer"));
        }
        let stored_crc = u32::from_le_bytes(buf[body_len..body_len + 4].try_into().unwrap());
        let computed_crc = crc32(&buf[..body_len]);
        if stored_crc != computed_crc {
            return Err(malformed(&format!(
                "CRC mismatch: expected {computed_crc:#010x}, found {stored_crc:#010x}"
            )));
        }

        Ok((entry, body_len + 4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_entry() -> Entry {
        Entry {
            seq: 1,
            op: Op::Add,
            node_id: 7,
            node_type: 5,
            parent_id: 0,
            name: b"PATTERN:rust:ownership".to_vec(),
            data: b"borrow checker notes".to_vec(),
        }
    }

    #[test]
    fn add_entry_round_trips() {
        let entry = add_entry();
        let encoded = entry.encode();
        let (decoded, consumed) = Entry::decode(&encoded, 0).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn delete_entry_round_trips() {
        let entry = Entry {
            seq: 2,
            op: Op::Delete,
            node_id: 99,
            node_type: 0,
            parent_id: 0,
            name: Vec::new(),
            data: Vec::new(),
        };
        let encoded = entry.encode();
        let (decoded, consumed) = Entry::decode(&encoded, 0).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn rejects_truncated_tail() {
        let encoded = add_entry().encode();
        let truncated = &encoded[..encoded.len() - 2];
        assert!(Entry::decode(truncated, 0).is_err());
    }

    #[test]
    fn rejects_corrupted_crc() {
        let mut encoded = add_entry().encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        let err = Entry::decode(&encoded, 0).unwrap_err();
        assert!(matches!(err, Error::MalformedWalEntry { .. }));
    }

    #[test]
    fn rejects_unknown_op() {
        let mut encoded = add_entry().encode();
        encoded[8] = 0xAA;
        assert!(Entry::decode(&encoded, 0).is_err());
    }

    #[test]
    fn two_entries_back_to_back_decode_independently() {
        let first = add_entry();
        let mut second = add_entry();
        second.seq = 2;
        second.node_id = 8;
        let mut buf = first.encode();
        buf.extend_from_slice(&second.encode());

        let (decoded_first, consumed) = Entry::decode(&buf, 0).unwrap();
        assert_eq!(decoded_first, first);
        let (decoded_second, _) = Entry::decode(&buf[consumed..], consumed as u64).unwrap();
        assert_eq!(decoded_second, second);
    }

    #[test]
    fn empty_name_and_data_round_trip() {
        let mut entry = add_entry();
        entry.name.clear();
        entry.data.clear();
        let encoded = entry.encode();
        let (decoded, _) = Entry::decode(&encoded, 0).unwrap();
        assert_eq!(decoded, entry);
    }
}
