//! The top-level `Engine`: wires the platform layer, on-disk format,
//! node store, name index, WAL, and license/admission check into the
//! public library surface.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::format::{Cell, ChecksummedStruct, Header, TYPE_NORMAL, TYPE_TOMBSTONE};
use crate::license::{self, Tier};
use crate::name_index::NameIndex;
use crate::node_store::NodeStore;
use crate::platform::{self, LatticeFile};
use crate::wal::{self, Entry, Op, WalWriter};

/// A node as returned to callers: the logical view of a [`Cell`],
/// without the on-disk `live`/`tombstone` bookkeeping bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Node identifier.
    pub id: u64,
    /// Domain type tag.
    pub node_type: u8,
    /// Node name.
    pub name: Vec<u8>,
    /// Node payload.
    pub data: Vec<u8>,
    /// Optional parent reference (0 = none).
    pub parent_id: u64,
    /// Creation timestamp (engine-epoch nanoseconds).
    pub created_at: u64,
}

impl Node {
    fn from_cell(cell: Cell) -> Self {
        Self {
            id: cell.id,
            node_type: cell.node_type,
            name: cell.name,
            data: cell.data,
            parent_id: cell.parent_id,
            created_at: cell.created_at,
        }
    }
}

/// Point-in-time engine statistics, supplementing the core spec surface
/// for observability (never persisted; recomputed on request).
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    /// Currently live, non-tombstoned node count.
    pub live_count: u64,
    /// Configured maximum node count for this file.
    pub max_nodes: u64,
    /// Active admission tier.
    pub tier: u8,
    /// Admission cap for the active tier.
    pub tier_limit: u64,
    /// Fraction of slots that are free or tombstoned.
    pub fragmentation_ratio: f64,
    /// Distinct names currently indexed.
    pub distinct_names: usize,
    /// Entries currently buffered in the WAL awaiting flush (0 if the WAL
    /// is disabled).
    pub wal_buffered_entries: u64,
    /// Unix timestamp (seconds) of the last successful `checkpoint`, or
    /// `None` if this engine instance has never checkpointed.
    pub last_checkpoint_at: Option<u32>,
}

/// Read-only fragmentation visibility, distinct from actually compacting
/// the lattice (full tombstone compaction is not implemented; see
/// `spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactReport {
    /// Fraction of slots that are free or tombstoned.
    pub fragmentation_ratio: f64,
    /// Currently live, non-tombstoned node count.
    pub live_count: u64,
    /// Slots that are free or tombstoned and could be reclaimed by a
    /// future compaction pass.
    pub reclaimable_slots: u64,
    /// Configured maximum node count for this file.
    pub max_nodes: u64,
}

fn now_unix_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// An open lattice file: the engine's single public entry point.
///
/// `Engine` is `!Sync` by construction (all mutation goes through `&mut
/// self`); concurrent reader access from other threads is expected to
/// happen through `Arc<Mutex<Engine>>` or an equivalent caller-owned
/// wrapper, per spec §5's single-writer-mutex model.
pub struct Engine {
    lattice_path: PathBuf,
    cell_size: u32,
    max_nodes: u64,
    store: NodeStore,
    names: NameIndex,
    wal: Option<WalWriter>,
    options: EngineOptions,
    tier: Tier,
    header_next_id: Mutex<u64>,
    entries_replayed: u64,
    last_checkpoint_at: Option<u32>,
}

impl Engine {
    /// Opens (creating if absent) the lattice file at `path`, replaying
    /// its WAL and rebuilding the name index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFile`] if an existing file fails header
    /// validation, or [`Error::Io`] if any underlying file operation
    /// fails.
    pub fn open(path: impl AsRef<Path>, max_nodes: u64, options: EngineOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let cell_size = options.cell_size;

        let mut file = LatticeFile::open(&path)?;
        let existing_len = file.len()?;
        let required_len = u64::from(crate::format::HEADER_SIZE as u32) + max_nodes * u64::from(cell_size);

        let header = if existing_len == 0 {
            file.set_len(required_len, options.preallocate)?;
            let header = Header::new(cell_size, max_nodes, platform::now_ns());
            file.remap()?;
            file.mmap_mut().unwrap()[..crate::format::HEADER_SIZE]
                .copy_from_slice(&header.encode());
            file.sync()?;
            header
        } else {
            file.remap()?;
            let bytes = file.mmap().unwrap()[..crate::format::HEADER_SIZE].to_vec();
            Header::decode(&bytes)?
        };

        let mut store = NodeStore::new(file, cell_size as usize, header.max_nodes);
        store.rebuild_index()?;

        let mut names = NameIndex::new();
        for cell in store.live_cells()? {
            names.insert(&cell.name, cell.id);
        }

        let key = license::find_key(options.license_key.as_deref());
        let tier = license::resolve_tier(key.as_deref(), now_unix_secs());

        let mut engine = Self {
            lattice_path: path,
            cell_size,
            max_nodes: header.max_nodes,
            store,
            names,
            wal: None,
            options: options.clone(),
            tier,
            header_next_id: Mutex::new(header.next_id),
            entries_replayed: 0,
            last_checkpoint_at: None,
        };

        if options.wal_enabled {
            let wal_path = engine.wal_path();
            let mut wal = WalWriter::open(&wal_path, options.wal_flush_batch, options.wal_flush_interval_ms)?;
            let replay_result = wal::replay(&wal_path)?;
            if replay_result.torn_tail {
                tracing::warn!("WAL tail was torn; truncating to last committed entry");
            }
            for entry in replay_result.entries {
                engine.apply_replayed(&entry)?;
                engine.entries_replayed += 1;
            }
            tracing::info!(entries_replayed = engine.entries_replayed, "WAL recovery complete");
            wal.flush()?;
            engine.wal = Some(wal);
        }

        Ok(engine)
    }

    /// Number of WAL entries replayed during this `open`'s recovery pass
    /// (0 if the file was freshly created, the WAL was disabled, or
    /// nothing needed replay).
    #[must_use]
    pub fn entries_replayed(&self) -> u64 {
        self.entries_replayed
    }

    fn wal_path(&self) -> PathBuf {
        let mut path = self.lattice_path.clone().into_os_string();
        path.push(".wal");
        PathBuf::from(path)
    }

    /// Applies one already-validated WAL entry during recovery,
    /// bypassing admission control. Duplicate `add`s (already reflected
    /// in the main file) are skipped rather than treated as errors.
    fn apply_replayed(&mut self, entry: &Entry) -> Result<()> {
        match entry.op {
            Op::Add => {
                if self.store.get(entry.node_id).is_ok() {
                    return Ok(());
                }
                self.store.add(
                    entry.node_id,
                    entry.parent_id,
                    platform::now_ns(),
                    entry.name.clone(),
                    entry.data.clone(),
                )?;
                self.names.insert(&entry.name, entry.node_id);
            }
            Op::Update => {
                if let Ok(old) = self.store.get(entry.node_id) {
                    self.names.rename(&old.name, &entry.name, entry.node_id);
                    self.store
                        .update(entry.node_id, entry.name.clone(), entry.data.clone())?;
                }
            }
            Op::Delete => {
                if let Ok(old) = self.store.get(entry.node_id) {
                    self.names.remove(&old.name, entry.node_id);
                    let _ = self.store.delete(entry.node_id);
                }
            }
        }
        Ok(())
    }

    /// Inserts a new node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LimitExceeded`] if the admission cap is hit,
    /// [`Error::CapacityFull`] if no slots remain, or
    /// [`Error::ArgumentOutOfRange`] if `name`/`data` are invalid.
    pub fn add(&mut self, node_type: u8, name: &[u8], data: &[u8], parent_id: u64) -> Result<u64> {
        self.validate_field_lengths(name, data)?;

        let live = self.store.live_count();
        let limit = self.tier.limit();
        if live + 1 > limit {
            return Err(Error::LimitExceeded {
                live,
                limit,
                tier: self.tier.as_u8(),
            });
        }

        let id = self.allocate_id(name);
        let created_at = platform::now_ns();

        // Durable log before in-memory mutation: if the append fails, the
        // store/index are left untouched rather than diverged from the WAL.
        if let Some(wal) = &mut self.wal {
            wal.append(Entry {
                seq: 0,
                op: Op::Add,
                node_id: id,
                node_type,
                parent_id,
                name: name.to_vec(),
                data: data.to_vec(),
            })?;
        }

        self.store.add(id, parent_id, created_at, name.to_vec(), data.to_vec())?;
        self.names.insert(name, id);

        Ok(id)
    }

    /// Enforces the configured soft `name_max`/`data_max` caps from
    /// [`EngineOptions`], ahead of (and tighter than, by default) the hard
    /// compiled-in `NAME_MAX`/`DATA_MAX` field widths that [`NodeStore`]
    /// itself always enforces regardless of configuration.
    fn validate_field_lengths(&self, name: &[u8], data: &[u8]) -> Result<()> {
        if name.len() > usize::from(self.options.name_max) {
            return Err(Error::ArgumentOutOfRange(format!(
                "name length {} exceeds configured name_max {}",
                name.len(),
                self.options.name_max
            )));
        }
        if data.len() > self.options.data_max as usize {
            return Err(Error::ArgumentOutOfRange(format!(
                "data length {} exceeds configured data_max {}",
                data.len(),
                self.options.data_max
            )));
        }
        Ok(())
    }

    /// Generates a unique node id: a hash of `name` plus a monotonic
    /// counter, re-rolled on collision, matching the data model's
    /// "hash of name + monotonic counter... collisions resolved at
    /// insert time" allowance.
    fn allocate_id(&self, name: &[u8]) -> u64 {
        let mut next_id = self.header_next_id.lock();
        loop {
            let candidate = crate::crc32::crc32(name) as u64 ^ (*next_id << 32);
            *next_id += 1;
            if self.store.get(candidate).is_err() {
                return candidate;
            }
        }
    }

    /// Reads the live node at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` has no live cell.
    pub fn get(&self, id: u64) -> Result<Node> {
        self.store.get(id).map(Node::from_cell)
    }

    /// Replaces the `data` (and optionally `type`) of the live node at
    /// `id`, keeping its name unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` has no live cell, or
    /// [`Error::ArgumentOutOfRange`] if `data` is invalid.
    pub fn update(&mut self, id: u64, data: &[u8], node_type: Option<u8>) -> Result<()> {
        let old = self.store.get(id)?;
        self.validate_field_lengths(&old.name, data)?;
        let name = old.name.clone();

        if let Some(wal) = &mut self.wal {
            wal.append(Entry {
                seq: 0,
                op: Op::Update,
                node_id: id,
                node_type: node_type.unwrap_or(old.node_type),
                parent_id: old.parent_id,
                name: name.clone(),
                data: data.to_vec(),
            })?;
        }

        self.store.update(id, name, data.to_vec())?;
        Ok(())
    }

    /// Tombstones the live node at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` has no live cell.
    pub fn delete(&mut self, id: u64) -> Result<()> {
        let old = self.store.get(id)?;

        if let Some(wal) = &mut self.wal {
            wal.append(Entry {
                seq: 0,
                op: Op::Delete,
                node_id: id,
                node_type: TYPE_TOMBSTONE,
                parent_id: 0,
                name: Vec::new(),
                data: Vec::new(),
            })?;
        }

        self.store.delete(id)?;
        self.names.remove(&old.name, id);
        Ok(())
    }

    /// Returns every id registered under the exact name `name`.
    #[must_use]
    pub fn find_by_name(&self, name: &[u8]) -> Vec<u64> {
        self.names.find_exact(name)
    }

    /// Returns up to `limit` nodes (`0` = unlimited) whose name starts
    /// with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] only in the pathological case where
    /// the index references an id no longer present in the store (a
    /// consistency bug, not a normal caller error).
    pub fn find_by_prefix(&self, prefix: &[u8], limit: usize) -> Result<Vec<Node>> {
        self.names
            .find_prefix(prefix, limit)
            .into_iter()
            .map(|id| self.store.get(id).map(Node::from_cell))
            .collect()
    }

    /// Forces every buffered WAL entry to disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the underlying flush fails.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(wal) = &mut self.wal {
            wal.flush()?;
        }
        Ok(())
    }

    /// Atomically writes the current mapped contents to disk. Does not
    /// touch the WAL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if any step of the atomic replace fails.
    pub fn save(&mut self) -> Result<()> {
        self.store.file_sync()?;

        let mut header = Header::new(self.cell_size, self.max_nodes, platform::now_ns());
        header.live_count = self.store.live_count();
        header.next_id = *self.header_next_id.lock();
        header.checksum = header.calculate_checksum();

        let tmp_path = {
            let mut p = self.lattice_path.clone().into_os_string();
            p.push(".tmp");
            PathBuf::from(p)
        };
        std::fs::copy(&self.lattice_path, &tmp_path).map_err(|e| Error::io(crate::error::IoOp::Write, e))?;
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut tmp = std::fs::OpenOptions::new()
                .write(true)
                .open(&tmp_path)
                .map_err(|e| Error::io(crate::error::IoOp::Write, e))?;
            tmp.seek(SeekFrom::Start(0))
                .map_err(|e| Error::io(crate::error::IoOp::Write, e))?;
            tmp.write_all(&header.encode())
                .map_err(|e| Error::io(crate::error::IoOp::Write, e))?;
            tmp.sync_all().map_err(|e| Error::io(crate::error::IoOp::Sync, e))?;
        }
        self.store.replace_backing_file(&tmp_path, &self.lattice_path)?;
        Ok(())
    }

    /// Flushes the WAL, replays anything unapplied, saves, then resets
    /// the WAL to empty.
    ///
    /// # Errors
    ///
    /// Returns an error if any constituent step fails; the WAL is only
    /// reset once `save()` has succeeded.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.flush()?;
        self.save()?;
        if let Some(wal) = &mut self.wal {
            wal.checkpoint_reset()?;
        }
        self.last_checkpoint_at = Some(now_unix_secs());
        Ok(())
    }

    /// Flushes the WAL buffer (not a full checkpoint) and releases the
    /// engine's file handles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final flush fails.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    /// Point-in-time statistics, supplementing the core spec's public
    /// surface for callers that want engine health without scanning the
    /// lattice themselves.
    #[must_use]
    pub fn stats(&self) -> Stats {
        Stats {
            live_count: self.store.live_count(),
            max_nodes: self.max_nodes,
            tier: self.tier.as_u8(),
            tier_limit: self.tier.limit(),
            fragmentation_ratio: self.store.fragmentation_ratio(),
            distinct_names: self.names.name_count(),
            wal_buffered_entries: self.wal.as_ref().map_or(0, WalWriter::pending_count),
            last_checkpoint_at: self.last_checkpoint_at,
        }
    }

    /// Read-only fragmentation visibility: how many slots are free or
    /// tombstoned right now. Does not compact or mutate anything; full
    /// tombstone compaction remains unimplemented (see `spec.md` §3).
    #[must_use]
    pub fn compact_report(&self) -> CompactReport {
        let live_count = self.store.live_count();
        CompactReport {
            fragmentation_ratio: self.store.fragmentation_ratio(),
            live_count,
            reclaimable_slots: self.max_nodes.saturating_sub(live_count),
            max_nodes: self.max_nodes,
        }
    }
}
