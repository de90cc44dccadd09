//! Fixed-slot cell array backing the lattice file.
//!
//! Slot allocation reuses a [`RoaringBitmap`] free-list and an
//! `id -> slot` [`FxHashMap`], the same `ID -> offset` index pairing the
//! reference engine uses in its own storage layer. Concurrent access
//! follows a seqlock: each slot has an [`AtomicU32`] version counter
//! bumped odd-then-even around a write, so readers copy a cell's bytes
//! optimistically and retry on a torn read instead of blocking behind a
//! lock — the same "pin it with an epoch, validate on access" shape as
//! the reference engine's epoch-guarded slice access, applied per-cell
//! instead of to the whole mapping.

use std::path::Path;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::format::{Cell, CELL_HEADER_SIZE, DATA_MAX, NAME_MAX};
use crate::platform::{self, LatticeFile};

/// Cells whose version is odd are mid-write; even means stable.
const WRITE_IN_PROGRESS: u32 = 1;

/// Fixed-slot array of [`Cell`]s with lock-free reads against a single
/// serialized writer.
pub struct NodeStore {
    file: LatticeFile,
    cell_size: usize,
    max_nodes: u64,
    cells_ptr: AtomicPtr<u8>,
    remap_epoch: AtomicU64,
    versions: Box<[AtomicU32]>,
    id_to_slot: Mutex<FxHashMap<u64, u32>>,
    free_slots: Mutex<RoaringBitmap>,
    write_lock: Mutex<()>,
}

// SAFETY: `NodeStore` is `Sync` under the invariant that all mutation
// goes through `write_lock` (single writer at a time) while readers use
// the per-cell seqlock in `versions` plus `remap_epoch` to detect and
// retry past a concurrent write or a remap. `cells_ptr` is only ever
// replaced while holding `write_lock`.
unsafe impl Sync for NodeStore {}

impl NodeStore {
    const HEADER_SIZE: usize = crate::format::HEADER_SIZE;

    /// Opens a node store over an already-mapped lattice file whose
    /// header has been validated by the caller.
    #[must_use]
    pub fn new(file: LatticeFile, cell_size: usize, max_nodes: u64) -> Self {
        let versions = (0..max_nodes).map(|_| AtomicU32::new(0)).collect();
        let mut store = Self {
            file,
            cell_size,
            max_nodes,
            cells_ptr: AtomicPtr::new(std::ptr::null_mut()),
            remap_epoch: AtomicU64::new(0),
            versions,
            id_to_slot: Mutex::new(FxHashMap::default()),
            free_slots: Mutex::new(RoaringBitmap::new()),
            write_lock: Mutex::new(()),
        };
        store.refresh_cells_ptr();
        store
    }

    fn refresh_cells_ptr(&mut self) {
        if let Some(mmap) = self.file.mmap_mut() {
            // SAFETY: `mmap` outlives this pointer for as long as no remap
            // happens without going through `refresh_cells_ptr` again, which
            // only runs while `write_lock` is held by the caller of `remap`.
            let ptr = unsafe { mmap.as_mut_ptr().add(Self::HEADER_SIZE) };
            self.cells_ptr.store(ptr, Ordering::Release);
            self.remap_epoch.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Rebuilds `id_to_slot`/`free_slots` by scanning every slot, used at
    /// open time when the header's advisory `live_count` cannot be
    /// trusted without a scan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFile`] if any cell fails to decode.
    pub fn rebuild_index(&mut self) -> Result<()> {
        let mut id_to_slot = FxHashMap::default();
        let mut free_slots = RoaringBitmap::new();

        for slot in 0..self.max_nodes {
            #[allow(clippy::cast_possible_truncation)]
            let slot_u32 = slot as u32;
            let bytes = self.read_raw(slot)?;
            let cell = Cell::decode(&bytes, self.cell_size)?;
            if cell.live && !cell.tombstone {
                id_to_slot.insert(cell.id, slot_u32);
            } else {
                free_slots.insert(slot_u32);
            }
        }

        *self.id_to_slot.lock() = id_to_slot;
        *self.free_slots.lock() = free_slots;
        Ok(())
    }

    fn slot_offset(&self, slot: u64) -> usize {
        slot as usize * self.cell_size
    }

    /// Reads the raw bytes of `slot` using the seqlock retry protocol.
    fn read_raw(&self, slot: u64) -> Result<Vec<u8>> {
        let idx = slot as usize;
        let version_cell = &self.versions[idx];
        let offset = self.slot_offset(slot);

        loop {
            let v1 = version_cell.load(Ordering::Acquire);
            if v1 & WRITE_IN_PROGRESS != 0 {
                std::hint::spin_loop();
                continue;
            }

            let ptr = self.cells_ptr.load(Ordering::Acquire);
            // SAFETY: `ptr` points at the cell array's base as of the last
            // remap; `offset..offset+cell_size` stays within the mapped
            // file because `slot < max_nodes` is enforced by every caller.
            let bytes = unsafe {
                std::slice::from_raw_parts(ptr.add(offset), self.cell_size).to_vec()
            };

            let v2 = version_cell.load(Ordering::Acquire);
            if v1 == v2 {
                return Ok(bytes);
            }
            // version changed mid-read: a writer raced us, retry.
        }
    }

    /// Writes `cell` into `slot`, bracketing the write with a version
    /// bump so concurrent seqlock readers detect and retry the torn read.
    ///
    /// Caller must already hold `write_lock` (acquired by the public
    /// mutation methods below).
    fn write_raw(&mut self, slot: u64, cell: &Cell) -> Result<()> {
        let idx = slot as usize;
        let offset = self.slot_offset(slot);
        let encoded = cell.encode(self.cell_size);

        self.versions[idx].fetch_add(1, Ordering::AcqRel);
        {
            let ptr = self.cells_ptr.load(Ordering::Acquire);
            // SAFETY: `write_lock` (held by every public mutator) guarantees
            // no other writer touches this slot concurrently; readers only
            // observe these bytes after the closing version bump below makes
            // the slot's version even again.
            unsafe {
                std::ptr::copy_nonoverlapping(encoded.as_ptr(), ptr.add(offset), encoded.len());
            }
        }
        self.versions[idx].fetch_add(1, Ordering::Release);

        self.file.sync_range(Self::HEADER_SIZE + offset, self.cell_size)
    }

    /// Allocates a free slot, preferring reuse of a tombstoned one.
    fn allocate_slot(&self) -> Option<u32> {
        let mut free = self.free_slots.lock();
        let slot = free.min();
        if let Some(slot) = slot {
            free.remove(slot);
        }
        slot
    }

    /// Number of currently live (non-tombstoned) nodes.
    #[must_use]
    pub fn live_count(&self) -> u64 {
        self.id_to_slot.lock().len() as u64
    }

    /// Inserts a new node, returning its assigned id's slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityFull`] if no free slot remains, or
    /// [`Error::ArgumentOutOfRange`] if `name`/`data` exceed their hard
    /// field widths.
    pub fn add(&mut self, id: u64, parent_id: u64, created_at: u64, name: Vec<u8>, data: Vec<u8>) -> Result<()> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(Error::ArgumentOutOfRange(format!(
                "name length {} outside 1..={NAME_MAX}",
                name.len()
            )));
        }
        if data.len() > DATA_MAX {
            return Err(Error::ArgumentOutOfRange(format!(
                "data length {} exceeds {DATA_MAX}",
                data.len()
            )));
        }

        let _guard = self.write_lock.lock();
        let slot = self.allocate_slot().ok_or_else(|| Error::CapacityFull {
            live: self.live_count(),
            max: self.max_nodes,
        })?;

        let cell = Cell {
            live: true,
            tombstone: false,
            node_type: crate::format::TYPE_NORMAL,
            id,
            parent_id,
            created_at,
            name,
            data,
        };
        self.write_raw(u64::from(slot), &cell)?;
        self.id_to_slot.lock().insert(id, slot);
        Ok(())
    }

    /// Reads the live node at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` has no live cell, or
    /// [`Error::CorruptFile`] if the slot's bytes fail to decode.
    pub fn get(&self, id: u64) -> Result<Cell> {
        let slot = *self
            .id_to_slot
            .lock()
            .get(&id)
            .ok_or(Error::NotFound(id))?;
        let bytes = self.read_raw(u64::from(slot))?;
        Cell::decode(&bytes, self.cell_size)
    }

    /// Replaces the name/data of the live node at `id`, in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` has no live cell, or
    /// [`Error::ArgumentOutOfRange`] if the new `name`/`data` are invalid.
    pub fn update(&mut self, id: u64, name: Vec<u8>, data: Vec<u8>) -> Result<()> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(Error::ArgumentOutOfRange(format!(
                "name length {} outside 1..={NAME_MAX}",
                name.len()
            )));
        }
        if data.len() > DATA_MAX {
            return Err(Error::ArgumentOutOfRange(format!(
                "data length {} exceeds {DATA_MAX}",
                data.len()
            )));
        }

        let _guard = self.write_lock.lock();
        let slot = *self
            .id_to_slot
            .lock()
            .get(&id)
            .ok_or(Error::NotFound(id))?;

        let mut cell = Cell::decode(&self.read_raw(u64::from(slot))?, self.cell_size)?;
        cell.name = name;
        cell.data = data;
        self.write_raw(u64::from(slot), &cell)
    }

    /// Tombstones the live node at `id` and returns its slot to the free
    /// list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` has no live cell.
    pub fn delete(&mut self, id: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        let slot = self
            .id_to_slot
            .lock()
            .remove(&id)
            .ok_or(Error::NotFound(id))?;

        let mut cell = Cell::decode(&self.read_raw(u64::from(slot))?, self.cell_size)?;
        cell.live = false;
        cell.tombstone = true;
        cell.node_type = crate::format::TYPE_TOMBSTONE;
        self.write_raw(u64::from(slot), &cell)?;
        self.free_slots.lock().insert(slot);
        Ok(())
    }

    /// Returns every live, non-tombstoned cell, for index rebuilds and
    /// full scans (`stats`, `save`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFile`] if any live slot fails to decode.
    pub fn live_cells(&self) -> Result<Vec<Cell>> {
        let slots: Vec<u32> = self.id_to_slot.lock().values().copied().collect();
        slots
            .into_iter()
            .map(|slot| Cell::decode(&self.read_raw(u64::from(slot))?, self.cell_size))
            .collect()
    }

    /// Flushes the entire mapped file (header and cell array) to disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the underlying sync syscall fails.
    pub fn file_sync(&self) -> Result<()> {
        self.file.sync()
    }

    /// Atomically replaces the backing file's contents with `tmp_path`,
    /// publishing it at `dest_path`. On Windows this necessarily unmaps
    /// and reopens the handle (see [`platform::replace_file`]); the cell
    /// pointer is refreshed unconditionally afterward so a Windows remap
    /// is always picked up by concurrent seqlock readers, and a POSIX
    /// rename (which leaves the existing mapping valid) still bumps
    /// `remap_epoch` for consistency across platforms.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] tagged [`crate::error::IoOp::Replace`] if any
    /// step of the platform-specific replace fails.
    pub fn replace_backing_file(&mut self, tmp_path: &Path, dest_path: &Path) -> Result<()> {
        platform::replace_file(tmp_path, dest_path, &mut self.file)?;
        self.refresh_cells_ptr();
        Ok(())
    }

    /// Fragmentation ratio: tombstoned-or-free slots over total capacity.
    #[must_use]
    pub fn fragmentation_ratio(&self) -> f64 {
        if self.max_nodes == 0 {
            return 0.0;
        }
        let live = self.live_count();
        #[allow(clippy::cast_precision_loss)]
        {
            (self.max_nodes - live) as f64 / self.max_nodes as f64
        }
    }
}

const _: () = assert!(CELL_HEADER_SIZE == 34);

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_with_capacity(max_nodes: u64) -> NodeStore {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lattice.db");
        let mut file = LatticeFile::open(&path).unwrap();
        let cell_size = 1024usize;
        file.set_len((crate::format::HEADER_SIZE as u64) + max_nodes * cell_size as u64, true)
            .unwrap();
        file.remap().unwrap();
        let mut store = NodeStore::new(file, cell_size, max_nodes);
        // the file is freshly zeroed, so every slot decodes as non-live
        store.rebuild_index().unwrap();
        std::mem::forget(dir); // keep tempdir alive for the store's lifetime in this test
        store
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut store = store_with_capacity(4);
        store.add(1, 0, 100, b"name".to_vec(), b"data".to_vec()).unwrap();
        let cell = store.get(1).unwrap();
        assert_eq!(cell.name, b"name");
        assert_eq!(cell.data, b"data");
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn get_missing_id_errors() {
        let store = store_with_capacity(4);
        assert!(matches!(store.get(42), Err(Error::NotFound(42))));
    }

    #[test]
    fn delete_then_reuse_slot() {
        let mut store = store_with_capacity(1);
        store.add(1, 0, 0, b"a".to_vec(), b"x".to_vec()).unwrap();
        store.delete(1).unwrap();
        assert!(matches!(store.get(1), Err(Error::NotFound(1))));
        store.add(2, 0, 0, b"b".to_vec(), b"y".to_vec()).unwrap();
        assert_eq!(store.get(2).unwrap().name, b"b");
    }

    #[test]
    fn add_beyond_capacity_errors() {
        let mut store = store_with_capacity(1);
        store.add(1, 0, 0, b"a".to_vec(), b"x".to_vec()).unwrap();
        let err = store.add(2, 0, 0, b"b".to_vec(), b"y".to_vec()).unwrap_err();
        assert!(matches!(err, Error::CapacityFull { .. }));
    }

    #[test]
    fn update_replaces_name_and_data() {
        let mut store = store_with_capacity(2);
        store.add(1, 0, 0, b"a".to_vec(), b"x".to_vec()).unwrap();
        store.update(1, b"a2".to_vec(), b"x2".to_vec()).unwrap();
        let cell = store.get(1).unwrap();
        assert_eq!(cell.name, b"a2");
        assert_eq!(cell.data, b"x2");
    }

    #[test]
    fn rejects_empty_name() {
        let mut store = store_with_capacity(2);
        let err = store.add(1, 0, 0, Vec::new(), b"x".to_vec()).unwrap_err();
        assert!(matches!(err, Error::ArgumentOutOfRange(_)));
    }
}
