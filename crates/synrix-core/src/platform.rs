//! Thin platform layer: file open/size/preallocate, mmap, and sync.
//!
//! Everything above this module talks to [`LatticeFile`] and never to
//! `std::fs`/`memmap2` directly, so the unix/windows split stays in one
//! place, isolating raw file handling behind a single narrow surface.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::MmapMut;

use crate::error::{Error, IoOp, Result};

/// Nanoseconds since `UNIX_EPOCH`, saturating at zero if the clock is
/// somehow set before it.
#[must_use]
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// An open lattice (or WAL) file plus its live memory map, if any.
pub struct LatticeFile {
    file: File,
    mmap: Option<MmapMut>,
}

impl LatticeFile {
    /// Opens `path` for read/write, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the underlying `open` call fails.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(IoOp::Read, e))?;
        Ok(Self { file, mmap: None })
    }

    /// Current file length in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `fstat` fails.
    pub fn len(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| Error::io(IoOp::Read, e))
    }

    /// Grows the file to exactly `len` bytes, physically preallocating
    /// the new region when `preallocate` is set (avoiding sparse holes
    /// that would otherwise surface as SIGBUS on a later mmap write).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the resize or preallocation syscall fails.
    pub fn set_len(&mut self, len: u64, preallocate: bool) -> Result<()> {
        if preallocate {
            self.preallocate(len)?;
        }
        self.file
            .set_len(len)
            .map_err(|e| Error::io(IoOp::Write, e))
    }

    #[cfg(unix)]
    fn preallocate(&self, len: u64) -> Result<()> {
        use std::os::unix::io::AsRawFd;
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid, open file descriptor owned by `self.file`
        // for the duration of this call; `posix_fallocate` does not retain it.
        let rc = unsafe { libc::posix_fallocate(fd, 0, i64::try_from(len).unwrap_or(i64::MAX)) };
        if rc != 0 {
            return Err(Error::io(IoOp::Write, std::io::Error::from_raw_os_error(rc)));
        }
        Ok(())
    }

    #[cfg(windows)]
    fn preallocate(&self, len: u64) -> Result<()> {
        // Windows has no direct posix_fallocate equivalent; set_len on the
        // handle already reserves the extent. Nothing further to do here.
        let _ = len;
        Ok(())
    }

    /// Maps the file read-write, replacing any previous mapping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `mmap` fails.
    ///
    /// # Panics
    ///
    /// Panics if the file is empty; callers must `set_len` first.
    pub fn remap(&mut self) -> Result<()> {
        // SAFETY: `self.file` is opened read-write above and outlives the
        // mapping stored alongside it in `self.mmap`; the file is never
        // truncated shorter than the mapping without first dropping it.
        let mmap = unsafe { MmapMut::map_mut(&self.file) }.map_err(|e| Error::io(IoOp::Read, e))?;
        self.mmap = Some(mmap);
        Ok(())
    }

    /// Returns the current mapping, if one has been established.
    pub fn mmap(&self) -> Option<&MmapMut> {
        self.mmap.as_ref()
    }

    /// Returns the current mapping for mutation, if one has been established.
    pub fn mmap_mut(&mut self) -> Option<&mut MmapMut> {
        self.mmap.as_mut()
    }

    /// Flushes the whole mapping to disk (`msync`/`FlushViewOfFile` plus
    /// `fsync`/`FlushFileBuffers`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the flush syscall fails.
    pub fn sync(&self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush().map_err(|e| Error::io(IoOp::Sync, e))?;
        }
        self.file.sync_all().map_err(|e| Error::io(IoOp::Sync, e))
    }

    /// Flushes only `[offset, offset + len)` of the mapping, cheaper than
    /// a full [`sync`](Self::sync) when only a handful of cells changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the flush syscall fails.
    pub fn sync_range(&self, offset: usize, len: usize) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush_range(offset, len)
                .map_err(|e| Error::io(IoOp::Sync, e))?;
        }
        Ok(())
    }
}

/// Atomically replaces `dest` with the contents of `src`, used by
/// `save()` to publish a freshly written lattice snapshot.
///
/// On POSIX this is a single atomic `rename`; `dest_file`'s existing
/// handle and mapping remain valid afterward since the inode, not the
/// handle, is swapped. On Windows the OS refuses to replace a mapped or
/// open file, so `dest_file` is unmapped and closed first, the move is
/// performed via `MoveFileExW(MOVEFILE_REPLACE_EXISTING |
/// MOVEFILE_WRITE_THROUGH)`, and `dest_file` is reopened and remapped
/// before returning, so callers see a live mapping on both platforms.
///
/// # Errors
///
/// Returns [`Error::Io`] tagged [`IoOp::Replace`] if any step fails.
pub fn replace_file(src: &Path, dest: &Path, dest_file: &mut LatticeFile) -> Result<()> {
    imp::replace_file(src, dest, dest_file)
}

#[cfg(unix)]
mod imp {
    use super::{Error, IoOp, LatticeFile, Path, Result};

    pub(super) fn replace_file(src: &Path, dest: &Path, _dest_file: &mut LatticeFile) -> Result<()> {
        std::fs::rename(src, dest).map_err(|e| Error::io(IoOp::Replace, e))
    }
}

#[cfg(windows)]
mod imp {
    use super::{Error, IoOp, LatticeFile, Path, Result};
    use std::os::windows::ffi::OsStrExt;

    use windows_sys::Win32::Storage::FileSystem::{
        MoveFileExW, MOVEFILE_REPLACE_EXISTING, MOVEFILE_WRITE_THROUGH,
    };

    fn wide_null(path: &Path) -> Vec<u16> {
        path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
    }

    pub(super) fn replace_file(src: &Path, dest: &Path, dest_file: &mut LatticeFile) -> Result<()> {
        // MoveFileExW refuses to replace a file that is still mapped or
        // held open by this process; drop both before the move and
        // reopen/remap once it has landed.
        dest_file.mmap = None;
        dest_file.file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("NUL")
            .map_err(|e| Error::io(IoOp::Replace, e))?;

        let src_wide = wide_null(src);
        let dest_wide = wide_null(dest);
        // SAFETY: both pointers are valid, null-terminated UTF-16 buffers
        // that outlive this call.
        let ok = unsafe {
            MoveFileExW(
                src_wide.as_ptr(),
                dest_wide.as_ptr(),
                MOVEFILE_REPLACE_EXISTING | MOVEFILE_WRITE_THROUGH,
            )
        };
        if ok == 0 {
            return Err(Error::io(IoOp::Replace, std::io::Error::last_os_error()));
        }

        *dest_file = LatticeFile::open(dest)?;
        dest_file.remap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lattice.db");
        let file = LatticeFile::open(&path).unwrap();
        assert_eq!(file.len().unwrap(), 0);
    }

    #[test]
    fn set_len_and_remap_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lattice.db");
        let mut file = LatticeFile::open(&path).unwrap();
        file.set_len(4096, true).unwrap();
        assert_eq!(file.len().unwrap(), 4096);
        file.remap().unwrap();
        assert!(file.mmap().is_some());
    }

    #[test]
    fn write_through_mmap_persists_after_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lattice.db");
        let mut file = LatticeFile::open(&path).unwrap();
        file.set_len(4096, true).unwrap();
        file.remap().unwrap();
        file.mmap_mut().unwrap()[0..4].copy_from_slice(b"test");
        file.sync().unwrap();
        drop(file);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"test");
    }

    #[test]
    fn replace_file_swaps_contents() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.tmp");
        let dest = dir.path().join("dest.db");
        std::fs::write(&src, b"new contents").unwrap();
        std::fs::write(&dest, b"old contents").unwrap();

        let mut dest_file = LatticeFile::open(&dest).unwrap();
        replace_file(&src, &dest, &mut dest_file).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new contents");
        assert!(!src.exists());
    }
}
