//! Error types for the SYNRIX storage engine.
//!
//! The engine never panics on a reachable error path and never unwinds
//! across the public API boundary; every fallible operation returns
//! [`Error`] explicitly.

use std::io;

/// Tags the underlying platform operation that failed, so callers can
/// distinguish a failed write from a failed fsync without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    /// A `pread`/file-read call failed.
    Read,
    /// A `pwrite`/file-write call failed.
    Write,
    /// A `msync`/`fsync`/`FlushViewOfFile`/`FlushFileBuffers` call failed.
    Sync,
    /// The atomic file-replace step of `save()` failed.
    Replace,
}

impl std::fmt::Display for IoOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Sync => "sync",
            IoOp::Replace => "replace",
        };
        f.write_str(s)
    }
}

/// The closed set of errors the engine can return.
///
/// Matches spec §7 exactly: every variant here is reachable from the
/// public API and documented with its trigger and expected recovery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `get`/`update`/`delete` referenced an id with no live cell.
    #[error("node {0} not found")]
    NotFound(u64),

    /// `name`/`data` exceeded their configured maximum, was empty where a
    /// minimum length is required, or `type` was outside the closed tag
    /// range.
    #[error("argument out of range: {0}")]
    ArgumentOutOfRange(String),

    /// The lattice file has no free slot left in its preallocated region.
    #[error("capacity full: {live}/{max} nodes")]
    CapacityFull {
        /// Current live node count.
        live: u64,
        /// Configured maximum node count for this file.
        max: u64,
    },

    /// The admission cap for the current license tier was reached.
    #[error("limit exceeded: {live}/{limit} nodes at tier {tier}")]
    LimitExceeded {
        /// Current live node count.
        live: u64,
        /// Node cap for the active tier.
        limit: u64,
        /// Active tier (0-4).
        tier: u8,
    },

    /// An underlying platform I/O call failed.
    #[error("io error during {op}: {source}")]
    Io {
        /// Which platform operation failed.
        op: IoOp,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The main lattice file failed header validation at `open` (bad
    /// magic, unsupported version, or checksum mismatch). Fatal: the
    /// caller must reinitialize the file.
    #[error("corrupt file: {0}")]
    CorruptFile(String),

    /// A WAL entry failed CRC or length validation during replay.
    /// Non-fatal: recovery stops at the offset of the bad entry and
    /// everything before it is kept.
    #[error("malformed WAL entry at offset {offset}: {reason}")]
    MalformedWalEntry {
        /// Byte offset of the entry that failed validation.
        offset: u64,
        /// Human-readable reason (CRC mismatch, truncated length, etc).
        reason: String,
    },

    /// The license key's signature, expiry, or version failed
    /// verification. Non-fatal: the engine falls back to tier 0.
    #[error("invalid license: {0}")]
    InvalidLicense(String),
}

impl Error {
    /// Builds an [`Error::Io`] tagged with the failing operation.
    #[must_use]
    pub fn io(op: IoOp, source: io::Error) -> Self {
        Error::Io { op, source }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
