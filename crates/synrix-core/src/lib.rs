//! # SYNRIX Core
//!
//! Persistent, memory-mapped key-value storage engine for agent/RAG
//! memory workloads: a deterministic, local-first substitute for vector
//! databases, caches, and relational stores where the access pattern is
//! lookup-by-name or lookup-by-id rather than similarity search.
//!
//! Nodes are keyed by semantic string names (e.g. `PATTERN:python:sort`)
//! and hold an opaque byte payload bounded by a fixed per-node cell
//! size. The engine provides O(1) lookup by 64-bit id, O(k) retrieval by
//! name prefix, and crash-safe durability through a write-ahead log with
//! periodic checkpointing of the mapped data file.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use synrix_core::{Engine, EngineOptions};
//!
//! fn main() -> synrix_core::Result<()> {
//!     let mut engine = Engine::open("memory.lat", 100_000, EngineOptions::default())?;
//!     let id = engine.add(0, b"PATTERN:rust:ownership", b"borrow checker notes", 0)?;
//!     let node = engine.get(id)?;
//!     assert_eq!(node.data, b"borrow checker notes");
//!     engine.checkpoint()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(
    test,
    allow(
        clippy::large_stack_arrays,
        clippy::doc_markdown,
        clippy::uninlined_format_args,
        clippy::single_match_else,
        clippy::cast_lossless,
        clippy::manual_assert
    )
)]

pub mod config;
pub mod crc32;
pub mod engine;
pub mod error;
pub mod format;
pub mod license;
pub mod name_index;
pub mod node_store;
pub mod platform;
pub mod wal;

pub use config::EngineOptions;
pub use engine::{Engine, Node, Stats};
pub use error::{Error, IoOp, Result};
pub use license::Tier;
