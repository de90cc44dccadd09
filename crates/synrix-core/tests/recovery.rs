//! End-to-end scenarios from the engine's public-surface contract:
//! add/get round trip, prefix queries, persistence across reopen, WAL
//! crash recovery, torn-tail recovery, and the admission cap boundary.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use synrix_core::format::HEADER_SIZE;
use synrix_core::{Engine, EngineOptions, Error};

const NODE_TYPE_TASK: u8 = 5;

fn options() -> EngineOptions {
    EngineOptions::default()
}

#[test]
fn add_then_get_matches_literal_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.lat");
    let mut engine = Engine::open(&path, 1000, options()).unwrap();

    let id = engine.add(NODE_TYPE_TASK, b"TASK:a", b"hello", 0).unwrap();
    let node = engine.get(id).unwrap();

    assert_eq!(node.node_type, NODE_TYPE_TASK);
    assert_eq!(node.name, b"TASK:a");
    assert_eq!(node.data, b"hello");
}

#[test]
fn prefix_query_returns_exactly_matching_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.lat");
    let mut engine = Engine::open(&path, 1000, options()).unwrap();

    engine.add(0, b"TASK:a", b"1", 0).unwrap();
    engine.add(0, b"TASK:b", b"2", 0).unwrap();
    engine.add(0, b"OTHER:c", b"3", 0).unwrap();

    let found = engine.find_by_prefix(b"TASK:", 10).unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|n| n.name.starts_with(b"TASK:")));
}

#[test]
fn persistence_survives_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.lat");

    {
        let mut engine = Engine::open(&path, 1000, options()).unwrap();
        engine.add(0, b"A", b"1", 0).unwrap();
        engine.add(0, b"B", b"2", 0).unwrap();
        engine.add(0, b"C", b"3", 0).unwrap();
        engine.checkpoint().unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(&path, 1000, options()).unwrap();
    let all = engine.find_by_prefix(b"", 100).unwrap();
    assert_eq!(all.len(), 3);
}

/// Simulates a crash that lost the main file's cell bytes but left the
/// WAL intact: the lattice region is zeroed out directly (bypassing the
/// engine) after a flush, then the engine is reopened and must recover
/// the node from the WAL.
#[test]
fn wal_recovers_a_cell_wiped_from_the_main_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.lat");

    {
        let mut engine = Engine::open(&path, 4, options()).unwrap();
        engine.add(0, b"X", b"payload-x", 0).unwrap();
        engine.flush().unwrap();
    }

    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        let zeros = vec![0u8; (len - HEADER_SIZE as u64) as usize];
        file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
        file.write_all(&zeros).unwrap();
        file.sync_all().unwrap();
    }

    let engine = Engine::open(&path, 4, options()).unwrap();
    let recovered = engine.find_by_prefix(b"X", 10).unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].data, b"payload-x");
}

/// Appends garbage bytes past the WAL's committed `last_valid_offset`;
/// recovery must stop at the last committed entry and the engine must
/// remain usable afterwards.
#[test]
fn torn_wal_tail_is_ignored_on_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.lat");
    let wal_path = {
        let mut p = path.clone().into_os_string();
        p.push(".wal");
        std::path::PathBuf::from(p)
    };

    {
        let mut engine = Engine::open(&path, 100, options()).unwrap();
        engine.add(0, b"good", b"entry", 0).unwrap();
        engine.flush().unwrap();
    }

    {
        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&[0xAA; 7]).unwrap();
        file.sync_all().unwrap();
    }

    let mut engine = Engine::open(&path, 100, options()).unwrap();
    let found = engine.find_by_prefix(b"good", 10).unwrap();
    assert_eq!(found.len(), 1);

    // Engine remains usable: further writes still succeed.
    let id = engine.add(0, b"after-recovery", b"x", 0).unwrap();
    assert!(engine.get(id).is_ok());
}

#[test]
fn admission_cap_blocks_exactly_at_the_tier_boundary_then_frees_a_slot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.lat");
    // capacity bigger than the default (Free) tier limit so the store
    // itself never runs out of slots before admission does.
    let mut engine = Engine::open(&path, 30_000, options()).unwrap();

    let limit = engine.stats().tier_limit;
    let mut last_id = 0;
    for i in 0..limit {
        last_id = engine
            .add(0, format!("N:{i}").as_bytes(), b"x", 0)
            .unwrap();
    }

    let err = engine.add(0, b"N:overflow", b"x", 0).unwrap_err();
    assert!(matches!(err, Error::LimitExceeded { .. }));

    engine.delete(last_id).unwrap();
    assert!(engine.add(0, b"N:overflow", b"x", 0).is_ok());
}
