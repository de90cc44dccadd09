//! Thin CLI wrapper around the SYNRIX storage engine.
//!
//! Every subcommand emits exactly one line of JSON on stdout of the
//! form `{"success": bool, ...}` and never writes anything else there.
//! Diagnostics go to stderr via `tracing`. Exit codes: `0` success, `1`
//! usage error, `2` I/O error, `3` admission/license error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;
use synrix_core::{Engine, EngineOptions, Error};

/// Default node capacity for a freshly created lattice file.
const DEFAULT_MAX_NODES: u64 = 1_000_000;

#[derive(Parser)]
#[command(name = "synrix", version, about = "SYNRIX storage engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create (or open) a lattice file and report its stats.
    Init {
        path: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_NODES)]
        max_nodes: u64,
    },
    /// Insert a node and print its assigned id.
    Add {
        path: PathBuf,
        name: String,
        data: String,
        #[arg(long, default_value_t = 0)]
        parent_id: u64,
        #[arg(long, default_value_t = 0)]
        node_type: u8,
        #[arg(long, default_value_t = DEFAULT_MAX_NODES)]
        max_nodes: u64,
    },
    /// Fetch a node by id.
    Get {
        path: PathBuf,
        id: u64,
        #[arg(long, default_value_t = DEFAULT_MAX_NODES)]
        max_nodes: u64,
    },
    /// List nodes whose name starts with `prefix`.
    Query {
        path: PathBuf,
        prefix: String,
        /// Maximum number of results (0 = unlimited).
        #[arg(default_value_t = 0)]
        limit: usize,
        #[arg(long, default_value_t = DEFAULT_MAX_NODES)]
        max_nodes: u64,
    },
    /// Print current engine statistics.
    Count {
        path: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_NODES)]
        max_nodes: u64,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = if std::env::var_os("QUIET").is_some() {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Maps an engine error onto the spec's three-way exit-code split.
fn exit_code_for(err: &Error) -> u8 {
    match err {
        Error::NotFound(_) | Error::ArgumentOutOfRange(_) => 1,
        Error::CapacityFull { .. } | Error::LimitExceeded { .. } | Error::InvalidLicense(_) => 3,
        Error::Io { .. } | Error::CorruptFile(_) | Error::MalformedWalEntry { .. } => 2,
    }
}

fn fail(err: &Error) -> ExitCode {
    println!("{}", json!({"success": false, "error": err.to_string()}));
    ExitCode::from(exit_code_for(err))
}

fn open(path: &PathBuf, max_nodes: u64) -> Result<Engine, Error> {
    Engine::open(path, max_nodes, EngineOptions::default())
}

fn run(command: Command) -> Result<serde_json::Value, Error> {
    match command {
        Command::Init { path, max_nodes } => {
            tracing::info!(?path, max_nodes, "initializing lattice file");
            let mut engine = open(&path, max_nodes)?;
            engine.checkpoint()?;
            let stats = engine.stats();
            Ok(json!({
                "success": true,
                "path": path,
                "max_nodes": stats.max_nodes,
                "tier": stats.tier,
            }))
        }
        Command::Add {
            path,
            name,
            data,
            parent_id,
            node_type,
            max_nodes,
        } => {
            let mut engine = open(&path, max_nodes)?;
            let id = engine.add(node_type, name.as_bytes(), data.as_bytes(), parent_id)?;
            engine.checkpoint()?;
            Ok(json!({"success": true, "id": id}))
        }
        Command::Get { path, id, max_nodes } => {
            let engine = open(&path, max_nodes)?;
            let node = engine.get(id)?;
            Ok(json!({
                "success": true,
                "id": node.id,
                "node_type": node.node_type,
                "name": String::from_utf8_lossy(&node.name),
                "data": String::from_utf8_lossy(&node.data),
                "parent_id": node.parent_id,
                "created_at": node.created_at,
            }))
        }
        Command::Query {
            path,
            prefix,
            limit,
            max_nodes,
        } => {
            let engine = open(&path, max_nodes)?;
            let nodes = engine.find_by_prefix(prefix.as_bytes(), limit)?;
            let results: Vec<_> = nodes
                .iter()
                .map(|n| {
                    json!({
                        "id": n.id,
                        "name": String::from_utf8_lossy(&n.name),
                        "data": String::from_utf8_lossy(&n.data),
                    })
                })
                .collect();
            Ok(json!({"success": true, "count": results.len(), "results": results}))
        }
        Command::Count { path, max_nodes } => {
            let engine = open(&path, max_nodes)?;
            let stats = engine.stats();
            Ok(json!({
                "success": true,
                "live_count": stats.live_count,
                "max_nodes": stats.max_nodes,
                "tier": stats.tier,
                "tier_limit": stats.tier_limit,
                "fragmentation_ratio": stats.fragmentation_ratio,
                "distinct_names": stats.distinct_names,
            }))
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            println!("{}", json!({"success": false, "error": e.to_string()}));
            return ExitCode::from(1);
        }
    };

    match run(cli.command) {
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(err) => fail(&err),
    }
}
