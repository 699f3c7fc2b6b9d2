// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `loft` binary: operational access to the worker subsystem's durable
//! state. `list`/`show`/`stats` read the row store; `cancel` flips rows
//! the live process no longer holds so they stay down across restores.

use clap::Parser;
use loft::commands::worker::{handle, WorkerArgs, WorkerCtx};
use loft::exit_error::ExitError;
use loft_core::SystemClock;
use loft_pool::{Pool, PoolConfig};
use loft_storage::FileStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "loft", version, about = "loft platform operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Inspect and manage background jobs
    Worker(WorkerArgs),
}

/// Resolve state directory: LOFT_STATE_DIR > XDG_STATE_HOME/loft > ~/.local/state/loft
fn state_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var("LOFT_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("loft"));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(home).join(".local/state/loft"))
}

fn run(cli: Cli) -> Result<(), ExitError> {
    let dir = state_dir().map_err(|e| ExitError::failure(e.to_string()))?;
    let store =
        Arc::new(FileStore::open(&dir).map_err(|e| ExitError::failure(e.to_string()))?);
    let pool = Pool::new(PoolConfig::from_env(), store.clone(), SystemClock);
    let ctx = WorkerCtx { pool, store };

    match cli.command {
        Command::Worker(args) => handle(args.command, &ctx),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {}", err);
        std::process::exit(err.code);
    }
}
