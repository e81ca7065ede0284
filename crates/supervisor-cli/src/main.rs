// SPDX-License-Identifier: Apache-2.0

//! `svctl` CLI binary entrypoint.

mod commands;
pub mod paths;

use clap::Parser;
use commands::Commands;

/// svctl — a local process supervisor: spawn, monitor, restart, and
/// schedule processes
#[derive(Parser)]
#[command(name = "svctl", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // `__supervise` builds its own current-thread runtime so that SIGTERM
    // handling and the single managed child share one reactor; every other
    // subcommand is a quick one-shot against the store.
    if let Commands::Supervise { name } = &cli.command {
        commands::supervise::execute(name);
        return;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");
    rt.block_on(commands::execute(cli.command));
}
