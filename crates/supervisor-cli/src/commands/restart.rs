//! Command handler for `svctl restart`.

use colored::Colorize;

use crate::commands::{start, stop};

/// Executes the `svctl restart` command: stop, then start with the
/// already-persisted spec, preserving `restart_count` semantics at the core
/// layer (a manual restart is still tracked as a fresh detached supervisor).
pub async fn execute(name: &str) {
    println!("{} restarting {}...", "•".dimmed(), name.cyan());
    stop::execute(name, false).await;
    start::execute(name, None, &[], None, None, &[]).await;
}
