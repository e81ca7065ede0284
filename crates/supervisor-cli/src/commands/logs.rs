//! Command handler for `svctl logs`.

use std::process;

use colored::Colorize;

use crate::paths;

/// Executes the `svctl logs` command: prints the last `tail` lines of the
/// combined stdout/stderr captured by `name`'s detached supervisor.
pub async fn execute(name: &str, tail: u32) {
    let Some(log_path) = paths::log_path(name) else {
        eprintln!("{} could not determine home directory.", "✗".red().bold());
        process::exit(1);
    };

    let content = match tokio::fs::read_to_string(&log_path).await {
        Ok(c) => c,
        Err(_) => {
            println!("{} no logs found for {}.", "!".yellow().bold(), name.cyan());
            return;
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(tail as usize);
    for line in &lines[start..] {
        println!("{line}");
    }
}
