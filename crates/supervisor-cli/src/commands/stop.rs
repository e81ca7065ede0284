//! Command handler for `svctl stop`.

use std::process;
use std::time::Duration;

use colored::Colorize;

use crate::paths;

/// Executes the `svctl stop` command: signals the detached supervisor owning
/// `name` and waits for it to exit.
pub async fn execute(name: &str, force: bool) {
    let Some(pid_path) = paths::pid_path(name) else {
        eprintln!("{} could not determine home directory.", "✗".red().bold());
        process::exit(1);
    };

    let Ok(pid_text) = tokio::fs::read_to_string(&pid_path).await else {
        println!("{} {} is not running.", "!".yellow().bold(), name.cyan());
        return;
    };
    let Ok(pid) = pid_text.trim().parse::<i32>() else {
        eprintln!("{} corrupt pidfile for {}.", "✗".red().bold(), name.cyan());
        process::exit(1);
    };

    if let Err(e) = send_signal(pid, force) {
        eprintln!("{} failed to signal {}: {}", "✗".red().bold(), name.cyan(), e);
        process::exit(1);
    }

    for _ in 0..40 {
        if !pid_path.exists() {
            println!("{} stopped {}.", "✓".green().bold(), name.cyan());
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    eprintln!(
        "{} {} did not stop within the grace period.",
        "✗".red().bold(),
        name.cyan()
    );
    process::exit(1);
}

#[cfg(unix)]
fn send_signal(pid: i32, force: bool) -> Result<(), String> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    // `pid` is the `__supervise` wrapper's own pid, not the managed child's
    // process group. Real SIGKILL can't be trapped, so it would kill the
    // wrapper before it ever signals the child's group, orphaning it.
    // SIGUSR1 is the wrapper's force-stop proxy (see commands::supervise).
    let sig = if force { Signal::SIGUSR1 } else { Signal::SIGTERM };
    signal::kill(Pid::from_raw(pid), sig).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn send_signal(_pid: i32, _force: bool) -> Result<(), String> {
    Err("stopping by signal is not supported on this platform".into())
}
