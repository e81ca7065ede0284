//! Path helpers for the supervisor home directory.

use std::path::PathBuf;

/// Returns the supervisor home directory (`$SUPERVISOR_HOME` override or
/// `~/.supervisor`).
pub fn supervisor_home() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("SUPERVISOR_HOME") {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|h| h.join(".supervisor"))
}

/// Root directory the `supervisor-store` TOML adapter reads and writes.
pub fn store_root() -> Option<PathBuf> {
    supervisor_home().map(|h| h.join("store"))
}

/// Directory holding one log file per detached process supervisor.
pub fn logs_dir() -> Option<PathBuf> {
    supervisor_home().map(|h| h.join("logs"))
}

pub fn log_path(name: &str) -> Option<PathBuf> {
    logs_dir().map(|d| d.join(format!("{name}.log")))
}

/// Directory holding one pidfile per detached process supervisor, used so
/// `stop`/`status` can find and signal the supervisor owning a process.
pub fn pids_dir() -> Option<PathBuf> {
    supervisor_home().map(|h| h.join("pids"))
}

pub fn pid_path(name: &str) -> Option<PathBuf> {
    pids_dir().map(|d| d.join(format!("{name}.pid")))
}
