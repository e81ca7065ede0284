//! Command handler for `svctl status`.

use colored::Colorize;
use supervisor_core::PersistencePort;
use supervisor_store::TomlStore;
use sysinfo::{Pid as SysPid, System};

use crate::paths;

/// Executes the `svctl status` command: for each registered process, reports
/// whether its detached supervisor is alive and, if so, its pid and memory.
pub async fn execute() {
    let Some(root) = paths::store_root() else {
        eprintln!("{} could not determine home directory.", "✗".red().bold());
        return;
    };
    let store = TomlStore::new(root);
    let state = match store.load_all().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} failed to load store: {}", "✗".red().bold(), e);
            return;
        }
    };

    if state.descriptors.is_empty() {
        println!("{} no processes registered.", "!".yellow().bold());
        return;
    }

    println!("{} process status:\n", "✓".green().bold());
    println!(
        "  {:<20} {:<12} {:<8} {:<12}",
        "NAME".bold(),
        "STATUS".bold(),
        "PID".bold(),
        "MEMORY".bold(),
    );
    println!("  {}", "─".repeat(56));

    let mut descriptors = state.descriptors;
    descriptors.sort_by(|a, b| a.name.cmp(&b.name));
    for d in descriptors {
        // A pidfile's mere existence doesn't mean the wrapper is alive: a
        // force-stopped wrapper (or any crash that skips the pidfile
        // cleanup) leaves a stale file behind. Probe the process table.
        let pid = read_pid(&d.name).await.filter(|pid| process_is_alive(*pid));
        let (status, memory) = match pid {
            Some(pid) => (
                "running".green().to_string(),
                resident_memory_kib(pid)
                    .map(|kib| format!("{kib} KiB"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            None => ("stopped".dimmed().to_string(), "-".to_string()),
        };
        println!(
            "  {:<20} {:<12} {:<8} {:<12}",
            d.name.cyan(),
            status,
            pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            memory,
        );
    }
    println!();
}

async fn read_pid(name: &str) -> Option<u32> {
    let path = paths::pid_path(name)?;
    let content = tokio::fs::read_to_string(path).await.ok()?;
    content.trim().parse().ok()
}

fn process_is_alive(pid: u32) -> bool {
    let mut sys = System::new();
    let sys_pid = SysPid::from_u32(pid);
    sys.refresh_process(sys_pid);
    sys.process(sys_pid).is_some()
}

fn resident_memory_kib(pid: u32) -> Option<u64> {
    let mut sys = System::new();
    let sys_pid = SysPid::from_u32(pid);
    sys.refresh_process(sys_pid);
    sys.process(sys_pid).map(|p| p.memory())
}
