//! Command handler for `svctl schedule` (add/list/remove).

use std::collections::BTreeMap;
use std::process;

use colored::Colorize;
use supervisor_core::scheduler::{Kind, ScheduleRecord, Target};
use supervisor_core::{PersistencePort, ProcessSpec};
use supervisor_store::TomlStore;

use crate::paths;

fn store() -> TomlStore {
    let root = paths::store_root().unwrap_or_else(|| {
        eprintln!("{} could not determine home directory.", "✗".red().bold());
        process::exit(1);
    });
    TomlStore::new(root)
}

pub async fn add(name: &str, kind: &str, expression: &str, command: &str, args: &[String]) {
    let parsed_kind = match Kind::parse(kind, expression) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("{} invalid schedule: {}", "✗".red().bold(), e);
            process::exit(1);
        }
    };

    let spec = ProcessSpec {
        command: command.to_string(),
        args: args.to_vec(),
        working_dir: None,
        env: BTreeMap::new(),
        group: None,
        policy: None,
    };

    let record = ScheduleRecord {
        name: name.to_string(),
        kind: parsed_kind,
        target: Target { spec },
        enabled: true,
        last_run: None,
        next_run: None,
        run_count: 0,
    };

    match store().save_schedule(&record).await {
        Ok(()) => println!("{} added schedule {}.", "✓".green().bold(), name.cyan()),
        Err(e) => {
            eprintln!("{} failed to save schedule {}: {}", "✗".red().bold(), name.cyan(), e);
            process::exit(1);
        }
    }
}

pub async fn list() {
    let state = match store().load_all().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} failed to load store: {}", "✗".red().bold(), e);
            return;
        }
    };
    if state.schedules.is_empty() {
        println!("{} no schedules registered.", "!".yellow().bold());
        return;
    }
    println!("{} {} schedule(s):\n", "✓".green().bold(), state.schedules.len());
    println!("  {:<20} {:<10} {:<20} {}", "NAME".bold(), "ENABLED".bold(), "RUNS".bold(), "TARGET".bold());
    println!("  {}", "─".repeat(64));
    for s in state.schedules {
        let enabled = if s.enabled { "yes".green().to_string() } else { "no".dimmed().to_string() };
        println!(
            "  {:<20} {:<10} {:<20} {}",
            s.name.cyan(),
            enabled,
            s.run_count,
            s.target.spec.command,
        );
    }
    println!();
}

pub async fn remove(name: &str) {
    match store().delete_schedule(name).await {
        Ok(()) => println!("{} removed schedule {}.", "✓".green().bold(), name.cyan()),
        Err(e) => {
            eprintln!("{} failed to remove schedule {}: {}", "✗".red().bold(), name.cyan(), e);
            process::exit(1);
        }
    }
}
