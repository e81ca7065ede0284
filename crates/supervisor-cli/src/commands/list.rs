// SPDX-License-Identifier: Apache-2.0

//! Command handler for `svctl list`.

use colored::Colorize;
use supervisor_core::PersistencePort;
use supervisor_store::TomlStore;

use crate::paths;

/// Executes the `svctl list` command: shows every registered process,
/// whether or not it is currently running.
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
        print_none();
        return;
    }

    println!("{} {} process(es) registered:\n", "✓".green().bold(), state.descriptors.len());
    println!(
        "  {:<20} {:<24} {:<12} {}",
        "NAME".bold(),
        "COMMAND".bold(),
        "GROUP".bold(),
        "POLICY".bold(),
    );
    println!("  {}", "─".repeat(68));

    let mut descriptors = state.descriptors;
    descriptors.sort_by(|a, b| a.name.cmp(&b.name));
    for d in descriptors {
        let command = std::iter::once(d.spec.command.clone())
            .chain(d.spec.args.clone())
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "  {:<20} {:<24} {:<12} {}",
            d.name.cyan(),
            command,
            d.spec.group.as_deref().unwrap_or("-"),
            d.spec.policy.as_deref().unwrap_or("none"),
        );
    }
    println!();
}

fn print_none() {
    println!("{} no processes registered.\n", "!".yellow().bold());
    println!(
        "  Run {} to register and launch one.",
        "svctl start <name> --command <cmd>".bold()
    );
}
