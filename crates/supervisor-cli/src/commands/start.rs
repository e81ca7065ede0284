//! Command handler for `svctl start`.

use std::collections::BTreeMap;
use std::process;

use colored::Colorize;
use supervisor_core::{Descriptor, PersistencePort, ProcessSpec, ProcessState};
use supervisor_store::TomlStore;

use crate::commands::supervise;
use crate::paths;

/// Executes the `svctl start` command. If `command` is given, (re)registers
/// the process spec before launching it; otherwise the spec already
/// persisted from a previous `start` is reused.
pub async fn execute(
    name: &str,
    command: Option<&str>,
    args: &[String],
    policy: Option<&str>,
    group: Option<&str>,
    env: &[String],
) {
    let home = match paths::supervisor_home() {
        Some(h) => h,
        None => {
            eprintln!("{} could not determine home directory.", "✗".red().bold());
            process::exit(1);
        }
    };
    let store = TomlStore::new(paths::store_root().unwrap());

    let spec = match command {
        Some(command) => {
            let mut env_map = BTreeMap::new();
            for kv in env {
                match kv.split_once('=') {
                    Some((k, v)) => {
                        env_map.insert(k.to_string(), v.to_string());
                    }
                    None => {
                        eprintln!("{} invalid --env value `{}` (expected KEY=VALUE)", "✗".red().bold(), kv);
                        process::exit(1);
                    }
                }
            }
            let spec = ProcessSpec {
                command: command.to_string(),
                args: args.to_vec(),
                working_dir: None,
                env: env_map,
                group: group.map(str::to_string),
                policy: policy.map(str::to_string),
            };
            if let Err(reason) = spec.validate(name) {
                eprintln!("{} invalid spec for {}: {}", "✗".red().bold(), name.cyan(), reason);
                process::exit(1);
            }
            let descriptor = Descriptor::new(name.to_string(), spec.clone(), epoch_secs());
            if let Err(e) = store.save_descriptor(&descriptor).await {
                eprintln!("{} failed to persist {}: {}", "✗".red().bold(), name.cyan(), e);
                process::exit(1);
            }
            spec
        }
        None => {
            let state = match store.load_all().await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{} failed to load store: {}", "✗".red().bold(), e);
                    process::exit(1);
                }
            };
            match state.descriptors.into_iter().find(|d| d.name == name) {
                Some(d) => d.spec,
                None => {
                    eprintln!(
                        "{} {} is not registered; pass --command the first time.",
                        "✗".red().bold(),
                        name.cyan()
                    );
                    process::exit(1);
                }
            }
        }
    };

    if let Some(pid_path) = paths::pid_path(name) {
        if pid_path.exists() {
            println!("{} {} is already running.", "!".yellow().bold(), name.cyan());
            return;
        }
    }

    match supervise::spawn_detached(name, &spec, &home) {
        Ok(()) => println!("{} started {}.", "✓".green().bold(), name.cyan()),
        Err(e) => {
            eprintln!("{} failed to start {}: {}", "✗".red().bold(), name.cyan(), e);
            process::exit(1);
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_pair_parses_key_value() {
        assert_eq!("FOO=bar".split_once('='), Some(("FOO", "bar")));
    }

    #[test]
    fn descriptor_state_starts_stopped() {
        let spec = ProcessSpec {
            command: "echo".into(),
            args: vec![],
            working_dir: None,
            env: BTreeMap::new(),
            group: None,
            policy: None,
        };
        let d = Descriptor::new("x".into(), spec, 0);
        assert_eq!(d.state, ProcessState::Stopped);
    }
}
