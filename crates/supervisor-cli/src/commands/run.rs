//! Command handler for `svctl run`: a foreground daemon that restores every
//! registered process and schedule from the store and keeps them supervised
//! until interrupted.

use std::process;
use std::sync::Arc;

use colored::Colorize;
use supervisor_core::{EventBus, PersistencePort, Scheduler, Supervisor, SystemClock};
use supervisor_store::TomlStore;

use crate::paths;

pub async fn execute() {
    let Some(root) = paths::store_root() else {
        eprintln!("{} could not determine home directory.", "✗".red().bold());
        process::exit(1);
    };
    let store = TomlStore::new(root);
    let state = match store.load_all().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} failed to load store: {}", "✗".red().bold(), e);
            process::exit(1);
        }
    };

    let supervisor = Supervisor::new(Arc::new(SystemClock), Arc::new(EventBus::new()));
    for policy in state.policies {
        let _ = supervisor.policy_engine().register_policy(policy);
    }
    for descriptor in state.descriptors {
        supervisor.restore(descriptor).await;
    }

    let scheduler = Scheduler::new(supervisor.clone());
    for record in state.schedules {
        let _ = scheduler
            .add(&record.name, record.kind, record.target, chrono::Utc::now())
            .await;
        if !record.enabled {
            let _ = scheduler.disable(&record.name).await;
        }
    }

    println!("{} supervisor daemon running (Ctrl-C to stop).", "✓".green().bold());

    let scheduler_task = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    let _ = tokio::signal::ctrl_c().await;
    println!("\n{} shutting down...", "•".dimmed());
    scheduler.stop();
    let _ = scheduler_task.await;
    supervisor.shutdown().await;
    println!("{} all processes stopped.", "✓".green().bold());
}
