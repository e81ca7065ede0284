//! Internal command handler for `svctl __supervise`: runs a single managed
//! process to completion (or until signalled to stop), owning the
//! supervisor-core registry for just that one name. `start` detaches one of
//! these per process so that the lifecycle survives the invoking CLI.

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{self, Command, Stdio};
use std::sync::Arc;

use colored::Colorize;
use supervisor_core::{EventBus, ProcessSpec, ProcessState, StopOptions, Supervisor, SystemClock};

use crate::paths;

/// Executes the hidden single-process supervisor loop. Blocks until the
/// managed process reaches a terminal state or a SIGTERM asks it to stop.
pub fn execute(server: &str) {
    let mut payload = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut payload) {
        eprintln!("{} failed to read supervisor spec: {}", "✗".red().bold(), e);
        process::exit(1);
    }
    let spec: ProcessSpec = match serde_json::from_str(payload.trim()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} invalid supervisor spec payload: {}", "✗".red().bold(), e);
            process::exit(1);
        }
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build supervisor runtime");

    rt.block_on(run(server, spec));
}

async fn run(server: &str, spec: ProcessSpec) {
    let supervisor = Supervisor::new(Arc::new(SystemClock), Arc::new(EventBus::new()));

    if let Some(pid_path) = paths::pid_path(server) {
        if let Some(parent) = pid_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let _ = tokio::fs::write(&pid_path, process::id().to_string()).await;
    }

    if let Err(e) = supervisor.start(server, spec).await {
        eprintln!("{} {} failed to start: {}", "✗".red().bold(), server, e);
        process::exit(1);
    }

    #[cfg(unix)]
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    // `svctl stop --force` cannot send real SIGKILL to this wrapper: an
    // untrappable kill would end the wrapper before it ever signals the
    // managed child's process group, orphaning it. SIGUSR1 is instead used
    // as a force-stop proxy the wrapper traps and turns into a forced
    // `supervisor.stop`.
    #[cfg(unix)]
    let mut force = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())
        .expect("failed to install SIGUSR1 handler");

    loop {
        let terminal = supervisor
            .get(server)
            .await
            .map(|d| d.state.is_terminal())
            .unwrap_or(true);
        if terminal {
            break;
        }

        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
                _ = term.recv() => {
                    let _ = supervisor.stop(server, Default::default()).await;
                    break;
                }
                _ = force.recv() => {
                    let _ = supervisor
                        .stop(server, StopOptions { force: true, ..Default::default() })
                        .await;
                    break;
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }

    if let Some(pid_path) = paths::pid_path(server) {
        let _ = tokio::fs::remove_file(&pid_path).await;
    }

    let final_state = supervisor.get(server).await.map(|d| d.state);
    if final_state == Some(ProcessState::Failed) {
        process::exit(1);
    }
}

/// Spawns a detached `__supervise` process and sends it the process spec
/// over stdin, redirecting its own stdout/stderr to a log file.
pub fn spawn_detached(server: &str, spec: &ProcessSpec, home: &Path) -> Result<(), String> {
    let exe = std::env::current_exe().map_err(|e| format!("failed to locate current exe: {e}"))?;
    let payload = serde_json::to_string(spec).map_err(|e| format!("failed to serialize spec: {e}"))?;

    let log_file = paths::log_path(server).ok_or("could not determine log path")?;
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create log dir: {e}"))?;
    }
    let log = std::fs::File::create(&log_file).map_err(|e| format!("failed to create log file: {e}"))?;
    let log_err = log.try_clone().map_err(|e| format!("failed to clone log handle: {e}"))?;

    let mut child = Command::new(exe)
        .arg("__supervise")
        .arg(server)
        .env("SUPERVISOR_HOME", home)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .map_err(|e| format!("failed to spawn supervisor: {e}"))?;

    let Some(mut stdin) = child.stdin.take() else {
        return Err("failed to open supervisor stdin".to_string());
    };
    stdin
        .write_all(payload.as_bytes())
        .map_err(|e| format!("failed to write supervisor spec: {e}"))?;
    drop(stdin);
    Ok(())
}
