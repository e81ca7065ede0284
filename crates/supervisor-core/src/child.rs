//! A single live OS child: spawn, output drain, resource sampling, and
//! graceful-then-forced termination.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::descriptor::ProcessSpec;
use crate::error::{Result, SupervisorError};
use crate::ring::OutputCapture;

const DRAIN_CHUNK: usize = 4096;
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// A spawned OS child wired into its own process group, with stdout/stderr
/// draining tasks feeding the descriptor's output rings.
pub struct ChildHandle {
    pub pid: u32,
    child: tokio::process::Child,
    drain_stdout: tokio::task::JoinHandle<()>,
    drain_stderr: tokio::task::JoinHandle<()>,
}

impl ChildHandle {
    /// Spawns `spec` in a new process group so that signals sent to the
    /// group reach any descendants it forks.
    pub fn spawn(name: &str, spec: &ProcessSpec, rings: Arc<OutputCapture>) -> Result<Self> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        new_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
            name: name.to_string(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| SupervisorError::Internal(
            format!("child `{name}` has no pid immediately after spawn"),
        ))?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let drain_stdout = spawn_drain(stdout, rings.clone(), crate::event::Stream::Stdout, name.to_string());
        let drain_stderr = spawn_drain(stderr, rings, crate::event::Stream::Stderr, name.to_string());

        Ok(Self {
            pid,
            child,
            drain_stdout,
            drain_stderr,
        })
    }

    /// Waits for the child to exit, returning its exit code (or a negative
    /// synthetic code if it was killed by a signal).
    pub async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await.map_err(|source| SupervisorError::SpawnFailed {
            name: "<wait>".into(),
            source,
        })?;
        let _ = tokio::join!(&mut self.drain_stdout, &mut self.drain_stderr);
        Ok(exit_code_of(status))
    }

    /// Sends SIGTERM to the process group, waits up to `grace`, then escalates
    /// to SIGKILL. `Ok(None)` means the process was still alive after SIGKILL
    /// plus its own grace period — an operator-visible anomaly, not a reap.
    pub async fn stop_gracefully(&mut self, name: &str, grace: Duration) -> Result<Option<i32>> {
        send_group_signal(self.pid, Signal::SIGTERM).map_err(|reason| SupervisorError::SignalFailed {
            name: name.to_string(),
            reason,
        })?;

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                let _ = tokio::join!(&mut self.drain_stdout, &mut self.drain_stderr);
                Ok(Some(exit_code_of(status)))
            }
            Ok(Err(e)) => Err(SupervisorError::SpawnFailed {
                name: name.to_string(),
                source: e,
            }),
            Err(_elapsed) => {
                warn!(process = name, "did not exit within grace period, escalating to SIGKILL");
                self.force_kill(name).await
            }
        }
    }

    pub async fn force_kill(&mut self, name: &str) -> Result<Option<i32>> {
        send_group_signal(self.pid, Signal::SIGKILL).map_err(|reason| SupervisorError::SignalFailed {
            name: name.to_string(),
            reason,
        })?;
        match timeout(DEFAULT_KILL_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                let _ = tokio::join!(&mut self.drain_stdout, &mut self.drain_stderr);
                Ok(Some(exit_code_of(status)))
            }
            _ => {
                warn!(process = name, "process still alive after SIGKILL + grace");
                Ok(None)
            }
        }
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            debug!(signal, "child terminated by signal");
            return crate::descriptor::synthetic_exit::KILLED_BY_SUPERVISOR;
        }
    }
    status.code().unwrap_or(crate::descriptor::synthetic_exit::KILLED_BY_SUPERVISOR)
}

#[cfg(unix)]
fn new_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map(|_| ()).map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(unix))]
fn new_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn send_group_signal(pid: u32, sig: Signal) -> std::result::Result<(), String> {
    // Negative pid targets the whole process group (requires setsid above).
    signal::kill(Pid::from_raw(-(pid as i32)), sig).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn send_group_signal(_pid: u32, _sig: Signal) -> std::result::Result<(), String> {
    Err("process-group signaling is not supported on this platform".into())
}

fn spawn_drain<R>(
    mut reader: R,
    rings: Arc<OutputCapture>,
    stream: crate::event::Stream,
    name: String,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; DRAIN_CHUNK];
        let mut reader = BufReader::new(&mut reader);
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let ring = match stream {
                        crate::event::Stream::Stdout => &rings.stdout,
                        crate::event::Stream::Stderr => &rings.stderr,
                    };
                    ring.append(&buf[..n]);
                }
                Err(e) => {
                    debug!(process = %name, error = %e, "output drain read error, stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(command: &str, args: &[&str]) -> ProcessSpec {
        ProcessSpec {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            env: BTreeMap::new(),
            group: None,
            policy: None,
        }
    }

    #[tokio::test]
    async fn spawn_and_wait_captures_stdout() {
        let rings = Arc::new(OutputCapture::default());
        let mut child = ChildHandle::spawn("echo-ok", &spec("echo", &["hi"]), rings.clone()).unwrap();
        let code = child.wait().await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(rings.stdout.snapshot(), b"hi\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let rings = Arc::new(OutputCapture::default());
        let mut child = ChildHandle::spawn("crasher", &spec("sh", &["-c", "exit 1"]), rings).unwrap();
        let code = child.wait().await.unwrap();
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn stop_gracefully_terminates_sleeper() {
        let rings = Arc::new(OutputCapture::default());
        let mut child = ChildHandle::spawn("sleeper", &spec("sleep", &["100"]), rings).unwrap();
        let code = child.stop_gracefully("sleeper", Duration::from_millis(500)).await.unwrap();
        assert_eq!(code, Some(crate::descriptor::synthetic_exit::KILLED_BY_SUPERVISOR));
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_spawn_failed() {
        let rings = Arc::new(OutputCapture::default());
        let err = ChildHandle::spawn("bogus", &spec("/no/such/binary-xyz", &[]), rings).unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
    }
}
