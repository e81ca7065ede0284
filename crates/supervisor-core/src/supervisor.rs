//! The supervisor: registry of managed processes, lifecycle operations, and
//! the monitor loop that reaps exits and drives the policy engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use sysinfo::{Pid as SysPid, System};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::child::ChildHandle;
use crate::clock::Clock;
use crate::descriptor::{Descriptor, ProcessSpec, ProcessState};
use crate::error::{Result, SupervisorError};
use crate::event::{EventBus, EventKind};
use crate::policy::{Decision, PolicyEngine};
use crate::ring::OutputCapture;

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

struct ManagedProcess {
    descriptor: Descriptor,
    rings: Arc<OutputCapture>,
    handle: Option<ChildHandle>,
}

/// Resource usage snapshot for a live process.
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    pub cpu_percent: f32,
    pub rss_bytes: u64,
    pub threads: usize,
    pub uptime: Duration,
}

/// Options controlling a stop request.
#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    pub grace: Duration,
    pub force: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            grace: DEFAULT_STOP_GRACE,
            force: false,
        }
    }
}

/// Internal message the monitor loop consumes to learn that a reaping task
/// observed a child exit, decoupling the per-child wait from the shared
/// registry lock.
struct ExitNotice {
    name: String,
    exit_code: i32,
    user_initiated_stop: bool,
}

/// Owns the process registry and exposes the launch-request port operations.
pub struct Supervisor<C: Clock> {
    clock: Arc<C>,
    registry: RwLock<HashMap<String, ManagedProcess>>,
    policy_engine: Arc<PolicyEngine<C>>,
    events: Arc<EventBus>,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
    exit_rx: Mutex<Option<mpsc::UnboundedReceiver<ExitNotice>>>,
    cancel: CancellationToken,
    /// Per-descriptor operation lock serializing start/stop/restart/remove so
    /// that no caller observes state mid-sequence (e.g. between restart's
    /// internal stop and start).
    op_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<C: Clock> Supervisor<C> {
    pub fn new(clock: Arc<C>, events: Arc<EventBus>) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            policy_engine: Arc::new(PolicyEngine::new(clock.clone())),
            clock,
            registry: RwLock::new(HashMap::new()),
            events,
            exit_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
            cancel: CancellationToken::new(),
            op_locks: StdMutex::new(HashMap::new()),
        })
    }

    pub fn policy_engine(&self) -> &PolicyEngine<C> {
        &self.policy_engine
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn op_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.op_locks
            .lock()
            .expect("op lock map poisoned")
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Restores a descriptor (e.g. loaded from the persistence port at
    /// startup) without spawning it. Used by the store adapter's `LoadAll`.
    pub async fn restore(&self, descriptor: Descriptor) {
        let mut descriptor = descriptor;
        descriptor.state = ProcessState::Stopped;
        descriptor.pid = None;
        let name = descriptor.name.clone();
        self.registry.write().await.insert(
            name,
            ManagedProcess {
                descriptor,
                rings: Arc::new(OutputCapture::default()),
                handle: None,
            },
        );
    }

    pub async fn start(self: &Arc<Self>, name: &str, spec: ProcessSpec) -> Result<Descriptor> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;
        self.start_locked(name, spec).await
    }

    #[instrument(skip(self, spec), fields(process = name))]
    async fn start_locked(self: &Arc<Self>, name: &str, spec: ProcessSpec) -> Result<Descriptor> {
        spec.validate(name).map_err(|reason| SupervisorError::InvalidSpec {
            name: name.to_string(),
            reason,
        })?;

        {
            let registry = self.registry.read().await;
            if let Some(existing) = registry.get(name) {
                if existing.descriptor.state.is_live() {
                    return Err(SupervisorError::AlreadyRunning(name.to_string()));
                }
            }
        }

        let mut registry = self.registry.write().await;
        let now = self.clock.epoch_secs();
        let entry = registry.entry(name.to_string()).or_insert_with(|| ManagedProcess {
            descriptor: Descriptor::new(name.to_string(), spec.clone(), now),
            rings: Arc::new(OutputCapture::default()),
            handle: None,
        });
        entry.descriptor.spec = spec.clone();
        entry.descriptor.state = ProcessState::Starting;

        let rings = entry.rings.clone();
        match ChildHandle::spawn(name, &spec, rings) {
            Ok(handle) => {
                let pid = handle.pid;
                entry.handle = Some(handle);
                entry.descriptor.state = ProcessState::Running;
                entry.descriptor.pid = Some(pid);
                entry.descriptor.started_at_epoch_secs = Some(now);
                entry.descriptor.exit_code = None;
                let descriptor = entry.descriptor.clone();
                drop(registry);

                self.events.publish(EventKind::Started {
                    name: name.to_string(),
                    pid,
                });
                self.spawn_reaper(name.to_string());
                info!(pid, "process started");
                Ok(descriptor)
            }
            Err(e) => {
                entry.descriptor.state = ProcessState::Failed;
                entry.descriptor.exit_code = Some(crate::descriptor::synthetic_exit::SPAWN_FAILED);
                warn!(error = %e, "spawn failed");
                Err(e)
            }
        }
    }

    fn spawn_reaper(self: &Arc<Self>, name: String) {
        let this = self.clone();
        tokio::spawn(async move {
            this.reap(name).await;
        });
    }

    async fn reap(self: Arc<Self>, name: String) {
        let exit_code = {
            let mut registry = self.registry.write().await;
            let Some(entry) = registry.get_mut(&name) else { return };
            let Some(mut handle) = entry.handle.take() else { return };
            drop(registry);
            match handle.wait().await {
                Ok(code) => code,
                Err(e) => {
                    warn!(process = %name, error = %e, "wait() failed");
                    crate::descriptor::synthetic_exit::KILLED_BY_SUPERVISOR
                }
            }
        };

        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get_mut(&name) else { return };
        let user_initiated = entry.descriptor.state == ProcessState::Stopping;
        entry.descriptor.pid = None;
        entry.descriptor.exit_code = Some(exit_code);
        entry.descriptor.stopped_at_epoch_secs = Some(self.clock.epoch_secs());

        if user_initiated {
            entry.descriptor.state = ProcessState::Stopped;
            drop(registry);
            self.events.publish(EventKind::Stopped {
                name: name.clone(),
                exit_code,
            });
            return;
        }

        let policy_name = entry.descriptor.spec.policy.clone();
        drop(registry);

        match self.policy_engine.decide(&name, policy_name.as_deref(), exit_code) {
            Decision::Stop => {
                let mut registry = self.registry.write().await;
                if let Some(entry) = registry.get_mut(&name) {
                    if exit_code == 0 {
                        entry.descriptor.state = ProcessState::Stopped;
                    } else {
                        entry.descriptor.state = ProcessState::Failed;
                    }
                }
                drop(registry);
                if exit_code == 0 {
                    self.events.publish(EventKind::Stopped { name: name.clone(), exit_code });
                } else {
                    let max_retries = policy_name
                        .as_deref()
                        .and_then(|p| self.policy_engine.policy(p))
                        .map(|p| p.max_retries)
                        .unwrap_or(0);
                    if self.policy_engine.attempt_count(&name) >= max_retries && max_retries > 0 {
                        self.events.publish(EventKind::RestartGaveUp {
                            name: name.clone(),
                            max_retries,
                        });
                    }
                    self.events.publish(EventKind::Failed { name: name.clone(), exit_code });
                }
            }
            Decision::Restart { delay } => {
                let attempt = self.policy_engine.attempt_count(&name);
                {
                    let mut registry = self.registry.write().await;
                    if let Some(entry) = registry.get_mut(&name) {
                        entry.descriptor.state = ProcessState::Backoff;
                    }
                }
                self.events.publish(EventKind::BackoffScheduled {
                    name: name.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });

                let this = self.clone();
                let name2 = name.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            let spec = {
                                let registry = this.registry.read().await;
                                registry.get(&name2).map(|e| e.descriptor.spec.clone())
                            };
                            if let Some(spec) = spec {
                                let _ = this.relaunch(&name2, spec).await;
                            }
                        }
                        _ = this.cancel.cancelled() => {}
                    }
                });
            }
        }
    }

    async fn relaunch(self: &Arc<Self>, name: &str, spec: ProcessSpec) -> Result<()> {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get_mut(name) else {
            return Err(SupervisorError::NotFound(name.to_string()));
        };
        if !matches!(entry.descriptor.state, ProcessState::Backoff) {
            return Ok(()); // stopped/removed while waiting out the backoff
        }
        let rings = entry.rings.clone();
        match ChildHandle::spawn(name, &spec, rings) {
            Ok(handle) => {
                let pid = handle.pid;
                entry.handle = Some(handle);
                entry.descriptor.state = ProcessState::Running;
                entry.descriptor.pid = Some(pid);
                entry.descriptor.started_at_epoch_secs = Some(self.clock.epoch_secs());
                entry.descriptor.restart_count += 1;
                drop(registry);
                self.events.publish(EventKind::Started { name: name.to_string(), pid });
                self.spawn_reaper(name.to_string());
                Ok(())
            }
            Err(e) => {
                entry.descriptor.state = ProcessState::Failed;
                drop(registry);
                Err(e)
            }
        }
    }

    pub async fn stop(self: &Arc<Self>, name: &str, opts: StopOptions) -> Result<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;
        self.stop_locked(name, opts).await
    }

    #[instrument(skip(self), fields(process = name))]
    async fn stop_locked(&self, name: &str, opts: StopOptions) -> Result<()> {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get_mut(name) else {
            return Err(SupervisorError::NotFound(name.to_string()));
        };
        if entry.descriptor.state.is_terminal() {
            return Ok(());
        }
        entry.descriptor.state = ProcessState::Stopping;
        let Some(mut handle) = entry.handle.take() else {
            entry.descriptor.state = ProcessState::Stopped;
            return Ok(());
        };
        drop(registry);

        let reaped = if opts.force {
            handle.force_kill(name).await?
        } else {
            handle.stop_gracefully(name, opts.grace).await?
        };

        let Some(exit_code) = reaped else {
            // Still alive after SIGKILL + grace: leave the descriptor in
            // `Stopping` rather than lying about it being stopped.
            let mut registry = self.registry.write().await;
            if let Some(entry) = registry.get_mut(name) {
                entry.handle = Some(handle);
            }
            drop(registry);
            self.events.publish(EventKind::StopForceFailed { name: name.to_string() });
            return Err(SupervisorError::SignalFailed {
                name: name.to_string(),
                reason: "process still alive after SIGKILL and kill grace".to_string(),
            });
        };

        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.get_mut(name) {
            entry.descriptor.state = ProcessState::Stopped;
            entry.descriptor.pid = None;
            entry.descriptor.exit_code = Some(exit_code);
            entry.descriptor.stopped_at_epoch_secs = Some(self.clock.epoch_secs());
        }
        drop(registry);
        self.events.publish(EventKind::Stopped { name: name.to_string(), exit_code });
        Ok(())
    }

    /// Stops then starts `name` again, preserving its spec and restart_count.
    /// Holds the descriptor's operation lock for the whole sequence so no
    /// other caller can observe state between the internal stop and start.
    pub async fn restart(self: &Arc<Self>, name: &str) -> Result<Descriptor> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;
        let spec = {
            let registry = self.registry.read().await;
            let entry = registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
            entry.descriptor.spec.clone()
        };
        self.stop_locked(name, StopOptions::default()).await.ok();
        self.start_locked(name, spec).await
    }

    pub async fn remove(self: &Arc<Self>, name: &str) -> Result<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;
        self.stop_locked(name, StopOptions::default()).await.ok();
        let mut registry = self.registry.write().await;
        registry
            .remove(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        drop(registry);
        self.policy_engine.remove_restart_state(name);
        drop(_guard);
        self.op_locks.lock().expect("op lock map poisoned").remove(name);
        Ok(())
    }

    pub async fn list(&self, group: Option<&str>, state: Option<ProcessState>) -> Vec<Descriptor> {
        self.registry
            .read()
            .await
            .values()
            .map(|p| p.descriptor.clone())
            .filter(|d| group.is_none_or(|g| d.spec.group.as_deref() == Some(g)))
            .filter(|d| state.is_none_or(|s| d.state == s))
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<Descriptor> {
        self.registry.read().await.get(name).map(|p| p.descriptor.clone())
    }

    pub async fn output(&self, name: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let registry = self.registry.read().await;
        let entry = registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        Ok((entry.rings.stdout.snapshot(), entry.rings.stderr.snapshot()))
    }

    pub async fn metrics(&self, name: &str) -> Result<Option<Metrics>> {
        let pid = {
            let registry = self.registry.read().await;
            let entry = registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
            match entry.descriptor.pid {
                Some(pid) => pid,
                None => return Ok(None),
            }
        };

        let mut sys = System::new();
        let sys_pid = SysPid::from_u32(pid);
        sys.refresh_process(sys_pid);
        tokio::time::sleep(Duration::from_millis(120)).await;
        sys.refresh_process(sys_pid);

        let Some(proc) = sys.process(sys_pid) else {
            return Ok(None);
        };
        let uptime = {
            let registry = self.registry.read().await;
            registry
                .get(name)
                .and_then(|e| e.descriptor.started_at_epoch_secs)
                .map(|started| Duration::from_secs(self.clock.epoch_secs().saturating_sub(started)))
                .unwrap_or_default()
        };

        Ok(Some(Metrics {
            cpu_percent: proc.cpu_usage(),
            rss_bytes: proc.memory() * 1024,
            threads: 1,
            uptime,
        }))
    }

    /// Stops everything gracefully, bounded by `shutdown_deadline`. Used when
    /// the owning process (and thus the supervisor) is shutting down.
    pub async fn shutdown(self: &Arc<Self>) {
        self.cancel.cancel();
        let names: Vec<String> = self.registry.read().await.keys().cloned().collect();
        let stop_all = async {
            for name in names {
                let _ = self.stop(&name, StopOptions::default()).await;
            }
        };
        if tokio::time::timeout(DEFAULT_SHUTDOWN_DEADLINE, stop_all).await.is_err() {
            warn!("shutdown deadline exceeded, some processes may still be alive");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::collections::BTreeMap;

    fn supervisor() -> Arc<Supervisor<SystemClock>> {
        Supervisor::new(Arc::new(SystemClock), Arc::new(EventBus::new()))
    }

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
    async fn start_then_natural_exit_reaches_stopped() {
        let sup = supervisor();
        sup.start("echo-ok", spec("echo", &["hi"])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let d = sup.get("echo-ok").await.unwrap();
        assert_eq!(d.state, ProcessState::Stopped);
        assert_eq!(d.exit_code, Some(0));
        let (stdout, _) = sup.output("echo-ok").await.unwrap();
        assert_eq!(stdout, b"hi\n");
    }

    #[tokio::test]
    async fn start_twice_reports_already_running() {
        let sup = supervisor();
        sup.start("sleeper", spec("sleep", &["5"])).await.unwrap();
        let err = sup.start("sleeper", spec("sleep", &["5"])).await.unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning(_)));
        sup.stop("sleeper", StopOptions { grace: Duration::from_millis(200), force: true }).await.unwrap();
    }

    #[tokio::test]
    async fn stop_on_stopped_process_is_a_noop() {
        let sup = supervisor();
        sup.start("quick", spec("true", &[])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        sup.stop("quick", StopOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn stop_unknown_name_is_not_found() {
        let sup = supervisor();
        let err = sup.stop("ghost", StopOptions::default()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound(_)));
    }

    #[tokio::test]
    async fn crash_with_ignore_codes_stops_without_restart() {
        let sup = supervisor();
        let mut p = crate::descriptor::RestartPolicy::standard();
        p.name = "ignore2".into();
        p.ignore_codes = Some(vec![2]);
        sup.policy_engine().register_policy(p).unwrap();

        let mut s = spec("sh", &["-c", "exit 2"]);
        s.policy = Some("ignore2".into());
        sup.start("s6", s).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let d = sup.get("s6").await.unwrap();
        assert_eq!(d.state, ProcessState::Stopped);
        assert_eq!(d.restart_count, 0);
    }

    #[tokio::test]
    async fn restart_preserves_spec_and_blocks_concurrent_callers() {
        let sup = supervisor();
        sup.start("sleeper", spec("sleep", &["5"])).await.unwrap();

        let sup2 = sup.clone();
        let restarting = tokio::spawn(async move { sup2.restart("sleeper").await });

        // A concurrent Start queues behind restart's op lock rather than
        // interleaving with its internal stop/start; once restart finishes
        // the descriptor is live again, so the queued Start sees AlreadyRunning
        // instead of ever observing a torn mid-restart state.
        let concurrent = sup.start("sleeper", spec("sleep", &["5"])).await;
        assert!(matches!(concurrent, Err(SupervisorError::AlreadyRunning(_))));

        let restarted = restarting.await.unwrap().unwrap();
        assert_eq!(restarted.spec.command, "sleep");
        sup.stop("sleeper", StopOptions { grace: Duration::from_millis(200), force: true })
            .await
            .unwrap();
    }
}
