//! The process descriptor: identity, spec, and lifecycle state of a managed process.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// User-supplied launch parameters for a managed process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Name of the restart policy to apply; `None` means "never restart".
    #[serde(default)]
    pub policy: Option<String>,
}

impl ProcessSpec {
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if name.is_empty() || name.len() > 100 {
            return Err("name must be 1-100 characters".into());
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err("name must match [A-Za-z0-9._-]".into());
        }
        if self.command.trim().is_empty() {
            return Err("command must not be empty".into());
        }
        Ok(())
    }
}

/// The lifecycle state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
    Backoff,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Failed)
    }

    pub fn is_live(self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }
}

/// Synthetic, negative exit codes the core itself assigns (never produced by
/// a real child exit status).
pub mod synthetic_exit {
    pub const SPAWN_FAILED: i32 = -1;
    pub const KILLED_BY_SUPERVISOR: i32 = -2;
}

/// One managed process: identity, spec, and current lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub spec: ProcessSpec,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub restart_count: u32,
    pub created_at_epoch_secs: u64,
    pub started_at_epoch_secs: Option<u64>,
    pub stopped_at_epoch_secs: Option<u64>,
}

impl Descriptor {
    pub fn new(name: String, spec: ProcessSpec, now_epoch_secs: u64) -> Self {
        Self {
            name,
            spec,
            state: ProcessState::Stopped,
            pid: None,
            exit_code: None,
            restart_count: 0,
            created_at_epoch_secs: now_epoch_secs,
            started_at_epoch_secs: None,
            stopped_at_epoch_secs: None,
        }
    }
}

/// A named, reusable restart policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub name: String,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    #[serde(default)]
    pub restart_on_codes: Option<Vec<i32>>,
    #[serde(default)]
    pub ignore_codes: Option<Vec<i32>>,
}

impl RestartPolicy {
    pub fn standard() -> Self {
        Self {
            name: "standard".into(),
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            max_delay: Duration::from_secs(300),
            restart_on_codes: None,
            ignore_codes: None,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            name: "aggressive".into(),
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            restart_on_codes: None,
            ignore_codes: None,
        }
    }

    pub fn conservative() -> Self {
        Self {
            name: "conservative".into(),
            max_retries: 5,
            base_delay: Duration::from_secs(30),
            backoff_multiplier: 1.2,
            max_delay: Duration::from_secs(600),
            restart_on_codes: None,
            ignore_codes: None,
        }
    }

    pub fn none() -> Self {
        Self {
            name: "none".into(),
            max_retries: 0,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(1),
            restart_on_codes: None,
            ignore_codes: None,
        }
    }

    /// The built-in policies, indexed by name.
    pub fn builtins() -> Vec<Self> {
        vec![
            Self::standard(),
            Self::aggressive(),
            Self::conservative(),
            Self::none(),
        ]
    }

    /// Minimum sustained uptime after which restart state resets.
    pub fn stabilization_window(&self) -> Duration {
        (self.base_delay * 10).max(Duration::from_secs(60))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be >= 1.0".into());
        }
        if self.max_delay < self.base_delay {
            return Err("max_delay must be >= base_delay".into());
        }
        Ok(())
    }
}

/// Per-descriptor, ephemeral restart bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RestartState {
    pub attempt: u32,
    pub current_delay: Option<Duration>,
    pub last_restart_at_epoch_secs: Option<u64>,
}

impl RestartState {
    pub fn reset(&mut self) {
        *self = RestartState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_rejects_empty_command() {
        let spec = ProcessSpec {
            command: "".into(),
            args: vec![],
            working_dir: None,
            env: BTreeMap::new(),
            group: None,
            policy: None,
        };
        assert!(spec.validate("ok-name").is_err());
    }

    #[test]
    fn spec_rejects_bad_name() {
        let spec = ProcessSpec {
            command: "echo".into(),
            args: vec![],
            working_dir: None,
            env: BTreeMap::new(),
            group: None,
            policy: None,
        };
        assert!(spec.validate("has spaces").is_err());
        assert!(spec.validate("fine-name_1.2").is_ok());
    }

    #[test]
    fn builtin_policies_match_fixed_values() {
        let standard = RestartPolicy::standard();
        assert_eq!(standard.max_retries, 3);
        assert_eq!(standard.base_delay, Duration::from_secs(5));
        assert_eq!(standard.backoff_multiplier, 1.5);
        assert_eq!(standard.max_delay, Duration::from_secs(300));

        let none = RestartPolicy::none();
        assert_eq!(none.max_retries, 0);
    }

    #[test]
    fn stabilization_window_floor_is_sixty_seconds() {
        let aggressive = RestartPolicy::aggressive();
        assert_eq!(aggressive.stabilization_window(), Duration::from_secs(60));
    }

    #[test]
    fn state_helpers_classify_correctly() {
        assert!(ProcessState::Stopped.is_terminal());
        assert!(ProcessState::Failed.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
        assert!(ProcessState::Running.is_live());
        assert!(!ProcessState::Backoff.is_live());
    }
}
