// SPDX-License-Identifier: Apache-2.0

//! Process supervision engine: spawn, monitor, restart, and schedule local
//! processes.
//!
//! [`Supervisor`] owns the process registry and lifecycle state machine.
//! [`PolicyEngine`] decides whether and when a crashed process restarts.
//! [`Scheduler`] fires cron/interval/once triggers against a `Supervisor`.
//! [`EventBus`] fans out lifecycle and scheduler events to subscribers.
//! [`PersistencePort`] is the narrow interface an external catalog
//! implements; `supervisor-store` ships one TOML-backed adapter.

pub mod child;
pub mod clock;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod persistence;
pub mod policy;
pub mod ring;
pub mod scheduler;
pub mod supervisor;

pub use clock::{Clock, SystemClock};
pub use descriptor::{Descriptor, ProcessSpec, ProcessState, RestartPolicy, RestartState};
pub use error::{Result, SupervisorError};
pub use event::{EventBus, EventKind, Receiver as EventReceiver, Stream};
pub use persistence::{LoadedState, PersistencePort};
pub use policy::{Decision, PolicyEngine};
pub use ring::{OutputCapture, OutputRing};
pub use scheduler::{Kind as ScheduleKind, ScheduleRecord, Scheduler, Target as ScheduleTarget};
pub use supervisor::{Metrics, StopOptions, Supervisor};

/// Returns this crate's version for diagnostics and tests.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    #[test]
    fn version_is_set() {
        assert!(!super::version().is_empty());
    }
}
