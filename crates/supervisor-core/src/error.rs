//! Typed error hierarchy for the supervision engine.

use thiserror::Error;

/// All ways a core operation can fail.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process `{0}` not found")]
    NotFound(String),

    #[error("process `{0}` is already running")]
    AlreadyRunning(String),

    #[error("invalid spec for `{name}`: {reason}")]
    InvalidSpec { name: String, reason: String },

    #[error("failed to spawn `{name}`: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal `{name}`: {reason}")]
    SignalFailed { name: String, reason: String },

    #[error("`{name}` exhausted its restart budget ({max_retries} retries)")]
    RestartGaveUp { name: String, max_retries: u32 },

    #[error("operation on `{0}` was cancelled")]
    Cancelled(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
