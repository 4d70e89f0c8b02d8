//! Typed error kinds for the watcher, per the error-handling design: `Transient`
//! and `NotFound` are recovered locally by the caller and never reach here in
//! their recovered form; everything else is fatal and carries enough context
//! (height/header id) for an operator to act on.

use thiserror::Error;

/// The six error kinds the watcher distinguishes end-to-end.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// Network/DB hiccup. Retried with backoff by the caller; this variant is
    /// only ever inspected, never allowed to propagate out of `main`.
    #[error("transient: {0}")]
    Transient(String),

    /// Expected absence (e.g. the next block hasn't been produced yet).
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream node returned JSON that doesn't match the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A database invariant (FK, uniqueness, chain linkage) was violated.
    #[error("integrity violation at height={height:?} header={header_id:?}: {message}")]
    Integrity {
        height: Option<i64>,
        header_id: Option<String>,
        message: String,
    },

    /// Rollback walked back further than `tracker.max_rollback_depth`.
    #[error("fork too deep: walked back {attempted} blocks, max is {max}")]
    ForkTooDeep { attempted: u32, max: u32 },

    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl WatcherError {
    pub fn integrity(height: Option<i64>, header_id: Option<&str>, message: impl Into<String>) -> Self {
        WatcherError::Integrity {
            height,
            header_id: header_id.map(|s| s.to_string()),
            message: message.into(),
        }
    }

    /// The process exit code this error kind maps to per §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            WatcherError::Config(_) => 2,
            WatcherError::Transient(_) | WatcherError::NotFound(_) => {
                // Never expected to reach the top level; treat as fatal if it does.
                1
            }
            WatcherError::Protocol(_) | WatcherError::Integrity { .. } | WatcherError::ForkTooDeep { .. } => 1,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, WatcherError::Transient(_) | WatcherError::NotFound(_))
    }
}

impl From<sqlx::Error> for WatcherError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() || db_err.is_foreign_key_violation() => {
                WatcherError::integrity(None, None, db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => WatcherError::Transient(e.to_string()),
            sqlx::Error::RowNotFound => WatcherError::NotFound(e.to_string()),
            _ => WatcherError::integrity(None, None, e.to_string()),
        }
    }
}

impl From<reqwest::Error> for WatcherError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            WatcherError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            if status.is_server_error() {
                WatcherError::Transient(e.to_string())
            } else if status.as_u16() == 404 {
                WatcherError::NotFound(e.to_string())
            } else {
                WatcherError::Protocol(e.to_string())
            }
        } else {
            WatcherError::Protocol(e.to_string())
        }
    }
}

pub type WatcherResult<T> = Result<T, WatcherError>;
