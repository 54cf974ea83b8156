//! Errors raised by the pool.

use std::io;

/// Errors in a pool [`Config`](crate::config::Config).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("unable to parse {key}={value}")]
    Parse { key: String, value: String },
}

/// Errors surfaced by the thread pool, its balancer and its workers.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("thread pool is shut down")]
    Closed,

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("result was dropped before delivery")]
    ResultLost,

    /// Popping from an empty pool. Pops and pushes are always paired, so this
    /// means internal state is corrupt.
    #[error("worker pool underflow")]
    Underflow,

    #[error("unknown worker {0}")]
    UnknownWorker(usize),

    #[error("unable to dispatch job to worker {0}")]
    DispatchFailed(usize),

    #[error("unable to signal completion from worker {0}")]
    DoneNotificationFailed(usize),

    #[error("lost contact with all workers")]
    WorkersLost,

    #[error("unable to spawn thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("unable to join() on {0} thread")]
    JoinFailed(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;
