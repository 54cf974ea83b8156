//! A least-loaded work dispatcher over a fixed pool of worker threads.
//!
//! A single balancer thread owns a min-heap of workers ranked by pending
//! jobs. New jobs go to the root of the heap; completions re-seat the worker
//! that reported them. Workers only ever talk to the balancer through
//! channels.
//!
//! ```no_run
//! use loadwell::ThreadPool;
//!
//! let pool = ThreadPool::with_workers(4)?;
//! let handle = pool.submit(|| 6 * 7)?;
//! assert_eq!(handle.wait()?, 42);
//! pool.shutdown()?;
//! # Ok::<(), loadwell::PoolError>(())
//! ```

pub mod balancer;
pub mod config;
pub mod error;
pub mod job;
pub mod message;
pub mod pool;
pub mod stats;
pub mod threadpool;
pub mod worker;

pub use config::{Config, Strategy};
pub use error::{ConfigError, PoolError, Result};
pub use job::ResultHandle;
pub use stats::{PoolStats, WorkerStats};
pub use threadpool::ThreadPool;
