//! A load balanced threadpool.

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Sender};
use tracing::{debug, warn};

use crate::{
    balancer::Balancer,
    config::Config,
    error::{PoolError, Result},
    job::{Job, ResultHandle},
    message::Control,
    stats::PoolStats,
};

/// A fixed set of worker threads fed by a balancer that always hands new work
/// to the least loaded worker.
///
/// Dropping the pool shuts it down gracefully, same as [`ThreadPool::shutdown`].
pub struct ThreadPool<Res>
where
    Res: Send + 'static,
{
    intake: Option<Sender<Job<Res>>>,
    control: Sender<Control>,

    balancer: Option<JoinHandle<Result<()>>>,
    workers: usize,
}

impl<Res> ThreadPool<Res>
where
    Res: Send + 'static,
{
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        // Unbounded so a finished worker never waits on a balancer that is
        // itself blocked on that worker's full inbox.
        let (done_tx, done_rx) = unbounded();
        let balancer = Balancer::with_config(&config, &done_tx)?;
        drop(done_tx);

        let (intake_tx, intake_rx) = bounded(config.intake_capacity);
        let (control_tx, control_rx) = unbounded();
        let handle = balancer.balancer_thread(intake_rx, done_rx, control_rx)?;

        debug!(
            workers = config.workers,
            inbox_capacity = config.inbox_capacity,
            strategy = ?config.strategy,
            "thread pool started"
        );

        Ok(ThreadPool {
            intake: Some(intake_tx),
            control: control_tx,
            balancer: Some(handle),
            workers: config.workers,
        })
    }

    pub fn with_workers(workers: usize) -> Result<Self> {
        Self::new(Config::with_workers(workers))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Submits a closure for execution and returns a handle to its result.
    ///
    /// Blocks while the balancer is backed up. Fails only if the pool is no
    /// longer running.
    pub fn submit<F>(&self, f: F) -> Result<ResultHandle<Res>>
    where
        F: FnOnce() -> Res + Send + 'static,
    {
        let intake = self.intake.as_ref().ok_or(PoolError::Closed)?;
        let (job, handle) = Job::new(f);

        intake.send(job).map_err(|_| PoolError::Closed)?;

        Ok(handle)
    }

    /// Snapshot of per-worker load, taken by the balancer between events.
    pub fn stats(&self) -> Result<PoolStats> {
        let (reply, stats) = bounded(1);

        self.control
            .send(Control::Stats(reply))
            .map_err(|_| PoolError::Closed)?;

        stats.recv().map_err(|_| PoolError::Closed)
    }

    /// Stops accepting work, waits for every submitted job to finish, and
    /// joins all threads.
    pub fn shutdown(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the last intake sender is the balancer's signal to drain.
        self.intake.take();

        let Some(balancer) = self.balancer.take() else {
            return Ok(());
        };

        let result = match balancer.join() {
            Ok(result) => result,
            Err(_) => Err(PoolError::JoinFailed("balancer".to_string())),
        };

        debug!(ok = result.is_ok(), "thread pool stopped");
        result
    }
}

impl<Res> Drop for ThreadPool<Res>
where
    Res: Send + 'static,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "thread pool shut down abnormally");
        }
    }
}
