//! Jobs to be dispatched and executed.

use std::{
    any::Any,
    fmt::{self, Debug},
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{PoolError, Result};

/// Represents a job to be submitted to the threadpool.
pub struct Job<Res>
where
    Res: Send,
{
    /// Task to be executed
    task: Box<dyn FnOnce() -> Res + Send + 'static>,

    /// One-shot channel the outcome is written to, exactly once.
    result_sink: Sender<Result<Res>>,
}

impl<Res> Debug for Job<Res>
where
    Res: Send,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

impl<Res> Job<Res>
where
    Res: Send,
{
    /// Creates a new job from a closure, along with the handle its result
    /// will be delivered to.
    pub fn new<F>(f: F) -> (Self, ResultHandle<Res>)
    where
        F: FnOnce() -> Res + Send + 'static,
    {
        let (tx, rx) = bounded(1);

        (
            Job {
                task: Box::new(f),
                result_sink: tx,
            },
            ResultHandle { result_source: rx },
        )
    }

    /// Consumes this job, runs the task and responds with its outcome.
    ///
    /// A panicking task is caught and reported as [`PoolError::Panicked`].
    /// Returns false if the caller had already dropped its handle.
    pub fn run(self) -> bool {
        let task = self.task;
        let outcome = panic::catch_unwind(AssertUnwindSafe(task))
            .map_err(|payload| PoolError::Panicked(panic_message(payload.as_ref())));

        self.result_sink.send(outcome).is_ok()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// Caller side of a submitted job.
#[derive(Debug)]
pub struct ResultHandle<Res> {
    result_source: Receiver<Result<Res>>,
}

impl<Res> ResultHandle<Res> {
    /// Blocks until the job has run.
    pub fn wait(self) -> Result<Res> {
        self.result_source
            .recv()
            .unwrap_or(Err(PoolError::ResultLost))
    }

    /// Blocks for at most `timeout`. On timeout the handle is given back so
    /// the caller can keep waiting; the job itself is not cancelled.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<Res>, Self> {
        match self.result_source.recv_timeout(timeout) {
            Ok(outcome) => Ok(outcome),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(PoolError::ResultLost)),
        }
    }

    /// Returns the outcome if the job already ran.
    pub fn try_wait(self) -> std::result::Result<Result<Res>, Self> {
        match self.result_source.try_recv() {
            Ok(outcome) => Ok(outcome),
            Err(TryRecvError::Empty) => Err(self),
            Err(TryRecvError::Disconnected) => Ok(Err(PoolError::ResultLost)),
        }
    }
}
