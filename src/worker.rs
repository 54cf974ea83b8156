//! Workers in a threadpool.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::{
    error::{PoolError, Result},
    job::Job,
    message::Message,
    pool::Ranked,
    stats::WorkerStats,
};

/// Worker represents a worker thread capable for receiving
/// and servicing jobs.
///
/// This is the balancer's side of the worker: it owns the sending half of the
/// worker's inbox and the bookkeeping the pool ranks it by. The thread itself
/// only ever sees its inbox and the done channel.
#[derive(Debug)]
pub struct Worker<Res>
where
    Res: Send + 'static,
{
    uid: usize,

    disp_q: Sender<Message<Res>>,

    worker: Option<JoinHandle<Result<()>>>,

    pending: usize,
    dispatched: u64,
    completed: u64,

    /// Balancer sequence number of the latest dispatch to this worker.
    last_dispatch: u64,
}

impl<Res> Ranked for Worker<Res>
where
    Res: Send + 'static,
{
    type Rank = (usize, u64, usize);

    /// Fewest pending first; among equals, the one dispatched to least recently.
    fn rank(&self) -> Self::Rank {
        (self.pending, self.last_dispatch, self.uid)
    }
}

impl<Res> Worker<Res>
where
    Res: Send + 'static,
{
    /// Creates a new Worker from the given job source, dispatch queue channel and done notice
    /// channel. The job source and done channel are moved into the worker thread for receiving
    /// requests and notifying done status respectively.
    pub fn new(
        job_source: Receiver<Message<Res>>,
        disp_q: Sender<Message<Res>>,
        done: Sender<usize>,
        uid: usize,
    ) -> Result<Self> {
        let worker = Self::worker_thread(job_source, done, uid)?;
        debug!(worker = uid, "worker started");

        Ok(Self::with_thread(uid, disp_q, Some(worker)))
    }

    fn with_thread(
        uid: usize,
        disp_q: Sender<Message<Res>>,
        worker: Option<JoinHandle<Result<()>>>,
    ) -> Self {
        Worker {
            uid,
            disp_q,
            worker,
            pending: 0,
            dispatched: 0,
            completed: 0,
            last_dispatch: 0,
        }
    }

    /// A worker with no thread behind it; whoever holds the inbox receiver
    /// plays the worker.
    #[cfg(test)]
    pub(crate) fn detached(uid: usize, disp_q: Sender<Message<Res>>) -> Self {
        Self::with_thread(uid, disp_q, None)
    }

    /// Spawns the worker thread core loop:
    /// ```text
    /// while let Ok(Request(job)) = jobs.recv() {
    ///     job.run();          // result goes to the job's own handle
    ///     done.send(uid);     // balancer re-ranks this worker
    /// }
    /// ```
    pub fn worker_thread(
        jobs: Receiver<Message<Res>>,
        done: Sender<usize>,
        uid: usize,
    ) -> Result<JoinHandle<Result<()>>> {
        let handle = thread::Builder::new()
            .name(format!("loadwell-worker-{uid}"))
            .spawn(move || -> Result<()> {
                while let Ok(Message::Request(job)) = jobs.recv() {
                    if !job.run() {
                        trace!(worker = uid, "result handle dropped before delivery");
                    }

                    done.send(uid)
                        .map_err(|_| PoolError::DoneNotificationFailed(uid))?;
                }

                debug!(worker = uid, "worker exiting");
                Ok(())
            })?;

        Ok(handle)
    }

    pub fn uid(&self) -> usize {
        self.uid
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Queues a job on this worker's inbox, blocking while the inbox is full.
    pub fn dispatch(&mut self, job: Job<Res>, seq: u64) -> Result<()> {
        self.disp_q
            .send(Message::Request(job))
            .map_err(|_| PoolError::DispatchFailed(self.uid))?;

        self.pending += 1;
        self.dispatched += 1;
        self.last_dispatch = seq;

        Ok(())
    }

    /// Records one completed job. Returns false if nothing was pending.
    pub fn complete(&mut self) -> bool {
        match self.pending.checked_sub(1) {
            Some(pending) => {
                self.pending = pending;
                self.completed += 1;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.uid,
            pending: self.pending,
            dispatched: self.dispatched,
            completed: self.completed,
        }
    }

    /// Terminates this worker by sending a Terminate message to the underlying
    /// worker thread and then invoking join() on it. Jobs already in the inbox
    /// run first.
    pub fn terminate(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        // A failed send means the thread is already gone; join reports why.
        let _ = self.disp_q.send(Message::Terminate);

        match worker.join() {
            Ok(result) => result,
            Err(_) => Err(PoolError::JoinFailed(format!("worker-{}", self.uid))),
        }
    }
}

impl<Res> Drop for Worker<Res>
where
    Res: Send + 'static,
{
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(worker = self.uid, error = %e, "worker terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, Worker};
    use crate::{error::PoolError, job::Job, pool::Ranked};
    use crossbeam_channel::{bounded, unbounded};

    #[test]
    fn worker_new() {
        let (disp_q, jobs) = bounded::<Message<()>>(1);
        let (done, _) = unbounded::<usize>();

        let mut worker = Worker::new(jobs, disp_q, done, 0).unwrap();
        assert!(worker.terminate().is_ok());
        assert!(worker.terminate().is_ok(), "terminate is idempotent");
    }

    #[test]
    fn worker_task() {
        let (disp_q, jobs) = bounded::<Message<u8>>(4);
        let (done, done_rx) = unbounded::<usize>();

        let mut worker = Worker::new(jobs, disp_q, done, 1).unwrap();

        let (job, result) = Job::new(|| 1u8);
        worker.dispatch(job, 1).unwrap();
        assert_eq!(worker.pending(), 1);

        assert_eq!(result.wait().unwrap(), 1);
        assert_eq!(done_rx.recv().unwrap(), 1);

        assert!(worker.complete());
        assert_eq!(worker.pending(), 0);
    }

    #[test]
    fn worker_multiple_tasks() {
        let (disp_q, jobs) = bounded::<Message<u8>>(4);
        let (done, done_rx) = unbounded::<usize>();

        let mut worker = Worker::new(jobs, disp_q, done, 3).unwrap();

        let ops: [fn(u8, u8) -> u8; 4] = [
            |a, b| a + b,
            |a, b| a - b,
            |a, b| a * b,
            |a, b| a / b,
        ];
        let handles: Vec<_> = ops
            .into_iter()
            .enumerate()
            .map(|(seq, op)| {
                let (job, result) = Job::new(move || op(2, 2));
                worker.dispatch(job, seq as u64).unwrap();
                result
            })
            .collect();

        let results: Vec<u8> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, vec![4, 0, 4, 1]);
        assert_eq!(done_rx.iter().take(4).filter(|&uid| uid == 3).count(), 4);
        assert_eq!(worker.stats().dispatched, 4);
    }

    #[test]
    fn worker_survives_panicking_task() {
        let (disp_q, jobs) = bounded::<Message<u8>>(4);
        let (done, done_rx) = unbounded::<usize>();

        let mut worker = Worker::new(jobs, disp_q, done, 0).unwrap();

        let (job, failed) = Job::new(|| -> u8 { panic!("bad input") });
        worker.dispatch(job, 1).unwrap();
        let (job, ok) = Job::new(|| 5u8);
        worker.dispatch(job, 2).unwrap();

        assert!(matches!(failed.wait(), Err(PoolError::Panicked(_))));
        assert_eq!(ok.wait().unwrap(), 5);
        assert_eq!(done_rx.iter().take(2).count(), 2);
        assert!(worker.terminate().is_ok());
    }

    #[test]
    fn worker_reports_lost_balancer() {
        let (disp_q, jobs) = bounded::<Message<()>>(1);
        let (done, done_rx) = unbounded::<usize>();
        drop(done_rx);

        let mut worker = Worker::new(jobs, disp_q, done, 2).unwrap();
        let (job, result) = Job::new(|| ());
        worker.dispatch(job, 1).unwrap();

        assert!(result.wait().is_ok());
        assert!(matches!(
            worker.terminate(),
            Err(PoolError::DoneNotificationFailed(2))
        ));
    }

    #[test]
    fn worker_rank_prefers_least_recent_dispatch() {
        let (disp_q, _jobs) = bounded::<Message<()>>(4);

        let mut a = Worker::detached(0, disp_q.clone());
        let mut b = Worker::detached(1, disp_q);
        assert!(a.rank() < b.rank());

        a.dispatch(Job::new(|| ()).0, 1).unwrap();
        b.dispatch(Job::new(|| ()).0, 2).unwrap();
        assert!(a.rank() < b.rank());

        a.dispatch(Job::new(|| ()).0, 3).unwrap();
        assert!(a.complete());
        assert!(b.rank() < a.rank());

        assert!(b.complete());
        assert!(!b.complete());
        assert_eq!(b.pending(), 0);
    }
}
