//! The balancer: the single control loop that owns the worker pool.
//!
//! Every read and write of the pool happens on the balancer's thread, one
//! event at a time, so the pool needs no locking and every dispatch sees the
//! true least loaded worker rather than a stale snapshot.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{never, select, Receiver, Sender};
use tracing::{debug, error, trace, warn, Level};

use crate::{
    config::{Config, Strategy},
    error::{PoolError, Result},
    job::Job,
    message::Control,
    pool::Pool,
    stats::PoolStats,
    worker::Worker,
};

pub struct Balancer<Res>
where
    Res: Send + 'static,
{
    pool: Pool<Worker<Res>>,
    strategy: Strategy,

    /// Dispatches made so far; stamps each worker's latest dispatch.
    seq: u64,

    /// Next worker for [`Strategy::RoundRobin`].
    cursor: usize,
}

impl<Res> Balancer<Res>
where
    Res: Send + 'static,
{
    /// Creates a balancer over the given workers. Worker `i` must have uid `i`.
    pub fn new(workers: Vec<Worker<Res>>, strategy: Strategy) -> Self {
        debug_assert!(workers.iter().enumerate().all(|(i, w)| w.uid() == i));

        Balancer {
            pool: Pool::new(workers),
            strategy,
            seq: 0,
            cursor: 0,
        }
    }

    /// Spawns `config.workers` worker threads reporting to `done` and a
    /// balancer over them.
    pub fn with_config(config: &Config, done: &Sender<usize>) -> Result<Self> {
        let workers = (0..config.workers)
            .map(|uid| {
                let (disp_q, jobs) = crossbeam_channel::bounded(config.inbox_capacity);
                Worker::new(jobs, disp_q, done.clone(), uid)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(workers, config.strategy))
    }

    pub fn workers(&self) -> usize {
        self.pool.len()
    }

    pub fn total_pending(&self) -> usize {
        self.pool.iter().map(Worker::pending).sum()
    }

    /// Hands a job to a worker chosen by the strategy and re-ranks it.
    /// Blocks while that worker's inbox is full. Returns the worker's uid.
    pub fn dispatch(&mut self, job: Job<Res>) -> Result<usize> {
        let uid = match self.strategy {
            Strategy::LeastLoaded => self.pool.pop_least_loaded().ok_or(PoolError::Underflow)?,
            Strategy::RoundRobin => {
                if self.pool.is_empty() {
                    return Err(PoolError::Underflow);
                }
                let uid = self.cursor;
                self.cursor = (self.cursor + 1) % self.pool.len();
                self.pool.remove(uid);
                uid
            }
        };

        self.seq += 1;
        let seq = self.seq;

        let outcome = match self.pool.get_mut(uid) {
            Some(worker) => worker.dispatch(job, seq),
            None => Err(PoolError::UnknownWorker(uid)),
        };
        self.pool.reinsert(uid);
        outcome?;

        debug_assert!(self.pool.is_consistent());
        self.trace_load("dispatched", uid);

        Ok(uid)
    }

    /// Records a completion reported by worker `uid` and re-seats it.
    pub fn complete(&mut self, uid: usize) -> Result<()> {
        if !self.pool.remove(uid) {
            return Err(PoolError::UnknownWorker(uid));
        }

        if let Some(worker) = self.pool.get_mut(uid) {
            if !worker.complete() {
                warn!(worker = uid, "completion reported with nothing pending");
            }
        }
        self.pool.reinsert(uid);

        debug_assert!(self.pool.is_consistent());
        self.trace_load("completed", uid);

        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.pool.iter().map(Worker::stats).collect(),
        }
    }

    /// Pending counts in heap layout order.
    pub fn heap_loads(&self) -> Vec<usize> {
        self.pool
            .heap_order()
            .iter()
            .filter_map(|&uid| self.pool.get(uid))
            .map(Worker::pending)
            .collect()
    }

    fn trace_load(&self, event: &'static str, uid: usize) {
        if tracing::enabled!(Level::TRACE) {
            let stats = self.stats();
            trace!(
                worker = uid,
                event,
                loads = ?stats.pending(),
                mean = stats.mean(),
                variance = stats.variance(),
                "pool rebalanced"
            );
        }
    }

    /// Spawns the balancer thread running [`Balancer::run`].
    pub fn balancer_thread(
        self,
        intake: Receiver<Job<Res>>,
        done: Receiver<usize>,
        control: Receiver<Control>,
    ) -> Result<JoinHandle<Result<()>>> {
        let handle = thread::Builder::new()
            .name("loadwell-balancer".to_string())
            .spawn(move || self.run(intake, done, control))?;

        Ok(handle)
    }

    /// Serves intake, completions and control requests until intake is
    /// closed, then drains outstanding work and terminates every worker.
    pub fn run(
        mut self,
        intake: Receiver<Job<Res>>,
        done: Receiver<usize>,
        control: Receiver<Control>,
    ) -> Result<()> {
        if let Err(e) = self.serve(&intake, &done, &control) {
            error!(error = %e, "balancer stopped");
            return Err(e);
        }

        debug!(pending = self.total_pending(), "intake closed, draining");
        if let Err(e) = self.drain(&done) {
            error!(error = %e, "drain failed");
            return Err(e);
        }

        self.terminate()
    }

    fn serve(
        &mut self,
        intake: &Receiver<Job<Res>>,
        done: &Receiver<usize>,
        control: &Receiver<Control>,
    ) -> Result<()> {
        let closed = never();
        let mut control_open = true;

        loop {
            let control_rx = if control_open { control } else { &closed };

            select! {
                recv(intake) -> job => match job {
                    Ok(job) => {
                        self.dispatch(job)?;
                    }
                    Err(_) => return Ok(()),
                },
                recv(done) -> uid => {
                    let uid = uid.map_err(|_| PoolError::WorkersLost)?;
                    self.complete(uid)?;
                },
                recv(control_rx) -> msg => match msg {
                    Ok(Control::Stats(reply)) => {
                        let _ = reply.send(self.stats());
                    }
                    Err(_) => control_open = false,
                },
            }
        }
    }

    fn drain(&mut self, done: &Receiver<usize>) -> Result<()> {
        while self.total_pending() > 0 {
            let uid = done.recv().map_err(|_| PoolError::WorkersLost)?;
            self.complete(uid)?;
        }
        Ok(())
    }

    fn terminate(self) -> Result<()> {
        let mut first_err = None;

        for mut worker in self.pool.into_entries() {
            if let Err(e) = worker.terminate() {
                warn!(worker = worker.uid(), error = %e, "worker terminated abnormally");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Balancer;
    use crate::{
        config::Strategy,
        error::PoolError,
        job::{Job, ResultHandle},
        message::Message,
        worker::Worker,
    };
    use crossbeam_channel::{bounded, Receiver};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    type Inbox = Receiver<Message<usize>>;

    /// A balancer whose workers are played by the test through their inboxes.
    fn detached(workers: usize, strategy: Strategy) -> (Balancer<usize>, Vec<Inbox>) {
        let (workers, inboxes): (Vec<_>, Vec<_>) = (0..workers)
            .map(|uid| {
                let (disp_q, inbox) = bounded(512);
                (Worker::detached(uid, disp_q), inbox)
            })
            .unzip();

        (Balancer::new(workers, strategy), inboxes)
    }

    fn submit(balancer: &mut Balancer<usize>, value: usize) -> (usize, ResultHandle<usize>) {
        let (job, handle) = Job::new(move || value);
        let uid = balancer.dispatch(job).unwrap();
        (uid, handle)
    }

    /// Runs the next job waiting in a worker's inbox.
    fn run_next(inbox: &Inbox) {
        match inbox.try_recv() {
            Ok(Message::Request(job)) => {
                job.run();
            }
            other => panic!("expected a queued job, got {other:?}"),
        }
    }

    fn assert_heap(balancer: &Balancer<usize>) {
        let loads = balancer.heap_loads();
        for c in 1..loads.len() {
            assert!(loads[(c - 1) / 2] <= loads[c], "heap violated: {loads:?}");
        }
    }

    fn pending(balancer: &Balancer<usize>) -> Vec<usize> {
        balancer.stats().pending()
    }

    #[test]
    fn balancer_picks_least_loaded() {
        let (mut balancer, _inboxes) = detached(3, Strategy::LeastLoaded);

        for value in 0..9 {
            submit(&mut balancer, value);
        }
        assert_eq!(pending(&balancer), vec![3, 3, 3]);

        balancer.complete(1).unwrap();
        balancer.complete(1).unwrap();
        balancer.complete(2).unwrap();
        assert_eq!(pending(&balancer), vec![3, 1, 2]);

        let (uid, _) = submit(&mut balancer, 9);
        assert_eq!(uid, 1);
        assert_eq!(pending(&balancer), vec![3, 2, 2]);

        let (uid, _) = submit(&mut balancer, 10);
        assert!(uid == 1 || uid == 2);
        assert_eq!(balancer.stats().workers[uid].pending, 3);
        assert_heap(&balancer);
    }

    #[test]
    fn balancer_rebalances_after_completion() {
        let (mut balancer, _inboxes) = detached(3, Strategy::LeastLoaded);

        let uids: Vec<usize> = (0..6).map(|value| submit(&mut balancer, value).0).collect();
        let first = uids[0];
        assert_eq!(pending(&balancer), vec![2, 2, 2]);

        balancer.complete(first).unwrap();
        assert_eq!(balancer.stats().workers[first].pending, 1);

        let (uid, _) = submit(&mut balancer, 6);
        assert_eq!(uid, first);
    }

    #[test]
    fn balancer_spreads_instant_work() {
        let (mut balancer, inboxes) = detached(3, Strategy::LeastLoaded);
        let mut results = Vec::new();

        for value in 0..5 {
            let (uid, handle) = submit(&mut balancer, value * 10);
            run_next(&inboxes[uid]);
            balancer.complete(uid).unwrap();
            assert_heap(&balancer);
            results.push(handle);
        }

        let mut dispatched: Vec<u64> = balancer
            .stats()
            .workers
            .iter()
            .map(|w| w.dispatched)
            .collect();
        dispatched.sort_unstable();
        assert_eq!(dispatched, vec![1, 2, 2]);

        let results: Vec<usize> = results.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        assert_eq!(balancer.total_pending(), 0);
    }

    #[test]
    fn balancer_conserves_pending() {
        let (mut balancer, inboxes) = detached(8, Strategy::LeastLoaded);
        let mut rng = StdRng::seed_from_u64(42);
        let mut handles = Vec::new();
        let (mut dispatched, mut completed) = (0u64, 0u64);

        for value in 0..500 {
            let (uid, handle) = submit(&mut balancer, value);
            handles.push((value, handle));
            dispatched += 1;
            assert_heap(&balancer);

            if rng.gen_bool(0.6) {
                let busy: Vec<usize> = balancer
                    .stats()
                    .workers
                    .iter()
                    .filter(|w| w.pending > 0)
                    .map(|w| w.id)
                    .collect();
                let uid = if busy.is_empty() { uid } else { busy[rng.gen_range(0..busy.len())] };

                run_next(&inboxes[uid]);
                balancer.complete(uid).unwrap();
                completed += 1;
                assert_heap(&balancer);
            }

            let stats = balancer.stats();
            assert_eq!(stats.total_pending() as u64, dispatched - completed);
            assert_eq!(stats.total_dispatched(), dispatched);
            assert_eq!(stats.total_completed(), completed);

            let min = stats.pending().into_iter().min().unwrap();
            assert_eq!(balancer.heap_loads()[0], min);
        }

        for (uid, inbox) in inboxes.iter().enumerate() {
            while !inbox.is_empty() {
                run_next(inbox);
                balancer.complete(uid).unwrap();
            }
        }

        assert_eq!(balancer.total_pending(), 0);
        assert_eq!(balancer.workers(), 8);
        for (value, handle) in handles {
            assert_eq!(handle.wait().unwrap(), value);
        }
    }

    #[test]
    fn balancer_round_robin() {
        let (mut balancer, _inboxes) = detached(3, Strategy::RoundRobin);

        let uids: Vec<usize> = (0..7).map(|value| submit(&mut balancer, value).0).collect();
        assert_eq!(uids, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(pending(&balancer), vec![3, 2, 2]);
        assert_heap(&balancer);

        balancer.complete(0).unwrap();
        assert_eq!(balancer.heap_loads()[0], 2);
    }

    #[test]
    fn balancer_rejects_unknown_worker() {
        let (mut balancer, _inboxes) = detached(2, Strategy::LeastLoaded);

        assert!(matches!(
            balancer.complete(5),
            Err(PoolError::UnknownWorker(5))
        ));
        assert!(balancer.complete(0).is_ok());
        assert_eq!(balancer.total_pending(), 0);
    }

    #[test]
    fn balancer_dispatch_to_dead_worker() {
        let (mut balancer, inboxes) = detached(1, Strategy::LeastLoaded);
        drop(inboxes);

        let (job, handle) = Job::new(|| 1);
        assert!(matches!(
            balancer.dispatch(job),
            Err(PoolError::DispatchFailed(0))
        ));
        assert!(matches!(handle.wait(), Err(PoolError::ResultLost)));
        assert_eq!(balancer.workers(), 1);
        assert_eq!(balancer.total_pending(), 0);
    }
}
