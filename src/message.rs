//! Message entities for communicating with workers and the balancer.

use crossbeam_channel::Sender;

use crate::{job::Job, stats::PoolStats};

/// Message represents a message to be sent to workers
/// in a threadpool.
#[derive(Debug)]
pub enum Message<Res>
where
    Res: Send,
{
    /// Request for job execution
    Request(Job<Res>),

    /// Message the thread to terminate itself.
    Terminate,
}

/// Out-of-band requests served by the balancer loop.
#[derive(Debug)]
pub enum Control {
    /// Reply with a snapshot of current worker load.
    Stats(Sender<PoolStats>),
}
