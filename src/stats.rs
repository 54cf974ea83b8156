//! Load snapshots.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub id: usize,
    /// Jobs accepted but not yet completed.
    pub pending: usize,
    pub dispatched: u64,
    pub completed: u64,
}

/// Per-worker load at one instant of the balancer loop, ordered by worker id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub workers: Vec<WorkerStats>,
}

impl PoolStats {
    pub fn total_pending(&self) -> usize {
        self.workers.iter().map(|w| w.pending).sum()
    }

    pub fn total_dispatched(&self) -> u64 {
        self.workers.iter().map(|w| w.dispatched).sum()
    }

    pub fn total_completed(&self) -> u64 {
        self.workers.iter().map(|w| w.completed).sum()
    }

    pub fn pending(&self) -> Vec<usize> {
        self.workers.iter().map(|w| w.pending).collect()
    }

    /// Mean pending jobs per worker.
    pub fn mean(&self) -> f64 {
        if self.workers.is_empty() {
            return 0.0;
        }
        self.total_pending() as f64 / self.workers.len() as f64
    }

    /// Population variance of pending jobs per worker.
    pub fn variance(&self) -> f64 {
        if self.workers.is_empty() {
            return 0.0;
        }
        let n = self.workers.len() as f64;
        let sum_sq: f64 = self
            .workers
            .iter()
            .map(|w| (w.pending * w.pending) as f64)
            .sum();
        let mean = self.mean();

        sum_sq / n - mean * mean
    }
}
