//! An indexed binary min-heap of workers.
//!
//! Entries live in a fixed slot (their id) for the lifetime of the pool; the
//! heap orders ids and the pool records where each id currently sits. This
//! allows removing an arbitrary entry in O(log n) instead of scanning for it.
//!
//! An entry is either *seated* (in the heap) or *unseated* (popped or removed).
//! Only unseated entries may be mutated, so a rank can never change under the
//! heap's feet.

use std::fmt::Debug;

/// Something the pool can order. Lower ranks sit closer to the root.
pub trait Ranked {
    type Rank: Ord + Debug;

    fn rank(&self) -> Self::Rank;
}

#[derive(Debug)]
pub struct Pool<T: Ranked> {
    entries: Vec<T>,
    heap: Vec<usize>,
    positions: Vec<Option<usize>>,
}

impl<T: Ranked> Pool<T> {
    /// Creates a pool with every entry seated. Entry `i` gets id `i`.
    pub fn new(entries: Vec<T>) -> Self {
        let n = entries.len();
        let mut pool = Pool {
            entries,
            heap: (0..n).collect(),
            positions: (0..n).map(Some).collect(),
        };

        for i in (0..n / 2).rev() {
            pool.down(i);
        }

        pool
    }

    /// Total number of entries, seated or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries currently in the heap.
    pub fn seated(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.entries.get(id)
    }

    /// Mutable access to an unseated entry. Returns `None` for seated ones.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        match self.positions.get(id) {
            Some(None) => self.entries.get_mut(id),
            _ => None,
        }
    }

    /// Current heap position of the entry, if seated.
    pub fn position(&self, id: usize) -> Option<usize> {
        self.positions.get(id).copied().flatten()
    }

    /// Id of the lowest ranked entry without removing it.
    pub fn peek(&self) -> Option<usize> {
        self.heap.first().copied()
    }

    /// Removes and returns the id of the lowest ranked entry.
    pub fn pop_least_loaded(&mut self) -> Option<usize> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(0, last);

        let id = self.heap.pop()?;
        self.positions[id] = None;
        self.down(0);

        Some(id)
    }

    /// Seats an unseated entry. Returns false if the id is unknown or
    /// already seated.
    pub fn reinsert(&mut self, id: usize) -> bool {
        match self.positions.get(id) {
            Some(None) => {}
            _ => return false,
        }

        let i = self.heap.len();
        self.heap.push(id);
        self.positions[id] = Some(i);
        self.up(i);

        true
    }

    /// Unseats an arbitrary entry. Returns false if it was not seated.
    pub fn remove(&mut self, id: usize) -> bool {
        let Some(i) = self.position(id) else {
            return false;
        };

        let last = self.heap.len() - 1;
        if i != last {
            self.swap(i, last);
        }
        self.heap.pop();
        self.positions[id] = None;

        if i < self.heap.len() && !self.down(i) {
            self.up(i);
        }

        true
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Seated ids in heap layout order.
    pub fn heap_order(&self) -> &[usize] {
        &self.heap
    }

    pub fn into_entries(self) -> Vec<T> {
        self.entries
    }

    /// Checks the heap property and that every tracked position is accurate.
    pub fn is_consistent(&self) -> bool {
        let ordered = (1..self.heap.len()).all(|c| !self.less(c, (c - 1) / 2));
        let indexed = self
            .heap
            .iter()
            .enumerate()
            .all(|(i, &id)| self.positions[id] == Some(i));
        let seated = self.positions.iter().filter(|p| p.is_some()).count();

        ordered && indexed && seated == self.heap.len()
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.entries[self.heap[i]].rank() < self.entries[self.heap[j]].rank()
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.positions[self.heap[i]] = Some(i);
        self.positions[self.heap[j]] = Some(j);
    }

    fn up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(i, parent) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Sifts down from `start`. Returns whether the entry moved.
    fn down(&mut self, start: usize) -> bool {
        let n = self.heap.len();
        let mut i = start;

        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }

            let mut child = left;
            if left + 1 < n && self.less(left + 1, left) {
                child = left + 1;
            }
            if !self.less(child, i) {
                break;
            }

            self.swap(i, child);
            i = child;
        }

        i > start
    }
}
