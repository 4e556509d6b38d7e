//! Per-CPU queue table.
//!
//! The typical deployment is one run queue per CPU, each protected by
//! whatever lock the surrounding scheduler already holds: a `Vec<Mutex<_>>`,
//! one slot per hart, guarded with `spin::Mutex` rather than a blocking lock
//! (there's no thread to block on inside a kernel scheduler). This module
//! supplies that table as a plain struct rather than a `lazy_static!` global,
//! since owning the global is the caller's call, not this crate's — it
//! performs no load balancing or migration of its own.

use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

use crate::Queue;

/// One EEVDF run queue per CPU, each independently lockable.
pub struct PerCpuQueues<T> {
    queues: Vec<Mutex<Queue<T>>>,
}

impl<T> PerCpuQueues<T> {
    /// Build a table with `n_cpus` empty queues.
    pub fn new(n_cpus: usize) -> Self {
        let mut queues = Vec::with_capacity(n_cpus);
        for _ in 0..n_cpus {
            queues.push(Mutex::new(Queue::new()));
        }
        PerCpuQueues { queues }
    }

    /// Number of CPUs this table covers.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Lock the queue belonging to CPU `id`.
    ///
    /// Panics if `id >= self.len()`, same as `Vec` indexing — migrating a
    /// node between CPUs is the caller's job (detach from one queue's
    /// `schedule`, `add` into another's), this table only owns storage.
    pub fn lock(&self, id: usize) -> MutexGuard<'_, Queue<T>> {
        self.queues[id].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::PerCpuQueues;

    #[test]
    fn each_cpu_gets_its_own_independent_queue() {
        let table: PerCpuQueues<&'static str> = PerCpuQueues::new(4);
        assert_eq!(table.len(), 4);
        assert!(!table.is_empty());

        table.lock(0).add(1, 10, "on-cpu-0");
        assert_eq!(table.lock(0).total_nodes(), 1);
        assert_eq!(table.lock(1).total_nodes(), 0, "cpus must not share state");
    }

    #[test]
    #[should_panic]
    fn out_of_range_cpu_panics_like_vec_indexing() {
        let table: PerCpuQueues<i32> = PerCpuQueues::new(2);
        table.lock(2);
    }
}
