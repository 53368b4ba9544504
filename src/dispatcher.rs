//! Thread Dispatcher
//!
//! The simulation core never spawns threads. Anything parallel goes through
//! a [`ThreadDispatcher`]: a job is forked across `worker_count()` workers,
//! each invoked with its worker index, and `dispatch` returns only after
//! every worker finishes. The serial dispatcher runs the job inline; the
//! rayon dispatcher (behind the `parallel` feature) forks onto a rayon
//! thread pool.
//!
//! Author: Moroya Sakamoto

/// Forks jobs across workers with a join barrier.
pub trait ThreadDispatcher {
    /// Number of workers `dispatch` will invoke.
    fn worker_count(&self) -> usize;

    /// Run `job` once per worker, passing each its index. Returns after all
    /// workers complete.
    fn dispatch(&self, job: &(dyn Fn(usize) + Sync));
}

/// Runs every job inline on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialDispatcher;

impl ThreadDispatcher for SerialDispatcher {
    fn worker_count(&self) -> usize {
        1
    }

    fn dispatch(&self, job: &(dyn Fn(usize) + Sync)) {
        job(0);
    }
}

/// Dispatches onto the global rayon pool.
#[cfg(feature = "parallel")]
#[derive(Clone, Copy, Debug, Default)]
pub struct RayonDispatcher;

#[cfg(feature = "parallel")]
impl ThreadDispatcher for RayonDispatcher {
    fn worker_count(&self) -> usize {
        rayon::current_num_threads()
    }

    fn dispatch(&self, job: &(dyn Fn(usize) + Sync)) {
        use rayon::prelude::*;
        (0..self.worker_count())
            .into_par_iter()
            .for_each(|worker| job(worker));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_serial_dispatcher_runs_inline() {
        let dispatcher = SerialDispatcher;
        let count = AtomicUsize::new(0);
        dispatcher.dispatch(&|worker| {
            assert_eq!(worker, 0);
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_rayon_dispatcher_visits_every_worker() {
        let dispatcher = RayonDispatcher;
        let count = AtomicUsize::new(0);
        dispatcher.dispatch(&|_worker| {
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), dispatcher.worker_count());
    }
}
