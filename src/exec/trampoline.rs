//! Per-thread trampoline for bounded-recursion resumption.
//!
//! When a run's synchronous resumption counter exceeds
//! [`TRAMPOLINE_THRESHOLD`](crate::config::TRAMPOLINE_THRESHOLD), the
//! continuation is handed here instead of being re-entered directly. The
//! first job on a thread starts a drain loop; jobs submitted while the drain
//! is active are appended to the same queue, never nested, so native stack
//! depth stays flat no matter how many suspension boundaries are chained.
//!
//! The queue is per-thread: a synchronous run segment cannot migrate threads
//! mid-segment, so the thread is the correct scope for its overflow work.
//! The resumption counter itself lives in per-run state, not here.

use std::cell::RefCell;
use std::collections::VecDeque;

use super::Job;

thread_local! {
    static TRAMPOLINE: RefCell<State> = RefCell::new(State {
        draining: false,
        queue: VecDeque::new(),
    });
}

struct State {
    draining: bool,
    queue: VecDeque<Job>,
}

/// Runs `job` through the current thread's trampoline.
///
/// If a drain loop is already active on this thread, the job is queued
/// behind it and this call returns immediately.
pub(crate) fn execute(job: Job) {
    let nested = TRAMPOLINE.with(|t| {
        let mut state = t.borrow_mut();
        if state.draining {
            state.queue.push_back(job);
            return None;
        }
        state.draining = true;
        Some(job)
    });

    let Some(first) = nested else { return };

    // Clears the draining flag even if a job unwinds, so the thread's
    // trampoline is usable afterwards. Queued jobs surviving an unwind are
    // dropped with the queue contents intact for the next drain.
    struct DrainGuard;
    impl Drop for DrainGuard {
        fn drop(&mut self) {
            TRAMPOLINE.with(|t| t.borrow_mut().draining = false);
        }
    }
    let _guard = DrainGuard;

    let mut next = Some(first);
    while let Some(job) = next {
        job();
        next = TRAMPOLINE.with(|t| t.borrow_mut().queue.pop_front());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn nested_submissions_join_the_active_drain() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        execute(Box::new(move || {
            o1.lock().push("outer-start");
            let inner = o2.clone();
            execute(Box::new(move || inner.lock().push("inner")));
            // The nested job must not have run yet: it was queued, not nested.
            o2.lock().push("outer-end");
        }));
        assert_eq!(*order.lock(), vec!["outer-start", "outer-end", "inner"]);
    }

    #[test]
    fn deep_chains_do_not_grow_the_stack() {
        fn bounce(remaining: usize, hits: Arc<AtomicUsize>) {
            hits.fetch_add(1, Ordering::Relaxed);
            if remaining > 0 {
                execute(Box::new(move || bounce(remaining - 1, hits)));
            }
        }
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        execute(Box::new(move || bounce(200_000, h)));
        assert_eq!(hits.load(Ordering::Relaxed), 200_001);
    }
}
