//! Execution contexts.
//!
//! The runtime never schedules work on its own: parallelism comes from
//! whatever [`Executor`] the caller supplies at `continue_on`/`fork` points.
//! Two implementations ship with the crate: [`Inline`] (runs the job on the
//! submitting thread, useful for deterministic tests) and
//! [`ThreadPool`](pool::ThreadPool) (a small fixed pool).

pub(crate) mod trampoline;

mod pool;

pub use pool::ThreadPool;

use std::sync::Arc;

/// A unit of work submitted to an executor.
pub type Job = Box<dyn FnOnce() + Send>;

/// Shared handle to an execution context.
pub type ExecutorRef = Arc<dyn Executor>;

/// A target that can run jobs.
///
/// Implementations must accept jobs from any thread. No ordering between
/// jobs is required.
pub trait Executor: Send + Sync {
    /// Submits a job for execution.
    fn execute(&self, job: Job);
}

/// Runs every job immediately on the submitting thread.
///
/// Useful for tests that need deterministic interleaving. Stack safety for
/// long chains is preserved by the interpreter's trampoline, not by this
/// executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Inline {
    /// Returns a shared handle to an inline executor.
    #[must_use]
    pub fn handle() -> ExecutorRef {
        Arc::new(Self)
    }
}

impl Executor for Inline {
    fn execute(&self, job: Job) {
        job();
    }
}

/// Runs jobs through the submitting thread's trampoline queue.
///
/// Jobs submitted while another trampolined job is running are appended to
/// the active drain instead of running nested, which yields deterministic
/// cooperative interleaving on a single thread: concurrently started
/// branches take turns in submission order.
#[derive(Debug, Default, Clone, Copy)]
pub struct Trampolined;

impl Trampolined {
    /// Returns a shared handle to a trampolined executor.
    #[must_use]
    pub fn handle() -> ExecutorRef {
        Arc::new(Self)
    }
}

impl Executor for Trampolined {
    fn execute(&self, job: Job) {
        trampoline::execute(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_runs_synchronously() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        Inline.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
