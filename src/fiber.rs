//! Fibers: joinable, cancelable handles to concurrently running tasks.

use crate::error::TaskError;
use crate::exec::ExecutorRef;
use crate::runtime::connection::Connection;
use crate::runtime::promise::Promise;
use crate::runtime;
use crate::task::Task;
use crate::tracing_compat::rt_trace;

/// A handle to a concurrently running computation.
///
/// `join` yields the fiber's outcome (waiting if necessary); `cancel`
/// cancels its connection. The handle is freely cloneable: all clones refer
/// to the same running computation.
pub struct Fiber<A> {
    promise: Promise<A>,
    conn: Connection,
}

impl<A> Clone for Fiber<A> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            conn: self.conn.clone(),
        }
    }
}

impl<A> Fiber<A> {
    pub(crate) fn new(promise: Promise<A>, conn: Connection) -> Self {
        Self { promise, conn }
    }

    /// The effect that cancels this fiber.
    #[must_use]
    pub fn cancel(&self) -> Task<()> {
        self.conn.cancel()
    }
}

impl<A: Clone + Send + 'static> Fiber<A> {
    /// The task that yields this fiber's result, waiting for completion if
    /// necessary.
    #[must_use]
    pub fn join(&self) -> Task<A> {
        self.promise.get()
    }
}

impl<A> std::fmt::Debug for Fiber<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("promise", &self.promise)
            .finish_non_exhaustive()
    }
}

impl<A: Clone + Send + 'static> Task<A> {
    /// Starts this task concurrently on `exec`, yielding a [`Fiber`].
    ///
    /// The fiber runs on a child connection chained to the parent: canceling
    /// the parent cancels the fiber, while canceling the fiber leaves the
    /// parent untouched.
    pub fn fork(self, exec: ExecutorRef) -> Task<Fiber<A>> {
        Task::async_register(move |parent, callback| {
            let promise: Promise<A> = Promise::new();
            let child = Connection::new();
            parent.push(child.cancel());
            rt_trace!("forking fiber");
            let completion = promise.clone();
            runtime::start_cancelable_typed(
                forked_start(self, exec),
                child.clone(),
                move |result| {
                    let _ = completion.complete(result);
                },
            );
            callback.complete(Ok(Fiber::new(promise, child)));
        })
    }
}

/// Ensures the first step of `task` runs on `exec`, so the fork call site
/// returns without executing any of the forked work synchronously.
pub(crate) fn forked_start<A: Send + 'static>(task: Task<A>, exec: ExecutorRef) -> Task<A> {
    Task::effect_on(exec, || Ok(())).flat_map(move |()| task)
}
