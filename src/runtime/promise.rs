//! Single-assignment completion cell.
//!
//! Hands results across concurrent branches: forked fibers write their
//! outcome here, joiners subscribe for it. Completion happens at most once;
//! every waiter registered before completion is notified exactly once, in
//! registration order.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

use crate::error::TaskError;
use crate::task::Task;
use crate::tracing_compat::rt_trace;

/// Error returned by [`Promise::complete`] after the first completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promise already fulfilled")]
pub struct AlreadyFulfilled;

type Waiter<A> = Box<dyn FnOnce(Result<A, TaskError>) + Send>;

/// A single-assignment completion cell with multiple waiters.
///
/// Cloning shares the cell.
pub struct Promise<A> {
    state: Arc<Mutex<State<A>>>,
}

struct State<A> {
    completed: Option<Result<A, TaskError>>,
    waiters: Vec<(u64, Waiter<A>)>,
    next_id: u64,
}

impl<A> Clone for Promise<A> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<A> Default for Promise<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Promise<A> {
    /// Creates an empty promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                completed: None,
                waiters: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// True if the promise has been completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.lock().completed.is_some()
    }

    /// Removes a pending waiter. No-op if it already fired or never existed.
    pub(crate) fn unsubscribe(&self, id: u64) {
        self.state.lock().waiters.retain(|(wid, _)| *wid != id);
    }
}

impl<A: Clone + Send + 'static> Promise<A> {
    /// Completes the promise, notifying every pending waiter in
    /// registration order.
    ///
    /// The second and later calls report [`AlreadyFulfilled`] and leave the
    /// first result in place.
    pub fn complete(&self, result: Result<A, TaskError>) -> Result<(), AlreadyFulfilled> {
        let waiters = {
            let mut state = self.state.lock();
            if state.completed.is_some() {
                return Err(AlreadyFulfilled);
            }
            state.completed = Some(result.clone());
            std::mem::take(&mut state.waiters)
        };
        rt_trace!(waiters = waiters.len(), "promise completed");
        // Invoked outside the lock: a waiter may re-enter the promise.
        for (_, waiter) in waiters {
            waiter(result.clone());
        }
        Ok(())
    }

    /// Registers a waiter.
    ///
    /// Returns `None` and invokes the waiter immediately if the promise is
    /// already complete; otherwise returns the waiter's id for
    /// [`unsubscribe`](Self::unsubscribe).
    pub(crate) fn subscribe(&self, waiter: Waiter<A>) -> Option<u64> {
        let ready = {
            let mut state = self.state.lock();
            if let Some(result) = state.completed.clone() {
                result
            } else {
                let id = state.next_id;
                state.next_id += 1;
                state.waiters.push((id, waiter));
                return Some(id);
            }
        };
        waiter(ready);
        None
    }

    /// The task that yields this promise's result, waiting for completion
    /// if necessary.
    ///
    /// Canceling a run suspended here unregisters its waiter.
    #[must_use]
    pub fn get(&self) -> Task<A> {
        let promise = self.clone();
        Task::async_register_raw(true, move |conn, callback| {
            let registered: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
            let unregister = {
                let promise = promise.clone();
                let registered = registered.clone();
                Task::delay(move || {
                    if let Some(id) = registered.lock().take() {
                        promise.unsubscribe(id);
                    }
                })
            };
            conn.push(unregister);
            let conn = conn.clone();
            let id = promise.subscribe(Box::new(move |result| {
                // Drop the unregister token before delivering.
                let _ = conn.pop();
                callback.complete(result);
            }));
            *registered.lock() = id;
        })
    }
}

impl<A> std::fmt::Debug for Promise<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Promise")
            .field("complete", &state.completed.is_some())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
