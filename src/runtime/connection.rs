//! Cancellation connections.
//!
//! A connection owns the ordered stack of cancel tokens for one logical
//! thread of execution: one per top-level cancelable run, one per forked or
//! raced branch. Business logic pushes and pops from the run loop while
//! `cancel` may race in from any thread, so the stack lives behind a mutex.
//!
//! Invariants:
//! - once canceled, a pushed token is executed immediately instead of being
//!   stored; no token is ever silently discarded;
//! - `pop` removes the most recently pushed token without executing it;
//! - the uncancelable variant ignores everything.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::error::TaskError;
use crate::task::Task;
use crate::tracing_compat::rt_trace;

/// A cancel token: an effect run when the owning connection is canceled.
pub type CancelToken = Task<()>;

type TokenStack = SmallVec<[CancelToken; 4]>;

/// Cancellation connection for one logical run.
///
/// Cloning shares the underlying token stack.
#[derive(Clone)]
pub struct Connection {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    /// Ignores cancellation entirely.
    Uncancelable,
    /// `None` means canceled.
    Live(Arc<Mutex<Option<TokenStack>>>),
}

impl Connection {
    /// Creates a fresh cancelable connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Inner::Live(Arc::new(Mutex::new(Some(SmallVec::new())))),
        }
    }

    /// Returns the shared uncancelable connection variant.
    ///
    /// `push`/`pop` are no-ops and `cancel` completes immediately.
    #[must_use]
    pub fn uncancelable() -> Self {
        Self {
            inner: Inner::Uncancelable,
        }
    }

    /// True if this connection has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match &self.inner {
            Inner::Uncancelable => false,
            Inner::Live(state) => state.lock().is_none(),
        }
    }

    /// Registers a cancel token.
    ///
    /// If the connection is already canceled the token runs immediately on
    /// the calling thread's trampoline instead of being stored.
    pub fn push(&self, token: CancelToken) {
        match &self.inner {
            Inner::Uncancelable => {}
            Inner::Live(state) => {
                let run_now = {
                    let mut guard = state.lock();
                    match guard.as_mut() {
                        Some(stack) => {
                            stack.push(token);
                            None
                        }
                        None => Some(token),
                    }
                };
                if let Some(token) = run_now {
                    rt_trace!("push after cancel, running token now");
                    super::run_loop::start(token.into_node(), Box::new(|_| {}));
                }
            }
        }
    }

    /// Registers two related tokens as one atomic unit.
    pub fn push_pair(&self, first: CancelToken, second: CancelToken) {
        self.push(run_tokens(vec![first, second]));
    }

    /// Registers three related tokens as one atomic unit.
    pub fn push_triple(&self, first: CancelToken, second: CancelToken, third: CancelToken) {
        self.push(run_tokens(vec![first, second, third]));
    }

    /// Removes and returns the most recently pushed token, if any.
    ///
    /// The token is not executed.
    pub fn pop(&self) -> Option<CancelToken> {
        match &self.inner {
            Inner::Uncancelable => None,
            Inner::Live(state) => state.lock().as_mut().and_then(SmallVec::pop),
        }
    }

    /// Returns the effect that cancels this connection.
    ///
    /// Running it marks the connection canceled and executes every pushed
    /// token in registration order, composing any finalizer errors instead
    /// of dropping them. Idempotent: later runs complete immediately.
    #[must_use]
    pub fn cancel(&self) -> Task<()> {
        match &self.inner {
            Inner::Uncancelable => Task::unit(),
            Inner::Live(state) => {
                let state = state.clone();
                Task::defer(move || {
                    let drained = state.lock().take();
                    match drained {
                        None => Task::unit(),
                        Some(stack) if stack.is_empty() => Task::unit(),
                        Some(stack) => {
                            rt_trace!(tokens = stack.len(), "running cancel tokens");
                            run_tokens(stack.into_vec())
                        }
                    }
                })
            }
        }
    }

    /// Attempts to reset a canceled connection back to a pristine state.
    ///
    /// Returns false if the connection was not canceled.
    pub fn try_reactivate(&self) -> bool {
        match &self.inner {
            Inner::Uncancelable => true,
            Inner::Live(state) => {
                let mut guard = state.lock();
                if guard.is_none() {
                    *guard = Some(SmallVec::new());
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Identity comparison: true if both handles refer to the same
    /// connection.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Inner::Uncancelable, Inner::Uncancelable) => true,
            (Inner::Live(a), Inner::Live(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Inner::Uncancelable => f.write_str("Connection::Uncancelable"),
            Inner::Live(state) => match &*state.lock() {
                None => f.write_str("Connection(canceled)"),
                Some(stack) => write!(f, "Connection(tokens={})", stack.len()),
            },
        }
    }
}

/// Runs every token in order, even when earlier ones fail, then raises the
/// composition of whatever errors surfaced.
fn run_tokens(tokens: Vec<CancelToken>) -> Task<()> {
    fn step(mut remaining: std::vec::IntoIter<CancelToken>, errors: Vec<TaskError>) -> Task<()> {
        match remaining.next() {
            None => match compose_all(errors) {
                None => Task::unit(),
                Some(error) => Task::raise_error(error),
            },
            Some(token) => token.materialize().flat_map(move |outcome| {
                let mut errors = errors;
                if let Err(error) = outcome {
                    errors.push(error);
                }
                step(remaining, errors)
            }),
        }
    }
    step(tokens.into_iter(), Vec::new())
}

fn compose_all(errors: Vec<TaskError>) -> Option<TaskError> {
    errors.into_iter().reduce(TaskError::compose)
}
