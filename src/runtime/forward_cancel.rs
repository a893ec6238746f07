//! Placeholder for a cancel token that is not known yet.
//!
//! Registration code paths can race: a cancellation may arrive before the
//! operation being registered has produced its cancel token. This state
//! machine reconciles that race so the token, once known, still runs
//! exactly once.
//!
//! States: `Empty` (token unknown, cancel requests queue), `Active` (token
//! known, not canceled), `Finished` (token consumed).

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

use crate::error::TaskError;
use crate::task::Task;
use crate::tracing_compat::rt_trace;

/// Error returned by [`ForwardCancel::complete`] after the token is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("forward-cancelable already completed")]
pub struct AlreadyCompleted;

type PendingWaiter = Box<dyn FnOnce(Result<(), TaskError>) + Send>;

/// A token-not-yet-known cancelation placeholder.
///
/// Cloning shares the state machine.
#[derive(Clone)]
pub struct ForwardCancel {
    state: Arc<Mutex<State>>,
}

enum State {
    /// No token yet; queued continuations wait for one.
    Empty(Vec<PendingWaiter>),
    /// Token known, no cancel requested yet.
    Active(Task<()>),
    /// Token executed (or consumed); later cancels complete immediately.
    Finished,
}

impl ForwardCancel {
    /// Creates a placeholder in the `Empty` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Empty(Vec::new()))),
        }
    }

    /// The effect that cancels through this placeholder.
    ///
    /// If the token is not known yet the effect suspends until
    /// [`complete`](Self::complete) supplies one, then observes that
    /// token's outcome. If the token is known it runs now; if it already
    /// ran, the effect completes immediately.
    #[must_use]
    pub fn cancel(&self) -> Task<()> {
        let state = self.state.clone();
        Task::async_register_raw(true, move |_conn, callback| {
            let action = {
                let mut guard = state.lock();
                match std::mem::replace(&mut *guard, State::Finished) {
                    State::Empty(mut pending) => {
                        pending.push(Box::new(move |outcome| callback.complete(outcome)));
                        *guard = State::Empty(pending);
                        None
                    }
                    State::Active(token) => {
                        let waiter: PendingWaiter =
                            Box::new(move |outcome| callback.complete(outcome));
                        Some((token, vec![waiter]))
                    }
                    State::Finished => {
                        callback.complete(Ok(()));
                        None
                    }
                }
            };
            if let Some((token, waiters)) = action {
                rt_trace!("running forward cancel token");
                run_token(token, waiters);
            }
        })
    }

    /// Supplies the cancel token.
    ///
    /// If cancels were queued while `Empty`, the token runs now and every
    /// queued continuation observes its outcome. Completing twice is a
    /// programming error: the first token is kept, neither re-run nor
    /// replaced.
    pub fn complete(&self, token: Task<()>) -> Result<(), AlreadyCompleted> {
        let pending = {
            let mut guard = self.state.lock();
            match std::mem::replace(&mut *guard, State::Finished) {
                State::Empty(pending) if pending.is_empty() => {
                    *guard = State::Active(token);
                    return Ok(());
                }
                State::Empty(pending) => pending,
                previous => {
                    *guard = previous;
                    debug_assert!(false, "forward-cancelable completed twice");
                    return Err(AlreadyCompleted);
                }
            }
        };
        // A cancel arrived before the token: run it now.
        run_token(token, pending);
        Ok(())
    }
}

fn run_token(token: Task<()>, waiters: Vec<PendingWaiter>) {
    crate::runtime::start_typed(token, move |outcome| {
        for waiter in waiters {
            waiter(outcome.clone());
        }
    });
}

impl Default for ForwardCancel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ForwardCancel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match &*self.state.lock() {
            State::Empty(pending) => return write!(f, "ForwardCancel::Empty({})", pending.len()),
            State::Active(_) => "ForwardCancel::Active",
            State::Finished => "ForwardCancel::Finished",
        };
        f.write_str(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_token(hits: &Arc<AtomicUsize>) -> Task<()> {
        let hits = hits.clone();
        Task::delay(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn complete_then_cancel_runs_token_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let fc = ForwardCancel::new();
        fc.complete(counting_token(&hits)).expect("complete failed");
        fc.cancel().run_sync().expect("cancel failed");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // A second cancel completes immediately without re-running.
        fc.cancel().run_sync().expect("second cancel failed");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_complete_still_runs_token_exactly_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let fc = ForwardCancel::new();
        let observed = Arc::new(AtomicUsize::new(0));
        let observer = observed.clone();
        fc.cancel().run_async(move |outcome| {
            assert!(outcome.is_ok());
            observer.fetch_add(1, Ordering::SeqCst);
        });
        // The cancel is parked waiting for a token.
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        fc.complete(counting_token(&hits)).expect("complete failed");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn double_complete_is_an_error_and_keeps_first_token() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let fc = ForwardCancel::new();
        fc.complete(counting_token(&first)).expect("complete failed");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            fc.complete(counting_token(&second))
        }));
        // Debug builds assert; release builds report the error.
        if let Ok(outcome) = result {
            assert_eq!(outcome, Err(AlreadyCompleted));
        }
        fc.cancel().run_sync().expect("cancel failed");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }
}
