//! Resource-safe acquire/use/release.
//!
//! A release frame guarantees its finalizer runs exactly once on every exit
//! path of the guarded region: normal completion, error, or cancellation.
//! The finalizer is registered as a cancel token on the region's connection
//! before the region starts (so cancellation mid-use triggers it) and runs
//! inside a temporarily uncancelable sub-region (so it cannot itself be
//! interrupted). The already-released guard is the mutex-held `Option`:
//! whichever path takes the finalizer first is the only one that runs it.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{TaskError, catch};
use crate::exec::trampoline;
use crate::task::Task;
use crate::task::frame::Frame;
use crate::task::node::Node;
use crate::task::unerase;
use crate::tracing_compat::rt_trace;

use super::forward_cancel::ForwardCancel;
use super::run_loop;

/// How a bracketed region ended.
#[derive(Debug, Clone)]
pub enum ExitCase {
    /// The region produced a value.
    Completed,
    /// The region raised an error.
    Error(TaskError),
    /// The region's connection was canceled.
    Canceled,
}

impl ExitCase {
    /// True for the cancellation exit path.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

type FinalizerFn = Box<dyn FnOnce(ExitCase) -> Task<()> + Send>;

/// Shared release state: the pending finalizer behind the already-released
/// guard.
struct ReleaseState {
    finalizer: Mutex<Option<FinalizerFn>>,
}

impl ReleaseState {
    fn new(finalizer: FinalizerFn) -> Arc<Self> {
        Arc::new(Self {
            finalizer: Mutex::new(Some(finalizer)),
        })
    }
}

/// The effect that runs the finalizer for `exit`, if nobody has yet.
///
/// Completes immediately when another path already released. The consumed
/// token stays on the connection as an inert entry rather than being popped:
/// forked children chain their cancel tokens onto the same stack, so a
/// positional pop here could remove one of theirs.
fn release_task(state: Arc<ReleaseState>, exit: ExitCase) -> Task<()> {
    Task::defer(move || {
        let Some(finalizer) = state.finalizer.lock().take() else {
            return Task::unit();
        };
        rt_trace!(?exit, "running release finalizer");
        catch(move || finalizer(exit))
            .unwrap_or_else(Task::raise_error)
            .uncancelable()
    })
}

/// Wraps `source` in a release frame backed by `state`.
///
/// On a value the finalizer runs with `Completed`, then the value is
/// delivered; a finalizer failure replaces it. On an error the finalizer
/// runs with `Error`, and a finalizer failure is composed with (never
/// replaces) the original.
fn guarded<A: Send + 'static>(source: Task<A>, state: Arc<ReleaseState>) -> Task<A> {
    let error_state = state.clone();
    Task::from_node(Node::Bind {
        source: Box::new(source.into_node()),
        frame: Frame::Redeem {
            on_error: Box::new(move |error| {
                let exit = ExitCase::Error(error.clone());
                release_task(error_state, exit)
                    .materialize()
                    .flat_map(move |cleanup| {
                        Task::<A>::raise_error(TaskError::compose_cleanup(error, cleanup))
                    })
                    .into_node()
            }),
            on_value: Box::new(move |value| match unerase::<A>(value) {
                Ok(a) => release_task(state, ExitCase::Completed)
                    .flat_map(move |()| Task::pure(a))
                    .into_node(),
                Err(error) => Node::Fail(error),
            }),
        },
        depth: 0,
    })
}

/// Runs `finalizer` after `source` on every exit path, exactly once.
pub(crate) fn guarantee_case<A, F>(source: Task<A>, finalizer: F) -> Task<A>
where
    A: Send + 'static,
    F: FnOnce(ExitCase) -> Task<()> + Send + 'static,
{
    Task::async_register_raw(true, move |conn, callback| {
        let state = ReleaseState::new(Box::new(finalizer));
        // Registering on an already-canceled connection runs the token
        // immediately, which is exactly the canceled exit path.
        conn.push(release_task(state.clone(), ExitCase::Canceled));
        if conn.is_canceled() {
            return;
        }
        run_loop::start_cancelable(
            guarded(source, state).into_node(),
            conn.clone(),
            Box::new(move |result| callback.raw.complete(result)),
        );
    })
}

/// Acquire/use/release with exit information.
///
/// `acquire` runs uncancelably. A cancellation that lands before `acquire`
/// finishes skips `release` entirely (there is nothing to release yet):
/// the cancel token is a forward-cancelable placeholder completed only once
/// the resource exists.
pub(crate) fn bracket_case<A, B, U, R>(acquire: Task<A>, use_f: U, release: R) -> Task<B>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
    U: FnOnce(A) -> Task<B> + Send + 'static,
    R: FnOnce(A, ExitCase) -> Task<()> + Send + 'static,
{
    Task::async_register_raw(true, move |conn, callback| {
        let placeholder = ForwardCancel::new();
        conn.push(placeholder.cancel());
        if conn.is_canceled() {
            let _ = placeholder.complete(Task::unit());
            return;
        }
        let conn = conn.clone();
        crate::runtime::start_typed(acquire, move |result| match result {
            Err(error) => callback.complete(Err(error)),
            Ok(resource) => {
                // Continue on the trampoline: acquire may have completed on
                // a deep foreign stack.
                trampoline::execute(Box::new(move || {
                    let release_resource = resource.clone();
                    let state =
                        ReleaseState::new(Box::new(move |exit| release(release_resource, exit)));
                    let _ = placeholder.complete(release_task(state.clone(), ExitCase::Canceled));
                    let use_task = catch(move || use_f(resource)).unwrap_or_else(Task::raise_error);
                    run_loop::start_cancelable(
                        guarded(use_task, state).into_node(),
                        conn,
                        Box::new(move |result| callback.raw.complete(result)),
                    );
                }));
            }
        });
    })
}
