//! The iterative interpreter.
//!
//! Walks the node tree with two explicit frame stacks (`b_first` plus a
//! growable rest) instead of native recursion, so arbitrarily long bind
//! chains execute in O(1) native stack. Cancellation is observed exactly
//! once per iteration, which bounds cancellation latency to one step.
//!
//! A run suspends when it reaches an effect or async node. The saved stacks
//! travel inside an idempotent [`RawCallback`]; completing it re-enters the
//! loop, rescheduling through the per-thread trampoline once the run's
//! resumption counter passes the threshold.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::TRAMPOLINE_THRESHOLD;
use crate::error::{TaskError, catch};
use crate::exec::{ExecutorRef, trampoline};
use crate::task::frame::Frame;
use crate::task::node::{ErasedValue, Node, TaskResult};
use crate::tracing_compat::rt_trace;

use super::connection::Connection;

/// Final continuation of a run.
pub(crate) type FinalFn = Box<dyn FnOnce(TaskResult) + Send>;

/// Per-run bookkeeping shared between the loop and its suspensions.
pub(crate) struct RunState {
    /// Suspension resumptions since the last trampoline bounce.
    resumes: AtomicU32,
    /// The final callback; taken exactly once.
    callback: Mutex<Option<FinalFn>>,
}

impl RunState {
    fn new(callback: FinalFn) -> Self {
        Self {
            resumes: AtomicU32::new(0),
            callback: Mutex::new(Some(callback)),
        }
    }
}

/// Everything needed to re-enter the loop after a suspension.
struct Pending {
    state: Arc<RunState>,
    conn: Connection,
    ctx: Option<ExecutorRef>,
    b_first: Option<Frame>,
    b_rest: Vec<Frame>,
    force_trampoline: bool,
}

/// Idempotent completion callback handed to async registrants.
///
/// The first completion resumes the run; every later completion is a no-op.
/// Clones share the same guard.
#[derive(Clone)]
pub(crate) struct RawCallback {
    slot: Arc<Mutex<Option<Pending>>>,
}

impl RawCallback {
    fn new(pending: Pending) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(pending))),
        }
    }

    /// Completes the suspension. Safe to call from any thread, any number
    /// of times; only the first call has an effect.
    pub(crate) fn complete(&self, result: TaskResult) {
        self.complete_first(|| {}, result);
    }

    /// Like [`complete`](Self::complete), running `before` on the winning
    /// call only. Used to pop a connection token exactly once when the
    /// registered operation settles.
    pub(crate) fn complete_first(&self, before: impl FnOnce(), result: TaskResult) {
        let Some(pending) = self.slot.lock().take() else {
            return;
        };
        before();
        resume(pending, Node::from_result(result));
    }
}

/// Starts a run on an uncancelable connection.
pub(crate) fn start(node: Node, callback: FinalFn) {
    let state = Arc::new(RunState::new(callback));
    execute(node, Connection::uncancelable(), None, state, None, Vec::new());
}

/// Starts a run observing `conn` for cancellation.
pub(crate) fn start_cancelable(node: Node, conn: Connection, callback: FinalFn) {
    let state = Arc::new(RunState::new(callback));
    execute(node, conn, None, state, None, Vec::new());
}

fn resume(pending: Pending, node: Node) {
    let Pending {
        state,
        conn,
        ctx,
        b_first,
        b_rest,
        force_trampoline,
    } = pending;
    let resumed = state.resumes.fetch_add(1, Ordering::Relaxed) + 1;
    if force_trampoline || resumed > TRAMPOLINE_THRESHOLD {
        state.resumes.store(0, Ordering::Relaxed);
        trampoline::execute(Box::new(move || {
            execute(node, conn, ctx, state, b_first, b_rest);
        }));
    } else {
        execute(node, conn, ctx, state, b_first, b_rest);
    }
}

fn finish(state: &RunState, result: TaskResult) {
    if let Some(callback) = state.callback.lock().take() {
        callback(result);
    }
}

/// One run segment: iterates until the run completes or suspends.
#[allow(clippy::too_many_lines)]
fn execute(
    mut current: Node,
    mut conn: Connection,
    mut ctx: Option<ExecutorRef>,
    state: Arc<RunState>,
    mut b_first: Option<Frame>,
    mut b_rest: Vec<Frame>,
) {
    loop {
        // The only cancellation observation point.
        if conn.is_canceled() {
            rt_trace!("run canceled");
            finish(&state, Err(TaskError::Canceled));
            return;
        }

        let mut produced: Option<ErasedValue> = None;
        match current {
            Node::Pure(value) => produced = Some(value),
            Node::Fail(error) => match find_error_handler(&mut b_first, &mut b_rest) {
                None => {
                    finish(&state, Err(error));
                    return;
                }
                Some(frame) => {
                    current = frame.recover(error);
                    continue;
                }
            },
            Node::Delay(thunk) => match catch(thunk) {
                Ok(value) => produced = Some(value),
                Err(error) => {
                    current = Node::Fail(error);
                    continue;
                }
            },
            Node::Defer(thunk) => {
                current = catch(thunk).unwrap_or_else(Node::Fail);
                continue;
            }
            Node::Effect { exec, run } => {
                let target = exec.or(ctx);
                let pending = Pending {
                    state,
                    conn,
                    ctx: target.clone(),
                    b_first,
                    b_rest,
                    force_trampoline: false,
                };
                let job = move || {
                    let result = catch(run).and_then(|r| r);
                    resume(pending, Node::from_result(result));
                };
                match target {
                    Some(exec) => exec.execute(Box::new(job)),
                    None => job(),
                }
                return;
            }
            Node::Async {
                trampoline_after,
                register,
            } => {
                let callback = RawCallback::new(Pending {
                    state,
                    conn: conn.clone(),
                    ctx,
                    b_first,
                    b_rest,
                    force_trampoline: trampoline_after,
                });
                let on_panic = callback.clone();
                let registration = move || {
                    if let Err(error) = catch(move || register(&conn, callback)) {
                        rt_trace!("async registration panicked");
                        on_panic.complete(Err(error));
                    }
                };
                // Combinators that settle on foreign stacks register through
                // the trampoline, so a completion arriving mid-registration
                // queues behind it instead of re-entering the loop nested.
                if trampoline_after {
                    trampoline::execute(Box::new(registration));
                } else {
                    registration();
                }
                return;
            }
            Node::Map { source, f, .. } => {
                if let Some(first) = b_first.take() {
                    b_rest.push(first);
                }
                b_first = Some(Frame::Map(f));
                current = *source;
                continue;
            }
            Node::Bind { source, frame, .. } => {
                if let Some(first) = b_first.take() {
                    b_rest.push(first);
                }
                b_first = Some(frame);
                current = *source;
                continue;
            }
            Node::ContinueOn { source, exec } => {
                current = Node::Bind {
                    source,
                    frame: Frame::Bind(Box::new(move |value| Node::Effect {
                        exec: Some(exec),
                        run: Box::new(move || Ok(value)),
                    })),
                    depth: 0,
                };
                continue;
            }
            Node::UpdateContext { source, f } => {
                let previous = ctx.take();
                match catch(move || f(previous)) {
                    Ok(next) => ctx = next,
                    Err(error) => {
                        current = Node::Fail(error);
                        continue;
                    }
                }
                current = *source;
                continue;
            }
            Node::Switch {
                source,
                swap,
                restore,
            } => {
                let old = conn.clone();
                let swapped = {
                    let old = old.clone();
                    catch(move || swap(old))
                };
                conn = match swapped {
                    Ok(next) => next,
                    Err(error) => {
                        current = Node::Fail(error);
                        continue;
                    }
                };
                current = *source;
                if !conn.same(&old)
                    && let Some(restore) = restore
                {
                    current = Node::Bind {
                        source: Box::new(current),
                        frame: Frame::Restore {
                            prior: old,
                            restore,
                        },
                        depth: 0,
                    };
                }
                continue;
            }
        }

        // Every match arm that reaches here set `produced`; the others
        // `continue` or `return`. Binding it with `let ... else` makes that
        // invariant explicit so the borrow checker sees `current` is always
        // reassigned (or the run ends) before the next iteration.
        let Some(value) = produced else {
            unreachable!("value-producing arm always sets `produced`")
        };
        match pop_next_bind(&mut b_first, &mut b_rest) {
            None => {
                finish(&state, Ok(value));
                return;
            }
            Some(frame) => {
                current = frame.apply(value);
            }
        }
    }
}

/// Pops the next frame to apply to a value, skipping frames whose success
/// path is a no-op.
fn pop_next_bind(b_first: &mut Option<Frame>, b_rest: &mut Vec<Frame>) -> Option<Frame> {
    if let Some(frame) = b_first.take()
        && !frame.skip_on_value()
    {
        return Some(frame);
    }
    while let Some(frame) = b_rest.pop() {
        if !frame.skip_on_value() {
            return Some(frame);
        }
    }
    None
}

/// Finds the nearest error-aware frame, discarding everything above it.
fn find_error_handler(b_first: &mut Option<Frame>, b_rest: &mut Vec<Frame>) -> Option<Frame> {
    if let Some(frame) = b_first.take()
        && frame.handles_errors()
    {
        return Some(frame);
    }
    while let Some(frame) = b_rest.pop() {
        if frame.handles_errors() {
            return Some(frame);
        }
    }
    None
}
