//! The `Task` computation algebra.
//!
//! A [`Task<A>`] describes a deferred, possibly asynchronous computation
//! producing an `A` or a [`TaskError`]. Nothing runs until one of the run
//! methods is called; combinators only build the node tree that the
//! interpreter walks.
//!
//! # Example
//!
//! ```
//! use taskfx::Task;
//!
//! let task = Task::delay(|| 20).map(|n| n * 2).flat_map(|n| Task::pure(n + 2));
//! assert_eq!(task.run_sync().unwrap(), 42);
//! ```

pub(crate) mod frame;
pub(crate) mod node;

use std::marker::PhantomData;

use crate::config::FUSION_DEPTH_LIMIT;
use crate::error::{TaskError, catch};
use crate::exec::ExecutorRef;
use crate::runtime::bracket::{self, ExitCase};
use crate::runtime::connection::Connection;
use crate::runtime::forward_cancel::ForwardCancel;
use crate::runtime::run_loop::{self, RawCallback};
use crate::runtime::{Disposable, OnCancel};

use frame::Frame;
use node::{ErasedValue, MapFn, Node};

/// A deferred computation producing an `A` or failing with a [`TaskError`].
///
/// Values are immutable descriptions: running a task never mutates it, and
/// combinators build fresh nodes (fusion included).
#[must_use = "tasks describe work; nothing runs until a run method is called"]
pub struct Task<A> {
    node: Node,
    _marker: PhantomData<fn() -> A>,
}

/// Idempotent completion callback for asynchronous registration.
///
/// Completing more than once is a no-op after the first call, so racing
/// registration code paths are safe by construction. Clones share the
/// same guard.
pub struct AsyncCallback<A> {
    pub(crate) raw: RawCallback,
    /// When set, the winning completion pops this connection first. Mirrors
    /// the token discipline of `cancelable`: the registered token comes off
    /// the stack as soon as the operation settles.
    pop: Option<Connection>,
    _marker: PhantomData<fn(A)>,
}

impl<A> Clone for AsyncCallback<A> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            pop: self.pop.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: Send + 'static> AsyncCallback<A> {
    /// Delivers the outcome of the registered operation.
    pub fn complete(&self, result: Result<A, TaskError>) {
        let erased = result.map(|value| Box::new(value) as ErasedValue);
        match &self.pop {
            None => self.raw.complete(erased),
            Some(conn) => self.raw.complete_first(
                || {
                    let _ = conn.pop();
                },
                erased,
            ),
        }
    }
}

/// Converts an erased interpreter value back to its concrete type.
///
/// Failure here means an interpreter invariant was violated; it surfaces as
/// an internal defect rather than a panic.
pub(crate) fn unerase<A: 'static>(value: ErasedValue) -> Result<A, TaskError> {
    value
        .downcast::<A>()
        .map(|boxed| *boxed)
        .map_err(|_| TaskError::Internal("value type mismatch crossing the interpreter"))
}

impl<A> Task<A> {
    pub(crate) fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }
}

impl<A: Send + 'static> Task<A> {
    /// A task that immediately yields `value`.
    pub fn pure(value: A) -> Self {
        Self::from_node(Node::Pure(Box::new(value)))
    }

    /// A task that immediately fails with `error`.
    pub fn raise_error(error: TaskError) -> Self {
        Self::from_node(Node::Fail(error))
    }

    /// Lifts an already-computed result.
    pub fn from_result(result: Result<A, TaskError>) -> Self {
        match result {
            Ok(value) => Self::pure(value),
            Err(error) => Self::raise_error(error),
        }
    }

    /// A synchronous deferred value. Panics in `thunk` are captured into
    /// the error channel.
    pub fn delay<F>(thunk: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Self::from_node(Node::Delay(Box::new(move || Box::new(thunk()) as ErasedValue)))
    }

    /// Deferred construction of another task.
    pub fn defer<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::from_node(Node::Defer(Box::new(move || thunk().node)))
    }

    /// Wraps one externally-suspending operation.
    ///
    /// The interpreter treats this as a suspension boundary: stack safety
    /// holds across arbitrarily long chains of these, and the resumption
    /// counts toward the trampoline budget. The thunk must contain at most
    /// one suspension point of its own.
    pub fn effect<F>(run: F) -> Self
    where
        F: FnOnce() -> Result<A, TaskError> + Send + 'static,
    {
        Self::from_node(Node::Effect {
            exec: None,
            run: Box::new(move || run().map(|value| Box::new(value) as ErasedValue)),
        })
    }

    /// Like [`effect`](Self::effect), pinned to an executor.
    pub fn effect_on<F>(exec: ExecutorRef, run: F) -> Self
    where
        F: FnOnce() -> Result<A, TaskError> + Send + 'static,
    {
        Self::from_node(Node::Effect {
            exec: Some(exec),
            run: Box::new(move || run().map(|value| Box::new(value) as ErasedValue)),
        })
    }

    /// Callback-based asynchronous registration.
    ///
    /// `register` receives the active cancellation connection and an
    /// idempotent completion callback. Registration runs when the
    /// interpreter reaches this node, not at construction.
    pub fn async_register<F>(register: F) -> Self
    where
        F: FnOnce(&Connection, AsyncCallback<A>) + Send + 'static,
    {
        Self::async_register_raw(false, register)
    }

    /// Asynchronous registration that ignores the connection.
    pub fn async_task<F>(register: F) -> Self
    where
        F: FnOnce(AsyncCallback<A>) + Send + 'static,
    {
        Self::async_register(move |_conn, callback| register(callback))
    }

    pub(crate) fn async_register_raw<F>(trampoline_after: bool, register: F) -> Self
    where
        F: FnOnce(&Connection, AsyncCallback<A>) + Send + 'static,
    {
        Self::from_node(Node::Async {
            trampoline_after,
            register: Box::new(move |conn, raw| {
                register(
                    conn,
                    AsyncCallback {
                        raw,
                        pop: None,
                        _marker: PhantomData,
                    },
                );
            }),
        })
    }

    /// Registers a callback-based operation that hands back a cancel token.
    ///
    /// The token is routed through a forward-cancelable placeholder, so a
    /// cancellation that arrives before registration finishes still runs
    /// the token exactly once.
    pub fn cancelable<F>(register: F) -> Self
    where
        F: FnOnce(AsyncCallback<A>) -> Task<()> + Send + 'static,
    {
        Self::async_register_raw(false, move |conn, callback| {
            let placeholder = ForwardCancel::new();
            conn.push(placeholder.cancel());
            if conn.is_canceled() {
                let _ = placeholder.complete(Task::unit());
                return;
            }
            // The winning completion pops the placeholder token back off.
            let popping = AsyncCallback {
                raw: callback.raw.clone(),
                pop: Some(conn.clone()),
                _marker: PhantomData,
            };
            let on_panic = popping.clone();
            let token = match catch(move || register(popping)) {
                Ok(token) => token,
                Err(error) => {
                    on_panic.complete(Err(error));
                    Task::unit()
                }
            };
            let _ = placeholder.complete(token);
        })
    }

    /// A task that never completes.
    pub fn never() -> Self {
        Self::async_register(|_conn, _callback| {})
    }

    /// Transforms the produced value.
    ///
    /// Successive maps fuse into a single node up to a fixed depth, then a
    /// fresh node is started; observable ordering and error behavior are
    /// unchanged either way.
    pub fn map<B, F>(self, f: F) -> Task<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        let g: MapFn = Box::new(move |value| {
            unerase::<A>(value).map(|a| Box::new(f(a)) as ErasedValue)
        });
        Task::from_node(fuse_map(self.node, g))
    }

    /// Sequences a value-dependent continuation.
    pub fn flat_map<B, F>(self, f: F) -> Task<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Task<B> + Send + 'static,
    {
        match self.node {
            // Errors short-circuit without allocating a bind.
            Node::Fail(error) => Task::from_node(Node::Fail(error)),
            // Pure sources defer the continuation so its panics are caught.
            Node::Pure(value) => Task::from_node(Node::Defer(Box::new(move || {
                match unerase::<A>(value) {
                    Ok(a) => f(a).node,
                    Err(error) => Node::Fail(error),
                }
            }))),
            source => Task::from_node(Node::Bind {
                source: Box::new(source),
                frame: Frame::Bind(Box::new(move |value| match unerase::<A>(value) {
                    Ok(a) => f(a).node,
                    Err(error) => Node::Fail(error),
                })),
                depth: 0,
            }),
        }
    }

    /// Converts the error channel into a value.
    ///
    /// The cancellation signal is not intercepted: a canceled run stays
    /// canceled.
    pub fn attempt(self) -> Task<Result<A, TaskError>> {
        Task::from_node(Node::Bind {
            source: Box::new(self.node),
            frame: Frame::Redeem {
                on_error: Box::new(|error| {
                    if error.is_canceled() {
                        Node::Fail(error)
                    } else {
                        Node::Pure(Box::new(Err::<A, TaskError>(error)))
                    }
                }),
                on_value: Box::new(|value| match unerase::<A>(value) {
                    Ok(a) => Node::Pure(Box::new(Ok::<A, TaskError>(a))),
                    Err(error) => Node::Fail(error),
                }),
            },
            depth: 0,
        })
    }

    /// Like [`attempt`](Self::attempt) but also captures the cancellation
    /// signal. Interpreter-internal: cancel-token composition must observe
    /// every outcome.
    pub(crate) fn materialize(self) -> Task<Result<A, TaskError>> {
        Task::from_node(Node::Bind {
            source: Box::new(self.node),
            frame: Frame::Redeem {
                on_error: Box::new(|error| Node::Pure(Box::new(Err::<A, TaskError>(error)))),
                on_value: Box::new(|value| match unerase::<A>(value) {
                    Ok(a) => Node::Pure(Box::new(Ok::<A, TaskError>(a))),
                    Err(error) => Node::Fail(error),
                }),
            },
            depth: 0,
        })
    }

    /// Folds both channels into a plain value.
    pub fn redeem<B, FE, FA>(self, on_error: FE, on_value: FA) -> Task<B>
    where
        B: Send + 'static,
        FE: FnOnce(TaskError) -> B + Send + 'static,
        FA: FnOnce(A) -> B + Send + 'static,
    {
        self.redeem_with(
            move |error| Task::pure(on_error(error)),
            move |value| Task::pure(on_value(value)),
        )
    }

    /// Folds both channels into a continuation task.
    pub fn redeem_with<B, FE, FA>(self, on_error: FE, on_value: FA) -> Task<B>
    where
        B: Send + 'static,
        FE: FnOnce(TaskError) -> Task<B> + Send + 'static,
        FA: FnOnce(A) -> Task<B> + Send + 'static,
    {
        Task::from_node(Node::Bind {
            source: Box::new(self.node),
            frame: Frame::Redeem {
                on_error: Box::new(move |error| {
                    if error.is_canceled() {
                        Node::Fail(error)
                    } else {
                        on_error(error).node
                    }
                }),
                on_value: Box::new(move |value| match unerase::<A>(value) {
                    Ok(a) => on_value(a).node,
                    Err(error) => Node::Fail(error),
                }),
            },
            depth: 0,
        })
    }

    /// Recovers from a failure with a continuation task.
    ///
    /// Success values pass through without cost: the interpreter skips these
    /// frames when resuming from a value. Cancellation is not intercepted.
    pub fn handle_error_with<F>(self, recover: F) -> Self
    where
        F: FnOnce(TaskError) -> Self + Send + 'static,
    {
        Self::from_node(Node::Bind {
            source: Box::new(self.node),
            frame: Frame::ErrorHandler(Box::new(move |error| {
                if error.is_canceled() {
                    Node::Fail(error)
                } else {
                    recover(error).node
                }
            })),
            depth: 0,
        })
    }

    /// Recovers from a failure with a plain value.
    pub fn handle_error<F>(self, recover: F) -> Self
    where
        F: FnOnce(TaskError) -> A + Send + 'static,
    {
        self.handle_error_with(move |error| Self::pure(recover(error)))
    }

    /// Transforms a raised error. Cancellation passes through unchanged.
    pub fn map_error<F>(self, f: F) -> Self
    where
        F: FnOnce(TaskError) -> TaskError + Send + 'static,
    {
        Self::from_node(Node::Bind {
            source: Box::new(self.node),
            frame: Frame::ErrorHandler(Box::new(move |error| {
                if error.is_canceled() {
                    Node::Fail(error)
                } else {
                    Node::Fail(f(error))
                }
            })),
            depth: 0,
        })
    }

    /// Reschedules the continuation of this task onto `exec`.
    ///
    /// Consecutive `continue_on` calls collapse to the latest target.
    pub fn continue_on(self, exec: ExecutorRef) -> Self {
        match self.node {
            Node::ContinueOn { source, .. } => {
                Self::from_node(Node::ContinueOn { source, exec })
            }
            source => Self::from_node(Node::ContinueOn {
                source: Box::new(source),
                exec,
            }),
        }
    }

    /// Transforms the ambient execution context for the rest of the run.
    pub fn update_context<F>(self, f: F) -> Self
    where
        F: FnOnce(Option<ExecutorRef>) -> Option<ExecutorRef> + Send + 'static,
    {
        Self::from_node(Node::UpdateContext {
            source: Box::new(self.node),
            f: Box::new(f),
        })
    }

    /// Masks this task from cancellation.
    ///
    /// The region runs on an uncancelable connection; the prior connection
    /// is restored on every exit path.
    pub fn uncancelable(self) -> Self {
        Self::from_node(Node::Switch {
            source: Box::new(self.node),
            swap: Box::new(|_| Connection::uncancelable()),
            restore: Some(Box::new(|prior, _current| prior)),
        })
    }

    /// Runs `finalizer` after this task on every exit path.
    pub fn guarantee(self, finalizer: Task<()>) -> Self {
        self.guarantee_case(move |_| finalizer)
    }

    /// Runs a finalizer after this task on every exit path, telling it how
    /// the task ended. The finalizer runs exactly once, uncancelably.
    pub fn guarantee_case<F>(self, finalizer: F) -> Self
    where
        F: FnOnce(ExitCase) -> Task<()> + Send + 'static,
    {
        bracket::guarantee_case(self, finalizer)
    }

    /// Acquire/use/release without exit information.
    pub fn bracket<B, U, R>(acquire: Self, use_f: U, release: R) -> Task<B>
    where
        A: Clone,
        B: Send + 'static,
        U: FnOnce(A) -> Task<B> + Send + 'static,
        R: FnOnce(A) -> Task<()> + Send + 'static,
    {
        Self::bracket_case(acquire, use_f, move |resource, _exit| release(resource))
    }

    /// Acquire/use/release with exit information.
    ///
    /// `acquire` is uncancelable; `release` runs exactly once on every exit
    /// path of `use`, including cancellation mid-use.
    pub fn bracket_case<B, U, R>(acquire: Self, use_f: U, release: R) -> Task<B>
    where
        A: Clone,
        B: Send + 'static,
        U: FnOnce(A) -> Task<B> + Send + 'static,
        R: FnOnce(A, ExitCase) -> Task<()> + Send + 'static,
    {
        bracket::bracket_case(acquire, use_f, release)
    }

    /// Runs the task on the calling thread, blocking until it resolves.
    pub fn run_sync(self) -> Result<A, TaskError> {
        let cell = std::sync::Arc::new((
            parking_lot::Mutex::new(None::<node::TaskResult>),
            parking_lot::Condvar::new(),
        ));
        let completion = cell.clone();
        run_loop::start(
            self.node,
            Box::new(move |result| {
                *completion.0.lock() = Some(result);
                completion.1.notify_all();
            }),
        );
        let mut guard = cell.0.lock();
        while guard.is_none() {
            cell.1.wait(&mut guard);
        }
        match guard.take() {
            Some(result) => result.and_then(unerase::<A>),
            None => Err(TaskError::Internal("blocking run lost its result")),
        }
    }

    /// Runs the task, delivering the outcome to `callback`.
    ///
    /// Purely synchronous tasks complete before this returns.
    pub fn run_async<F>(self, callback: F)
    where
        F: FnOnce(Result<A, TaskError>) + Send + 'static,
    {
        run_loop::start(
            self.node,
            Box::new(move |result| callback(result.and_then(unerase::<A>))),
        );
    }

    /// Runs the task cancelably, returning a [`Disposable`] that cancels it.
    ///
    /// With [`OnCancel::Silent`] the cancellation signal is swallowed
    /// instead of being delivered to `callback`.
    pub fn run_async_cancelable<F>(self, on_cancel: OnCancel, callback: F) -> Disposable
    where
        F: FnOnce(Result<A, TaskError>) + Send + 'static,
    {
        let conn = Connection::new();
        let observed = conn.clone();
        run_loop::start_cancelable(
            self.node,
            conn.clone(),
            Box::new(move |result| {
                let typed = result.and_then(unerase::<A>);
                if on_cancel == OnCancel::Silent
                    && matches!(&typed, Err(error) if error.is_canceled() && observed.is_canceled())
                {
                    return;
                }
                callback(typed);
            }),
        );
        Disposable::new(conn)
    }
}

impl Task<()> {
    /// The completed unit task.
    pub fn unit() -> Self {
        Self::pure(())
    }
}

impl<A> std::fmt::Debug for Task<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({:?})", self.node)
    }
}

/// Fuses a map function onto an eligible node, or wraps a fresh `Map`.
///
/// Rebuilds nodes instead of mutating: the source may be linked elsewhere.
fn fuse_map(node: Node, g: MapFn) -> Node {
    match node {
        Node::Map { source, f, depth } if depth < FUSION_DEPTH_LIMIT => Node::Map {
            source,
            f: Box::new(move |value| f(value).and_then(g)),
            depth: depth + 1,
        },
        Node::Bind {
            source,
            frame: Frame::Bind(k),
            depth,
        } if depth < FUSION_DEPTH_LIMIT => Node::Bind {
            source,
            frame: Frame::Bind(Box::new(move |value| fuse_map(k(value), g))),
            depth: depth + 1,
        },
        other => Node::Map {
            source: Box::new(other),
            f: g,
            depth: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_and_map_chain() {
        let result = Task::pure(1).map(|n| n + 1).map(|n| n * 10).run_sync();
        assert_eq!(result.unwrap(), 20);
    }

    #[test]
    fn map_fusion_stays_within_depth_limit() {
        let mut task = Task::pure(0_u32);
        for _ in 0..FUSION_DEPTH_LIMIT + 5 {
            task = task.map(|n| n + 1);
        }
        match &task.node {
            Node::Map { depth, .. } => assert!(*depth <= FUSION_DEPTH_LIMIT),
            other => panic!("expected a map node, got {other:?}"),
        }
        assert_eq!(task.run_sync().unwrap(), FUSION_DEPTH_LIMIT + 5);
    }

    #[test]
    fn flat_map_sequences_in_order() {
        let result = Task::pure(2)
            .flat_map(|n| Task::delay(move || n * 3))
            .flat_map(|n| Task::pure(n + 1))
            .run_sync();
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn attempt_recovers_raised_error() {
        let result = Task::<i32>::raise_error(TaskError::msg("boom"))
            .attempt()
            .run_sync()
            .unwrap();
        assert!(matches!(result, Err(TaskError::Domain(_))));
    }

    #[test]
    fn attempt_does_not_intercept_cancellation() {
        let result = Task::<i32>::raise_error(TaskError::Canceled)
            .attempt()
            .run_sync();
        assert!(matches!(result, Err(TaskError::Canceled)));
    }

    #[test]
    fn handle_error_with_recovers() {
        let result = Task::<i32>::raise_error(TaskError::msg("boom"))
            .handle_error_with(|_| Task::pure(99))
            .run_sync();
        assert_eq!(result.unwrap(), 99);
    }

    #[test]
    fn redeem_folds_both_channels() {
        let ok = Task::pure(2).redeem(|_| 0, |n| n * 2).run_sync().unwrap();
        assert_eq!(ok, 4);
        let recovered = Task::<i32>::raise_error(TaskError::msg("x"))
            .redeem(|_| -1, |n| n)
            .run_sync()
            .unwrap();
        assert_eq!(recovered, -1);
    }

    #[test]
    fn delay_panic_is_captured() {
        let result = Task::<i32>::delay(|| panic!("thunk blew up")).run_sync();
        assert!(matches!(result, Err(TaskError::Panic(_))));
    }

    #[test]
    fn bind_panic_is_captured() {
        let result = Task::pure(1)
            .flat_map(|_| -> Task<i32> { panic!("continuation blew up") })
            .run_sync();
        assert!(matches!(result, Err(TaskError::Panic(_))));
    }

    #[test]
    fn async_callback_is_idempotent() {
        let task = Task::async_task(|callback: AsyncCallback<i32>| {
            callback.complete(Ok(1));
            callback.complete(Ok(2));
        });
        assert_eq!(task.run_sync().unwrap(), 1);
    }

    #[test]
    fn errors_short_circuit_flat_map() {
        let touched = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let observed = touched.clone();
        let result = Task::<i32>::raise_error(TaskError::msg("dead"))
            .flat_map(move |n| {
                observed.store(true, std::sync::atomic::Ordering::SeqCst);
                Task::pure(n)
            })
            .run_sync();
        assert!(result.is_err());
        assert!(!touched.load(std::sync::atomic::Ordering::SeqCst));
    }
}
