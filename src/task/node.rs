//! Untyped computation nodes.
//!
//! The public [`Task<A>`](super::Task) is a typed veneer over this tagged
//! union. Values cross the interpreter as `Box<dyn Any + Send>`; the typed
//! layer erases on construction and downcasts at delivery, so the run loop
//! can thread one bind stack through continuations of differing types.
//!
//! Nodes already linked as another node's `source` are never mutated: fusion
//! rebuilds a fresh node instead.

use std::any::Any;
use std::fmt;

use crate::error::TaskError;
use crate::exec::ExecutorRef;
use crate::runtime::connection::Connection;
use crate::runtime::run_loop::RawCallback;

use super::frame::Frame;

/// A value in flight through the interpreter.
pub(crate) type ErasedValue = Box<dyn Any + Send>;

/// Result of a completed run, still erased.
pub(crate) type TaskResult = Result<ErasedValue, TaskError>;

pub(crate) type MapFn = Box<dyn FnOnce(ErasedValue) -> TaskResult + Send>;
pub(crate) type BindFn = Box<dyn FnOnce(ErasedValue) -> Node + Send>;
pub(crate) type RecoverFn = Box<dyn FnOnce(TaskError) -> Node + Send>;
pub(crate) type ThunkFn = Box<dyn FnOnce() -> ErasedValue + Send>;
pub(crate) type DeferFn = Box<dyn FnOnce() -> Node + Send>;
pub(crate) type EffectFn = Box<dyn FnOnce() -> TaskResult + Send>;
pub(crate) type SwapFn = Box<dyn FnOnce(Connection) -> Connection + Send>;
pub(crate) type RestoreFn = Box<dyn FnOnce(Connection, Connection) -> Connection + Send>;
pub(crate) type RegisterFn = Box<dyn FnOnce(&Connection, RawCallback) + Send>;
pub(crate) type CtxFn = Box<dyn FnOnce(Option<ExecutorRef>) -> Option<ExecutorRef> + Send>;

/// One node of a deferred computation.
pub(crate) enum Node {
    /// Terminal: an already-resolved value.
    Pure(ErasedValue),
    /// Terminal: an already-raised error.
    Fail(TaskError),
    /// A synchronous deferred value. No suspension point.
    Delay(ThunkFn),
    /// Deferred construction of another node.
    Defer(DeferFn),
    /// One externally-suspending operation, optionally pinned to an
    /// executor. The interpreter treats this as a suspension boundary:
    /// the resumption counts toward the trampoline budget.
    Effect {
        exec: Option<ExecutorRef>,
        run: EffectFn,
    },
    /// Callback-based asynchronous registration. The registrant receives
    /// the active connection and an idempotent completion callback.
    Async {
        /// Force the resumption through the trampoline regardless of the
        /// counter. Set by combinators that complete on foreign stacks.
        trampoline_after: bool,
        register: RegisterFn,
    },
    /// Sequential composition of a pure transform. `depth` counts how many
    /// functions have been fused into `f`.
    Map {
        source: Box<Node>,
        f: MapFn,
        depth: u32,
    },
    /// Sequential composition of a continuation frame. `depth` counts map
    /// fusions applied to a `Frame::Bind` continuation.
    Bind {
        source: Box<Node>,
        frame: Frame,
        depth: u32,
    },
    /// Reschedules the continuation of `source` onto `exec`.
    ContinueOn {
        source: Box<Node>,
        exec: ExecutorRef,
    },
    /// Transforms the ambient execution context for the rest of the run.
    UpdateContext { source: Box<Node>, f: CtxFn },
    /// Temporarily substitutes the active cancellation connection while
    /// `source` runs; `restore` reinstates a connection afterwards on both
    /// the success and error paths.
    Switch {
        source: Box<Node>,
        swap: SwapFn,
        restore: Option<RestoreFn>,
    },
}

impl Node {
    /// Lifts a finished result into a terminal node.
    pub(crate) fn from_result(result: TaskResult) -> Self {
        match result {
            Ok(value) => Self::Pure(value),
            Err(error) => Self::Fail(error),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Pure(_) => "Pure",
            Self::Fail(_) => "Fail",
            Self::Delay(_) => "Delay",
            Self::Defer(_) => "Defer",
            Self::Effect { .. } => "Effect",
            Self::Async { .. } => "Async",
            Self::Map { depth, .. } => return write!(f, "Map(depth={depth})"),
            Self::Bind { depth, .. } => return write!(f, "Bind(depth={depth})"),
            Self::ContinueOn { .. } => "ContinueOn",
            Self::UpdateContext { .. } => "UpdateContext",
            Self::Switch { .. } => "Switch",
        };
        f.write_str(tag)
    }
}
