//! Run-loop internals and the cancelable run surface.

pub mod bracket;
pub mod connection;
pub mod forward_cancel;
pub mod promise;
pub(crate) mod run_loop;

use crate::error::TaskError;
use crate::task::{Task, unerase};

use connection::Connection;

/// Policy for delivering the cancellation signal from
/// [`Task::run_async_cancelable`](crate::Task::run_async_cancelable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnCancel {
    /// Swallow the cancellation signal; the callback never observes it.
    #[default]
    Silent,
    /// Deliver the cancellation signal through the callback's error branch.
    Signal,
}

/// Handle that cancels a running task started with
/// [`Task::run_async_cancelable`](crate::Task::run_async_cancelable).
#[must_use = "dropping a disposable without calling dispose leaks the ability to cancel"]
#[derive(Debug)]
pub struct Disposable {
    conn: Connection,
}

impl Disposable {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Requests cancellation of the running task.
    ///
    /// Returns once the cancel request is issued; token execution proceeds
    /// asynchronously. Idempotent.
    pub fn dispose(&self) {
        run_loop::start(self.conn.cancel().into_node(), Box::new(|_| {}));
    }
}

/// Starts `task` with a typed callback on an uncancelable root connection.
pub(crate) fn start_typed<A, F>(task: Task<A>, callback: F)
where
    A: Send + 'static,
    F: FnOnce(Result<A, TaskError>) + Send + 'static,
{
    run_loop::start(
        task.into_node(),
        Box::new(move |result| callback(result.and_then(unerase::<A>))),
    );
}

/// Starts `task` observing `conn`, with a typed callback.
pub(crate) fn start_cancelable_typed<A, F>(task: Task<A>, conn: Connection, callback: F)
where
    A: Send + 'static,
    F: FnOnce(Result<A, TaskError>) + Send + 'static,
{
    run_loop::start_cancelable(
        task.into_node(),
        conn,
        Box::new(move |result| callback(result.and_then(unerase::<A>))),
    );
}
