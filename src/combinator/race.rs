//! Race combinators.
//!
//! Every branch runs on its own child connection registered with the caller's
//! connection, so canceling the race cancels every branch. An atomic
//! `settled` flag guarantees exactly one branch's outcome reaches the final
//! callback:
//!
//! - the first branch to succeed wins; in `race_pair`/`race_triple` the
//!   losers are handed back as fibers, not canceled, so the caller decides;
//! - the first branch to fail stops the race: every sibling is actively
//!   canceled, and cancellation-cleanup errors are composed with (never
//!   replace) the branch's error;
//! - a branch that loses the settlement writes its outcome into its private
//!   promise, so joining its fiber later still observes the right result.
//!
//! Settlement ties are broken by whichever branch wins the compare-and-swap;
//! under a deterministic single-threaded executor that is branch declaration
//! order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TaskError;
use crate::exec::ExecutorRef;
use crate::fiber::{Fiber, forked_start};
use crate::runtime::connection::Connection;
use crate::runtime::promise::Promise;
use crate::runtime::{start_cancelable_typed, start_typed};
use crate::task::Task;
use crate::tracing_compat::rt_trace;

/// Winner of a two-way winner-take-all race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Either<A, B> {
    /// The first branch won.
    Left(A),
    /// The second branch won.
    Right(B),
}

/// Winner of a three-way winner-take-all race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Race3<A, B, C> {
    /// The first branch won.
    First(A),
    /// The second branch won.
    Second(B),
    /// The third branch won.
    Third(C),
}

/// Outcome of [`race_pair`]: the winner's value plus the loser as a fiber.
#[derive(Debug)]
pub enum RacePair<A, B> {
    /// The first branch won.
    First(A, Fiber<B>),
    /// The second branch won.
    Second(Fiber<A>, B),
}

/// Outcome of [`race_triple`]: the winner's value plus both losers.
#[derive(Debug)]
pub enum RaceTriple<A, B, C> {
    /// The first branch won.
    First(A, Fiber<B>, Fiber<C>),
    /// The second branch won.
    Second(Fiber<A>, B, Fiber<C>),
    /// The third branch won.
    Third(Fiber<A>, Fiber<B>, C),
}

/// Races two tasks; the winner's value is delivered alongside the loser's
/// fiber. The loser is not canceled on a successful settlement.
pub fn race_pair<A, B>(exec: ExecutorRef, task_a: Task<A>, task_b: Task<B>) -> Task<RacePair<A, B>>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    Task::async_register_raw(true, move |conn, callback| {
        let settled = Arc::new(AtomicBool::new(false));
        let conn_a = Connection::new();
        let conn_b = Connection::new();
        let promise_a: Promise<A> = Promise::new();
        let promise_b: Promise<B> = Promise::new();
        conn.push_pair(conn_a.cancel(), conn_b.cancel());

        {
            let settled = settled.clone();
            let parent = conn.clone();
            let other = conn_b.clone();
            let own_promise = promise_a.clone();
            let other_promise = promise_b.clone();
            let callback = callback.clone();
            start_cancelable_typed(
                forked_start(task_a, exec.clone()),
                conn_a.clone(),
                move |result| match result {
                    Ok(value) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = own_promise.complete(Ok(value));
                        } else {
                            rt_trace!("race pair settled by first branch");
                            let _ = parent.pop();
                            callback.complete(Ok(RacePair::First(
                                value,
                                Fiber::new(other_promise, other),
                            )));
                        }
                    }
                    Err(error) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = own_promise.complete(Err(error));
                        } else {
                            start_typed(other.cancel(), move |cleanup| {
                                let _ = parent.pop();
                                callback
                                    .complete(Err(TaskError::compose_cleanup(error, cleanup)));
                            });
                        }
                    }
                },
            );
        }

        {
            let parent = conn.clone();
            let other = conn_a.clone();
            start_cancelable_typed(
                forked_start(task_b, exec),
                conn_b.clone(),
                move |result| match result {
                    Ok(value) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = promise_b.complete(Ok(value));
                        } else {
                            rt_trace!("race pair settled by second branch");
                            let _ = parent.pop();
                            callback.complete(Ok(RacePair::Second(
                                Fiber::new(promise_a, other),
                                value,
                            )));
                        }
                    }
                    Err(error) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = promise_b.complete(Err(error));
                        } else {
                            start_typed(other.cancel(), move |cleanup| {
                                let _ = parent.pop();
                                callback
                                    .complete(Err(TaskError::compose_cleanup(error, cleanup)));
                            });
                        }
                    }
                },
            );
        }
    })
}

/// Races three tasks; the winner's value is delivered alongside both losers'
/// fibers.
pub fn race_triple<A, B, C>(
    exec: ExecutorRef,
    task_a: Task<A>,
    task_b: Task<B>,
    task_c: Task<C>,
) -> Task<RaceTriple<A, B, C>>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    Task::async_register_raw(true, move |conn, callback| {
        let settled = Arc::new(AtomicBool::new(false));
        let conn_a = Connection::new();
        let conn_b = Connection::new();
        let conn_c = Connection::new();
        let promise_a: Promise<A> = Promise::new();
        let promise_b: Promise<B> = Promise::new();
        let promise_c: Promise<C> = Promise::new();
        conn.push_triple(conn_a.cancel(), conn_b.cancel(), conn_c.cancel());

        {
            let settled = settled.clone();
            let parent = conn.clone();
            let own_promise = promise_a.clone();
            let fiber_b = Fiber::new(promise_b.clone(), conn_b.clone());
            let fiber_c = Fiber::new(promise_c.clone(), conn_c.clone());
            let losers = (conn_b.clone(), conn_c.clone());
            let callback = callback.clone();
            start_cancelable_typed(
                forked_start(task_a, exec.clone()),
                conn_a.clone(),
                move |result| match result {
                    Ok(value) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = own_promise.complete(Ok(value));
                        } else {
                            let _ = parent.pop();
                            callback.complete(Ok(RaceTriple::First(value, fiber_b, fiber_c)));
                        }
                    }
                    Err(error) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = own_promise.complete(Err(error));
                        } else {
                            cancel_both(losers, parent, error, move |composed| {
                                callback.complete(Err(composed));
                            });
                        }
                    }
                },
            );
        }

        {
            let settled = settled.clone();
            let parent = conn.clone();
            let own_promise = promise_b.clone();
            let fiber_a = Fiber::new(promise_a.clone(), conn_a.clone());
            let fiber_c = Fiber::new(promise_c.clone(), conn_c.clone());
            let losers = (conn_a.clone(), conn_c.clone());
            let callback = callback.clone();
            start_cancelable_typed(
                forked_start(task_b, exec.clone()),
                conn_b.clone(),
                move |result| match result {
                    Ok(value) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = own_promise.complete(Ok(value));
                        } else {
                            let _ = parent.pop();
                            callback.complete(Ok(RaceTriple::Second(fiber_a, value, fiber_c)));
                        }
                    }
                    Err(error) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = own_promise.complete(Err(error));
                        } else {
                            cancel_both(losers, parent, error, move |composed| {
                                callback.complete(Err(composed));
                            });
                        }
                    }
                },
            );
        }

        {
            let parent = conn.clone();
            let fiber_a = Fiber::new(promise_a, conn_a.clone());
            let fiber_b = Fiber::new(promise_b, conn_b.clone());
            let losers = (conn_a, conn_b);
            start_cancelable_typed(
                forked_start(task_c, exec),
                conn_c.clone(),
                move |result| match result {
                    Ok(value) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = promise_c.complete(Ok(value));
                        } else {
                            let _ = parent.pop();
                            callback.complete(Ok(RaceTriple::Third(fiber_a, fiber_b, value)));
                        }
                    }
                    Err(error) => {
                        if settled.swap(true, Ordering::AcqRel) {
                            let _ = promise_c.complete(Err(error));
                        } else {
                            cancel_both(losers, parent, error, move |composed| {
                                callback.complete(Err(composed));
                            });
                        }
                    }
                },
            );
        }
    })
}

/// Cancels two sibling branches in order, composes whatever errors surface
/// with `error`, pops the race's token off `parent`, and hands the composed
/// error on.
fn cancel_both(
    siblings: (Connection, Connection),
    parent: Connection,
    error: TaskError,
    deliver: impl FnOnce(TaskError) + Send + 'static,
) {
    let (first, second) = siblings;
    start_typed(first.cancel(), move |first_cleanup| {
        start_typed(second.cancel(), move |second_cleanup| {
            let _ = parent.pop();
            let composed = TaskError::compose_cleanup(
                TaskError::compose_cleanup(error, first_cleanup),
                second_cleanup,
            );
            deliver(composed);
        });
    });
}

/// Winner-take-all two-way race: the loser is canceled before the winner's
/// value is delivered. Cleanup errors from canceling the loser of a
/// successful branch are dropped; on a failing branch they compose.
pub fn race2<A, B>(exec: ExecutorRef, task_a: Task<A>, task_b: Task<B>) -> Task<Either<A, B>>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    race_pair(exec, task_a, task_b).flat_map(|outcome| match outcome {
        RacePair::First(value, loser) => {
            loser.cancel().materialize().map(move |_| Either::Left(value))
        }
        RacePair::Second(loser, value) => {
            loser.cancel().materialize().map(move |_| Either::Right(value))
        }
    })
}

/// Winner-take-all three-way race: both losers are canceled before the
/// winner's value is delivered.
pub fn race3<A, B, C>(
    exec: ExecutorRef,
    task_a: Task<A>,
    task_b: Task<B>,
    task_c: Task<C>,
) -> Task<Race3<A, B, C>>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    race_triple(exec, task_a, task_b, task_c).flat_map(|outcome| match outcome {
        RaceTriple::First(value, loser_b, loser_c) => loser_b
            .cancel()
            .materialize()
            .flat_map(move |_| loser_c.cancel().materialize())
            .map(move |_| Race3::First(value)),
        RaceTriple::Second(loser_a, value, loser_c) => loser_a
            .cancel()
            .materialize()
            .flat_map(move |_| loser_c.cancel().materialize())
            .map(move |_| Race3::Second(value)),
        RaceTriple::Third(loser_a, loser_b, value) => loser_a
            .cancel()
            .materialize()
            .flat_map(move |_| loser_b.cancel().materialize())
            .map(move |_| Race3::Third(value)),
    })
}
