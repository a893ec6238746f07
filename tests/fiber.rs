//! Fiber lifecycle: fork/join laws, cancellation chaining, and executor
//! hand-off.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use taskfx::{OnCancel, Task, TaskError, ThreadPool, Trampolined};

#[test]
fn fork_join_identity_on_a_real_pool() {
    let pool = ThreadPool::handle(2);
    let direct = Task::delay(|| 6 * 7).run_sync().unwrap();
    let forked = Task::delay(|| 6 * 7)
        .fork(pool)
        .flat_map(|fiber| fiber.join())
        .run_sync()
        .unwrap();
    assert_eq!(direct, forked);
}

#[test]
fn join_from_two_clones_on_a_pool() {
    let pool = ThreadPool::handle(2);
    let result = Task::delay(|| "shared".to_string())
        .fork(pool)
        .flat_map(|fiber| {
            let other = fiber.clone();
            fiber
                .join()
                .flat_map(move |a| other.join().map(move |b| (a, b)))
        })
        .run_sync()
        .unwrap();
    assert_eq!(result.0, "shared");
    assert_eq!(result.1, "shared");
}

#[test]
fn parent_cancellation_reaches_the_forked_child() {
    let child_canceled = Arc::new(AtomicBool::new(false));
    let flag = child_canceled.clone();
    let child = Task::<i32>::cancelable(move |_cb| {
        let flag = flag.clone();
        Task::delay(move || {
            flag.store(true, Ordering::SeqCst);
        })
    });
    let parent = child
        .fork(Trampolined::handle())
        .flat_map(|_fiber| Task::<i32>::never());
    let disposable = parent.run_async_cancelable(OnCancel::Silent, |_| {});
    disposable.dispose();
    assert!(child_canceled.load(Ordering::SeqCst));
}

#[test]
fn fiber_cancellation_leaves_the_parent_alone() {
    let result = Task::<i32>::never()
        .fork(Trampolined::handle())
        .flat_map(|fiber| fiber.cancel())
        .map(|()| "parent still here")
        .run_sync();
    assert_eq!(result.unwrap(), "parent still here");
}

#[test]
fn fiber_error_surfaces_on_join_not_at_fork() {
    let forked = Task::<i32>::raise_error(TaskError::msg("inside the fiber"))
        .fork(Trampolined::handle());
    // Forking a failing task succeeds; the failure belongs to the fiber.
    let result = forked.flat_map(|fiber| fiber.join()).run_sync();
    match result {
        Err(TaskError::Domain(e)) => assert_eq!(e.to_string(), "inside the fiber"),
        other => panic!("expected the fiber's error, got {other:?}"),
    }
}

#[test]
fn continue_on_moves_execution_to_the_pool() {
    let pool = ThreadPool::handle(1);
    let here = std::thread::current().id();
    let there: ThreadId = Task::unit()
        .continue_on(pool.clone())
        .flat_map(|()| Task::delay(|| std::thread::current().id()))
        .run_sync()
        .unwrap();
    assert_ne!(here, there, "continuation must run on the pool");
    drop(pool);
}

#[test]
fn update_context_sets_the_ambient_executor() {
    let pool = ThreadPool::handle(1);
    let ambient = pool.clone();
    let here = std::thread::current().id();
    let task = Task::effect(|| Ok(std::thread::current().id()))
        .update_context(move |_| Some(ambient));
    let there = task.run_sync().unwrap();
    assert_ne!(here, there, "effects must dispatch to the ambient executor");
    drop(pool);
}
