//! Resource-safety: bracket and guarantee release semantics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use taskfx::{ExitCase, OnCancel, Task, TaskError};

fn recording_release(
    log: &Arc<Mutex<Vec<ExitCase>>>,
) -> impl FnOnce(Arc<&'static str>, ExitCase) -> Task<()> + Send + 'static {
    let log = log.clone();
    move |_resource, exit| {
        Task::delay(move || {
            log.lock().push(exit);
        })
    }
}

#[test]
fn release_runs_with_completed_on_success() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let result = Task::bracket_case(
        Task::pure(Arc::new("resource")),
        |resource| Task::delay(move || resource.len()),
        recording_release(&log),
    )
    .run_sync();
    assert_eq!(result.unwrap(), 8);
    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert!(matches!(log[0], ExitCase::Completed));
}

#[test]
fn release_runs_with_error_and_original_error_survives() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let result = Task::bracket_case(
        Task::pure(Arc::new("resource")),
        |_resource| Task::<i32>::raise_error(TaskError::msg("use failed")),
        recording_release(&log),
    )
    .run_sync();
    match result {
        Err(TaskError::Domain(e)) => assert_eq!(e.to_string(), "use failed"),
        other => panic!("expected the use error, got {other:?}"),
    }
    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert!(matches!(log[0], ExitCase::Error(_)));
}

#[test]
fn release_failure_composes_with_use_error() {
    let result = Task::bracket_case(
        Task::pure(Arc::new("resource")),
        |_resource| Task::<i32>::raise_error(TaskError::msg("use failed")),
        |_resource, _exit| Task::raise_error(TaskError::msg("release failed")),
    )
    .run_sync();
    match result {
        Err(TaskError::Composite(errors)) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].to_string(), "use failed");
            assert_eq!(errors[1].to_string(), "release failed");
        }
        other => panic!("expected composed errors, got {other:?}"),
    }
}

#[test]
fn cancel_during_use_releases_exactly_once_with_canceled() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let callback_fired = Arc::new(AtomicBool::new(false));
    let fired = callback_fired.clone();
    let task = Task::bracket_case(
        Task::pure(Arc::new("resource")),
        |_resource| Task::<i32>::never(),
        recording_release(&log),
    );
    let disposable = task.run_async_cancelable(OnCancel::Silent, move |_| {
        fired.store(true, Ordering::SeqCst);
    });
    disposable.dispose();
    disposable.dispose();
    let log = log.lock();
    assert_eq!(log.len(), 1, "release must run exactly once");
    assert!(matches!(log[0], ExitCase::Canceled));
    assert!(!callback_fired.load(Ordering::SeqCst));
}

#[test]
fn concurrent_cancels_release_exactly_once() {
    for _ in 0..50 {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let task = Task::bracket_case(
            Task::pure(Arc::new("resource")),
            |_resource| Task::<i32>::never(),
            move |_resource, _exit| {
                let counter = counter.clone();
                Task::delay(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            },
        );
        let disposable = Arc::new(task.run_async_cancelable(OnCancel::Silent, |_| {}));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let disposable = disposable.clone();
                std::thread::spawn(move || disposable.dispose())
            })
            .collect();
        for handle in threads {
            handle.join().expect("cancel thread panicked");
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn guarantee_case_sees_success() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let result = Task::delay(|| 5)
        .guarantee_case(move |exit| {
            Task::delay(move || {
                sink.lock().push(exit);
            })
        })
        .run_sync();
    assert_eq!(result.unwrap(), 5);
    assert!(matches!(log.lock()[0], ExitCase::Completed));
}

#[test]
fn guarantee_runs_finalizer_on_error() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let result = Task::<i32>::raise_error(TaskError::msg("boom"))
        .guarantee(Task::delay(move || {
            flag.store(true, Ordering::SeqCst);
        }))
        .run_sync();
    assert!(result.is_err());
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn uncancelable_region_completes_despite_cancellation() {
    // The run is canceled while suspended inside an uncancelable region;
    // the region still runs to completion, then the run reports canceled.
    let cell: Arc<Mutex<Option<taskfx::AsyncCallback<i32>>>> = Arc::new(Mutex::new(None));
    let stash = cell.clone();
    let region_ran = Arc::new(AtomicBool::new(false));
    let flag = region_ran.clone();
    let outcome: Arc<Mutex<Option<Result<i32, TaskError>>>> = Arc::new(Mutex::new(None));
    let seen = outcome.clone();

    let task = Task::async_task(move |cb| {
        *stash.lock() = Some(cb);
    })
    .map(move |n: i32| {
        flag.store(true, Ordering::SeqCst);
        n
    })
    .uncancelable();

    let disposable = task.run_async_cancelable(OnCancel::Signal, move |result| {
        *seen.lock() = Some(result);
    });
    disposable.dispose();
    // Resuming after cancellation: the uncancelable region still runs.
    cell.lock().take().expect("registration missing").complete(Ok(3));

    assert!(region_ran.load(Ordering::SeqCst));
    match outcome.lock().take() {
        Some(Err(error)) => assert!(error.is_canceled()),
        other => panic!("expected the cancellation signal, got {other:?}"),
    }
}
