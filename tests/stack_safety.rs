//! Stack-safety properties of the interpreter.
//!
//! Long sequential chains must run in O(1) native stack: the explicit frame
//! stacks absorb bind depth, fusion bounds per-node composition, and the
//! trampoline bounds chained suspension resumptions.

use taskfx::{Task, TaskError};

#[test]
fn half_million_fused_maps_evaluate_without_overflow() {
    let mut task = Task::pure(0_u64);
    for _ in 0..500_000 {
        task = task.map(|n| n + 1);
    }
    assert_eq!(task.run_sync().unwrap(), 500_000);
}

#[test]
fn hundred_thousand_flat_maps_evaluate_without_overflow() {
    let mut task = Task::delay(|| 0_u64);
    for _ in 0..100_000 {
        task = task.flat_map(|n| Task::pure(n + 1));
    }
    assert_eq!(task.run_sync().unwrap(), 100_000);
}

#[test]
fn chained_suspension_points_trampoline() {
    // Each effect is a suspension boundary; without the trampoline this
    // nests one native frame set per boundary.
    let mut task = Task::effect(|| Ok(0_u64));
    for _ in 0..50_000 {
        task = task.flat_map(|n| Task::effect(move || Ok(n + 1)));
    }
    assert_eq!(task.run_sync().unwrap(), 50_000);
}

#[test]
fn deep_chain_recovers_at_the_bottom() {
    let mut task = Task::<u64>::raise_error(TaskError::msg("seed failure"));
    for _ in 0..100_000 {
        task = task.map(|n| n + 1);
    }
    let recovered = task.handle_error(|_| 7);
    assert_eq!(recovered.run_sync().unwrap(), 7);
}

#[test]
fn deep_async_chain_completes() {
    let mut task = Task::async_task(|cb| cb.complete(Ok(0_u64)));
    for _ in 0..20_000 {
        task = task.flat_map(|n| Task::async_task(move |cb| cb.complete(Ok(n + 1))));
    }
    assert_eq!(task.run_sync().unwrap(), 20_000);
}

#[test]
fn fused_and_unfused_chains_agree() {
    let fused = {
        let mut task = Task::pure(1_i64);
        for i in 0..1_000 {
            task = task.map(move |n| n.wrapping_mul(3).wrapping_add(i));
        }
        task.run_sync().unwrap()
    };
    let reference = (0..1_000).fold(1_i64, |n, i| n.wrapping_mul(3).wrapping_add(i));
    assert_eq!(fused, reference);
}
