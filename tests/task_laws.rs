//! Property tests for the task algebra.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use taskfx::{Connection, Task, TaskError};

proptest! {
    #[test]
    fn fused_maps_match_the_reference_fold(
        seed in -1000_i64..1000,
        ops in proptest::collection::vec(-50_i64..50, 0..200),
    ) {
        let mut task = Task::pure(seed);
        for &op in &ops {
            task = task.map(move |n: i64| n.wrapping_add(op).wrapping_mul(3));
        }
        let reference = ops
            .iter()
            .fold(seed, |n, &op| n.wrapping_add(op).wrapping_mul(3));
        prop_assert_eq!(task.run_sync().unwrap(), reference);
    }

    #[test]
    fn attempt_round_trips_domain_errors(message in "[a-z]{1,16}") {
        let result = Task::<i32>::raise_error(TaskError::msg(message.clone()))
            .attempt()
            .run_sync()
            .unwrap();
        match result {
            Err(error) => prop_assert_eq!(error.to_string(), message),
            Ok(value) => prop_assert!(false, "unexpected success: {}", value),
        }
    }

    #[test]
    fn redeem_with_applies_the_matching_arm(n in any::<i32>(), fail in any::<bool>()) {
        let source = if fail {
            Task::<i32>::raise_error(TaskError::msg("expected"))
        } else {
            Task::pure(n)
        };
        let out = source
            .redeem_with(
                |_| Task::pure(-1_i64),
                |v| Task::pure(i64::from(v).wrapping_add(1)),
            )
            .run_sync()
            .unwrap();
        if fail {
            prop_assert_eq!(out, -1);
        } else {
            prop_assert_eq!(out, i64::from(n).wrapping_add(1));
        }
    }

    #[test]
    fn cancel_runs_exactly_the_unpopped_tokens_in_order(
        pushes in 0_usize..12,
        pops in 0_usize..12,
    ) {
        let conn = Connection::new();
        let log: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        for i in 0..pushes {
            let log = log.clone();
            conn.push(Task::delay(move || {
                log.lock().push(i);
            }));
        }
        for _ in 0..pops {
            let _ = conn.pop();
        }
        conn.cancel().run_sync().unwrap();
        let expected: Vec<usize> = (0..pushes.saturating_sub(pops)).collect();
        prop_assert_eq!(log.lock().clone(), expected);
    }

    #[test]
    fn handle_error_is_identity_on_success(n in any::<u32>()) {
        let out = Task::pure(n)
            .handle_error(|_| 0)
            .run_sync()
            .unwrap();
        prop_assert_eq!(out, n);
    }
}
