//! Taskfx: stack-safe, cancel-correct suspension-based effect runtime.
//!
//! # Overview
//!
//! Taskfx is built around one data type, [`Task`]: an immutable description
//! of a deferred, possibly asynchronous computation. An iterative
//! interpreter executes arbitrarily long chains of sequential composition
//! with O(1) native stack growth, observes cancellation once per step, and
//! guarantees resource finalizers run exactly once on every exit path.
//!
//! # Core Guarantees
//!
//! - **Stack safety**: bind chains and fused maps of any length run without
//!   growing the native call stack; chained suspension points trampoline.
//! - **Cooperative cancellation**: cancellation is a first-class protocol
//!   with a per-run token stack; no token is ever silently discarded.
//! - **Exactly-once release**: `bracket`/`guarantee` finalizers run once on
//!   success, error, and cancellation alike, and cannot be interrupted.
//! - **Exactly-once settlement**: race combinators deliver exactly one
//!   outcome; losers stay joinable or are canceled, never leaked.
//! - **Lossless errors**: concurrent failures compose instead of
//!   overwriting each other.
//!
//! # Module Structure
//!
//! - [`task`]: the `Task` algebra and combinator surface
//! - [`runtime`]: run loop, connections, promises, bracket frames
//! - [`fiber`]: fork and the `Fiber` handle
//! - [`combinator`]: race combinators
//! - [`exec`]: execution contexts (inline, thread pool)
//! - [`error`](mod@error): error taxonomy
//! - [`config`]: interpreter tunables
//!
//! # Example
//!
//! ```
//! use taskfx::{Task, TaskError};
//!
//! let task = Task::delay(|| 6)
//!     .map(|n| n * 7)
//!     .flat_map(|n| if n == 42 {
//!         Task::pure(n)
//!     } else {
//!         Task::raise_error(TaskError::msg("arithmetic is broken"))
//!     });
//! assert_eq!(task.run_sync().unwrap(), 42);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod combinator;
pub mod config;
pub mod error;
pub mod exec;
pub mod fiber;
pub mod runtime;
pub mod task;

pub(crate) mod tracing_compat;

// Re-exports for convenient access to core types
pub use combinator::{Either, Race3, RacePair, RaceTriple, race2, race3, race_pair, race_triple};
pub use error::{DomainError, MessageError, TaskError};
pub use exec::{Executor, ExecutorRef, Inline, Job, ThreadPool, Trampolined};
pub use fiber::Fiber;
pub use runtime::bracket::ExitCase;
pub use runtime::connection::{CancelToken, Connection};
pub use runtime::forward_cancel::{AlreadyCompleted, ForwardCancel};
pub use runtime::promise::{AlreadyFulfilled, Promise};
pub use runtime::{Disposable, OnCancel};
pub use task::{AsyncCallback, Task};
