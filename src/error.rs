//! Error taxonomy for task execution.
//!
//! Three channels exist: domain errors raised by application code, the
//! cancellation signal (which ordinary recovery combinators do not
//! intercept), and composite errors that preserve every failure observed
//! concurrently. Panics escaping user closures are captured into the error
//! channel as defects; genuinely fatal conditions (aborts, OOM) never enter
//! it.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;

/// Boxed application error payload.
///
/// Stored behind `Arc` so task results can fan out to multiple waiters.
pub type DomainError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Error produced by running a task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// An application-raised failure.
    #[error("{0}")]
    Domain(DomainError),
    /// The run was canceled.
    ///
    /// Distinct from domain failures: `attempt` and `handle_error_with`
    /// re-raise this signal instead of recovering it.
    #[error("task canceled")]
    Canceled,
    /// Two or more failures that occurred concurrently, composed losslessly.
    #[error("{}", format_composite(.0))]
    Composite(Vec<TaskError>),
    /// A panic escaped a user-supplied closure.
    #[error("task panicked: {0}")]
    Panic(Arc<str>),
    /// An interpreter invariant was violated.
    #[error("internal runtime defect: {0}")]
    Internal(&'static str),
}

fn format_composite(errors: &[TaskError]) -> String {
    let mut out = format!("{} concurrent failures:", errors.len());
    for e in errors {
        out.push_str(" [");
        out.push_str(&e.to_string());
        out.push(']');
    }
    out
}

impl TaskError {
    /// Wraps an application error.
    pub fn domain<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Domain(Arc::new(error))
    }

    /// Raises a plain message as a domain error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Domain(Arc::new(MessageError(message.into())))
    }

    /// Returns true if this error is the cancellation signal.
    ///
    /// A composite counts as canceled only if every member does: a composite
    /// always carries at least one real failure alongside any cancellation
    /// cleanup noise.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Canceled => true,
            Self::Composite(errors) => errors.iter().all(TaskError::is_canceled),
            _ => false,
        }
    }

    /// Composes two errors without losing either.
    ///
    /// Composites are flattened so nesting never accumulates.
    #[must_use]
    pub fn compose(first: Self, second: Self) -> Self {
        let mut all = Vec::new();
        first.flatten_into(&mut all);
        second.flatten_into(&mut all);
        Self::Composite(all)
    }

    /// Composes an error with the outcome of a cleanup action.
    ///
    /// `Ok` cleanups leave the primary error untouched.
    #[must_use]
    pub fn compose_cleanup(primary: Self, cleanup: Result<(), Self>) -> Self {
        match cleanup {
            Ok(()) => primary,
            Err(e) => Self::compose(primary, e),
        }
    }

    fn flatten_into(self, out: &mut Vec<Self>) {
        match self {
            Self::Composite(errors) => {
                for e in errors {
                    e.flatten_into(out);
                }
            }
            other => out.push(other),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panic(Arc::from(message.as_str()))
    }
}

/// A string-only domain error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageError(pub String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MessageError {}

/// Runs a closure, converting an unwind into a captured panic error.
pub(crate) fn catch<T>(f: impl FnOnce() -> T) -> Result<T, TaskError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(TaskError::from_panic)
}
