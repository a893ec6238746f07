//! Bind frames.
//!
//! A frame is one pushed continuation on the interpreter's explicit stack:
//! what to do with a produced value, and (for error-aware frames) what to do
//! with a raised error. Panics from applying a frame are captured into the
//! error channel here so they can never escape the run loop.

use crate::error::{TaskError, catch};
use crate::runtime::connection::Connection;

use super::node::{BindFn, ErasedValue, MapFn, Node, RecoverFn, RestoreFn};

/// A success continuation plus optional error recovery.
pub(crate) enum Frame {
    /// Pure transform of the value.
    Map(MapFn),
    /// Value-dependent continuation. No error path.
    Bind(BindFn),
    /// Folds both channels into a continuation.
    Redeem {
        on_error: RecoverFn,
        on_value: BindFn,
    },
    /// Error recovery only. The success path is the identity, which lets
    /// the interpreter skip these frames entirely when resuming from a
    /// value.
    ErrorHandler(RecoverFn),
    /// Reinstates a cancellation connection on both exit paths after a
    /// connection-switched region.
    Restore {
        prior: Connection,
        restore: RestoreFn,
    },
}

impl Frame {
    /// True if this frame can consume a raised error.
    pub(crate) fn handles_errors(&self) -> bool {
        matches!(
            self,
            Self::Redeem { .. } | Self::ErrorHandler(_) | Self::Restore { .. }
        )
    }

    /// True if the success path is a no-op.
    pub(crate) fn skip_on_value(&self) -> bool {
        matches!(self, Self::ErrorHandler(_))
    }

    /// Applies the success path.
    pub(crate) fn apply(self, value: ErasedValue) -> Node {
        match self {
            Self::Map(f) => match catch(move || f(value)) {
                Ok(Ok(v)) => Node::Pure(v),
                Ok(Err(e)) | Err(e) => Node::Fail(e),
            },
            Self::Bind(f) => catch(move || f(value)).unwrap_or_else(Node::Fail),
            Self::Redeem { on_value, .. } => {
                catch(move || on_value(value)).unwrap_or_else(Node::Fail)
            }
            Self::ErrorHandler(_) => Node::Pure(value),
            Self::Restore { prior, restore } => Node::Switch {
                source: Box::new(Node::Pure(value)),
                swap: Box::new(move |current| restore(prior, current)),
                restore: None,
            },
        }
    }

    /// Applies the error path.
    ///
    /// Only meaningful for frames where [`handles_errors`](Self::handles_errors)
    /// is true; other frames propagate the error unchanged.
    pub(crate) fn recover(self, error: TaskError) -> Node {
        match self {
            Self::Redeem { on_error, .. } => {
                catch(move || on_error(error)).unwrap_or_else(Node::Fail)
            }
            Self::ErrorHandler(f) => catch(move || f(error)).unwrap_or_else(Node::Fail),
            Self::Restore { prior, restore } => Node::Switch {
                source: Box::new(Node::Fail(error)),
                swap: Box::new(move |current| restore(prior, current)),
                restore: None,
            },
            Self::Map(_) | Self::Bind(_) => Node::Fail(error),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Map(_) => "Map",
            Self::Bind(_) => "Bind",
            Self::Redeem { .. } => "Redeem",
            Self::ErrorHandler(_) => "ErrorHandler",
            Self::Restore { .. } => "Restore",
        };
        f.write_str(tag)
    }
}
