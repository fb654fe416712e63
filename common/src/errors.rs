// Error handling framework for the event core
// Every failure here is scoped to one event, trigger or buffer call; none of them
// is allowed to stop the scheduling tick.

use std::any::Any;
use thiserror::Error;

/// Worker-side execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Event handler failed: {0}")]
    HandlerFailed(String),

    #[error("Event handler panicked: {0}")]
    Panicked(String),

    #[error("Handler does not accept {category} payloads")]
    UnsupportedPayload { category: String },

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),
}

impl ExecutionError {
    /// Shorthand for handler authors
    pub fn failed(reason: impl Into<String>) -> Self {
        ExecutionError::HandlerFailed(reason.into())
    }
}

/// Condition evaluation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Condition evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("Condition panicked: {0}")]
    Panicked(String),
}

/// Queue-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Macro event '{0}' has no constituent events")]
    EmptyMacroEvent(String),

    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("Trigger already registered: {0}")]
    DuplicateTrigger(String),

    #[error("Global rule not found: {0}")]
    RuleNotFound(String),

    #[error("No worker pool registered for category {0}")]
    PoolMissing(String),

    #[error("Worker pool for category {0} is closed")]
    PoolClosed(String),

    #[error("Event queue is gone")]
    QueueClosed,

    #[error("Invalid event state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Input combo buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Combo buffer capacity must be greater than 0")]
    InvalidCapacity,

    #[error("Frame index went backwards: last frame {last}, got {frame}")]
    NonMonotonicFrame { last: u64, frame: u64 },
}

impl From<QueueError> for ExecutionError {
    fn from(err: QueueError) -> Self {
        ExecutionError::DispatchFailed(err.to_string())
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
