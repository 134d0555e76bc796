//! Cooperative cancellation
//!
//! Long-running stages poll a [`CancelToken`] between independent work units
//! (candles, templates, devices). Stages that can hand back whole units return
//! an [`Outcome`] holding everything finished before the signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::EngineError;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Error out of a stage that cannot return partial output
    pub fn check(&self, stage: &'static str) -> Result<(), EngineError> {
        if self.is_cancelled() {
            tracing::warn!(stage, "cancellation observed");
            Err(EngineError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

/// Whether a stage ran to the end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completion {
    Complete,
    Cancelled { stage: &'static str },
}

/// Stage output plus its completion status
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub completion: Completion,
}

impl<T> Outcome<T> {
    pub fn complete(value: T) -> Self {
        Self {
            value,
            completion: Completion::Complete,
        }
    }

    pub fn cancelled(value: T, stage: &'static str) -> Self {
        Self {
            value,
            completion: Completion::Cancelled { stage },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completion == Completion::Complete
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            completion: self.completion,
        }
    }

    /// Discard partial output and turn a cancellation into an error
    pub fn into_result(self) -> Result<T, EngineError> {
        match self.completion {
            Completion::Complete => Ok(self.value),
            Completion::Cancelled { stage } => Err(EngineError::Cancelled { stage }),
        }
    }
}
