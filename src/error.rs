//! Error types for the evaluation controller.
//!
//! Configuration mistakes and evaluator breakdowns are fatal and surface as
//! [`EvalError`]. Refused submissions (duplicates, points already in flight)
//! are not errors: `submit` reports them as `Ok(false)`. Per-point failures are
//! recorded on the point itself as an [`EvalStatus`](crate::status::EvalStatus).

use thiserror::Error;

use crate::context::ContextId;
use crate::types::EvalType;

/// Boxed error returned by user-supplied evaluators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while controlling evaluations.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Unknown context {0}")]
    UnknownContext(ContextId),

    #[error("No {eval_type} evaluator registered for context {context}")]
    NoEvaluator {
        context: ContextId,
        eval_type: EvalType,
    },

    #[error("Context {0} still has evaluations running")]
    ContextBusy(ContextId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Invalid point: {0}")]
    InvalidPoint(String),

    #[error("{eval_type} evaluator failed: {source}")]
    Evaluator {
        eval_type: EvalType,
        #[source]
        source: BoxError,
    },

    #[error("Evaluator returned {got} outcomes for a block of {expected} points")]
    OutcomeCount { expected: usize, got: usize },

    #[error("Point #{0} is not in the cache")]
    PointNotInCache(u64),

    #[error("Cache update failed for point #{0}")]
    CacheUpdate(u64),

    #[error("Invalid status transition for point #{tag}: {from} -> {to}")]
    InvalidTransition {
        tag: u64,
        from: crate::status::EvalStatus,
        to: crate::status::EvalStatus,
    },

    #[error("Worker pool error: {0}")]
    ThreadPool(String),
}

/// Result type alias for evaluation-control operations.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = EvalError::NoEvaluator {
            context: ContextId::new(3),
            eval_type: EvalType::Surrogate,
        };
        assert_eq!(
            e.to_string(),
            "No SURROGATE evaluator registered for context #3"
        );

        let e = EvalError::OutcomeCount { expected: 4, got: 2 };
        assert!(e.to_string().contains("2 outcomes"));
    }

    #[test]
    fn test_evaluator_error_keeps_source() {
        let inner: BoxError = "simulation crashed".into();
        let e = EvalError::Evaluator {
            eval_type: EvalType::Blackbox,
            source: inner,
        };
        assert!(std::error::Error::source(&e).is_some());
        assert!(e.to_string().contains("simulation crashed"));
    }
}
