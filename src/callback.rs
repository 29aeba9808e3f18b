//! User callbacks invoked by the dispatcher.
//!
//! | Callback | When | Effect |
//! |---|---|---|
//! | `eval_update` | after each point is evaluated and classified | observation only |
//! | `opportunistic_check` | after each point, replaces default opportunism | stops the context |
//! | `stop_check` | after each blackbox point | `true` sets a global custom stop |
//! | `fail_check` | after a blackbox evaluation that did not end OK | may repair the outputs |

use std::sync::Arc;

use crate::point::CandidatePoint;
use crate::queue::QueuedRequest;
use crate::types::EvalType;

/// Decision of a custom opportunistic check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpportunisticSignal {
    #[default]
    Continue,
    /// Stop evaluating this context's queued points.
    EvalStop,
    /// Stop evaluating and end the current iteration.
    IterStop,
}

pub type EvalUpdateFn = Arc<dyn Fn(&QueuedRequest) + Send + Sync>;

pub type OpportunisticCheckFn = Arc<dyn Fn(&QueuedRequest) -> OpportunisticSignal + Send + Sync>;

pub type StopCheckFn = Arc<dyn Fn(&QueuedRequest) -> bool + Send + Sync>;

/// Returns replacement outputs for a point whose evaluation failed.
pub type FailCheckFn = Arc<dyn Fn(&CandidatePoint, EvalType) -> Option<Vec<f64>> + Send + Sync>;

/// Callbacks registered on a controller.
#[derive(Clone, Default)]
pub struct EvalCallbacks {
    pub eval_update: Option<EvalUpdateFn>,
    pub opportunistic_check: Option<OpportunisticCheckFn>,
    pub stop_check: Option<StopCheckFn>,
    pub fail_check: Option<FailCheckFn>,
}

impl EvalCallbacks {
    pub fn with_eval_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&QueuedRequest) + Send + Sync + 'static,
    {
        self.eval_update = Some(Arc::new(f));
        self
    }

    pub fn with_opportunistic_check<F>(mut self, f: F) -> Self
    where
        F: Fn(&QueuedRequest) -> OpportunisticSignal + Send + Sync + 'static,
    {
        self.opportunistic_check = Some(Arc::new(f));
        self
    }

    pub fn with_stop_check<F>(mut self, f: F) -> Self
    where
        F: Fn(&QueuedRequest) -> bool + Send + Sync + 'static,
    {
        self.stop_check = Some(Arc::new(f));
        self
    }

    pub fn with_fail_check<F>(mut self, f: F) -> Self
    where
        F: Fn(&CandidatePoint, EvalType) -> Option<Vec<f64>> + Send + Sync + 'static,
    {
        self.fail_check = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for EvalCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalCallbacks")
            .field("eval_update", &self.eval_update.is_some())
            .field("opportunistic_check", &self.opportunistic_check.is_some())
            .field("stop_check", &self.stop_check.is_some())
            .field("fail_check", &self.fail_check.is_some())
            .finish()
    }
}
