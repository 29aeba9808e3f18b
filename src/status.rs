//! Per-kind evaluation status of a candidate point.
//!
//! Transitions within one dispatch cycle:
//!
//! ```text
//! NOT_STARTED ──► IN_PROGRESS ──► OK | FAILED | ERROR | USER_REJECTED
//!      │
//!      └──────► WAIT ──► (result adopted from the in-progress twin)
//! ```
//!
//! A resolved status may start a new cycle (re-evaluation is allowed). Two
//! repairs are also permitted: OK → FAILED when the outputs break the
//! evaluator's contract, and any other resolved status → OK when a fail-check
//! callback fixes the outputs.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalStatus {
    #[default]
    NotStarted,
    InProgress,
    /// Another dispatch of the same coordinates is in progress.
    Wait,
    Ok,
    Failed,
    /// The evaluator could not run.
    Error,
    /// The evaluator refused the point.
    UserRejected,
}

impl EvalStatus {
    /// True once an evaluation cycle has resolved.
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            Self::Ok | Self::Failed | Self::Error | Self::UserRejected
        )
    }

    /// True while a dispatch of these coordinates is pending.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::InProgress | Self::Wait)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: EvalStatus) -> bool {
        use EvalStatus::*;
        match (self, to) {
            (NotStarted, InProgress) | (NotStarted, Wait) => true,
            (InProgress, t) | (Wait, t) if t.is_resolved() => true,
            (Ok, Failed) | (Failed, Ok) | (Error, Ok) | (UserRejected, Ok) => true,
            (from, InProgress) | (from, Wait) if from.is_resolved() => true,
            _ => false,
        }
    }

    /// Short name used in history output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Wait => "WAIT",
            Self::Ok => "OK",
            Self::Failed => "FAILED",
            Self::Error => "ERROR",
            Self::UserRejected => "USER_REJECTED",
        }
    }
}

impl fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_cycle() {
        use EvalStatus::*;
        assert!(NotStarted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Ok));
        assert!(InProgress.can_transition_to(UserRejected));
        assert!(NotStarted.can_transition_to(Wait));
        assert!(Wait.can_transition_to(Failed));
    }

    #[test]
    fn test_illegal_transitions() {
        use EvalStatus::*;
        assert!(!NotStarted.can_transition_to(Ok), "must pass through IN_PROGRESS");
        assert!(!InProgress.can_transition_to(Wait));
        assert!(!InProgress.can_transition_to(NotStarted));
        assert!(!Ok.can_transition_to(NotStarted));
        assert!(!Error.can_transition_to(Failed));
    }

    #[test]
    fn test_reevaluation_and_repair() {
        use EvalStatus::*;
        assert!(Ok.can_transition_to(InProgress), "cached OK point can be re-evaluated");
        assert!(Failed.can_transition_to(Wait));
        assert!(Ok.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Ok));
        assert!(Error.can_transition_to(Ok), "fail check may repair an errored point");
        assert!(UserRejected.can_transition_to(Ok));
    }

    #[test]
    fn test_classification() {
        for s in [EvalStatus::Ok, EvalStatus::Failed, EvalStatus::Error, EvalStatus::UserRejected] {
            assert!(s.is_resolved(), "{} should be resolved", s);
            assert!(!s.is_in_flight());
        }
        assert!(EvalStatus::Wait.is_in_flight());
        assert!(EvalStatus::InProgress.is_in_flight());
        assert!(!EvalStatus::NotStarted.is_resolved());
    }
}
