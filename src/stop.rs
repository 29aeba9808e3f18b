//! Stop reasons for the whole controller and for each context.
//!
//! Global reasons are set by any worker and stay set until the controller is
//! reset: the first one recorded wins. Context reasons come in two flavours.
//! Budget reasons (model, lap and subproblem budgets) and an explicit user
//! stop are sticky until the matching counter reset or a restart. The others
//! (opportunistic success, empty queue, all points evaluated) only describe the
//! last run and are cleared when the next run starts.

use std::fmt;

use parking_lot::Mutex;

/// Behaviour shared by stop-reason enums.
pub trait StopKind: Copy + Eq + fmt::Debug + fmt::Display {
    const STARTED: Self;

    /// A sticky reason cannot be overwritten by another one.
    fn is_sticky(self) -> bool;
}

/// Reasons that stop every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalStopType {
    Started,
    MaxBbEvalReached,
    /// Surrogate evaluation budget, when the surrogate drives the optimization.
    MaxSurrogateEvalReached,
    /// Evaluations sent plus cache hits.
    MaxEvalReached,
    MaxBlockEvalReached,
    /// Requested by the stop-check callback.
    CustomGlobalStop,
    /// A worker hit an unrecoverable error.
    FatalError,
}

impl GlobalStopType {
    /// Budget reasons, as opposed to requested stops.
    pub fn is_budget(self) -> bool {
        matches!(
            self,
            Self::MaxBbEvalReached
                | Self::MaxSurrogateEvalReached
                | Self::MaxEvalReached
                | Self::MaxBlockEvalReached
        )
    }
}

impl StopKind for GlobalStopType {
    const STARTED: Self = GlobalStopType::Started;

    fn is_sticky(self) -> bool {
        self != Self::Started
    }
}

impl fmt::Display for GlobalStopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "Started",
            Self::MaxBbEvalReached => "Maximum number of blackbox evaluations",
            Self::MaxSurrogateEvalReached => "Maximum number of surrogate evaluations",
            Self::MaxEvalReached => "Maximum number of total evaluations",
            Self::MaxBlockEvalReached => "Maximum number of block evaluations",
            Self::CustomGlobalStop => "Stop requested by user callback",
            Self::FatalError => "Fatal error during evaluation",
        };
        f.write_str(s)
    }
}

/// Reasons that stop one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextStopType {
    Started,
    OpportunisticSuccess,
    CustomOpportunisticEvalStop,
    CustomOpportunisticIterStop,
    EmptyListOfPoints,
    AllPointsEvaluated,
    MaxModelEvalReached,
    LapMaxBbEvalReached,
    SubproblemMaxBbEvalReached,
    /// Stopped with `EvalController::stop`.
    UserStopped,
}

impl ContextStopType {
    /// Opportunistic reasons, default or requested by a callback.
    pub fn is_opportunistic(self) -> bool {
        matches!(
            self,
            Self::OpportunisticSuccess
                | Self::CustomOpportunisticEvalStop
                | Self::CustomOpportunisticIterStop
        )
    }

    pub fn is_step_budget(self) -> bool {
        matches!(
            self,
            Self::MaxModelEvalReached | Self::LapMaxBbEvalReached | Self::SubproblemMaxBbEvalReached
        )
    }
}

impl StopKind for ContextStopType {
    const STARTED: Self = ContextStopType::Started;

    fn is_sticky(self) -> bool {
        self.is_step_budget() || self == Self::UserStopped
    }
}

impl fmt::Display for ContextStopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "Started",
            Self::OpportunisticSuccess => "Success found and opportunistic strategy maybe used",
            Self::CustomOpportunisticEvalStop => "Opportunistic stop from custom callback",
            Self::CustomOpportunisticIterStop => "Iteration stop from custom callback",
            Self::EmptyListOfPoints => "Tried to evaluate an empty list",
            Self::AllPointsEvaluated => "No more points to evaluate",
            Self::MaxModelEvalReached => "Maximum number of model evaluations",
            Self::LapMaxBbEvalReached => "Maximum number of blackbox evaluations for a sub algorithm run (lap)",
            Self::SubproblemMaxBbEvalReached => "Maximum number of blackbox evaluations for a subproblem",
            Self::UserStopped => "Stopped by user",
        };
        f.write_str(s)
    }
}

/// Thread-safe holder of one stop reason.
#[derive(Debug)]
pub struct StopReason<T: StopKind> {
    reason: Mutex<T>,
}

impl<T: StopKind> Default for StopReason<T> {
    fn default() -> Self {
        Self {
            reason: Mutex::new(T::STARTED),
        }
    }
}

impl<T: StopKind> StopReason<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> T {
        *self.reason.lock()
    }

    pub fn test_if(&self, reason: T) -> bool {
        self.get() == reason
    }

    /// True for any reason other than `STARTED`.
    pub fn check_terminate(&self) -> bool {
        self.get() != T::STARTED
    }

    /// Records `reason` unless a sticky reason is already set.
    /// Returns true if the stored reason is `reason` afterwards.
    pub fn set(&self, reason: T) -> bool {
        let mut cur = self.reason.lock();
        if *cur == reason {
            return true;
        }
        if cur.is_sticky() {
            return false;
        }
        *cur = reason;
        true
    }

    /// Clears `reason` if it is the stored one.
    pub fn clear(&self, reason: T) {
        let mut cur = self.reason.lock();
        if *cur == reason {
            *cur = T::STARTED;
        }
    }

    /// Back to `STARTED` unless a sticky reason is set.
    pub fn reset_transient(&self) {
        let mut cur = self.reason.lock();
        if !cur.is_sticky() {
            *cur = T::STARTED;
        }
    }

    /// Unconditionally back to `STARTED`.
    pub fn reset(&self) {
        *self.reason.lock() = T::STARTED;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_first_reason_wins() {
        let s = StopReason::<GlobalStopType>::new();
        assert!(!s.check_terminate());
        assert!(s.set(GlobalStopType::MaxBbEvalReached));
        assert!(!s.set(GlobalStopType::MaxEvalReached));
        assert!(s.set(GlobalStopType::MaxBbEvalReached), "setting again is idempotent");
        assert_eq!(s.get(), GlobalStopType::MaxBbEvalReached);
        s.reset();
        assert_eq!(s.get(), GlobalStopType::Started);
    }

    #[test]
    fn test_context_budget_is_sticky() {
        let s = StopReason::<ContextStopType>::new();
        s.set(ContextStopType::LapMaxBbEvalReached);
        assert!(!s.set(ContextStopType::AllPointsEvaluated));
        s.reset_transient();
        assert_eq!(s.get(), ContextStopType::LapMaxBbEvalReached);
        s.clear(ContextStopType::MaxModelEvalReached);
        assert_eq!(s.get(), ContextStopType::LapMaxBbEvalReached, "clearing another reason is a no-op");
        s.clear(ContextStopType::LapMaxBbEvalReached);
        assert_eq!(s.get(), ContextStopType::Started);
    }

    #[test]
    fn test_context_transient_reasons() {
        let s = StopReason::<ContextStopType>::new();
        s.set(ContextStopType::EmptyListOfPoints);
        assert!(s.set(ContextStopType::AllPointsEvaluated));
        assert!(s.set(ContextStopType::MaxModelEvalReached), "budget overrides transient");
        let s = StopReason::<ContextStopType>::new();
        s.set(ContextStopType::OpportunisticSuccess);
        s.reset_transient();
        assert!(!s.check_terminate());
    }

    #[test]
    fn test_classification() {
        assert!(ContextStopType::CustomOpportunisticIterStop.is_opportunistic());
        assert!(!ContextStopType::AllPointsEvaluated.is_opportunistic());
        assert!(GlobalStopType::MaxBlockEvalReached.is_budget());
        assert!(!GlobalStopType::CustomGlobalStop.is_budget());
    }
}
