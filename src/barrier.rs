//! Barrier seam used to classify points of constrained problems.
//!
//! A context may carry a [`Barrier`]. When present, it decides the success
//! type of evaluated points and provides the `hMax` threshold that makes
//! requests compatible within a block.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::point::CandidatePoint;
use crate::success::{classify, FhValue};
use crate::types::{EvalType, SuccessType};

pub trait Barrier: Send + Sync {
    /// Current constraint-violation threshold.
    fn h_max(&self) -> f64;

    /// Success of `point` against the barrier's incumbents.
    fn classify_success(&self, point: &CandidatePoint, eval_type: EvalType) -> SuccessType;
}

#[derive(Default)]
struct Incumbents {
    feasible: Option<Arc<CandidatePoint>>,
    infeasible: Option<Arc<CandidatePoint>>,
}

/// Progressive barrier keeping one feasible and one infeasible incumbent.
///
/// The algorithm updates the incumbents with [`update_with_point`]; the
/// evaluation controller only reads them.
///
/// [`update_with_point`]: TwoIncumbentBarrier::update_with_point
pub struct TwoIncumbentBarrier {
    h_max: RwLock<f64>,
    incumbents: RwLock<Incumbents>,
}

impl TwoIncumbentBarrier {
    pub fn new(h_max: f64) -> Self {
        Self {
            h_max: RwLock::new(h_max),
            incumbents: RwLock::new(Incumbents::default()),
        }
    }

    pub fn set_h_max(&self, h_max: f64) {
        *self.h_max.write() = h_max;
    }

    pub fn feasible_incumbent(&self) -> Option<Arc<CandidatePoint>> {
        self.incumbents.read().feasible.clone()
    }

    pub fn infeasible_incumbent(&self) -> Option<Arc<CandidatePoint>> {
        self.incumbents.read().infeasible.clone()
    }

    /// Replaces the matching incumbent if `point` improves on it.
    /// Returns true if an incumbent changed.
    pub fn update_with_point(&self, point: &Arc<CandidatePoint>, eval_type: EvalType) -> bool {
        let fh = match FhValue::of(point, eval_type) {
            Some(fh) if fh.h <= self.h_max() => fh,
            _ => return false,
        };
        let mut inc = self.incumbents.write();
        let slot = if fh.is_feasible() {
            &mut inc.feasible
        } else {
            &mut inc.infeasible
        };
        let current = slot.as_ref().and_then(|p| FhValue::of(p, eval_type));
        if classify(Some(fh), current, f64::INFINITY) == SuccessType::FullSuccess {
            *slot = Some(Arc::clone(point));
            true
        } else {
            false
        }
    }
}

impl Barrier for TwoIncumbentBarrier {
    fn h_max(&self) -> f64 {
        *self.h_max.read()
    }

    fn classify_success(&self, point: &CandidatePoint, eval_type: EvalType) -> SuccessType {
        let h_max = self.h_max();
        let candidate = FhValue::of(point, eval_type);
        let inc = self.incumbents.read();
        let feas = inc.feasible.as_ref().and_then(|p| FhValue::of(p, eval_type));
        let infeas = inc.infeasible.as_ref().and_then(|p| FhValue::of(p, eval_type));
        match (feas, infeas) {
            (None, None) => classify(candidate, None, h_max),
            (f, i) => {
                let against_f = f.map(|f| classify(candidate, Some(f), h_max));
                let against_i = i.map(|i| classify(candidate, Some(i), h_max));
                against_f.max(against_i).unwrap_or(SuccessType::Unsuccessful)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::EvalStatus;
    use crate::types::BbOutputType;

    fn evaluated(f: f64, c: f64) -> Arc<CandidatePoint> {
        let p = Arc::new(CandidatePoint::new(vec![f, c]));
        p.set_status(EvalType::Blackbox, EvalStatus::InProgress).unwrap();
        p.set_outputs(
            EvalType::Blackbox,
            vec![f, c],
            EvalStatus::Ok,
            &[BbOutputType::Obj, BbOutputType::Pb],
        )
        .unwrap();
        p
    }

    #[test]
    fn test_empty_barrier_accepts_admissible_points() {
        let b = TwoIncumbentBarrier::new(10.0);
        assert_eq!(
            b.classify_success(&evaluated(1.0, 2.0), EvalType::Blackbox),
            SuccessType::FullSuccess
        );
        assert_eq!(
            b.classify_success(&evaluated(1.0, 4.0), EvalType::Blackbox),
            SuccessType::Unsuccessful,
            "h = 16 > hMax"
        );
    }

    #[test]
    fn test_update_and_classify() {
        let b = TwoIncumbentBarrier::new(f64::INFINITY);
        assert!(b.update_with_point(&evaluated(1.0, -1.0), EvalType::Blackbox));
        assert!(b.update_with_point(&evaluated(0.0, 1.0), EvalType::Blackbox));
        assert!(!b.update_with_point(&evaluated(2.0, -1.0), EvalType::Blackbox));

        assert_eq!(
            b.classify_success(&evaluated(0.5, -1.0), EvalType::Blackbox),
            SuccessType::FullSuccess
        );
        assert_eq!(
            b.classify_success(&evaluated(3.0, 0.5), EvalType::Blackbox),
            SuccessType::PartialSuccess,
            "less violation than infeasible incumbent, worse f"
        );
        assert_eq!(b.feasible_incumbent().and_then(|p| p.f(EvalType::Blackbox)), Some(1.0));
    }
}
