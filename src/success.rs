//! Success classification of an evaluated point against an incumbent.
//!
//! | Candidate | Incumbent | Rule |
//! |---|---|---|
//! | `f` or `h` undefined, `h > hMax`, `h = inf` | any | UNSUCCESSFUL |
//! | admissible | none | FULL |
//! | feasible | feasible | FULL if `f_c < f_i` |
//! | feasible | infeasible | FULL |
//! | infeasible | feasible | UNSUCCESSFUL |
//! | infeasible | infeasible | FULL if it dominates, PARTIAL if `h_c < h_i` but `f_c > f_i` |

use crate::point::CandidatePoint;
use crate::types::{EvalType, SuccessType};

/// Objective and constraint violation of an evaluated point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FhValue {
    pub f: f64,
    pub h: f64,
}

impl FhValue {
    pub fn of(point: &CandidatePoint, eval_type: EvalType) -> Option<Self> {
        let rec = point.record(eval_type);
        Some(FhValue {
            f: rec.f?,
            h: rec.h?,
        })
    }

    pub fn is_feasible(&self) -> bool {
        self.h == 0.0
    }
}

/// Classifies `candidate` against `incumbent` under threshold `h_max`.
pub fn classify(candidate: Option<FhValue>, incumbent: Option<FhValue>, h_max: f64) -> SuccessType {
    let c = match candidate {
        Some(c) if c.h.is_finite() && c.h <= h_max && !c.f.is_nan() => c,
        _ => return SuccessType::Unsuccessful,
    };
    let i = match incumbent {
        None => return SuccessType::FullSuccess,
        Some(i) => i,
    };
    match (c.is_feasible(), i.is_feasible()) {
        (true, true) => {
            if c.f < i.f {
                SuccessType::FullSuccess
            } else {
                SuccessType::Unsuccessful
            }
        }
        (true, false) => SuccessType::FullSuccess,
        (false, true) => SuccessType::Unsuccessful,
        (false, false) => {
            let dominates = c.f <= i.f && c.h <= i.h && (c.f < i.f || c.h < i.h);
            if dominates {
                SuccessType::FullSuccess
            } else if c.h < i.h && c.f > i.f {
                SuccessType::PartialSuccess
            } else {
                SuccessType::Unsuccessful
            }
        }
    }
}

/// Point-level form of [`classify`].
pub fn compute_success_type(
    candidate: &CandidatePoint,
    incumbent: Option<&CandidatePoint>,
    eval_type: EvalType,
    h_max: f64,
) -> SuccessType {
    classify(
        FhValue::of(candidate, eval_type),
        incumbent.and_then(|p| FhValue::of(p, eval_type)),
        h_max,
    )
}

/// Whether a point that reached `success` replaces `incumbent` as best point.
///
/// Replaces when there is no incumbent, on an infeasible to feasible switch,
/// or when the point succeeds against the incumbent with no threshold.
pub fn replaces_incumbent(
    point: &CandidatePoint,
    success: SuccessType,
    incumbent: Option<&CandidatePoint>,
    eval_type: EvalType,
) -> bool {
    if !success.is_success() {
        return false;
    }
    let inc = match incumbent {
        None => return true,
        Some(inc) => inc,
    };
    let (p, i) = match (FhValue::of(point, eval_type), FhValue::of(inc, eval_type)) {
        (Some(p), Some(i)) => (p, i),
        (Some(_), None) => return true,
        _ => return false,
    };
    if p.is_feasible() && !i.is_feasible() {
        return true;
    }
    classify(Some(p), Some(i), f64::INFINITY).is_success()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fh(f: f64, h: f64) -> Option<FhValue> {
        Some(FhValue { f, h })
    }

    #[test]
    fn test_no_incumbent() {
        assert_eq!(classify(fh(5.0, 0.0), None, f64::INFINITY), SuccessType::FullSuccess);
        assert_eq!(classify(fh(5.0, 2.0), None, 1.0), SuccessType::Unsuccessful, "above hMax");
        assert_eq!(classify(None, None, f64::INFINITY), SuccessType::Unsuccessful);
        assert_eq!(
            classify(fh(1.0, f64::INFINITY), None, f64::INFINITY),
            SuccessType::Unsuccessful
        );
    }

    #[test]
    fn test_feasible_comparisons() {
        let inc = fh(1.0, 0.0);
        assert_eq!(classify(fh(0.5, 0.0), inc, f64::INFINITY), SuccessType::FullSuccess);
        assert_eq!(classify(fh(1.0, 0.0), inc, f64::INFINITY), SuccessType::Unsuccessful, "tie");
        assert_eq!(classify(fh(-9.0, 0.1), inc, f64::INFINITY), SuccessType::Unsuccessful);
        assert_eq!(classify(fh(9.0, 0.0), fh(1.0, 0.3), f64::INFINITY), SuccessType::FullSuccess);
    }

    #[test]
    fn test_infeasible_comparisons() {
        let inc = fh(2.0, 1.0);
        assert_eq!(classify(fh(2.0, 0.5), inc, f64::INFINITY), SuccessType::FullSuccess);
        assert_eq!(classify(fh(1.0, 1.0), inc, f64::INFINITY), SuccessType::FullSuccess);
        assert_eq!(classify(fh(3.0, 0.5), inc, f64::INFINITY), SuccessType::PartialSuccess);
        assert_eq!(classify(fh(1.0, 2.0), inc, f64::INFINITY), SuccessType::Unsuccessful);
        assert_eq!(classify(fh(3.0, 0.5), inc, 0.4), SuccessType::Unsuccessful, "hMax applies");
    }
}
