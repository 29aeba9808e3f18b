//! Candidate points and their per-kind evaluation records.
//!
//! Coordinates are immutable once a point is created. Each evaluator kind owns
//! an [`EvalRecord`] behind its own lock, so a blackbox evaluation and a model
//! evaluation of the same point never contend. Two points with equal
//! coordinates are the same logical point for dedup and caching, even though
//! their tags differ.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::context::ContextId;
use crate::error::{EvalError, Result};
use crate::status::EvalStatus;
use crate::types::{BbOutputType, EvalType, StepType};

static NEXT_TAG: AtomicU64 = AtomicU64::new(0);

/// Mesh and frame sizes at the time a point was generated.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshDescriptor {
    pub mesh_size: Vec<f64>,
    pub frame_size: Vec<f64>,
}

/// Where a point comes from.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    /// Context that generated the point.
    pub context: Option<ContextId>,
    pub step: StepType,
    /// Tag of the frame center the point was generated from.
    pub parent_tag: Option<u64>,
    /// Direction from the frame center, used for ordering.
    pub direction: Option<Vec<f64>>,
    pub mesh: Option<MeshDescriptor>,
}

/// Result of one evaluator kind on one point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalRecord {
    pub status: EvalStatus,
    pub outputs: Vec<f64>,
    /// Objective, undefined until an OK evaluation provides one.
    pub f: Option<f64>,
    /// Aggregated constraint violation.
    pub h: Option<f64>,
}

impl EvalRecord {
    pub fn is_feasible(&self) -> Option<bool> {
        self.h.map(|h| h == 0.0)
    }
}

/// Hashable identity of a coordinate vector (`-0.0` and `0.0` collapse).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordKey(Vec<u64>);

impl CoordKey {
    pub fn new(coords: &[f64]) -> Self {
        CoordKey(
            coords
                .iter()
                .map(|&x| if x == 0.0 { 0u64 } else { x.to_bits() })
                .collect(),
        )
    }
}

/// Computes `(f, h)` from raw outputs.
///
/// `f` is the first objective output. `h` is the sum of squared positive
/// progressive-barrier violations, `+inf` if an extreme-barrier constraint is
/// violated, and undefined if any constraint output is NaN.
pub fn aggregate_outputs(outputs: &[f64], types: &[BbOutputType]) -> (Option<f64>, Option<f64>) {
    let mut f = None;
    let mut h = 0.0;
    let mut h_defined = true;
    for (&v, &t) in outputs.iter().zip(types) {
        match t {
            BbOutputType::Obj => {
                if f.is_none() && !v.is_nan() {
                    f = Some(v);
                }
            }
            BbOutputType::Pb | BbOutputType::Eb if v.is_nan() => h_defined = false,
            BbOutputType::Pb => {
                if v > 0.0 {
                    h += v * v;
                }
            }
            BbOutputType::Eb => {
                if v > 0.0 {
                    h = f64::INFINITY;
                }
            }
            BbOutputType::Extra => {}
        }
    }
    (f, if h_defined { Some(h) } else { None })
}

/// A trial point proposed by an algorithm step.
#[derive(Debug)]
pub struct CandidatePoint {
    coords: Vec<f64>,
    tag: u64,
    provenance: Provenance,
    records: [Mutex<EvalRecord>; 3],
    bb_eval_count: AtomicUsize,
}

impl CandidatePoint {
    pub fn new(coords: Vec<f64>) -> Self {
        Self::with_provenance(coords, Provenance::default())
    }

    pub fn with_provenance(coords: Vec<f64>, provenance: Provenance) -> Self {
        Self {
            coords,
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            provenance,
            records: Default::default(),
            bb_eval_count: AtomicUsize::new(0),
        }
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn dimension(&self) -> usize {
        self.coords.len()
    }

    /// Globally unique, increasing in creation order.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn direction(&self) -> Option<&[f64]> {
        self.provenance.direction.as_deref()
    }

    pub fn key(&self) -> CoordKey {
        CoordKey::new(&self.coords)
    }

    pub fn same_coords(&self, other: &CandidatePoint) -> bool {
        self.key() == other.key()
    }

    /// Non-empty with every coordinate finite.
    pub fn is_complete(&self) -> bool {
        !self.coords.is_empty() && self.coords.iter().all(|x| x.is_finite())
    }

    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(EvalError::InvalidPoint(format!(
                "point #{} has undefined coordinates {:?}",
                self.tag, self.coords
            )))
        }
    }

    // ── Evaluation records ──────────────────────────────────────────────────

    /// Snapshot of the record for `eval_type`.
    pub fn record(&self, eval_type: EvalType) -> EvalRecord {
        self.records[eval_type.index()].lock().clone()
    }

    pub fn status(&self, eval_type: EvalType) -> EvalStatus {
        self.records[eval_type.index()].lock().status
    }

    pub fn f(&self, eval_type: EvalType) -> Option<f64> {
        self.records[eval_type.index()].lock().f
    }

    pub fn h(&self, eval_type: EvalType) -> Option<f64> {
        self.records[eval_type.index()].lock().h
    }

    pub fn is_feasible(&self, eval_type: EvalType) -> Option<bool> {
        self.records[eval_type.index()].lock().is_feasible()
    }

    /// OK status with both `f` and `h` defined.
    pub fn is_eval_ok(&self, eval_type: EvalType) -> bool {
        let rec = self.records[eval_type.index()].lock();
        rec.status == EvalStatus::Ok && rec.f.is_some() && rec.h.is_some()
    }

    /// Moves the status along a legal transition.
    pub fn set_status(&self, eval_type: EvalType, to: EvalStatus) -> Result<()> {
        let mut rec = self.records[eval_type.index()].lock();
        if rec.status != to && !rec.status.can_transition_to(to) {
            return Err(EvalError::InvalidTransition {
                tag: self.tag,
                from: rec.status,
                to,
            });
        }
        rec.status = to;
        Ok(())
    }

    /// Stores evaluator outputs and the resulting status.
    pub fn set_outputs(
        &self,
        eval_type: EvalType,
        outputs: Vec<f64>,
        status: EvalStatus,
        types: &[BbOutputType],
    ) -> Result<()> {
        let (f, h) = aggregate_outputs(&outputs, types);
        let mut rec = self.records[eval_type.index()].lock();
        if rec.status != status && !rec.status.can_transition_to(status) {
            return Err(EvalError::InvalidTransition {
                tag: self.tag,
                from: rec.status,
                to: status,
            });
        }
        *rec = EvalRecord {
            status,
            outputs,
            f,
            h,
        };
        Ok(())
    }

    /// Takes over a resolved record, typically from the cached twin.
    pub fn adopt_record(&self, eval_type: EvalType, record: EvalRecord) -> Result<()> {
        let mut rec = self.records[eval_type.index()].lock();
        if rec.status != record.status && !rec.status.can_transition_to(record.status) {
            return Err(EvalError::InvalidTransition {
                tag: self.tag,
                from: rec.status,
                to: record.status,
            });
        }
        *rec = record;
        Ok(())
    }

    /// Number of times this point was sent to the blackbox.
    pub fn bb_eval_count(&self) -> usize {
        self.bb_eval_count.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_bb_eval_count(&self) {
        self.bb_eval_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TYPES: [BbOutputType; 4] = [
        BbOutputType::Obj,
        BbOutputType::Pb,
        BbOutputType::Pb,
        BbOutputType::Extra,
    ];

    #[test]
    fn test_tags_are_unique_and_increasing() {
        let a = CandidatePoint::new(vec![1.0]);
        let b = CandidatePoint::new(vec![1.0]);
        assert!(b.tag() > a.tag());
        assert!(a.same_coords(&b), "same coordinates, different tags");
    }

    #[test]
    fn test_signed_zero_is_same_point() {
        assert_eq!(CoordKey::new(&[0.0, 1.0]), CoordKey::new(&[-0.0, 1.0]));
        assert_ne!(CoordKey::new(&[0.0, 1.0]), CoordKey::new(&[1.0, 0.0]));
    }

    #[test]
    fn test_completeness() {
        assert!(CandidatePoint::new(vec![0.0, 2.0]).is_complete());
        assert!(!CandidatePoint::new(vec![]).is_complete());
        assert!(!CandidatePoint::new(vec![f64::NAN]).is_complete());
        assert!(CandidatePoint::new(vec![f64::INFINITY]).ensure_complete().is_err());
    }

    #[test]
    fn test_aggregate_feasible() {
        let (f, h) = aggregate_outputs(&[3.5, -1.0, 0.0, 99.0], &TYPES);
        assert_eq!(f, Some(3.5));
        assert_eq!(h, Some(0.0));
    }

    #[test]
    fn test_aggregate_pb_violation() {
        let (_, h) = aggregate_outputs(&[1.0, 2.0, 3.0, 0.0], &TYPES);
        assert_eq!(h, Some(13.0));
    }

    #[test]
    fn test_aggregate_eb_and_nan() {
        let types = [BbOutputType::Obj, BbOutputType::Eb];
        assert_eq!(aggregate_outputs(&[1.0, 0.5], &types).1, Some(f64::INFINITY));
        assert_eq!(aggregate_outputs(&[1.0, f64::NAN], &types).1, None);
        assert_eq!(aggregate_outputs(&[f64::NAN, -1.0], &types).0, None);
    }

    #[test]
    fn test_status_transitions_enforced() {
        let p = CandidatePoint::new(vec![1.0, 2.0]);
        assert!(p.set_status(EvalType::Blackbox, EvalStatus::Ok).is_err());
        p.set_status(EvalType::Blackbox, EvalStatus::InProgress).unwrap();
        p.set_outputs(EvalType::Blackbox, vec![1.0, -1.0, -1.0, 0.0], EvalStatus::Ok, &TYPES)
            .unwrap();
        assert!(p.is_eval_ok(EvalType::Blackbox));
        assert_eq!(p.is_feasible(EvalType::Blackbox), Some(true));
        // Records are independent per kind.
        assert_eq!(p.status(EvalType::Model), EvalStatus::NotStarted);
    }

    #[test]
    fn test_adopt_record_from_twin() {
        let twin = CandidatePoint::new(vec![4.0]);
        twin.set_status(EvalType::Blackbox, EvalStatus::InProgress).unwrap();
        twin.set_outputs(EvalType::Blackbox, vec![2.0], EvalStatus::Ok, &[BbOutputType::Obj])
            .unwrap();

        let p = CandidatePoint::new(vec![4.0]);
        p.set_status(EvalType::Blackbox, EvalStatus::Wait).unwrap();
        p.adopt_record(EvalType::Blackbox, twin.record(EvalType::Blackbox)).unwrap();
        assert_eq!(p.f(EvalType::Blackbox), Some(2.0));
        assert_eq!(p.bb_eval_count(), 0, "adopting a result is not an evaluation");
    }
}
