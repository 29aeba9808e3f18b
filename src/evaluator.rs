//! Evaluator seam and a closure-backed implementation.
//!
//! An [`Evaluator`] turns a block of candidate points into one
//! [`EvalOutcome`] per point. The controller calls it outside every queue
//! lock, so an implementation is free to block or to spread the work over
//! threads. [`FnEvaluator`] does the latter with rayon when the block is big
//! enough to pay for it.

use std::sync::Arc;

use rayon::prelude::*;

use crate::error::BoxError;
use crate::point::CandidatePoint;
use crate::status::EvalStatus;
use crate::types::{BbOutputType, EvalType};

/// Outcome of evaluating a single point.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub outputs: Vec<f64>,
    /// One of OK, FAILED, ERROR, USER_REJECTED.
    pub status: EvalStatus,
    /// Whether this evaluation counts toward the evaluation budget.
    pub count_eval: bool,
}

impl EvalOutcome {
    pub fn ok(outputs: Vec<f64>) -> Self {
        Self {
            outputs,
            status: EvalStatus::Ok,
            count_eval: true,
        }
    }

    pub fn failed(outputs: Vec<f64>) -> Self {
        Self {
            outputs,
            status: EvalStatus::Failed,
            count_eval: true,
        }
    }

    /// The evaluator refused the point; nothing was spent.
    pub fn rejected() -> Self {
        Self {
            outputs: Vec::new(),
            status: EvalStatus::UserRejected,
            count_eval: false,
        }
    }

    pub fn error() -> Self {
        Self {
            outputs: Vec::new(),
            status: EvalStatus::Error,
            count_eval: false,
        }
    }

    pub fn uncounted(mut self) -> Self {
        self.count_eval = false;
        self
    }
}

/// Something that evaluates blocks of points.
pub trait Evaluator: Send + Sync {
    fn eval_type(&self) -> EvalType;

    /// Meaning of each output, in order.
    fn output_types(&self) -> &[BbOutputType];

    /// Evaluates `block`. Must return exactly one outcome per point, in order.
    /// `h_max` is the constraint threshold of the requesting context.
    fn evaluate_block(
        &self,
        block: &[Arc<CandidatePoint>],
        h_max: f64,
    ) -> std::result::Result<Vec<EvalOutcome>, BoxError>;
}

/// Whether two evaluator handles designate the same instance.
pub fn same_evaluator(a: &Arc<dyn Evaluator>, b: &Arc<dyn Evaluator>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Evaluator backed by a per-point closure.
pub struct FnEvaluator<F> {
    eval_type: EvalType,
    output_types: Vec<BbOutputType>,
    func: F,
    /// Evaluate blocks in parallel with rayon.
    pub parallel: bool,
    /// Below this block size the serial path is used even if `parallel` is set.
    /// Default: 4.
    pub min_parallel_evals: usize,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&[f64]) -> EvalOutcome + Send + Sync,
{
    pub fn new(eval_type: EvalType, output_types: Vec<BbOutputType>, func: F) -> Self {
        Self {
            eval_type,
            output_types,
            func,
            parallel: false,
            min_parallel_evals: 4,
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&[f64]) -> EvalOutcome + Send + Sync,
{
    fn eval_type(&self) -> EvalType {
        self.eval_type
    }

    fn output_types(&self) -> &[BbOutputType] {
        &self.output_types
    }

    fn evaluate_block(
        &self,
        block: &[Arc<CandidatePoint>],
        _h_max: f64,
    ) -> std::result::Result<Vec<EvalOutcome>, BoxError> {
        if self.parallel && block.len() >= self.min_parallel_evals.max(2) {
            Ok(block.par_iter().map(|p| (self.func)(p.coords())).collect())
        } else {
            Ok(block.iter().map(|p| (self.func)(p.coords())).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sphere(x: &[f64]) -> EvalOutcome {
        EvalOutcome::ok(vec![x.iter().map(|xi| xi * xi).sum()])
    }

    fn block(n: usize) -> Vec<Arc<CandidatePoint>> {
        (0..n)
            .map(|i| Arc::new(CandidatePoint::new(vec![i as f64, 1.0])))
            .collect()
    }

    #[test]
    fn test_serial_block_order() {
        let ev = FnEvaluator::new(EvalType::Blackbox, vec![BbOutputType::Obj], sphere);
        let out = ev.evaluate_block(&block(3), f64::INFINITY).unwrap();
        let fs: Vec<f64> = out.iter().map(|o| o.outputs[0]).collect();
        assert_eq!(fs, vec![1.0, 2.0, 5.0]);
    }

    #[test]
    fn test_parallel_vs_serial_block() {
        let serial = FnEvaluator::new(EvalType::Blackbox, vec![BbOutputType::Obj], sphere);
        let parallel =
            FnEvaluator::new(EvalType::Blackbox, vec![BbOutputType::Obj], sphere).parallel(true);
        let pts = block(16);
        assert_eq!(
            serial.evaluate_block(&pts, f64::INFINITY).unwrap(),
            parallel.evaluate_block(&pts, f64::INFINITY).unwrap(),
            "parallel evaluation must preserve order"
        );
    }

    #[test]
    fn test_every_point_evaluated_once() {
        let calls = AtomicUsize::new(0);
        let ev = FnEvaluator::new(EvalType::Surrogate, vec![BbOutputType::Obj], |x: &[f64]| {
            calls.fetch_add(1, Ordering::Relaxed);
            sphere(x)
        })
        .parallel(true);
        ev.evaluate_block(&block(9), f64::INFINITY).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn test_same_evaluator_identity() {
        let a: Arc<dyn Evaluator> =
            Arc::new(FnEvaluator::new(EvalType::Blackbox, vec![BbOutputType::Obj], sphere));
        let b: Arc<dyn Evaluator> =
            Arc::new(FnEvaluator::new(EvalType::Blackbox, vec![BbOutputType::Obj], sphere));
        assert!(same_evaluator(&a, &Arc::clone(&a)));
        assert!(!same_evaluator(&a, &b));
    }
}
