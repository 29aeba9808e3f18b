//! Evaluation counters owned by one controller.
//!
//! All counters are atomics: workers bump them concurrently and stop
//! predicates read them without locking. They only move forward, except
//! through an explicit reset.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::types::{StepType, SuccessType};

/// Controller-wide counters.
#[derive(Debug, Default)]
pub struct GlobalCounters {
    bb_eval: AtomicUsize,
    feas_bb_eval: AtomicUsize,
    inf_bb_eval: AtomicUsize,
    bb_eval_not_ok: AtomicUsize,
    surrogate_eval: AtomicUsize,
    total_model_eval: AtomicUsize,
    block_eval: AtomicUsize,
    eval_sent: AtomicUsize,
    nb_relative_success: AtomicUsize,
    index_success_block_eval: AtomicUsize,
    index_best_feas_eval: AtomicUsize,
    index_best_inf_eval: AtomicUsize,
}

/// Feasibility of a blackbox outcome, for the counter split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BbOutcomeKind {
    Feasible,
    Infeasible,
    NotOk,
}

impl GlobalCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bb_eval(&self) -> usize {
        self.bb_eval.load(Ordering::Acquire)
    }

    pub fn feas_bb_eval(&self) -> usize {
        self.feas_bb_eval.load(Ordering::Acquire)
    }

    pub fn inf_bb_eval(&self) -> usize {
        self.inf_bb_eval.load(Ordering::Acquire)
    }

    pub fn bb_eval_not_ok(&self) -> usize {
        self.bb_eval_not_ok.load(Ordering::Acquire)
    }

    pub fn surrogate_eval(&self) -> usize {
        self.surrogate_eval.load(Ordering::Acquire)
    }

    pub fn total_model_eval(&self) -> usize {
        self.total_model_eval.load(Ordering::Acquire)
    }

    pub fn block_eval(&self) -> usize {
        self.block_eval.load(Ordering::Acquire)
    }

    /// Evaluations sent to the blackbox (surrogate ones at their cost).
    pub fn eval_sent(&self) -> usize {
        self.eval_sent.load(Ordering::Acquire)
    }

    pub fn nb_relative_success(&self) -> usize {
        self.nb_relative_success.load(Ordering::Acquire)
    }

    /// Block evaluation index of the last relative success.
    pub fn index_success_block_eval(&self) -> usize {
        self.index_success_block_eval.load(Ordering::Acquire)
    }

    /// Blackbox evaluation index of the last new best feasible point.
    pub fn index_best_feas_eval(&self) -> usize {
        self.index_best_feas_eval.load(Ordering::Acquire)
    }

    /// Blackbox evaluation index of the last new best infeasible point.
    pub fn index_best_inf_eval(&self) -> usize {
        self.index_best_inf_eval.load(Ordering::Acquire)
    }

    /// Accounts for one blackbox dispatch.
    pub fn add_bb_eval(&self, count_eval: bool, kind: BbOutcomeKind) {
        if count_eval {
            self.bb_eval.fetch_add(1, Ordering::AcqRel);
        }
        match kind {
            BbOutcomeKind::Feasible => self.feas_bb_eval.fetch_add(1, Ordering::AcqRel),
            BbOutcomeKind::Infeasible => self.inf_bb_eval.fetch_add(1, Ordering::AcqRel),
            BbOutcomeKind::NotOk => self.bb_eval_not_ok.fetch_add(1, Ordering::AcqRel),
        };
        self.eval_sent.fetch_add(1, Ordering::AcqRel);
    }

    /// Accounts for one counted surrogate evaluation. Every `cost`-th one also
    /// costs a blackbox evaluation; returns true when that happened.
    pub fn add_surrogate_eval(&self, cost: usize) -> bool {
        let n = self.surrogate_eval.fetch_add(1, Ordering::AcqRel) + 1;
        if cost > 0 && n % cost == 0 {
            self.bb_eval.fetch_add(1, Ordering::AcqRel);
            self.eval_sent.fetch_add(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    pub fn add_model_eval(&self) {
        self.total_model_eval.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the new block count.
    pub fn add_block_eval(&self) -> usize {
        self.block_eval.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Records that a point became its context's best incumbent.
    pub fn add_relative_success(&self, feasible: bool) {
        self.nb_relative_success.fetch_add(1, Ordering::AcqRel);
        self.index_success_block_eval
            .store(self.block_eval(), Ordering::Release);
        let idx = if feasible {
            &self.index_best_feas_eval
        } else {
            &self.index_best_inf_eval
        };
        idx.store(self.bb_eval(), Ordering::Release);
    }

    pub fn set_eval_sent(&self, n: usize) {
        self.eval_sent.store(n, Ordering::Release);
    }

    pub fn set_bb_eval(&self, n: usize) {
        self.bb_eval.store(n, Ordering::Release);
    }

    pub fn reset(&self) {
        for c in [
            &self.bb_eval,
            &self.feas_bb_eval,
            &self.inf_bb_eval,
            &self.bb_eval_not_ok,
            &self.surrogate_eval,
            &self.total_model_eval,
            &self.block_eval,
            &self.eval_sent,
            &self.nb_relative_success,
            &self.index_success_block_eval,
            &self.index_best_feas_eval,
            &self.index_best_inf_eval,
        ] {
            c.store(0, Ordering::Release);
        }
    }
}

/// Number of outcomes per generating step and success type.
#[derive(Debug, Default)]
pub struct SuccessStats {
    counts: Mutex<HashMap<(StepType, SuccessType), usize>>,
}

impl SuccessStats {
    pub fn update(&self, step: StepType, success: SuccessType) {
        *self.counts.lock().entry((step, success)).or_insert(0) += 1;
    }

    pub fn get(&self, step: StepType, success: SuccessType) -> usize {
        self.counts.lock().get(&(step, success)).copied().unwrap_or(0)
    }

    /// Successes (partial or full) over every step.
    pub fn total_successes(&self) -> usize {
        self.counts
            .lock()
            .iter()
            .filter(|((_, s), _)| s.is_success())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn reset(&self) {
        self.counts.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bb_split() {
        let c = GlobalCounters::new();
        c.add_bb_eval(true, BbOutcomeKind::Feasible);
        c.add_bb_eval(true, BbOutcomeKind::Infeasible);
        c.add_bb_eval(false, BbOutcomeKind::NotOk);
        assert_eq!(c.bb_eval(), 2, "uncounted dispatch does not consume budget");
        assert_eq!(c.eval_sent(), 3);
        assert_eq!(
            (c.feas_bb_eval(), c.inf_bb_eval(), c.bb_eval_not_ok()),
            (1, 1, 1)
        );
    }

    #[test]
    fn test_surrogate_cost_amortization() {
        let c = GlobalCounters::new();
        let charged = (0..250).filter(|_| c.add_surrogate_eval(100)).count();
        assert_eq!(charged, 2);
        assert_eq!(c.surrogate_eval(), 250);
        assert_eq!(c.bb_eval(), 2);
        assert_eq!(c.eval_sent(), 2);
    }

    #[test]
    fn test_surrogate_cost_concurrent_is_exact() {
        let c = GlobalCounters::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..125 {
                        c.add_surrogate_eval(10);
                    }
                });
            }
        });
        assert_eq!(c.surrogate_eval(), 1000);
        assert_eq!(c.bb_eval(), 100);
    }

    #[test]
    fn test_relative_success_indexes() {
        let c = GlobalCounters::new();
        c.add_bb_eval(true, BbOutcomeKind::Feasible);
        c.add_block_eval();
        c.add_relative_success(true);
        assert_eq!(c.nb_relative_success(), 1);
        assert_eq!(c.index_best_feas_eval(), 1);
        assert_eq!(c.index_success_block_eval(), 1);
        c.reset();
        assert_eq!(c.nb_relative_success(), 0);
        assert_eq!(c.bb_eval(), 0);
    }

    #[test]
    fn test_success_stats() {
        let s = SuccessStats::default();
        s.update(StepType::Poll, SuccessType::FullSuccess);
        s.update(StepType::Poll, SuccessType::Unsuccessful);
        s.update(StepType::ModelSearch, SuccessType::PartialSuccess);
        assert_eq!(s.get(StepType::Poll, SuccessType::FullSuccess), 1);
        assert_eq!(s.total_successes(), 2);
        s.reset();
        assert_eq!(s.total_successes(), 0);
    }
}
