//! Per-context state.
//!
//! A context is one optimization sharing the controller's queue and workers
//! with the others. Its scalar counters are atomics read by every worker; its
//! success type and best incumbent live under one lock so they always change
//! together.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::barrier::Barrier;
use crate::config::ContextConfig;
use crate::evaluator::Evaluator;
use crate::ordering::OrderingPolicy;
use crate::point::CandidatePoint;
use crate::queue::QueuedRequest;
use crate::stop::{ContextStopType, StopReason};
use crate::types::{EvalType, SuccessType};

/// Opaque identifier of a registered context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub const fn new(id: u64) -> Self {
        ContextId(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Success type of the current run and best point so far.
#[derive(Debug, Clone, Default)]
pub struct SuccessState {
    pub success: SuccessType,
    pub best_incumbent: Option<Arc<CandidatePoint>>,
}

#[derive(Debug, Default)]
struct LastSuccessDirections {
    feasible: Option<Vec<f64>>,
    infeasible: Option<Vec<f64>>,
}

/// State of one registered optimization.
pub struct Context {
    id: ContextId,
    config: RwLock<ContextConfig>,
    evaluators: RwLock<[Option<Arc<dyn Evaluator>>; 3]>,
    current_eval_type: RwLock<EvalType>,
    barrier: RwLock<Option<Arc<dyn Barrier>>>,
    ordering: RwLock<OrderingPolicy>,
    pub(crate) success: Mutex<SuccessState>,
    stop_reason: StopReason<ContextStopType>,
    currently_running: AtomicUsize,
    nb_in_queue: AtomicUsize,
    lap_bb_eval: AtomicUsize,
    model_eval: AtomicUsize,
    subproblem_bb_eval: AtomicUsize,
    last_success: Mutex<LastSuccessDirections>,
    done_with_eval: AtomicBool,
    evaluated: Mutex<Vec<QueuedRequest>>,
}

impl Context {
    pub(crate) fn new(id: ContextId, config: ContextConfig) -> Self {
        let ordering = OrderingPolicy::from(config.sort);
        Self {
            id,
            config: RwLock::new(config),
            evaluators: RwLock::new([None, None, None]),
            current_eval_type: RwLock::new(EvalType::Blackbox),
            barrier: RwLock::new(None),
            ordering: RwLock::new(ordering),
            success: Mutex::new(SuccessState::default()),
            stop_reason: StopReason::new(),
            currently_running: AtomicUsize::new(0),
            nb_in_queue: AtomicUsize::new(0),
            lap_bb_eval: AtomicUsize::new(0),
            model_eval: AtomicUsize::new(0),
            subproblem_bb_eval: AtomicUsize::new(0),
            last_success: Mutex::new(LastSuccessDirections::default()),
            done_with_eval: AtomicBool::new(false),
            evaluated: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> ContextConfig {
        self.config.read().clone()
    }

    pub fn is_opportunistic(&self) -> bool {
        self.config.read().opportunistic
    }

    pub fn set_opportunistic(&self, opportunistic: bool) {
        self.config.write().opportunistic = opportunistic;
    }

    pub fn use_cache(&self) -> bool {
        self.config.read().use_cache
    }

    pub fn set_use_cache(&self, use_cache: bool) {
        self.config.write().use_cache = use_cache;
    }

    pub fn surrogate_optimization(&self) -> bool {
        self.config.read().surrogate_optimization
    }

    pub fn set_surrogate_optimization(&self, on: bool) {
        self.config.write().surrogate_optimization = on;
    }

    /// Blackbox, or surrogate when the surrogate is the optimized function.
    pub fn eval_type_as_bb(&self) -> EvalType {
        if self.surrogate_optimization() {
            EvalType::Surrogate
        } else {
            EvalType::Blackbox
        }
    }

    // ── Evaluators ──────────────────────────────────────────────────────────

    /// Registers `evaluator` for its kind, replacing any previous one.
    pub fn set_evaluator(&self, evaluator: Arc<dyn Evaluator>) {
        let et = evaluator.eval_type();
        self.evaluators.write()[et.index()] = Some(evaluator);
    }

    pub fn remove_evaluator(&self, eval_type: EvalType) -> Option<Arc<dyn Evaluator>> {
        self.evaluators.write()[eval_type.index()].take()
    }

    pub fn evaluator(&self, eval_type: EvalType) -> Option<Arc<dyn Evaluator>> {
        self.evaluators.read()[eval_type.index()].clone()
    }

    pub fn current_eval_type(&self) -> EvalType {
        *self.current_eval_type.read()
    }

    pub fn set_current_eval_type(&self, eval_type: EvalType) {
        *self.current_eval_type.write() = eval_type;
    }

    pub fn current_evaluator(&self) -> Option<Arc<dyn Evaluator>> {
        self.evaluator(self.current_eval_type())
    }

    // ── Barrier & ordering ──────────────────────────────────────────────────

    pub fn set_barrier(&self, barrier: Option<Arc<dyn Barrier>>) {
        *self.barrier.write() = barrier;
    }

    pub fn barrier(&self) -> Option<Arc<dyn Barrier>> {
        self.barrier.read().clone()
    }

    /// Constraint threshold of the barrier, `+inf` without one.
    pub fn h_max(&self) -> f64 {
        self.barrier
            .read()
            .as_ref()
            .map_or(f64::INFINITY, |b| b.h_max())
    }

    pub fn set_ordering(&self, policy: OrderingPolicy) {
        *self.ordering.write() = policy;
    }

    pub fn ordering(&self) -> OrderingPolicy {
        self.ordering.read().clone()
    }

    /// Last successful direction, feasible preferred.
    pub fn last_success_direction(&self) -> Option<Vec<f64>> {
        let dirs = self.last_success.lock();
        dirs.feasible.clone().or_else(|| dirs.infeasible.clone())
    }

    pub fn set_last_success_direction(&self, direction: Vec<f64>, feasible: bool) {
        let mut dirs = self.last_success.lock();
        if feasible {
            dirs.feasible = Some(direction);
        } else {
            dirs.infeasible = Some(direction);
        }
    }

    // ── Success ─────────────────────────────────────────────────────────────

    pub fn success_type(&self) -> SuccessType {
        self.success.lock().success
    }

    pub fn set_success_type(&self, success: SuccessType) {
        self.success.lock().success = success;
    }

    pub fn best_incumbent(&self) -> Option<Arc<CandidatePoint>> {
        self.success.lock().best_incumbent.clone()
    }

    // ── Stop ────────────────────────────────────────────────────────────────

    pub fn stop_reason(&self) -> ContextStopType {
        self.stop_reason.get()
    }

    pub(crate) fn stop_state(&self) -> &StopReason<ContextStopType> {
        &self.stop_reason
    }

    pub fn is_done_with_eval(&self) -> bool {
        self.done_with_eval.load(Ordering::Acquire)
    }

    pub(crate) fn set_done_with_eval(&self, done: bool) {
        self.done_with_eval.store(done, Ordering::Release);
    }

    // ── Counters ────────────────────────────────────────────────────────────

    pub fn currently_running(&self) -> usize {
        self.currently_running.load(Ordering::Acquire)
    }

    pub(crate) fn inc_currently_running(&self) {
        self.currently_running.fetch_add(1, Ordering::AcqRel);
    }

    /// Saturates at zero.
    pub(crate) fn dec_currently_running(&self) {
        let _ = self
            .currently_running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn nb_in_queue(&self) -> usize {
        self.nb_in_queue.load(Ordering::Acquire)
    }

    pub(crate) fn inc_nb_in_queue(&self) {
        self.nb_in_queue.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn sub_nb_in_queue(&self, n: usize) {
        let _ = self
            .nb_in_queue
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| Some(q.saturating_sub(n)));
    }

    pub(crate) fn reset_nb_in_queue(&self) {
        self.nb_in_queue.store(0, Ordering::Release);
    }

    pub fn lap_bb_eval(&self) -> usize {
        self.lap_bb_eval.load(Ordering::Acquire)
    }

    pub fn lap_max_bb_eval(&self) -> usize {
        self.config.read().lap_max_bb_eval
    }

    /// Starts a new lap with budget `max` (0 means no limit).
    pub fn reset_lap_bb_eval(&self, max: usize) {
        self.config.write().lap_max_bb_eval = max;
        self.lap_bb_eval.store(0, Ordering::Release);
        self.stop_reason.clear(ContextStopType::LapMaxBbEvalReached);
    }

    pub fn model_eval(&self) -> usize {
        self.model_eval.load(Ordering::Acquire)
    }

    pub fn reset_model_eval(&self) {
        self.model_eval.store(0, Ordering::Release);
        self.stop_reason.clear(ContextStopType::MaxModelEvalReached);
    }

    pub fn subproblem_bb_eval(&self) -> usize {
        self.subproblem_bb_eval.load(Ordering::Acquire)
    }

    pub fn max_bb_eval_in_subproblem(&self) -> usize {
        self.config.read().max_bb_eval_in_subproblem
    }

    /// Starts a new subproblem with budget `max` (0 means no limit).
    pub fn reset_subproblem_bb_eval(&self, max: usize) {
        self.config.write().max_bb_eval_in_subproblem = max;
        self.subproblem_bb_eval.store(0, Ordering::Release);
        self.stop_reason.clear(ContextStopType::SubproblemMaxBbEvalReached);
    }

    pub(crate) fn add_bb_eval(&self, count_eval: bool) {
        if count_eval {
            self.lap_bb_eval.fetch_add(1, Ordering::AcqRel);
            self.subproblem_bb_eval.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn add_model_eval(&self) {
        self.model_eval.fetch_add(1, Ordering::AcqRel);
    }

    // ── Evaluated points ────────────────────────────────────────────────────

    pub(crate) fn push_evaluated(&self, req: QueuedRequest) {
        self.evaluated.lock().push(req);
    }

    /// Takes the requests evaluated for this context since the last call.
    pub fn retrieve_evaluated(&self) -> Vec<QueuedRequest> {
        std::mem::take(&mut *self.evaluated.lock())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("current_eval_type", &self.current_eval_type())
            .field("stop_reason", &self.stop_reason())
            .field("currently_running", &self.currently_running())
            .field("nb_in_queue", &self.nb_in_queue())
            .finish()
    }
}
