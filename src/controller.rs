//! The evaluation controller: context registry, queue and lifecycle.
//!
//! | Operation | Lock held |
//! |---|---|
//! | [`submit`](EvalController::submit), [`lock_queue`](EvalController::lock_queue) | queue, then registry (read) |
//! | [`drain_and_sort`](EvalController::drain_and_sort) | queue, then registry (read) |
//! | [`pop_block`](EvalController::pop_block) | queue, then registry (read), for the whole block |
//! | [`clear_queue`](EvalController::clear_queue) | queue, then registry (read) |
//! | [`add_context`](EvalController::add_context), [`remove_context`](EvalController::remove_context) | queue, then registry (write) |
//!
//! Evaluators are never called with the queue lock held. The dispatcher loop
//! and block evaluation live in `dispatch.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::cache::{EvalCache, InMemoryCache};
use crate::callback::EvalCallbacks;
use crate::config::{ContextConfig, EvalControlConfig};
use crate::context::{Context, ContextId};
use crate::counters::{GlobalCounters, SuccessStats};
use crate::error::{EvalError, Result};
use crate::evaluator::{same_evaluator, Evaluator};
use crate::ordering::{sort_queue, AppliedOrdering, OrderingPolicy, RequestComparator, SortInputs};
use crate::output::DirectOutput;
use crate::point::CandidatePoint;
use crate::queue::{Block, EvalQueue, QueuedRequest};
use crate::stop::{ContextStopType, GlobalStopType, StopReason};
use crate::types::EvalType;

/// Outcome of a drain-and-sort pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// Ordering applied, `None` when the queue was not sorted.
    pub ordering: Option<AppliedOrdering>,
    /// Requests erased to honour `keep_at_most`.
    pub removed: usize,
}

/// Evaluation queue and shared state of every context.
pub struct EvalController {
    pub(crate) config: RwLock<EvalControlConfig>,
    pub(crate) queue: Mutex<EvalQueue>,
    pub(crate) contexts: RwLock<HashMap<ContextId, Arc<Context>>>,
    next_context_id: AtomicU64,
    pub(crate) counters: GlobalCounters,
    pub(crate) global_stop: StopReason<GlobalStopType>,
    pub(crate) cache: Arc<dyn EvalCache>,
    pub(crate) callbacks: RwLock<EvalCallbacks>,
    user_comparator: RwLock<Option<RequestComparator>>,
    all_done: AtomicBool,
    /// Serializes the NOT_STARTED -> IN_PROGRESS claim against the cache.
    pub(crate) claim_lock: Mutex<()>,
    /// Serializes success, incumbent and opportunism updates.
    pub(crate) post_eval_lock: Mutex<()>,
    pub(crate) success_stats: SuccessStats,
    rng: Mutex<StdRng>,
    pub(crate) output: DirectOutput,
}

impl EvalController {
    /// Creates a controller with an in-memory cache.
    pub fn new(config: EvalControlConfig) -> Result<Self> {
        Self::with_cache(config, Arc::new(InMemoryCache::new()))
    }

    pub fn with_cache(config: EvalControlConfig, cache: Arc<dyn EvalCache>) -> Result<Self> {
        config.validate()?;
        let seed = config.random_seed;
        Ok(Self {
            config: RwLock::new(config),
            queue: Mutex::new(EvalQueue::new()),
            contexts: RwLock::new(HashMap::new()),
            next_context_id: AtomicU64::new(0),
            counters: GlobalCounters::new(),
            global_stop: StopReason::new(),
            cache,
            callbacks: RwLock::new(EvalCallbacks::default()),
            user_comparator: RwLock::new(None),
            all_done: AtomicBool::new(false),
            claim_lock: Mutex::new(()),
            post_eval_lock: Mutex::new(()),
            success_stats: SuccessStats::default(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            output: DirectOutput::new(),
        })
    }

    pub fn config(&self) -> EvalControlConfig {
        self.config.read().clone()
    }

    /// Replaces the configuration after validating it.
    pub fn set_config(&self, config: EvalControlConfig) -> Result<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    pub fn cache(&self) -> &Arc<dyn EvalCache> {
        &self.cache
    }

    pub fn counters(&self) -> &GlobalCounters {
        &self.counters
    }

    pub fn success_stats(&self) -> &SuccessStats {
        &self.success_stats
    }

    pub fn direct_output(&self) -> &DirectOutput {
        &self.output
    }

    pub fn set_callbacks(&self, callbacks: EvalCallbacks) {
        *self.callbacks.write() = callbacks;
    }

    /// Comparator that overrides every context's ordering policy.
    pub fn set_user_comparator(&self, cmp: Option<RequestComparator>) {
        *self.user_comparator.write() = cmp;
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Context registry
    // ──────────────────────────────────────────────────────────────────────────

    /// Registers a new context and returns its id.
    pub fn add_context(&self, config: ContextConfig) -> ContextId {
        let id = ContextId::new(self.next_context_id.fetch_add(1, Ordering::Relaxed));
        let ctx = Arc::new(Context::new(id, config));
        self.contexts.write().insert(id, ctx);
        self.all_done.store(false, Ordering::Release);
        debug!("registered context {}", id);
        id
    }

    /// Registers a context with an evaluator already set as current.
    pub fn add_context_with_evaluator(
        &self,
        config: ContextConfig,
        evaluator: Arc<dyn Evaluator>,
    ) -> ContextId {
        let id = self.add_context(config);
        if let Some(ctx) = self.contexts.read().get(&id) {
            ctx.set_current_eval_type(evaluator.eval_type());
            ctx.set_evaluator(evaluator);
        }
        id
    }

    /// Unregisters a context and drops its queued requests.
    ///
    /// Refused while evaluations of the context are running.
    pub fn remove_context(&self, id: ContextId) -> Result<()> {
        let mut queue = self.queue.lock();
        let mut contexts = self.contexts.write();
        let ctx = contexts.get(&id).ok_or(EvalError::UnknownContext(id))?;
        if ctx.currently_running() > 0 {
            return Err(EvalError::ContextBusy(id));
        }
        let removed = queue.remove_where(|r| r.context() == id);
        contexts.remove(&id);
        let all_done = !contexts.is_empty() && contexts.values().all(|c| c.is_done_with_eval());
        drop(contexts);
        drop(queue);
        if all_done {
            self.all_done.store(true, Ordering::Release);
        }
        debug!("removed context {} ({} queued requests dropped)", id, removed);
        Ok(())
    }

    pub fn context(&self, id: ContextId) -> Result<Arc<Context>> {
        self.contexts
            .read()
            .get(&id)
            .cloned()
            .ok_or(EvalError::UnknownContext(id))
    }

    pub fn context_ids(&self) -> Vec<ContextId> {
        let mut ids: Vec<ContextId> = self.contexts.read().keys().copied().collect();
        ids.sort();
        ids
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Submission
    // ──────────────────────────────────────────────────────────────────────────

    /// Queues `point` for `eval_type` on behalf of context `ctx`.
    ///
    /// Returns `Ok(false)` when the request is refused: no evaluator of that
    /// kind in the context, the same work already queued, or the point in
    /// flight according to the cache.
    pub fn submit(
        &self,
        point: Arc<CandidatePoint>,
        ctx: ContextId,
        eval_type: EvalType,
    ) -> Result<bool> {
        let mut queue = self.queue.lock();
        self.submit_locked(&mut queue, point, ctx, eval_type)
    }

    pub(crate) fn submit_locked(
        &self,
        queue: &mut EvalQueue,
        point: Arc<CandidatePoint>,
        ctx_id: ContextId,
        eval_type: EvalType,
    ) -> Result<bool> {
        let ctx = self.context(ctx_id)?;
        point.ensure_complete()?;

        if ctx.evaluator(eval_type).is_none() {
            debug!(
                "point #{} refused: no {} evaluator in context {}",
                point.tag(),
                eval_type,
                ctx_id
            );
            return Ok(false);
        }

        let request = QueuedRequest::new(point, ctx_id, eval_type);
        if queue.contains_work(&request) {
            debug!("point #{} refused: already queued", request.point().tag());
            return Ok(false);
        }
        if ctx.use_cache() {
            if let Some(cached) = self.cache.find(request.point()) {
                let status = cached.status(eval_type);
                if status.is_in_flight() {
                    debug!(
                        "point #{} refused: cached twin #{} is {}",
                        request.point().tag(),
                        cached.tag(),
                        status
                    );
                    return Ok(false);
                }
            }
        }

        queue.push_low(request);
        ctx.inc_nb_in_queue();
        Ok(true)
    }

    /// Holds the queue lock for a batch of submissions from context `ctx`.
    pub fn lock_queue(&self, ctx: ContextId) -> Result<QueueFill<'_>> {
        self.context(ctx)?;
        Ok(QueueFill {
            controller: self,
            queue: self.queue.lock(),
            ctx,
        })
    }

    /// Optionally sorts the queue, then trims context `ctx`'s erasable
    /// requests down to `keep_at_most`.
    ///
    /// Sorting happens only when `sort` is set, the context is opportunistic
    /// and more than one request is queued. Erasable requests belong to `ctx`
    /// and satisfy `filter`; the lowest-priority ones are erased first.
    pub fn drain_and_sort(
        &self,
        ctx: ContextId,
        sort: bool,
        keep_at_most: Option<usize>,
        filter: &dyn Fn(&QueuedRequest) -> bool,
    ) -> Result<DrainSummary> {
        let mut queue = self.queue.lock();
        self.drain_and_sort_locked(&mut queue, ctx, sort, keep_at_most, filter)
    }

    pub(crate) fn drain_and_sort_locked(
        &self,
        queue: &mut EvalQueue,
        ctx_id: ContextId,
        sort: bool,
        keep_at_most: Option<usize>,
        filter: &dyn Fn(&QueuedRequest) -> bool,
    ) -> Result<DrainSummary> {
        let ctx = self.context(ctx_id)?;
        if keep_at_most == Some(0) {
            return Err(EvalError::InvalidArgs(
                "keep_at_most must be at least 1".into(),
            ));
        }

        let mut summary = DrainSummary {
            ordering: None,
            removed: 0,
        };

        if sort && ctx.is_opportunistic() && queue.len() > 1 {
            let policy = match self.user_comparator.read().clone() {
                Some(cmp) => OrderingPolicy::UserSupplied(cmp),
                None => ctx.ordering(),
            };
            let directions: HashMap<ContextId, Vec<f64>> = self
                .contexts
                .read()
                .iter()
                .filter_map(|(id, c)| c.last_success_direction().map(|d| (*id, d)))
                .collect();
            let mut rng = self.rng.lock();
            summary.ordering = Some(sort_queue(
                queue,
                &policy,
                SortInputs {
                    directions: &directions,
                    rng: &mut *rng,
                },
            ));
        }

        if let Some(keep) = keep_at_most {
            let erasable = |r: &QueuedRequest| r.context() == ctx_id && filter(r);
            let n_erasable = queue.count_where(erasable);
            if n_erasable > keep {
                summary.removed = queue.remove_lowest_where(n_erasable - keep, erasable);
                ctx.sub_nb_in_queue(summary.removed);
                debug!(
                    "context {}: kept {} of {} erasable requests",
                    ctx_id, keep, n_erasable
                );
            }
        }
        Ok(summary)
    }

    /// Number of queued requests, for one context or in total.
    pub fn queue_size(&self, ctx: Option<ContextId>) -> usize {
        let queue = self.queue.lock();
        match ctx {
            Some(id) => queue.count_where(|r| r.context() == id),
            None => queue.len(),
        }
    }

    /// Snapshot of the queue, highest priority first.
    pub fn queued_requests(&self) -> Vec<QueuedRequest> {
        let queue = self.queue.lock();
        queue.iter().rev().cloned().collect()
    }

    /// Removes the requests of `ctx`, or every request. Returns how many.
    pub fn clear_queue(&self, ctx: Option<ContextId>) -> usize {
        let mut queue = self.queue.lock();
        let contexts = self.contexts.read();
        let removed = match ctx {
            Some(id) => {
                if let Some(c) = contexts.get(&id) {
                    c.reset_nb_in_queue();
                }
                queue.remove_where(|r| r.context() == id)
            }
            None => {
                for c in contexts.values() {
                    c.reset_nb_in_queue();
                }
                queue.clear()
            }
        };
        if removed > 0 {
            debug!("cleared {} queued requests", removed);
        }
        removed
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Block extraction
    // ──────────────────────────────────────────────────────────────────────────

    /// Pops a block of compatible requests, highest priority first.
    ///
    /// Requests of other contexts that must stop are skipped. The first
    /// eligible request fixes the evaluator and `hMax`; later ones must share
    /// both. Popped requests count as running for their context.
    pub fn pop_block(&self, popper: Option<ContextId>) -> Option<Block> {
        let mut queue = self.queue.lock();
        let contexts = self.contexts.read();

        let mut block: Block = Vec::new();
        let mut evaluator: Option<Arc<dyn Evaluator>> = None;
        let mut h_max = f64::NAN;
        let mut cap = 1;
        let mut i = queue.len();

        while i > 0 && block.len() < cap {
            i -= 1;
            let Some(req) = queue.get(i) else { break };
            let Some(ctx) = contexts.get(&req.context()) else {
                continue;
            };
            if popper != Some(ctx.id()) && self.stop_main_eval(ctx) {
                continue;
            }
            let eval_type = req.eval_type();

            match &evaluator {
                None => {
                    let Some(ev) = ctx.evaluator(eval_type) else {
                        continue;
                    };
                    if ev.eval_type() != eval_type {
                        continue;
                    }
                    h_max = ctx.h_max();
                    cap = self.config.read().max_block_size(eval_type);
                    evaluator = Some(ev);
                }
                Some(ev) => {
                    let same = ctx
                        .evaluator(eval_type)
                        .is_some_and(|other| same_evaluator(&other, ev));
                    if !same || ctx.h_max() != h_max || ev.eval_type() != eval_type {
                        continue;
                    }
                }
            }

            if let Some(req) = queue.remove(i) {
                ctx.inc_currently_running();
                ctx.sub_nb_in_queue(1);
                block.push(req);
            }
        }

        if block.is_empty() {
            None
        } else {
            Some(block)
        }
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ──────────────────────────────────────────────────────────────────────────

    /// True once every registered context is done with evaluation.
    pub fn all_done(&self) -> bool {
        self.all_done.load(Ordering::Acquire)
    }

    /// Marks context `ctx` done with evaluation. Idempotent.
    ///
    /// When every context is done, workers leave their loops.
    pub fn stop(&self, ctx: ContextId) -> Result<()> {
        let c = self.context(ctx)?;
        if !c.is_done_with_eval() {
            c.set_done_with_eval(true);
            c.stop_state().set(ContextStopType::UserStopped);
            info!("context {} stopped", ctx);
        }
        let all = self.contexts.read().values().all(|c| c.is_done_with_eval());
        if all {
            self.all_done.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Clears done flags and user stops so contexts can run again.
    pub fn restart(&self) {
        for c in self.contexts.read().values() {
            c.set_done_with_eval(false);
            c.stop_state().clear(ContextStopType::UserStopped);
        }
        self.all_done.store(false, Ordering::Release);
    }

    /// Resets global counters, statistics, global stop reason and direct output.
    pub fn reset(&self) {
        self.counters.reset();
        self.success_stats.reset();
        self.global_stop.reset();
        self.output.clear();
        *self.rng.lock() = StdRng::seed_from_u64(self.config.read().random_seed);
        debug!("controller counters reset");
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Counters & stop reasons
    // ──────────────────────────────────────────────────────────────────────────

    pub fn bb_eval(&self) -> usize {
        self.counters.bb_eval()
    }

    pub fn surrogate_eval(&self) -> usize {
        self.counters.surrogate_eval()
    }

    pub fn block_eval(&self) -> usize {
        self.counters.block_eval()
    }

    pub fn total_model_eval(&self) -> usize {
        self.counters.total_model_eval()
    }

    /// Evaluations sent plus cache hits.
    pub fn nb_eval(&self) -> usize {
        self.counters.eval_sent() + self.cache.hit_count()
    }

    /// Sets the evaluation count, for a run resuming from earlier work.
    pub fn set_nb_eval(&self, nb_eval: usize) {
        let hits = self.cache.hit_count();
        if nb_eval < hits {
            warn!(
                "cannot set the number of evaluations to {}: cache already has {} hits",
                nb_eval, hits
            );
            return;
        }
        self.counters.set_eval_sent(nb_eval - hits);
    }

    /// Sets the blackbox evaluation count, for a run resuming from earlier work.
    pub fn set_bb_eval(&self, bb_eval: usize) {
        self.counters.set_bb_eval(bb_eval);
    }

    pub fn global_stop_reason(&self) -> GlobalStopType {
        self.global_stop.get()
    }

    /// Records a global stop; the first reason recorded wins.
    pub fn set_global_stop(&self, reason: GlobalStopType) -> bool {
        let set = self.global_stop.set(reason);
        if set {
            info!("global stop: {}", reason);
        }
        set
    }

    pub fn context_stop_reason(&self, ctx: ContextId) -> Result<ContextStopType> {
        Ok(self.context(ctx)?.stop_reason())
    }

    /// Takes the requests evaluated for `ctx` since the last call.
    pub fn retrieve_evaluated_points(&self, ctx: ContextId) -> Result<Vec<QueuedRequest>> {
        Ok(self.context(ctx)?.retrieve_evaluated())
    }
}

impl std::fmt::Debug for EvalController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalController")
            .field("contexts", &self.context_ids())
            .field("bb_eval", &self.bb_eval())
            .field("global_stop", &self.global_stop_reason())
            .finish()
    }
}

/// Batch submission guard holding the queue lock.
///
/// Dropping the guard releases the lock without sorting; [`finish`] sorts
/// and trims once, then releases it.
///
/// [`finish`]: QueueFill::finish
pub struct QueueFill<'a> {
    controller: &'a EvalController,
    queue: MutexGuard<'a, EvalQueue>,
    ctx: ContextId,
}

impl QueueFill<'_> {
    pub fn submit(&mut self, point: Arc<CandidatePoint>, eval_type: EvalType) -> Result<bool> {
        self.controller
            .submit_locked(&mut self.queue, point, self.ctx, eval_type)
    }

    /// Total queued requests, every context included.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn finish(
        mut self,
        sort: bool,
        keep_at_most: Option<usize>,
        filter: &dyn Fn(&QueuedRequest) -> bool,
    ) -> Result<DrainSummary> {
        let ctx = self.ctx;
        self.controller
            .drain_and_sort_locked(&mut self.queue, ctx, sort, keep_at_most, filter)
    }
}
