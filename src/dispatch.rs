//! Dispatcher loop and block evaluation.
//!
//! | Step | Where |
//! |---|---|
//! | pop a compatible block | [`EvalController::pop_block`] |
//! | claim points against the cache | [`EvalController::eval_block`] (claim lock) |
//! | call the evaluator | no lock held |
//! | statuses, counters, cache update, fail/stop callbacks | per point, no controller lock |
//! | success, incumbent, statistics, output, opportunism | post-evaluation lock |
//! | release running counts | on every exit path |

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::callback::OpportunisticSignal;
use crate::context::{Context, ContextId};
use crate::controller::EvalController;
use crate::counters::BbOutcomeKind;
use crate::error::{EvalError, Result};
use crate::evaluator::{EvalOutcome, Evaluator};
use crate::point::{aggregate_outputs, CandidatePoint};
use crate::queue::{Block, QueuedRequest};
use crate::status::EvalStatus;
use crate::stop::{ContextStopType, GlobalStopType};
use crate::success::{compute_success_type, replaces_incumbent};
use crate::types::{BbOutputType, EvalType, SuccessType};

/// Releases the running count of each request's context when dropped.
struct RunningGuard(Vec<Arc<Context>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        for ctx in &self.0 {
            ctx.dec_currently_running();
        }
    }
}

/// Where a point of a block stands after the claim.
enum Claim {
    Dispatch,
    /// Another dispatch of the same coordinates is in progress.
    Wait,
}

impl EvalController {
    // ──────────────────────────────────────────────────────────────────────────
    // Worker loops
    // ──────────────────────────────────────────────────────────────────────────

    /// Evaluates queued requests on behalf of context `id` until it must stop,
    /// then waits for its running evaluations and returns its success type.
    pub fn run(&self, id: ContextId) -> Result<SuccessType> {
        let ctx = self.context(id)?;
        if ctx.current_evaluator().is_none() {
            return Err(EvalError::NoEvaluator {
                context: id,
                eval_type: ctx.current_eval_type(),
            });
        }

        ctx.set_success_type(SuccessType::Unsuccessful);
        ctx.stop_state().reset_transient();
        if ctx.nb_in_queue() == 0 {
            ctx.stop_state().set(ContextStopType::EmptyListOfPoints);
        }
        debug!(
            "context {}: start evaluation of {} queued points",
            id,
            ctx.nb_in_queue()
        );

        let result = self.dispatch_loop(Some(&ctx), None);
        if result.is_err() {
            self.set_global_stop(GlobalStopType::FatalError);
        }

        while ctx.currently_running() > 0 {
            self.reached_max_eval();
            self.reached_max_step_eval(&ctx);
            self.idle_wait();
        }

        if self.config.read().clear_queue_on_exit {
            self.clear_queue(Some(id));
        }
        result?;

        debug!(
            "context {}: evaluation done ({}), success {}",
            id,
            ctx.stop_reason(),
            ctx.success_type()
        );
        Ok(ctx.success_type())
    }

    /// Evaluates requests of any context until every context is done.
    pub fn run_helper(&self) -> Result<()> {
        self.run_helper_until(None)
    }

    /// Like [`run_helper`](Self::run_helper), also leaving once `release` is set.
    pub(crate) fn run_helper_until(&self, release: Option<&AtomicBool>) -> Result<()> {
        let result = self.dispatch_loop(None, release);
        if result.is_err() {
            self.set_global_stop(GlobalStopType::FatalError);
        }
        result
    }

    fn dispatch_loop(&self, owner: Option<&Arc<Context>>, release: Option<&AtomicBool>) -> Result<()> {
        while !self.all_done() {
            if release.is_some_and(|r| r.load(AtomicOrdering::Acquire)) {
                break;
            }
            match owner {
                Some(ctx) => {
                    if self.stop_main_eval(ctx) {
                        break;
                    }
                }
                None => {
                    if self.global_stop.check_terminate() || self.reached_max_eval() {
                        break;
                    }
                }
            }

            match self.pop_block(owner.map(|c| c.id())) {
                Some(block) => {
                    self.eval_block(block)?;
                }
                None => self.idle_wait(),
            }
        }
        Ok(())
    }

    pub(crate) fn idle_wait(&self) {
        let us = self.config.read().idle_wait_us;
        if us == 0 {
            std::thread::yield_now();
        } else {
            std::thread::sleep(Duration::from_micros(us));
        }
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Stop predicates
    // ──────────────────────────────────────────────────────────────────────────

    /// Whether the worker owning `ctx` should leave its loop.
    ///
    /// A context with an empty queue and no other pending reason is marked
    /// ALL_POINTS_EVALUATED.
    pub fn stop_main_eval(&self, ctx: &Context) -> bool {
        let mut stop_local = ctx.stop_state().check_terminate();
        if ctx.nb_in_queue() == 0
            && (!stop_local || ctx.stop_reason() == ContextStopType::EmptyListOfPoints)
        {
            ctx.stop_state().set(ContextStopType::AllPointsEvaluated);
            stop_local = true;
        }
        let stop_local = stop_local || self.reached_max_step_eval(ctx);
        let stop_global = self.global_stop.check_terminate() || self.reached_max_eval();
        stop_local || stop_global
    }

    /// Whether a global evaluation budget is exhausted. Sets the matching
    /// global stop reason the first time.
    pub fn reached_max_eval(&self) -> bool {
        if self.global_stop.get().is_budget() {
            return true;
        }
        let cfg = self.config.read();
        let reached = if cfg.max_bb_eval > 0 && self.counters.bb_eval() >= cfg.max_bb_eval {
            Some(GlobalStopType::MaxBbEvalReached)
        } else if cfg.max_surrogate_eval > 0
            && self.counters.surrogate_eval() >= cfg.max_surrogate_eval
        {
            Some(GlobalStopType::MaxSurrogateEvalReached)
        } else if cfg.max_eval > 0 && self.nb_eval() >= cfg.max_eval {
            Some(GlobalStopType::MaxEvalReached)
        } else if cfg.max_block_eval > 0 && self.counters.block_eval() >= cfg.max_block_eval {
            Some(GlobalStopType::MaxBlockEvalReached)
        } else {
            None
        };
        drop(cfg);
        match reached {
            Some(reason) => {
                self.set_global_stop(reason);
                true
            }
            None => false,
        }
    }

    /// Whether a budget of context `ctx` (model, lap, subproblem) is exhausted.
    pub fn reached_max_step_eval(&self, ctx: &Context) -> bool {
        if ctx.stop_reason().is_step_budget() {
            return true;
        }
        let max_model = self.config.read().max_model_eval;
        let max_lap = ctx.lap_max_bb_eval();
        let max_sub = ctx.max_bb_eval_in_subproblem();
        let reached = if max_model > 0 && ctx.model_eval() >= max_model {
            Some(ContextStopType::MaxModelEvalReached)
        } else if max_lap > 0 && ctx.lap_bb_eval() >= max_lap {
            Some(ContextStopType::LapMaxBbEvalReached)
        } else if max_sub > 0 && ctx.subproblem_bb_eval() >= max_sub {
            Some(ContextStopType::SubproblemMaxBbEvalReached)
        } else {
            None
        };
        match reached {
            Some(reason) => {
                if ctx.stop_state().set(reason) {
                    debug!("context {}: {}", ctx.id(), reason);
                }
                true
            }
            None => false,
        }
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Block evaluation
    // ──────────────────────────────────────────────────────────────────────────

    /// Evaluates a popped block and returns it with statuses and successes.
    ///
    /// The evaluator and `hMax` are those of the first request's context. The
    /// running counts taken by [`pop_block`](Self::pop_block) are released
    /// whatever the outcome.
    pub fn eval_block(&self, mut block: Block) -> Result<Block> {
        let contexts = block
            .iter()
            .map(|r| self.context(r.context()))
            .collect::<Result<Vec<_>>>()?;
        let _running = RunningGuard(contexts.clone());
        let Some(first) = contexts.first() else {
            return Ok(block);
        };
        let eval_type = block[0].eval_type();
        let evaluator = first.evaluator(eval_type).ok_or(EvalError::NoEvaluator {
            context: first.id(),
            eval_type,
        })?;
        let h_max = first.h_max();

        self.eval_block_of_points(&mut block, &contexts, &evaluator, h_max)?;
        self.post_eval(&mut block, &contexts);
        Ok(block)
    }

    /// Evaluates `point` right away with the current evaluator of `id`,
    /// bypassing the queue. Returns true if the evaluation ended OK.
    pub fn eval_single_point(
        &self,
        point: &Arc<CandidatePoint>,
        id: ContextId,
        h_max: Option<f64>,
    ) -> Result<bool> {
        let ctx = self.context(id)?;
        point.ensure_complete()?;
        let evaluator = ctx.current_evaluator().ok_or(EvalError::NoEvaluator {
            context: id,
            eval_type: ctx.current_eval_type(),
        })?;
        let eval_type = evaluator.eval_type();

        ctx.inc_currently_running();
        let contexts = vec![ctx];
        let _running = RunningGuard(contexts.clone());
        let mut block = vec![QueuedRequest::new(Arc::clone(point), id, eval_type)];
        let h_max = h_max.unwrap_or_else(|| contexts[0].h_max());
        self.eval_block_of_points(&mut block, &contexts, &evaluator, h_max)?;
        self.post_eval(&mut block, &contexts);
        Ok(point.is_eval_ok(eval_type))
    }

    fn claim(&self, ctx: &Context, point: &Arc<CandidatePoint>, eval_type: EvalType) -> Result<Claim> {
        if ctx.use_cache() {
            match self.cache.find(point) {
                None => {
                    self.cache.insert(Arc::clone(point));
                }
                Some(cached) if Arc::ptr_eq(&cached, point) => {}
                Some(cached) if cached.status(eval_type).is_in_flight() => {
                    point.set_status(eval_type, EvalStatus::Wait)?;
                    return Ok(Claim::Wait);
                }
                Some(cached) => cached.set_status(eval_type, EvalStatus::InProgress)?,
            }
        }
        point.set_status(eval_type, EvalStatus::InProgress)?;
        Ok(Claim::Dispatch)
    }

    fn eval_block_of_points(
        &self,
        block: &mut Block,
        contexts: &[Arc<Context>],
        evaluator: &Arc<dyn Evaluator>,
        h_max: f64,
    ) -> Result<()> {
        let eval_type = evaluator.eval_type();

        let mut dispatched = Vec::with_capacity(block.len());
        let mut waiting = Vec::new();
        {
            let _claim = self.claim_lock.lock();
            for (i, req) in block.iter().enumerate() {
                match self.claim(&contexts[i], req.point(), eval_type)? {
                    Claim::Dispatch => dispatched.push(i),
                    Claim::Wait => waiting.push(i),
                }
            }
        }

        if !dispatched.is_empty() {
            let points: Vec<Arc<CandidatePoint>> = dispatched
                .iter()
                .map(|&i| Arc::clone(block[i].point()))
                .collect();
            debug!("evaluating block of {} {} points", points.len(), eval_type);

            let call = panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate_block(&points, h_max)));
            let outcomes = match call.unwrap_or_else(|payload| Err(panic_message(payload).into())) {
                Ok(outcomes) if outcomes.len() == points.len() => outcomes,
                Ok(outcomes) => {
                    self.abandon(&points, eval_type);
                    return Err(EvalError::OutcomeCount {
                        expected: points.len(),
                        got: outcomes.len(),
                    });
                }
                Err(source) => {
                    self.abandon(&points, eval_type);
                    return Err(EvalError::Evaluator { eval_type, source });
                }
            };

            let output_types = evaluator.output_types();
            for (&i, outcome) in dispatched.iter().zip(outcomes) {
                self.record_outcome(&block[i], &contexts[i], eval_type, output_types, outcome)?;
            }

            if matches!(eval_type, EvalType::Blackbox | EvalType::Surrogate) {
                self.counters.add_block_eval();
            }
        }

        for &i in &waiting {
            self.wait_for_twin(block[i].point(), eval_type)?;
        }
        Ok(())
    }

    /// Marks points of a failed evaluator call as ERROR so no twin waits forever.
    fn abandon(&self, points: &[Arc<CandidatePoint>], eval_type: EvalType) {
        for p in points {
            let _ = p.set_status(eval_type, EvalStatus::Error);
            let _ = self.cache.update(p, eval_type);
        }
    }

    fn record_outcome(
        &self,
        req: &QueuedRequest,
        ctx: &Context,
        eval_type: EvalType,
        output_types: &[BbOutputType],
        outcome: EvalOutcome,
    ) -> Result<()> {
        let point = req.point();
        let status = check_if_eval_ok(point, &outcome, output_types);
        point.set_outputs(eval_type, outcome.outputs, status, output_types)?;

        self.count_evaluation(ctx, point, eval_type, outcome.count_eval);
        if eval_type == EvalType::Blackbox && status != EvalStatus::Ok {
            self.run_fail_check(point, eval_type, output_types)?;
        }

        if ctx.use_cache() {
            self.cache
                .update(point, eval_type)
                .map_err(|_| EvalError::CacheUpdate(point.tag()))?;
        }

        if eval_type == EvalType::Blackbox {
            let stop_check = self.callbacks.read().stop_check.clone();
            if let Some(cb) = stop_check {
                if cb(req) {
                    self.set_global_stop(GlobalStopType::CustomGlobalStop);
                }
            }
        }
        Ok(())
    }

    fn run_fail_check(
        &self,
        point: &CandidatePoint,
        eval_type: EvalType,
        output_types: &[BbOutputType],
    ) -> Result<()> {
        let fail_check = self.callbacks.read().fail_check.clone();
        let Some(cb) = fail_check else {
            return Ok(());
        };
        if let Some(outputs) = cb(point, eval_type) {
            let (f, h) = aggregate_outputs(&outputs, output_types);
            if outputs.len() == output_types.len() && f.is_some() && h.is_some() {
                point.set_outputs(eval_type, outputs, EvalStatus::Ok, output_types)?;
                debug!("point #{} repaired by fail check", point.tag());
            }
        }
        Ok(())
    }

    fn count_evaluation(&self, ctx: &Context, point: &CandidatePoint, eval_type: EvalType, count_eval: bool) {
        match eval_type {
            EvalType::Model => {
                ctx.add_model_eval();
                self.counters.add_model_eval();
            }
            EvalType::Blackbox => {
                ctx.add_bb_eval(count_eval);
                let kind = if point.status(eval_type) != EvalStatus::Ok {
                    BbOutcomeKind::NotOk
                } else {
                    match point.is_feasible(eval_type) {
                        Some(true) => BbOutcomeKind::Feasible,
                        Some(false) => BbOutcomeKind::Infeasible,
                        None => BbOutcomeKind::NotOk,
                    }
                };
                self.counters.add_bb_eval(count_eval, kind);
                point.inc_bb_eval_count();
            }
            EvalType::Surrogate => {
                if count_eval {
                    let cost = self.config.read().surrogate_cost;
                    self.counters.add_surrogate_eval(cost);
                }
            }
        }
    }

    /// Polls the cache until the in-progress twin of `point` resolves, then
    /// adopts its result.
    fn wait_for_twin(&self, point: &CandidatePoint, eval_type: EvalType) -> Result<()> {
        loop {
            match self.cache.find(point) {
                Some(twin) if twin.status(eval_type).is_resolved() => {
                    point.adopt_record(eval_type, twin.record(eval_type))?;
                    self.cache.record_hit();
                    return Ok(());
                }
                Some(_) => {}
                None => {
                    point.set_status(eval_type, EvalStatus::Error)?;
                    return Ok(());
                }
            }
            if self.global_stop.test_if(GlobalStopType::FatalError) {
                point.set_status(eval_type, EvalStatus::Error)?;
                return Ok(());
            }
            self.idle_wait();
        }
    }

    // ──────────────────────────────────────────────────────────────────────────
    // After evaluation
    // ──────────────────────────────────────────────────────────────────────────

    fn post_eval(&self, block: &mut Block, contexts: &[Arc<Context>]) {
        let _post = self.post_eval_lock.lock();
        let callbacks = self.callbacks.read().clone();
        let direct_output = self.config.read().direct_output;

        for (req, ctx) in block.iter_mut().zip(contexts) {
            let eval_type = req.eval_type();
            if req.point().is_eval_ok(eval_type) {
                let (success, relative) = self.compute_success(ctx, req.point(), eval_type);
                req.success = success;
                req.relative_success = relative;
            }

            let feasible = req.point().is_feasible(eval_type) == Some(true);
            if req.relative_success {
                self.counters.add_relative_success(feasible);
                if let Some(dir) = req.point().direction() {
                    ctx.set_last_success_direction(dir.to_vec(), feasible);
                }
            }
            self.success_stats.update(req.step(), req.success);

            if direct_output && eval_type == ctx.eval_type_as_bb() {
                self.output.write_history(req);
                if req.relative_success && feasible {
                    self.output.write_solution(req);
                }
            }

            if let Some(cb) = &callbacks.eval_update {
                cb(req);
            }

            match &callbacks.opportunistic_check {
                Some(cb) => match cb(req) {
                    OpportunisticSignal::Continue => {}
                    OpportunisticSignal::EvalStop => {
                        ctx.stop_state().set(ContextStopType::CustomOpportunisticEvalStop);
                    }
                    OpportunisticSignal::IterStop => {
                        ctx.stop_state().set(ContextStopType::CustomOpportunisticIterStop);
                    }
                },
                None => {
                    if ctx.is_opportunistic() && ctx.success_type() >= SuccessType::FullSuccess {
                        if ctx.stop_state().set(ContextStopType::OpportunisticSuccess) {
                            info!("context {}: opportunistic success on point #{}", ctx.id(), req.point().tag());
                        }
                    }
                }
            }

            if req.point().status(eval_type) == EvalStatus::Failed {
                warn!("evaluation of point #{} failed", req.point().tag());
            }
            ctx.push_evaluated(req.clone());
        }
    }

    /// Classifies `point` for `ctx`, raises the context success type and
    /// updates its best incumbent, under one lock.
    ///
    /// Returns the success and whether the point became the best incumbent.
    fn compute_success(&self, ctx: &Context, point: &Arc<CandidatePoint>, eval_type: EvalType) -> (SuccessType, bool) {
        let barrier = ctx.barrier();
        let bb_like = eval_type == ctx.eval_type_as_bb();
        let mut state = ctx.success.lock();

        let success = match &barrier {
            Some(b) => b.classify_success(point, eval_type),
            None => compute_success_type(point, None, eval_type, f64::INFINITY),
        };

        let mut relative = false;
        if bb_like && replaces_incumbent(point, success, state.best_incumbent.as_deref(), eval_type) {
            state.best_incumbent = Some(Arc::clone(point));
            relative = true;
        }
        if success > state.success {
            state.success = success;
        }
        (success, relative)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("evaluator panicked: {}", msg)
}

/// Status of an outcome once checked against the output contract.
fn check_if_eval_ok(point: &CandidatePoint, outcome: &EvalOutcome, output_types: &[BbOutputType]) -> EvalStatus {
    match outcome.status {
        EvalStatus::Ok => {}
        s if s.is_resolved() => return s,
        s => {
            warn!("point #{}: evaluator returned unexpected status {}", point.tag(), s);
            return EvalStatus::Error;
        }
    }
    if outcome.outputs.len() != output_types.len() {
        warn!(
            "point #{}: {} outputs for {} declared output types",
            point.tag(),
            outcome.outputs.len(),
            output_types.len()
        );
        return EvalStatus::Failed;
    }
    let (f, h) = aggregate_outputs(&outcome.outputs, output_types);
    if f.is_none() || h.is_none() {
        warn!("point #{}: objective or constraint violation undefined", point.tag());
        return EvalStatus::Failed;
    }
    EvalStatus::Ok
}
