//! Lifecycle: stop, restart, context removal and step budgets.

use std::sync::Arc;

use mads_eval::{
    BbOutputType, CandidatePoint, ContextConfig, ContextId, ContextStopType, EvalControlConfig,
    EvalController, EvalError, EvalOutcome, EvalType, FnEvaluator,
};

fn setup(config: ContextConfig) -> (EvalController, ContextId) {
    let c = EvalController::new(EvalControlConfig {
        idle_wait_us: 0,
        clear_queue_on_exit: false,
        ..Default::default()
    })
    .unwrap();
    let ctx = c.add_context_with_evaluator(
        config,
        Arc::new(FnEvaluator::new(
            EvalType::Blackbox,
            vec![BbOutputType::Obj, BbOutputType::Pb],
            |x: &[f64]| EvalOutcome::ok(vec![x[0], x[0] - 2.0]),
        )),
    );
    (c, ctx)
}

fn submit_n(c: &EvalController, ctx: ContextId, n: usize) {
    for i in 0..n {
        assert!(c
            .submit(Arc::new(CandidatePoint::new(vec![i as f64 + 1.0])), ctx, EvalType::Blackbox)
            .unwrap());
    }
}

#[test]
fn test_stop_twice_is_stop_once() {
    let (c, ctx) = setup(ContextConfig::default());
    let other = c.add_context(ContextConfig::default());

    c.stop(ctx).unwrap();
    c.stop(ctx).unwrap();
    assert_eq!(c.context_stop_reason(ctx).unwrap(), ContextStopType::UserStopped);
    assert!(c.context(ctx).unwrap().is_done_with_eval());
    assert!(!c.all_done(), "another context is still active");

    c.stop(other).unwrap();
    assert!(c.all_done());
    c.stop(other).unwrap();
    assert!(c.all_done());

    assert!(matches!(c.stop(ContextId::new(77)), Err(EvalError::UnknownContext(_))));
}

#[test]
fn test_stopped_context_does_not_evaluate() {
    let (c, ctx) = setup(ContextConfig::default());
    submit_n(&c, ctx, 3);
    c.stop(ctx).unwrap();

    c.run(ctx).unwrap();
    assert_eq!(c.bb_eval(), 0);
    assert_eq!(c.queue_size(Some(ctx)), 3);

    c.restart();
    assert!(!c.all_done());
    assert_eq!(c.context_stop_reason(ctx).unwrap(), ContextStopType::Started);
    c.context(ctx).unwrap().set_opportunistic(false);
    c.run(ctx).unwrap();
    assert_eq!(c.bb_eval(), 3);
}

#[test]
fn test_remove_context_drops_its_queue() {
    let (c, ctx) = setup(ContextConfig::default());
    let other = c.add_context_with_evaluator(
        ContextConfig::default(),
        c.context(ctx).unwrap().current_evaluator().unwrap(),
    );
    submit_n(&c, ctx, 2);
    assert!(c
        .submit(Arc::new(CandidatePoint::new(vec![50.0])), other, EvalType::Blackbox)
        .unwrap());

    c.remove_context(ctx).unwrap();
    assert_eq!(c.queue_size(None), 1);
    assert!(matches!(c.context(ctx), Err(EvalError::UnknownContext(_))));
    assert_eq!(c.context_ids(), vec![other]);
}

#[test]
fn test_remove_running_context_refused() {
    let (c, ctx) = setup(ContextConfig::default());
    submit_n(&c, ctx, 1);
    let block = c.pop_block(Some(ctx)).unwrap();
    assert!(matches!(c.remove_context(ctx), Err(EvalError::ContextBusy(_))));

    c.eval_block(block).unwrap();
    assert_eq!(c.context(ctx).unwrap().currently_running(), 0);
    c.remove_context(ctx).unwrap();
}

#[test]
fn test_subproblem_budget_and_reset() {
    let (c, ctx) = setup(ContextConfig {
        opportunistic: false,
        max_bb_eval_in_subproblem: 2,
        ..Default::default()
    });
    submit_n(&c, ctx, 5);
    c.run(ctx).unwrap();
    assert_eq!(c.bb_eval(), 2);
    assert_eq!(
        c.context_stop_reason(ctx).unwrap(),
        ContextStopType::SubproblemMaxBbEvalReached
    );

    c.run(ctx).unwrap();
    assert_eq!(c.bb_eval(), 2, "step budget is sticky across runs");

    c.context(ctx).unwrap().reset_subproblem_bb_eval(10);
    c.run(ctx).unwrap();
    assert_eq!(c.bb_eval(), 5);
    assert_eq!(c.context(ctx).unwrap().subproblem_bb_eval(), 3);
}

#[test]
fn test_infeasible_points_by_dominance() {
    // f = x, h = max(x - 2, 0)^2: every point here is infeasible.
    let (c, ctx) = setup(ContextConfig {
        opportunistic: false,
        ..Default::default()
    });
    for x in [5.0, 4.0] {
        assert!(c
            .submit(Arc::new(CandidatePoint::new(vec![x])), ctx, EvalType::Blackbox)
            .unwrap());
    }
    c.run(ctx).unwrap();

    let evaluated = c.retrieve_evaluated_points(ctx).unwrap();
    assert!(evaluated.iter().all(|r| r.relative_success()), "4 dominates 5");
    assert_eq!(c.counters().inf_bb_eval(), 2);
    assert_eq!(c.counters().feas_bb_eval(), 0);
    let best = c.context(ctx).unwrap().best_incumbent().unwrap();
    assert_eq!(best.h(EvalType::Blackbox), Some(4.0));
}

#[test]
fn test_direct_output_records() {
    let c = EvalController::new(EvalControlConfig {
        idle_wait_us: 0,
        direct_output: true,
        ..Default::default()
    })
    .unwrap();
    let ctx = c.add_context_with_evaluator(
        ContextConfig {
            opportunistic: false,
            ..Default::default()
        },
        Arc::new(FnEvaluator::new(
            EvalType::Blackbox,
            vec![BbOutputType::Obj],
            |x: &[f64]| EvalOutcome::ok(vec![x[0]]),
        )),
    );
    for x in [3.0, 1.0, 2.0] {
        assert!(c
            .submit(Arc::new(CandidatePoint::new(vec![x])), ctx, EvalType::Blackbox)
            .unwrap());
    }
    c.run(ctx).unwrap();

    let out = c.direct_output();
    assert_eq!(out.history_lines().len(), 3, "one history line per evaluation");
    assert_eq!(out.solution_lines().len(), 2, "3 then 1 improve, 2 does not");
    let mut buf = Vec::new();
    out.write_to(&mut buf).unwrap();
    assert!(String::from_utf8(buf).unwrap().contains("SOLUTION"));
}
