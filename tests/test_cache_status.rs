//! Cache and status interplay: a point whose twin is already being evaluated
//! waits for it and adopts its result instead of being dispatched again.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mads_eval::{
    BbOutputType, CandidatePoint, ContextConfig, ContextId, EvalCache, EvalControlConfig,
    EvalController, EvalOutcome, EvalStatus, EvalType, FnEvaluator,
};

const BB: EvalType = EvalType::Blackbox;

fn setup() -> (EvalController, ContextId) {
    let controller = EvalController::new(EvalControlConfig {
        idle_wait_us: 10,
        ..Default::default()
    })
    .unwrap();
    let ctx = controller.add_context_with_evaluator(
        ContextConfig {
            opportunistic: false,
            ..Default::default()
        },
        Arc::new(FnEvaluator::new(BB, vec![BbOutputType::Obj], |x: &[f64]| {
            EvalOutcome::ok(vec![x[0] * 10.0])
        })),
    );
    (controller, ctx)
}

/// Queues `waiting`, then makes its twin appear in flight in the cache, as if
/// another worker had claimed it in between.
fn queue_behind_twin(c: &EvalController, ctx: ContextId) -> (Arc<CandidatePoint>, Arc<CandidatePoint>) {
    let waiting = Arc::new(CandidatePoint::new(vec![4.0]));
    assert!(c.submit(Arc::clone(&waiting), ctx, BB).unwrap());
    let twin = Arc::new(CandidatePoint::new(vec![4.0]));
    let (_, inserted) = c.cache().insert(Arc::clone(&twin));
    assert!(inserted, "twin is the first cached entry");
    twin.set_status(BB, EvalStatus::InProgress).unwrap();
    (waiting, twin)
}

fn wait_for_status(point: &CandidatePoint, status: EvalStatus) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while point.status(BB) != status {
        assert!(Instant::now() < deadline, "point never reached {}", status);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_racing_duplicate_waits_and_adopts() {
    let (c, ctx) = setup();
    let (waiting, twin) = queue_behind_twin(&c, ctx);

    thread::scope(|s| {
        let run = s.spawn(|| c.run(ctx));

        wait_for_status(&waiting, EvalStatus::Wait);
        assert_eq!(c.bb_eval(), 0, "a waiting point is not dispatched");

        twin.set_outputs(BB, vec![-7.0], EvalStatus::Ok, &[BbOutputType::Obj])
            .unwrap();
        run.join().unwrap().unwrap();
    });

    assert_eq!(waiting.status(BB), EvalStatus::Ok);
    assert_eq!(waiting.f(BB), Some(-7.0), "result of the twin, not a new evaluation");
    assert_eq!(c.bb_eval(), 0, "adopted results are not counted");
    assert_eq!(c.cache().hit_count(), 1);
    assert_eq!(c.nb_eval(), 1, "the adoption counts as an evaluation through the cache");

    let evaluated = c.retrieve_evaluated_points(ctx).unwrap();
    assert_eq!(evaluated.len(), 1);
    assert!(evaluated[0].relative_success(), "adopted result can still improve the incumbent");
}

#[test]
fn test_waiting_point_adopts_twin_error() {
    let (c, ctx) = setup();
    let (waiting, twin) = queue_behind_twin(&c, ctx);

    thread::scope(|s| {
        let run = s.spawn(|| c.run(ctx));
        wait_for_status(&waiting, EvalStatus::Wait);
        twin.set_status(BB, EvalStatus::Error).unwrap();
        run.join().unwrap().unwrap();
    });

    assert_eq!(waiting.status(BB), EvalStatus::Error);
    assert!(c.context(ctx).unwrap().best_incumbent().is_none());
}

#[test]
fn test_evaluation_updates_cached_entry() {
    let (c, ctx) = setup();
    let p = Arc::new(CandidatePoint::new(vec![2.0]));
    assert!(c.submit(Arc::clone(&p), ctx, BB).unwrap());
    c.run(ctx).unwrap();

    let cached = c.cache().find(&p).unwrap();
    assert!(Arc::ptr_eq(&cached, &p), "first submission becomes the cached entry");
    assert_eq!(cached.f(BB), Some(20.0));
    assert_eq!(p.bb_eval_count(), 1);
    assert_eq!(c.cache().hit_count(), 0);
}

#[test]
fn test_no_cache_context_bypasses_cache() {
    let (c, ctx) = setup();
    c.context(ctx).unwrap().set_use_cache(false);
    let p = Arc::new(CandidatePoint::new(vec![1.0]));
    assert!(c.eval_single_point(&p, ctx, None).unwrap());
    assert!(c.cache().is_empty());
    assert_eq!(c.bb_eval(), 1);
}
