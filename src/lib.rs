//! # MADS-EVAL-RS: concurrent evaluation control for mesh-adaptive direct search
//!
//! The part of a derivative-free optimizer that sits between the algorithm
//! steps proposing trial points and the expensive functions evaluating them.
//!
//! ## Overview
//!
//! Algorithm steps submit [`CandidatePoint`]s, tagged with the
//! [`ContextId`] of the optimization they belong to, into one shared priority
//! queue. Worker threads pop blocks of compatible requests, call the
//! registered [`Evaluator`] outside every lock, then update point statuses,
//! the cache, counters, success types and incumbents, and check stop
//! conditions.
//!
//! Several optimizations (contexts) can run at once on one [`EvalController`].
//! Each one has an owning worker ([`EvalController::run`]); spare workers
//! ([`EvalController::run_helper`]) pull whatever is queued. [`WorkerPool`]
//! arranges both on a rayon pool.
//!
//! ## Evaluator kinds
//!
//! - **Blackbox** (`EvalType::Blackbox`): the expensive ground truth.
//! - **Surrogate** (`EvalType::Surrogate`): a cheaper approximation; every
//!   `surrogate_cost` evaluations count as one blackbox evaluation.
//! - **Model** (`EvalType::Model`): quadratic models built by the algorithm.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use mads_eval::{
//!     BbOutputType, CandidatePoint, ContextConfig, EvalControlConfig, EvalController,
//!     EvalOutcome, EvalType, FnEvaluator,
//! };
//!
//! let controller = EvalController::new(EvalControlConfig::default()).unwrap();
//! let sphere = FnEvaluator::new(EvalType::Blackbox, vec![BbOutputType::Obj], |x: &[f64]| {
//!     EvalOutcome::ok(vec![x.iter().map(|v| v * v).sum()])
//! });
//! let ctx = controller.add_context_with_evaluator(ContextConfig::default(), Arc::new(sphere));
//!
//! for x in [2.0, 1.0, -3.0] {
//!     controller
//!         .submit(Arc::new(CandidatePoint::new(vec![x, 0.0])), ctx, EvalType::Blackbox)
//!         .unwrap();
//! }
//! controller.run(ctx).unwrap();
//!
//! // Opportunistic by default: the first success ends the run.
//! assert_eq!(controller.bb_eval(), 1);
//! let best = controller.context(ctx).unwrap().best_incumbent().unwrap();
//! assert_eq!(best.f(EvalType::Blackbox), Some(4.0));
//! ```

pub mod barrier;
pub mod cache;
pub mod callback;
pub mod config;
pub mod context;
pub mod controller;
pub mod counters;
mod dispatch;
pub mod error;
pub mod evaluator;
pub mod ordering;
pub mod output;
pub mod point;
pub mod pool;
pub mod queue;
pub mod status;
pub mod stop;
pub mod success;
pub mod types;

// Re-export main types
pub use barrier::{Barrier, TwoIncumbentBarrier};
pub use cache::{EvalCache, InMemoryCache};
pub use callback::{EvalCallbacks, OpportunisticSignal};
pub use config::{ContextConfig, EvalControlConfig};
pub use context::{Context, ContextId};
pub use controller::{DrainSummary, EvalController, QueueFill};
pub use counters::{GlobalCounters, SuccessStats};
pub use error::{BoxError, EvalError, Result};
pub use evaluator::{EvalOutcome, Evaluator, FnEvaluator};
pub use ordering::{AppliedOrdering, OrderingPolicy, SortType};
pub use point::{CandidatePoint, EvalRecord, MeshDescriptor, Provenance};
pub use pool::WorkerPool;
pub use queue::{Block, QueuedRequest};
pub use status::EvalStatus;
pub use stop::{ContextStopType, GlobalStopType};
pub use types::{BbOutputType, EvalType, StepType, SuccessType};
