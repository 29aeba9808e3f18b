//! Queue ordering policies.
//!
//! Sorting is ascending in priority: after a sort the request that compares
//! greatest sits at the back of the queue and is popped first. A comparator
//! returning `Less` therefore means "lower priority".
//!
//! A policy that needs side data (successful directions, evaluations of
//! another kind) is resolved once per sort. When the data is missing the sort
//! falls back to [`AppliedOrdering::Lexicographic`], which leaves the queue
//! in submission order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::ContextId;
use crate::queue::{EvalQueue, QueuedRequest};
use crate::success::FhValue;
use crate::types::EvalType;

/// Serializable selector of a built-in policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortType {
    #[default]
    Lexicographic,
    Random,
    /// Closest direction to the last successful one first.
    DirLastSuccess,
    /// Best surrogate value first.
    Surrogate,
    /// Best quadratic model value first.
    QuadraticModel,
}

/// User comparator; `Less` means `a` has lower priority than `b`.
pub type RequestComparator =
    Arc<dyn Fn(&QueuedRequest, &QueuedRequest) -> Ordering + Send + Sync>;

#[derive(Clone)]
pub enum OrderingPolicy {
    Lexicographic,
    Random,
    ByDirection,
    /// Order by the outcome of an earlier evaluation of another kind.
    ByEvaluatedKind(EvalType),
    UserSupplied(RequestComparator),
}

impl From<SortType> for OrderingPolicy {
    fn from(sort: SortType) -> Self {
        match sort {
            SortType::Lexicographic => Self::Lexicographic,
            SortType::Random => Self::Random,
            SortType::DirLastSuccess => Self::ByDirection,
            SortType::Surrogate => Self::ByEvaluatedKind(EvalType::Surrogate),
            SortType::QuadraticModel => Self::ByEvaluatedKind(EvalType::Model),
        }
    }
}

impl fmt::Debug for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lexicographic => write!(f, "Lexicographic"),
            Self::Random => write!(f, "Random"),
            Self::ByDirection => write!(f, "ByDirection"),
            Self::ByEvaluatedKind(et) => write!(f, "ByEvaluatedKind({})", et),
            Self::UserSupplied(_) => write!(f, "UserSupplied"),
        }
    }
}

/// Ordering actually applied by a sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedOrdering {
    Lexicographic,
    Random,
    ByDirection,
    ByEvaluatedKind(EvalType),
    UserSupplied,
}

impl fmt::Display for AppliedOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lexicographic => write!(f, "lexicographic"),
            Self::Random => write!(f, "random"),
            Self::ByDirection => write!(f, "direction of last success"),
            Self::ByEvaluatedKind(et) => write!(f, "{} values", et),
            Self::UserSupplied => write!(f, "user comparator"),
        }
    }
}

/// Side data a sort may need.
pub struct SortInputs<'a> {
    /// Last successful direction per context.
    pub directions: &'a HashMap<ContextId, Vec<f64>>,
    pub rng: &'a mut StdRng,
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return f64::NEG_INFINITY;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        f64::NEG_INFINITY
    } else {
        dot / (na * nb)
    }
}

fn direction_score(req: &QueuedRequest, directions: &HashMap<ContextId, Vec<f64>>) -> f64 {
    match (req.point().direction(), directions.get(&req.context())) {
        (Some(d), Some(last)) => cosine(d, last),
        _ => f64::NEG_INFINITY,
    }
}

/// Decides which ordering `policy` amounts to for the current queue.
pub fn resolve(
    policy: &OrderingPolicy,
    queue: &EvalQueue,
    directions: &HashMap<ContextId, Vec<f64>>,
) -> AppliedOrdering {
    match policy {
        OrderingPolicy::Lexicographic => AppliedOrdering::Lexicographic,
        OrderingPolicy::Random => AppliedOrdering::Random,
        OrderingPolicy::UserSupplied(_) => AppliedOrdering::UserSupplied,
        OrderingPolicy::ByDirection => {
            if directions.is_empty() {
                debug!("no successful direction yet, ordering falls back to lexicographic");
                AppliedOrdering::Lexicographic
            } else {
                AppliedOrdering::ByDirection
            }
        }
        OrderingPolicy::ByEvaluatedKind(et) => {
            if queue.iter().all(|r| r.point().is_eval_ok(*et)) {
                AppliedOrdering::ByEvaluatedKind(*et)
            } else {
                debug!(
                    "some queued points lack a {} evaluation, ordering falls back to lexicographic",
                    et
                );
                AppliedOrdering::Lexicographic
            }
        }
    }
}

/// Sorts `queue` by `policy` and returns the ordering applied.
pub fn sort_queue(
    queue: &mut EvalQueue,
    policy: &OrderingPolicy,
    inputs: SortInputs<'_>,
) -> AppliedOrdering {
    let applied = resolve(policy, queue, inputs.directions);
    let items = queue.as_mut_slice();
    match (applied, policy) {
        (AppliedOrdering::Lexicographic, _) => {}
        (AppliedOrdering::Random, _) => items.shuffle(inputs.rng),
        (AppliedOrdering::ByDirection, _) => {
            let dirs = inputs.directions;
            items.sort_by(|a, b| direction_score(a, dirs).total_cmp(&direction_score(b, dirs)));
        }
        (AppliedOrdering::ByEvaluatedKind(et), _) => {
            // Smaller (h, f) is higher priority.
            items.sort_by(|a, b| {
                match (FhValue::of(a.point(), et), FhValue::of(b.point(), et)) {
                    (Some(fa), Some(fb)) => fb.h.total_cmp(&fa.h).then(fb.f.total_cmp(&fa.f)),
                    _ => Ordering::Equal,
                }
            });
        }
        (AppliedOrdering::UserSupplied, OrderingPolicy::UserSupplied(cmp)) => {
            items.sort_by(|a, b| cmp(a, b));
        }
        (AppliedOrdering::UserSupplied, _) => {}
    }
    debug!("queue of {} requests sorted by {}", queue.len(), applied);
    applied
}
