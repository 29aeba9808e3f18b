//! Queued evaluation requests and the queue storage.
//!
//! The queue is a deque ordered by priority: the back holds the request that
//! will be popped first. New requests enter at the front, so a queue that is
//! never sorted is served in submission order.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::context::ContextId;
use crate::point::CandidatePoint;
use crate::types::{EvalType, StepType, SuccessType};

/// A candidate point waiting for one evaluator kind.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    point: Arc<CandidatePoint>,
    context: ContextId,
    eval_type: EvalType,
    pub(crate) success: SuccessType,
    pub(crate) relative_success: bool,
}

impl QueuedRequest {
    pub fn new(point: Arc<CandidatePoint>, context: ContextId, eval_type: EvalType) -> Self {
        Self {
            point,
            context,
            eval_type,
            success: SuccessType::Unsuccessful,
            relative_success: false,
        }
    }

    pub fn point(&self) -> &Arc<CandidatePoint> {
        &self.point
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn eval_type(&self) -> EvalType {
        self.eval_type
    }

    /// Step that generated the point.
    pub fn step(&self) -> StepType {
        self.point.provenance().step
    }

    /// Success computed after evaluation.
    pub fn success(&self) -> SuccessType {
        self.success
    }

    /// Whether the point became its context's best incumbent.
    pub fn relative_success(&self) -> bool {
        self.relative_success
    }

    /// Same coordinates and same evaluator kind.
    pub fn same_work(&self, other: &QueuedRequest) -> bool {
        self.eval_type == other.eval_type && self.point.same_coords(&other.point)
    }
}

/// Requests handed to one evaluator call.
pub type Block = Vec<QueuedRequest>;

/// Priority-ordered storage; callers hold the controller's queue lock.
#[derive(Debug, Default)]
pub struct EvalQueue {
    items: VecDeque<QueuedRequest>,
}

impl EvalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains_work(&self, request: &QueuedRequest) -> bool {
        self.items.iter().any(|r| r.same_work(request))
    }

    /// Inserts at the lowest priority.
    pub fn push_low(&mut self, request: QueuedRequest) {
        self.items.push_front(request);
    }

    /// Request at `index` (0 is the lowest priority).
    pub fn get(&self, index: usize) -> Option<&QueuedRequest> {
        self.items.get(index)
    }

    /// Requests from lowest to highest priority.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &QueuedRequest> {
        self.items.iter()
    }

    pub fn as_mut_slice(&mut self) -> &mut [QueuedRequest] {
        self.items.make_contiguous()
    }

    /// Removes the request at `index` (0 is the lowest priority).
    pub fn remove(&mut self, index: usize) -> Option<QueuedRequest> {
        self.items.remove(index)
    }

    /// Removes every request matching `pred`. Returns how many were removed.
    pub fn remove_where<P>(&mut self, mut pred: P) -> usize
    where
        P: FnMut(&QueuedRequest) -> bool,
    {
        let before = self.items.len();
        self.items.retain(|r| !pred(r));
        before - self.items.len()
    }

    /// Removes the `n` lowest-priority requests matching `pred`.
    pub fn remove_lowest_where<P>(&mut self, mut n: usize, mut pred: P) -> usize
    where
        P: FnMut(&QueuedRequest) -> bool,
    {
        let before = self.items.len();
        self.items.retain(|r| {
            if n > 0 && pred(r) {
                n -= 1;
                false
            } else {
                true
            }
        });
        before - self.items.len()
    }

    pub fn count_where<P>(&self, pred: P) -> usize
    where
        P: Fn(&QueuedRequest) -> bool,
    {
        self.items.iter().filter(|r| pred(*r)).count()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }
}
