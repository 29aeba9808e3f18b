//! Cache of evaluated points, keyed by coordinates.
//!
//! The controller consults the cache at submission (to refuse points already
//! in flight) and at dispatch (to claim a point or observe its twin). The
//! cache stores shared handles, so a WAIT point sees the twin's result as soon
//! as the evaluating worker writes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EvalError, Result};
use crate::point::{CandidatePoint, CoordKey};
use crate::types::EvalType;

/// Storage of evaluated points shared by every context.
pub trait EvalCache: Send + Sync {
    /// Looks up the point with the same coordinates.
    fn find(&self, point: &CandidatePoint) -> Option<Arc<CandidatePoint>>;

    /// Inserts `point` unless a point with the same coordinates exists.
    /// Returns the stored handle and whether it was inserted.
    fn insert(&self, point: Arc<CandidatePoint>) -> (Arc<CandidatePoint>, bool);

    /// Copies the `eval_type` record of `point` onto the cached entry.
    fn update(&self, point: &CandidatePoint, eval_type: EvalType) -> Result<()>;

    /// Counts one reuse of an evaluated point in place of a new evaluation.
    fn record_hit(&self);

    /// Number of evaluations answered by an already evaluated point.
    fn hit_count(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

/// Hash-map cache with a reader-writer lock.
#[derive(Default)]
pub struct InMemoryCache {
    points: RwLock<HashMap<CoordKey, Arc<CandidatePoint>>>,
    hits: AtomicUsize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvalCache for InMemoryCache {
    fn find(&self, point: &CandidatePoint) -> Option<Arc<CandidatePoint>> {
        self.points.read().get(&point.key()).cloned()
    }

    fn insert(&self, point: Arc<CandidatePoint>) -> (Arc<CandidatePoint>, bool) {
        let mut map = self.points.write();
        match map.get(&point.key()) {
            Some(existing) => (Arc::clone(existing), false),
            None => {
                map.insert(point.key(), Arc::clone(&point));
                (point, true)
            }
        }
    }

    fn update(&self, point: &CandidatePoint, eval_type: EvalType) -> Result<()> {
        let cached = self
            .find(point)
            .ok_or(EvalError::PointNotInCache(point.tag()))?;
        if std::ptr::eq(cached.as_ref(), point) {
            return Ok(());
        }
        cached
            .adopt_record(eval_type, point.record(eval_type))
            .map_err(|_| EvalError::CacheUpdate(point.tag()))
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn hit_count(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    fn len(&self) -> usize {
        self.points.read().len()
    }

    fn clear(&self) {
        self.points.write().clear();
        self.hits.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::EvalStatus;
    use crate::types::BbOutputType;

    #[test]
    fn test_insert_dedups_by_coordinates() {
        let cache = InMemoryCache::new();
        let a = Arc::new(CandidatePoint::new(vec![1.0, 2.0]));
        let b = Arc::new(CandidatePoint::new(vec![1.0, 2.0]));
        let (_, inserted) = cache.insert(Arc::clone(&a));
        assert!(inserted);
        let (stored, inserted) = cache.insert(b);
        assert!(!inserted);
        assert_eq!(stored.tag(), a.tag(), "first insertion wins");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_update_copies_record_to_cached_entry() {
        let cache = InMemoryCache::new();
        let cached = Arc::new(CandidatePoint::new(vec![0.5]));
        cache.insert(Arc::clone(&cached));

        let twin = CandidatePoint::new(vec![0.5]);
        twin.set_status(EvalType::Blackbox, EvalStatus::InProgress).unwrap();
        twin.set_outputs(EvalType::Blackbox, vec![7.0], EvalStatus::Ok, &[BbOutputType::Obj])
            .unwrap();
        cached.set_status(EvalType::Blackbox, EvalStatus::InProgress).unwrap();
        cache.update(&twin, EvalType::Blackbox).unwrap();
        assert_eq!(cached.f(EvalType::Blackbox), Some(7.0));
    }

    #[test]
    fn test_update_missing_point_fails() {
        let cache = InMemoryCache::new();
        let p = CandidatePoint::new(vec![9.0]);
        assert!(matches!(
            cache.update(&p, EvalType::Blackbox),
            Err(EvalError::PointNotInCache(_))
        ));
    }

    #[test]
    fn test_clear_resets_hits() {
        let cache = InMemoryCache::new();
        cache.record_hit();
        assert_eq!(cache.hit_count(), 1);
        cache.clear();
        assert_eq!(cache.hit_count(), 0);
        assert!(cache.is_empty());
    }
}
