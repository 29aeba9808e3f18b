//! Controller and context configuration.
//!
//! Budgets follow one convention: 0 means no limit. Both structs derive serde
//! so an application can read them from its own parameter files.

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};
use crate::ordering::SortType;
use crate::types::EvalType;

/// Configuration shared by every context of a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalControlConfig {
    /// Maximum number of blackbox points per evaluator call. Default: 1.
    pub bb_max_block_size: usize,

    /// Maximum number of surrogate points per evaluator call. Default: 1.
    pub surrogate_max_block_size: usize,

    /// Maximum number of model points per evaluator call. Default: unbounded.
    pub model_max_block_size: usize,

    /// Maximum number of blackbox evaluations. 0 means no limit.
    pub max_bb_eval: usize,

    /// Maximum number of surrogate evaluations. 0 means no limit.
    pub max_surrogate_eval: usize,

    /// Maximum number of evaluations sent plus cache hits. 0 means no limit.
    pub max_eval: usize,

    /// Maximum number of blocks evaluated. 0 means no limit.
    pub max_block_eval: usize,

    /// Maximum number of model evaluations per context. 0 means no limit.
    pub max_model_eval: usize,

    /// Number of surrogate evaluations that cost one blackbox evaluation.
    /// Default: 100.
    pub surrogate_cost: usize,

    /// Remove a context's remaining requests when its run ends. Default: true.
    pub clear_queue_on_exit: bool,

    /// Sleep between two polls of an idle worker, in microseconds.
    /// 0 yields instead of sleeping. Default: 50.
    pub idle_wait_us: u64,

    /// Seed of the random ordering policy. Default: 0.
    pub random_seed: u64,

    /// Number of worker threads, the calling thread included.
    /// 0 uses rayon's default. Default: 0.
    pub nb_threads: usize,

    /// Record history and solution lines for evaluated points. Default: false.
    pub direct_output: bool,
}

impl Default for EvalControlConfig {
    fn default() -> Self {
        Self {
            bb_max_block_size: 1,
            surrogate_max_block_size: 1,
            model_max_block_size: usize::MAX,
            max_bb_eval: 0,
            max_surrogate_eval: 0,
            max_eval: 0,
            max_block_eval: 0,
            max_model_eval: 0,
            surrogate_cost: 100,
            clear_queue_on_exit: true,
            idle_wait_us: 50,
            random_seed: 0,
            nb_threads: 0,
            direct_output: false,
        }
    }
}

impl EvalControlConfig {
    /// Checks the values an evaluator loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("bb_max_block_size", self.bb_max_block_size),
            ("surrogate_max_block_size", self.surrogate_max_block_size),
            ("model_max_block_size", self.model_max_block_size),
        ] {
            if size == 0 {
                return Err(EvalError::InvalidConfig(format!("{} must be at least 1", name)));
            }
        }
        if self.surrogate_cost == 0 {
            return Err(EvalError::InvalidConfig(
                "surrogate_cost must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Block size cap for an evaluator kind.
    pub fn max_block_size(&self, eval_type: EvalType) -> usize {
        match eval_type {
            EvalType::Blackbox => self.bb_max_block_size,
            EvalType::Surrogate => self.surrogate_max_block_size,
            EvalType::Model => self.model_max_block_size,
        }
    }
}

/// Per-context settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Stop dispatching this context's requests after a full success.
    /// Default: true.
    pub opportunistic: bool,

    /// Refuse and coordinate points already known to the cache. Default: true.
    pub use_cache: bool,

    /// The surrogate stands in for the blackbox as the optimized function.
    pub surrogate_optimization: bool,

    /// Blackbox budget of one lap. 0 means no limit.
    pub lap_max_bb_eval: usize,

    /// Blackbox budget of a subproblem. 0 means no limit.
    pub max_bb_eval_in_subproblem: usize,

    /// Ordering applied when the queue is sorted. Default: lexicographic.
    pub sort: SortType,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            opportunistic: true,
            use_cache: true,
            surrogate_optimization: false,
            lap_max_bb_eval: 0,
            max_bb_eval_in_subproblem: 0,
            sort: SortType::Lexicographic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EvalControlConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.surrogate_cost, 100);
        assert_eq!(cfg.max_block_size(EvalType::Blackbox), 1);
        assert_eq!(cfg.max_block_size(EvalType::Model), usize::MAX);
        assert!(ContextConfig::default().opportunistic);
    }

    #[test]
    fn test_invalid_values() {
        let cfg = EvalControlConfig {
            surrogate_cost: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(EvalError::InvalidConfig(_))));
        let cfg = EvalControlConfig {
            bb_max_block_size: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("bb_max_block_size"), "got: {}", err);
    }

    #[test]
    fn test_json_partial_config() {
        let cfg: EvalControlConfig =
            serde_json::from_str(r#"{"max_bb_eval": 20, "bb_max_block_size": 4}"#).unwrap();
        assert_eq!(cfg.max_bb_eval, 20);
        assert_eq!(cfg.bb_max_block_size, 4);
        assert_eq!(cfg.surrogate_cost, 100, "missing fields take defaults");

        let ctx: ContextConfig =
            serde_json::from_str(r#"{"opportunistic": false, "sort": "DirLastSuccess"}"#).unwrap();
        assert!(!ctx.opportunistic);
        assert_eq!(ctx.sort, SortType::DirLastSuccess);
        assert!(ctx.use_cache);
    }
}
