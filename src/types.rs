//! Core type definitions shared by the evaluation controller.
//!
//! | Type | Role |
//! |---|---|
//! | [`EvalType`] | Which evaluator kind handles a request (blackbox, surrogate, model) |
//! | [`SuccessType`] | Ordered outcome of comparing a point to the incumbent |
//! | [`BbOutputType`] | Contract of one evaluator output (objective, constraint, extra) |
//! | [`StepType`] | Algorithm step that generated a candidate point |

use std::fmt;

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────────────────────────────────────
// Evaluator kinds
// ──────────────────────────────────────────────────────────────────────────────

/// Kind of evaluator a request is destined for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalType {
    /// Ground-truth, expensive blackbox.
    #[default]
    Blackbox,
    /// Cheaper user-provided approximation of the blackbox.
    Surrogate,
    /// Internal quadratic model.
    Model,
}

impl EvalType {
    /// All kinds, in record order.
    pub const ALL: [EvalType; 3] = [EvalType::Blackbox, EvalType::Surrogate, EvalType::Model];

    /// Index of this kind in per-kind arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Blackbox => 0,
            Self::Surrogate => 1,
            Self::Model => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Blackbox => "BB",
            Self::Surrogate => "SURROGATE",
            Self::Model => "MODEL",
        }
    }
}

impl fmt::Display for EvalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Success
// ──────────────────────────────────────────────────────────────────────────────

/// Outcome of comparing an evaluated point with the current incumbent.
///
/// Ordered: `Unsuccessful < PartialSuccess < FullSuccess`, so the success of a
/// batch is the maximum over its points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SuccessType {
    /// Not evaluated yet, or no improvement.
    #[default]
    Unsuccessful,
    /// Improves the constraint violation at the expense of the objective.
    PartialSuccess,
    /// Dominates the incumbent.
    FullSuccess,
}

impl SuccessType {
    pub fn is_success(self) -> bool {
        self >= Self::PartialSuccess
    }
}

impl fmt::Display for SuccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsuccessful => write!(f, "Unsuccessful"),
            Self::PartialSuccess => write!(f, "Partial success"),
            Self::FullSuccess => write!(f, "Full success"),
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Output contract
// ──────────────────────────────────────────────────────────────────────────────

/// Meaning of one raw evaluator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BbOutputType {
    /// Objective to minimize.
    Obj,
    /// Constraint `c(x) <= 0` handled by the progressive barrier.
    Pb,
    /// Constraint `c(x) <= 0` handled by the extreme barrier.
    Eb,
    /// Extra output, carried but not interpreted.
    Extra,
}

impl BbOutputType {
    pub fn is_constraint(self) -> bool {
        matches!(self, Self::Pb | Self::Eb)
    }
}

impl fmt::Display for BbOutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Obj => write!(f, "OBJ"),
            Self::Pb => write!(f, "PB"),
            Self::Eb => write!(f, "EB"),
            Self::Extra => write!(f, "EXTRA_O"),
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Generating step
// ──────────────────────────────────────────────────────────────────────────────

/// Algorithm step that produced a candidate point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepType {
    Initialization,
    /// Speculative search along the last successful direction.
    SpeculativeSearch,
    /// Quadratic model search.
    ModelSearch,
    /// Search through a user surrogate or a sub-problem.
    UserSearch,
    Poll,
    #[default]
    Unknown,
}

impl StepType {
    pub const ALL: [StepType; 6] = [
        StepType::Initialization,
        StepType::SpeculativeSearch,
        StepType::ModelSearch,
        StepType::UserSearch,
        StepType::Poll,
        StepType::Unknown,
    ];
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialization => "Initialization",
            Self::SpeculativeSearch => "Speculative search",
            Self::ModelSearch => "Quad model search",
            Self::UserSearch => "User search",
            Self::Poll => "Poll",
            Self::Unknown => "Unknown step",
        };
        write!(f, "{}", s)
    }
}
