//! Evaluation agent: score a retrieval result against ground truth
//!
//! Computes precision/recall/F1 over the top-k candidate paths plus budget
//! coverage, and proposes widening actions when thresholds are missed. The
//! agent never raises; a degenerate input produces a degenerate (but valid)
//! evaluation.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::resolver::Resolution;
use crate::retriever::DependencyContext;

/// Widening actions the agent can propose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalAction {
    EnableCrossEncoder,
    IncreaseWalkDepth,
    ExpandRelated,
    IncreaseTokenBudget,
}

impl EvalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnableCrossEncoder => "enable_cross_encoder",
            Self::IncreaseWalkDepth => "increase_walk_depth",
            Self::ExpandRelated => "expand_related",
            Self::IncreaseTokenBudget => "increase_token_budget",
        }
    }
}

impl std::fmt::Display for EvalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Agent thresholds
#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub precision_threshold: f64,
    pub recall_threshold: f64,
    /// Cap on k; defaults to the candidate count
    pub max_k: Option<usize>,
    pub coverage_threshold: f64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            precision_threshold: 0.5,
            recall_threshold: 0.5,
            max_k: None,
            coverage_threshold: 0.85,
        }
    }
}

/// One evaluation outcome
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub iteration: usize,
    pub k: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Fraction of the token budget consumed
    pub coverage: f64,
    pub hits: usize,
    pub passed: bool,
    /// Deduplicated, ordered action set
    pub actions: Vec<EvalAction>,
}

/// Score a resolution + context against ground truth
pub struct EvaluationAgent {
    config: EvalConfig,
}

impl EvaluationAgent {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        resolution: &Resolution,
        context: &DependencyContext,
        ground_truth: &[String],
        iteration: usize,
    ) -> Evaluation {
        let candidate_count = resolution.candidates.len();
        let k = self
            .config
            .max_k
            .unwrap_or(candidate_count)
            .clamp(1, candidate_count.max(1));

        let truth: HashSet<&str> = ground_truth.iter().map(String::as_str).collect();
        let top_k: Vec<&str> = resolution
            .candidates
            .iter()
            .take(k)
            .map(|c| c.path.as_str())
            .collect();
        let hits = top_k.iter().filter(|p| truth.contains(**p)).count();

        let precision = if candidate_count == 0 {
            0.0
        } else {
            hits as f64 / k as f64
        };
        let recall = if truth.is_empty() {
            1.0
        } else {
            hits as f64 / truth.len() as f64
        };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        let coverage = if context.telemetry.token_budget > 0 {
            context.tokens_used as f64 / context.telemetry.token_budget as f64
        } else {
            0.0
        };

        let mut actions: BTreeSet<EvalAction> = BTreeSet::new();
        if precision < self.config.precision_threshold {
            actions.insert(EvalAction::EnableCrossEncoder);
            actions.insert(EvalAction::IncreaseWalkDepth);
            actions.insert(EvalAction::ExpandRelated);
            if precision < self.config.precision_threshold.min(0.4) {
                actions.insert(EvalAction::IncreaseTokenBudget);
            }
        }
        if recall < self.config.recall_threshold {
            actions.insert(EvalAction::IncreaseWalkDepth);
            actions.insert(EvalAction::ExpandRelated);
        }
        if coverage > self.config.coverage_threshold {
            actions.insert(EvalAction::IncreaseTokenBudget);
        }

        let passed = precision >= self.config.precision_threshold
            && recall >= self.config.recall_threshold;

        Evaluation {
            iteration,
            k,
            precision,
            recall,
            f1,
            coverage,
            hits,
            passed,
            actions: actions.into_iter().collect(),
        }
    }
}
