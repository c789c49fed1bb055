use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RankingError;

/// Key under which global fallback weights are stored.
pub const DEFAULT_WEIGHTS_KEY: &str = "_default";

/// Tolerance for floating point error when checking the weight-sum invariant.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

/// One execution of a prompt under one named configuration.
///
/// Created once by the execution layer. Immutable afterwards except for
/// the acceptability flag and the run association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Unique experiment identifier
    pub experiment_id: String,
    /// Name of the prompt used
    pub prompt_name: String,
    /// Name of the configuration used
    pub config_name: String,
    /// Run this experiment belongs to, if it was part of one
    pub run_id: Option<String>,
    /// The actual prompt text sent to the model
    pub rendered_prompt: String,
    /// Model response text (empty on failure)
    pub response: String,
    /// Why the completion finished, as reported by the API
    pub finish_reason: Option<String>,
    /// Whether the request succeeded
    pub success: bool,
    /// Error message if the request failed
    pub error: Option<String>,
    /// Total request time in seconds
    pub duration_seconds: f64,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    /// Estimated cost based on model pricing
    pub estimated_cost_usd: Option<f64>,
    /// Human override marking a result unusable despite technical success
    #[serde(default = "default_true")]
    pub is_acceptable: bool,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// One LLM-judge score for one experiment, produced as part of a batch
/// comparative evaluation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIEvaluation {
    pub evaluation_id: String,
    /// Experiment being scored
    pub experiment_id: String,
    /// Batch this evaluation came from
    pub batch_id: String,
    /// Per-criterion scores, 0-10
    pub criteria_scores: HashMap<String, f64>,
    /// Overall score, 0-10
    pub overall_score: f64,
    /// Rank within the batch, 1 = best
    pub ai_rank: u32,
    /// Judge's free-text explanation
    pub justification: String,
    pub evaluated_at: DateTime<Utc>,
}

/// Lifecycle of a batch AI evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Running,
    Completed,
    Failed,
}

/// Groups all AIEvaluations from one judge invocation for one prompt.
///
/// The judge sees all responses simultaneously and ranks them together.
/// Finalized (completed or failed) exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIEvaluationBatch {
    pub batch_id: String,
    pub prompt_name: String,
    /// Model acting as the judge
    pub model_evaluator: String,
    pub status: BatchStatus,
    /// All evaluations produced by this batch
    pub evaluation_ids: Vec<String>,
    /// Experiment identifiers ordered by the judge's ranking
    pub ranked_experiment_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_cost: f64,
}

/// One evaluator's complete ordering (best to worst) of experiments for
/// a prompt. Immutable once created: one ranking is one evaluator session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanRanking {
    pub ranking_id: String,
    pub prompt_name: String,
    /// Who did the ranking
    pub evaluator_name: String,
    /// Ordered experiment identifiers, best first; a permutation with no duplicates
    pub ranked_experiment_ids: Vec<String>,
    /// AI batch this ranking was derived from, if any
    pub based_on_ai_batch_id: Option<String>,
    /// Kendall tau versus the AI batch ranking, -1 to 1
    pub ai_agreement_score: Option<f64>,
    /// How many of the top 3 match the AI batch ranking
    pub top_3_overlap: Option<usize>,
    /// How many identifiers sit at the same position as in the AI ranking
    pub exact_position_matches: Option<usize>,
    /// Position changes made relative to the AI ordering
    #[serde(default)]
    pub changes_from_ai: Vec<crate::ranking::RankChange>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of an experiment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    ExperimentsCompleted,
    AnalysisCompleted,
}

/// A batch of experiments (all configurations) executed together for one
/// prompt. Run status lives in the store so multiple orchestrator
/// instances stay consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRun {
    pub run_id: String,
    pub prompt_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of configurations tested in this run
    pub num_configs: usize,
    /// Total estimated cost across the run's experiments
    pub total_cost: Option<f64>,
}

/// Named weights for the recommendation algorithm.
///
/// Non-negative and summing to 1.0; the invariant is enforced at
/// construction. The latest write for a given name wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingWeights {
    /// Per-prompt name, or [`DEFAULT_WEIGHTS_KEY`] for the global fallback
    pub prompt_name: String,
    pub quality_weight: f64,
    pub speed_weight: f64,
    pub cost_weight: f64,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl RankingWeights {
    /// Create weights, rejecting any triple that violates the sum invariant.
    pub fn new(
        prompt_name: impl Into<String>,
        quality_weight: f64,
        speed_weight: f64,
        cost_weight: f64,
        updated_by: impl Into<String>,
    ) -> Result<Self, RankingError> {
        let weights = Self {
            prompt_name: prompt_name.into(),
            quality_weight,
            speed_weight,
            cost_weight,
            updated_by: updated_by.into(),
            updated_at: Utc::now(),
        };
        weights.validate()?;
        Ok(weights)
    }

    /// Default split: quality 60%, speed 30%, cost 10%.
    pub fn defaults(prompt_name: impl Into<String>) -> Self {
        Self {
            prompt_name: prompt_name.into(),
            quality_weight: 0.60,
            speed_weight: 0.30,
            cost_weight: 0.10,
            updated_by: "system".to_string(),
            updated_at: Utc::now(),
        }
    }

    /// Check the sum invariant. Used on construction and again on weights
    /// loaded from external sources (config files, the store).
    pub fn validate(&self) -> Result<(), RankingError> {
        let total = self.quality_weight + self.speed_weight + self.cost_weight;
        if self.quality_weight < 0.0
            || self.speed_weight < 0.0
            || self.cost_weight < 0.0
            || (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE
        {
            return Err(RankingError::InvalidWeights { total });
        }
        Ok(())
    }
}

/// Confidence label for a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "HIGH"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::Low => write!(f, "LOW"),
        }
    }
}

/// Best-configuration recommendation for a prompt.
///
/// Derived, not source of truth: recomputed from current evidence every
/// time evidence or weights change, never partially updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub prompt_name: String,
    pub recommended_config: String,
    /// Weighted combination of the three component scores
    pub final_score: f64,
    pub quality_score: f64,
    pub speed_score: f64,
    pub cost_score: f64,
    pub confidence: Confidence,
    /// Reasons behind the confidence label
    pub confidence_factors: Vec<String>,
    pub num_ai_evaluations: usize,
    pub num_human_rankings: usize,
    /// Placement of the recommended config in the human consensus, 0-1;
    /// only present with two or more human rankings
    pub consensus_agreement: Option<f64>,
    /// Human-readable explanation; descriptive only, never used for selection
    pub reasoning: String,
    pub runner_up_config: Option<String>,
    /// Final-score gap to the runner-up, 0 when there is none
    pub score_difference: f64,
    pub generated_at: DateTime<Utc>,
}
