use thiserror::Error;

/// Errors surfaced by the ranking and recommendation core.
///
/// Missing evidence (no evaluations, no cost data, a single configuration)
/// is never an error: those cases degrade to neutral scores or absent
/// optional fields instead.
#[derive(Debug, Error)]
pub enum RankingError {
    /// No successful experiments exist for the prompt, so there is
    /// nothing to rank. The only fatal condition for a recommendation.
    #[error("no successful experiments found for prompt: {0}")]
    NoExperiments(String),

    /// Quality, speed, and cost weights must be non-negative and sum to 1.0.
    #[error("ranking weights must sum to 1.0, got {total:.3}")]
    InvalidWeights { total: f64 },

    /// The result store failed to produce the requested snapshot.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
