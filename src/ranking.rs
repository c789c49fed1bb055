//! Rank-agreement metrics and consensus building.
//!
//! Kendall tau correlation, positional overlap, and Borda-count
//! aggregation of multiple human orderings. Everything here is pure
//! computation over orderings of experiment identifiers: no failure
//! modes, degrading to zero/empty values on insufficient overlap.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::HumanRanking;

/// Direction an item moved between two orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    /// Moved to a numerically smaller rank
    Up,
    Down,
}

/// One item's position change between two orderings. Ranks are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankChange {
    pub experiment_id: String,
    pub from_rank: usize,
    pub to_rank: usize,
    pub direction: ChangeDirection,
    /// Absolute rank delta
    pub magnitude: usize,
}

/// Agreement metrics between two orderings of experiment identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementResult {
    /// Rank correlation over the shared items, -1 to 1
    pub kendall_tau: f64,
    /// How many of the first three items both orderings share
    pub top_3_overlap: usize,
    /// Indices where both orderings hold the same identifier
    pub exact_position_matches: usize,
    /// Exact matches as a percentage of the first ordering's length
    pub agreement_percentage: f64,
    pub changes: Vec<RankChange>,
    pub num_changes: usize,
}

/// How much a set of rankers disagree with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variability {
    Low,
    Medium,
    High,
}

/// Consensus of multiple human rankings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Aggregate ordering, best first
    pub consensus_ranking: Vec<String>,
    /// Summed Borda points per experiment identifier
    pub confidence_scores: HashMap<String, f64>,
    pub num_rankers: usize,
    /// Agreement of a supplied AI ordering against the consensus
    pub ai_agreement: Option<AgreementResult>,
    pub variability: Variability,
}

/// Kendall tau correlation between two orderings.
///
/// Restricted to the identifiers present in both. Returns 0.0 when fewer
/// than two items are shared: no signal, not an error.
pub fn kendall_tau(ranking_a: &[String], ranking_b: &[String]) -> f64 {
    let set_a: HashSet<&str> = ranking_a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = ranking_b.iter().map(String::as_str).collect();
    let common: HashSet<&str> = set_a.intersection(&set_b).copied().collect();

    if common.len() < 2 {
        return 0.0;
    }

    let filtered_a: Vec<&str> = ranking_a
        .iter()
        .map(String::as_str)
        .filter(|id| common.contains(id))
        .collect();
    let positions_b: HashMap<&str, usize> = ranking_b
        .iter()
        .map(String::as_str)
        .filter(|id| common.contains(id))
        .enumerate()
        .map(|(position, id)| (id, position))
        .collect();

    let n = filtered_a.len();
    let mut concordant: i64 = 0;
    let mut discordant: i64 = 0;

    for i in 0..n {
        for j in (i + 1)..n {
            // filtered_a[i] precedes filtered_a[j] in A; concordant when
            // B preserves that relative order.
            if positions_b[filtered_a[i]] < positions_b[filtered_a[j]] {
                concordant += 1;
            } else {
                discordant += 1;
            }
        }
    }

    let total_pairs = (n * (n - 1) / 2) as f64;
    (concordant - discordant) as f64 / total_pairs
}

/// Agreement metrics between two orderings.
///
/// The orderings need not cover the same identifier set; every metric
/// operates on what the two share and degrades gracefully otherwise.
pub fn calculate_agreement(ranking_a: &[String], ranking_b: &[String]) -> AgreementResult {
    let tau = kendall_tau(ranking_a, ranking_b);

    let top_a: HashSet<&str> = ranking_a.iter().take(3).map(String::as_str).collect();
    let top_b: HashSet<&str> = ranking_b.iter().take(3).map(String::as_str).collect();
    let top_3_overlap = top_a.intersection(&top_b).count();

    let exact_position_matches = ranking_a
        .iter()
        .zip(ranking_b.iter())
        .filter(|(a, b)| a == b)
        .count();

    let agreement_percentage = if ranking_a.is_empty() {
        0.0
    } else {
        exact_position_matches as f64 / ranking_a.len() as f64 * 100.0
    };

    let positions_b: HashMap<&str, usize> = ranking_b
        .iter()
        .enumerate()
        .map(|(position, id)| (id.as_str(), position))
        .collect();

    let mut changes = Vec::new();
    for (position_a, id) in ranking_a.iter().enumerate() {
        if let Some(&position_b) = positions_b.get(id.as_str()) {
            if position_a != position_b {
                changes.push(RankChange {
                    experiment_id: id.clone(),
                    from_rank: position_a + 1,
                    to_rank: position_b + 1,
                    direction: if position_b < position_a {
                        ChangeDirection::Up
                    } else {
                        ChangeDirection::Down
                    },
                    magnitude: position_a.abs_diff(position_b),
                });
            }
        }
    }

    AgreementResult {
        kendall_tau: tau,
        top_3_overlap,
        exact_position_matches,
        agreement_percentage,
        num_changes: changes.len(),
        changes,
    }
}

/// Borda-count consensus of multiple human rankings.
///
/// Each ranker awards `n - position` points to the item at 0-based
/// `position`, where n is the first ranking's length; points are summed
/// per item. Ties break on first appearance across the input rankings
/// (stable sort) - an explicit, arbitrary policy. Returns None when
/// `rankings` is empty.
pub fn calculate_consensus(
    rankings: &[HumanRanking],
    ai_ranking: Option<&[String]>,
) -> Option<ConsensusResult> {
    let first = rankings.first()?;
    let n = first.ranked_experiment_ids.len() as f64;

    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut first_seen: Vec<String> = Vec::new();

    for ranking in rankings {
        for (position, experiment_id) in ranking.ranked_experiment_ids.iter().enumerate() {
            if !scores.contains_key(experiment_id) {
                first_seen.push(experiment_id.clone());
            }
            *scores.entry(experiment_id.clone()).or_insert(0.0) += n - position as f64;
        }
    }

    let mut consensus_ranking = first_seen;
    consensus_ranking.sort_by(|a, b| {
        scores[b.as_str()]
            .partial_cmp(&scores[a.as_str()])
            .unwrap_or(Ordering::Equal)
    });

    let ai_agreement = ai_ranking.map(|ai| calculate_agreement(ai, &consensus_ranking));

    Some(ConsensusResult {
        ai_agreement,
        variability: ranking_variability(rankings),
        num_rankers: rankings.len(),
        confidence_scores: scores,
        consensus_ranking,
    })
}

/// Variability label over a set of rankings: the mean pairwise Kendall
/// tau, bucketed. Fewer than two rankings is "low" by definition - no
/// disagreement is possible, a simplifying policy rather than a finding.
pub fn ranking_variability(rankings: &[HumanRanking]) -> Variability {
    if rankings.len() < 2 {
        return Variability::Low;
    }

    let mut taus = Vec::new();
    for i in 0..rankings.len() {
        for j in (i + 1)..rankings.len() {
            taus.push(kendall_tau(
                &rankings[i].ranked_experiment_ids,
                &rankings[j].ranked_experiment_ids,
            ));
        }
    }

    let average = taus.iter().sum::<f64>() / taus.len() as f64;
    if average >= 0.7 {
        Variability::Low
    } else if average >= 0.4 {
        Variability::Medium
    } else {
        Variability::High
    }
}

/// Variance of the positions a set of experiments occupies across
/// rankings (mean squared deviation of 0-based positions). Fewer than
/// two observed positions yields 0.0.
pub fn position_variance(rankings: &[HumanRanking], experiment_ids: &[String]) -> f64 {
    let mut positions = Vec::new();
    for ranking in rankings {
        for experiment_id in experiment_ids {
            if let Some(position) = ranking
                .ranked_experiment_ids
                .iter()
                .position(|id| id == experiment_id)
            {
                positions.push(position as f64);
            }
        }
    }

    if positions.len() < 2 {
        return 0.0;
    }

    let mean = positions.iter().sum::<f64>() / positions.len() as f64;
    positions.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / positions.len() as f64
}
