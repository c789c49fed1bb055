//! Recommendation engine: weighted quality/speed/cost scoring, confidence
//! estimation, and best-configuration selection for a prompt.
//!
//! Pure computation over snapshots supplied by the [`ResultStore`].
//! Partial evidence (no evaluations, no cost figures, a single
//! configuration) degrades to neutral values; the only fatal condition
//! is having no successful experiments at all.

use chrono::Utc;
use std::cmp::Ordering;

use crate::error::RankingError;
use crate::models::{
    AIEvaluation, Confidence, ExperimentResult, HumanRanking, RankingWeights, Recommendation,
};
use crate::ranking::{calculate_consensus, position_variance};
use crate::storage::ResultStore;

/// Component scores for one configuration.
#[derive(Debug, Clone)]
struct ConfigScore {
    final_score: f64,
    quality: f64,
    speed: f64,
    cost: f64,
    avg_duration: f64,
    avg_cost: Option<f64>,
}

/// Quality score in [0, 10] for one configuration.
///
/// Human rankings take absolute precedence: when any exist for the
/// prompt, AI evaluations are ignored even if present. A ranked
/// experiment at 0-based position p of m items scores `10 * (1 - p/m)`;
/// samples are averaged across rankings and experiments. Without human
/// signal, the mean AI overall score is used. With no evidence at all
/// the score is 5.0: "unknown", not "average performer".
pub fn quality_score(
    config_name: &str,
    ai_evals: &[AIEvaluation],
    human_rankings: &[HumanRanking],
    all_experiments: &[ExperimentResult],
) -> f64 {
    let config_experiment_ids: Vec<&str> = all_experiments
        .iter()
        .filter(|e| e.config_name == config_name)
        .map(|e| e.experiment_id.as_str())
        .collect();

    if !human_rankings.is_empty() {
        let mut scores = Vec::new();
        for ranking in human_rankings {
            let num_items = ranking.ranked_experiment_ids.len();
            for experiment_id in &config_experiment_ids {
                if let Some(position) = ranking
                    .ranked_experiment_ids
                    .iter()
                    .position(|id| id == experiment_id)
                {
                    scores.push(10.0 * (1.0 - position as f64 / num_items as f64));
                }
            }
        }
        return if scores.is_empty() {
            5.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
    }

    let ai_scores: Vec<f64> = ai_evals
        .iter()
        .filter(|e| config_experiment_ids.contains(&e.experiment_id.as_str()))
        .map(|e| e.overall_score)
        .collect();

    if ai_scores.is_empty() {
        5.0
    } else {
        ai_scores.iter().sum::<f64>() / ai_scores.len() as f64
    }
}

/// Confidence label plus the factors behind it.
///
/// An additive evidence-weight heuristic, not a probability: points for
/// having AI evidence, human evidence, agreeing humans, and humans
/// confirming the AI ranking.
pub fn confidence(
    config_name: &str,
    ai_evals: &[AIEvaluation],
    human_rankings: &[HumanRanking],
    all_experiments: &[ExperimentResult],
) -> (Confidence, Vec<String>) {
    let config_experiment_ids: Vec<String> = all_experiments
        .iter()
        .filter(|e| e.config_name == config_name)
        .map(|e| e.experiment_id.clone())
        .collect();

    let mut factors = Vec::new();
    let mut score = 0;

    if !ai_evals.is_empty() {
        score += 1;
        factors.push("AI evaluation available".to_string());
    }

    if !human_rankings.is_empty() {
        score += 2;
        factors.push(format!("{} human ranking(s)", human_rankings.len()));

        if human_rankings.len() > 1 {
            let variance = position_variance(human_rankings, &config_experiment_ids);
            if variance < 1.0 {
                score += 1;
                factors.push("High human agreement".to_string());
            } else {
                factors.push("Some human disagreement".to_string());
            }
        }
    }

    if !ai_evals.is_empty() && !human_rankings.is_empty() {
        if let Some(consensus) = calculate_consensus(human_rankings, None) {
            let top_two = &consensus.consensus_ranking
                [..consensus.consensus_ranking.len().min(2)];
            if config_experiment_ids
                .iter()
                .any(|id| top_two.contains(id))
            {
                score += 1;
                factors.push("Humans confirm AI ranking".to_string());
            }
        }
    }

    let level = if score >= 4 {
        Confidence::High
    } else if score >= 2 {
        Confidence::Medium
    } else {
        Confidence::Low
    };
    if level == Confidence::Low && human_rankings.is_empty() {
        factors.push("No human rankings yet".to_string());
    }

    (level, factors)
}

/// Compute the best-configuration recommendation for a prompt.
///
/// Weights resolve as supplied > stored > defaults (0.60/0.30/0.10).
/// Fails only when no successful experiments exist for the prompt.
pub fn calculate_recommendation(
    store: &dyn ResultStore,
    prompt_name: &str,
    weights: Option<&RankingWeights>,
) -> Result<Recommendation, RankingError> {
    let weights = match weights {
        Some(weights) => weights.clone(),
        None => store
            .get_weights(prompt_name)?
            .unwrap_or_else(|| RankingWeights::defaults(prompt_name)),
    };

    let experiments = store.get_successful_experiments(prompt_name)?;
    if experiments.is_empty() {
        return Err(RankingError::NoExperiments(prompt_name.to_string()));
    }
    let ai_evals = store.get_ai_evaluations(prompt_name)?;
    let human_rankings = store.get_human_rankings(prompt_name)?;

    // Group by configuration, preserving first-appearance order so that
    // score ties resolve deterministically.
    let mut groups: Vec<(String, Vec<&ExperimentResult>)> = Vec::new();
    for experiment in &experiments {
        match groups
            .iter_mut()
            .find(|(name, _)| name == &experiment.config_name)
        {
            Some((_, members)) => members.push(experiment),
            None => groups.push((experiment.config_name.clone(), vec![experiment])),
        }
    }

    let max_duration = experiments
        .iter()
        .map(|e| e.duration_seconds)
        .fold(0.0_f64, f64::max);
    let max_cost = experiments
        .iter()
        .filter_map(|e| e.estimated_cost_usd)
        .fold(0.0_f64, f64::max);

    let mut scored: Vec<(String, ConfigScore)> = Vec::new();
    for (config_name, members) in &groups {
        let quality = quality_score(config_name, &ai_evals, &human_rankings, &experiments);

        let avg_duration =
            members.iter().map(|e| e.duration_seconds).sum::<f64>() / members.len() as f64;
        let speed = if max_duration > 0.0 {
            10.0 * (1.0 - avg_duration / max_duration)
        } else {
            5.0
        };

        let costs: Vec<f64> = members.iter().filter_map(|e| e.estimated_cost_usd).collect();
        let avg_cost = if costs.is_empty() {
            None
        } else {
            Some(costs.iter().sum::<f64>() / costs.len() as f64)
        };
        let cost = match avg_cost {
            Some(avg) if max_cost > 0.0 => 10.0 * (1.0 - avg / max_cost),
            _ => 5.0,
        };

        let final_score = quality * weights.quality_weight
            + speed * weights.speed_weight
            + cost * weights.cost_weight;

        scored.push((
            config_name.clone(),
            ConfigScore {
                final_score,
                quality,
                speed,
                cost,
                avg_duration,
                avg_cost,
            },
        ));
    }

    // Stable sort: equal final scores keep first-appearance order.
    scored.sort_by(|a, b| {
        b.1.final_score
            .partial_cmp(&a.1.final_score)
            .unwrap_or(Ordering::Equal)
    });

    let (best_name, best) = &scored[0];
    let runner_up = scored.get(1);
    let score_difference = runner_up
        .map(|(_, s)| best.final_score - s.final_score)
        .unwrap_or(0.0);

    let (confidence_level, confidence_factors) =
        confidence(best_name, &ai_evals, &human_rankings, &experiments);

    let consensus_agreement = if human_rankings.len() > 1 {
        let best_experiment_ids: Vec<&str> = experiments
            .iter()
            .filter(|e| &e.config_name == best_name)
            .map(|e| e.experiment_id.as_str())
            .collect();
        calculate_consensus(&human_rankings, None).and_then(|consensus| {
            consensus
                .consensus_ranking
                .iter()
                .position(|id| best_experiment_ids.contains(&id.as_str()))
                .map(|position| {
                    1.0 - position as f64 / consensus.consensus_ranking.len() as f64
                })
        })
    } else {
        None
    };

    let reasoning = generate_reasoning(
        best_name,
        best,
        human_rankings.len(),
    );

    Ok(Recommendation {
        prompt_name: prompt_name.to_string(),
        recommended_config: best_name.clone(),
        final_score: best.final_score,
        quality_score: best.quality,
        speed_score: best.speed,
        cost_score: best.cost,
        confidence: confidence_level,
        confidence_factors,
        num_ai_evaluations: ai_evals.len(),
        num_human_rankings: human_rankings.len(),
        consensus_agreement,
        reasoning,
        runner_up_config: runner_up.map(|(name, _)| name.clone()),
        score_difference,
        generated_at: Utc::now(),
    })
}

/// Descriptive explanation of a recommendation. Never used for selection.
fn generate_reasoning(config_name: &str, score: &ConfigScore, num_human_rankings: usize) -> String {
    let mut parts = Vec::new();

    let tier = if score.quality >= 8.0 {
        "the highest"
    } else {
        "a strong"
    };
    parts.push(format!(
        "{} achieved {} quality score ({:.1}/10)",
        config_name, tier, score.quality
    ));

    if num_human_rankings > 0 {
        parts.push(format!(
            "and was ranked highly by {} human evaluator{}",
            num_human_rankings,
            if num_human_rankings > 1 { "s" } else { "" }
        ));
    }

    parts.push(format!(
        "It offers balanced performance with {:.1}s duration",
        score.avg_duration
    ));

    if let Some(avg_cost) = score.avg_cost {
        if avg_cost > 0.0 {
            parts.push(format!("and ${:.4} cost", avg_cost));
        }
    }

    parts.join(". ") + "."
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashMap;

    /// In-memory store holding fixed snapshots.
    #[derive(Default)]
    struct StubStore {
        experiments: Vec<ExperimentResult>,
        ai_evals: Vec<AIEvaluation>,
        human_rankings: Vec<HumanRanking>,
        weights: Option<RankingWeights>,
    }

    impl ResultStore for StubStore {
        fn get_successful_experiments(&self, prompt_name: &str) -> Result<Vec<ExperimentResult>> {
            Ok(self
                .experiments
                .iter()
                .filter(|e| e.prompt_name == prompt_name)
                .cloned()
                .collect())
        }

        fn get_ai_evaluations(&self, _prompt_name: &str) -> Result<Vec<AIEvaluation>> {
            Ok(self.ai_evals.clone())
        }

        fn get_human_rankings(&self, prompt_name: &str) -> Result<Vec<HumanRanking>> {
            Ok(self
                .human_rankings
                .iter()
                .filter(|r| r.prompt_name == prompt_name)
                .cloned()
                .collect())
        }

        fn get_weights(&self, _prompt_name: &str) -> Result<Option<RankingWeights>> {
            Ok(self.weights.clone())
        }
    }

    fn experiment(id: &str, config: &str, duration: f64, cost: Option<f64>) -> ExperimentResult {
        ExperimentResult {
            experiment_id: id.to_string(),
            prompt_name: "summarize".to_string(),
            config_name: config.to_string(),
            run_id: Some("r1".to_string()),
            rendered_prompt: "prompt".to_string(),
            response: "response".to_string(),
            finish_reason: Some("stop".to_string()),
            success: true,
            error: None,
            duration_seconds: duration,
            prompt_tokens: Some(10),
            completion_tokens: Some(20),
            total_tokens: Some(30),
            estimated_cost_usd: cost,
            is_acceptable: true,
            created_at: Utc::now(),
        }
    }

    fn ai_evaluation(experiment_id: &str, overall: f64, rank: u32) -> AIEvaluation {
        AIEvaluation {
            evaluation_id: format!("eval-{}", experiment_id),
            experiment_id: experiment_id.to_string(),
            batch_id: "b1".to_string(),
            criteria_scores: HashMap::new(),
            overall_score: overall,
            ai_rank: rank,
            justification: "judged".to_string(),
            evaluated_at: Utc::now(),
        }
    }

    fn human_ranking(evaluator: &str, order: &[&str]) -> HumanRanking {
        HumanRanking {
            ranking_id: format!("ranking-{}", evaluator),
            prompt_name: "summarize".to_string(),
            evaluator_name: evaluator.to_string(),
            ranked_experiment_ids: order.iter().map(|s| s.to_string()).collect(),
            based_on_ai_batch_id: None,
            ai_agreement_score: None,
            top_3_overlap: None,
            exact_position_matches: None,
            changes_from_ai: vec![],
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_quality_neutral_without_evidence() {
        let experiments = vec![experiment("e1", "fast", 1.0, None)];
        assert_eq!(quality_score("fast", &[], &[], &experiments), 5.0);
    }

    #[test]
    fn test_quality_from_ai_evaluations() {
        let experiments = vec![
            experiment("e1", "fast", 1.0, None),
            experiment("e2", "smart", 2.0, None),
        ];
        let evals = vec![
            ai_evaluation("e1", 8.0, 1),
            ai_evaluation("e2", 4.0, 2),
        ];
        assert_eq!(quality_score("fast", &evals, &[], &experiments), 8.0);
        assert_eq!(quality_score("smart", &evals, &[], &experiments), 4.0);
    }

    #[test]
    fn test_human_rankings_override_ai_entirely() {
        let experiments = vec![
            experiment("e1", "fast", 1.0, None),
            experiment("e2", "smart", 2.0, None),
        ];
        // AI loves "fast"; the human put it last.
        let evals = vec![
            ai_evaluation("e1", 9.9, 1),
            ai_evaluation("e2", 1.0, 2),
        ];
        let rankings = vec![human_ranking("alice", &["e2", "e1"])];

        let fast = quality_score("fast", &evals, &rankings, &experiments);
        let smart = quality_score("smart", &evals, &rankings, &experiments);

        // Human-derived: e1 at position 1 of 2 -> 5.0; e2 at 0 of 2 -> 10.0.
        assert_eq!(fast, 5.0);
        assert_eq!(smart, 10.0);
    }

    #[test]
    fn test_quality_human_path_ignores_unranked_config() {
        let experiments = vec![
            experiment("e1", "fast", 1.0, None),
            experiment("e2", "smart", 2.0, None),
        ];
        // Ranking covers e1 only; "smart" has no sample and stays neutral
        // even though an AI score exists for it.
        let evals = vec![ai_evaluation("e2", 9.0, 1)];
        let rankings = vec![human_ranking("alice", &["e1"])];
        assert_eq!(quality_score("smart", &evals, &rankings, &experiments), 5.0);
    }

    #[test]
    fn test_confidence_low_without_human_rankings() {
        let experiments = vec![experiment("e1", "fast", 1.0, None)];
        let evals = vec![ai_evaluation("e1", 8.0, 1)];

        let (level, factors) = confidence("fast", &evals, &[], &experiments);
        assert_eq!(level, Confidence::Low);
        assert!(factors.contains(&"AI evaluation available".to_string()));
        assert!(factors.contains(&"No human rankings yet".to_string()));
    }

    #[test]
    fn test_confidence_medium_with_single_human_ranking() {
        let experiments = vec![experiment("e1", "fast", 1.0, None)];
        let rankings = vec![human_ranking("alice", &["e1"])];

        let (level, factors) = confidence("fast", &[], &rankings, &experiments);
        assert_eq!(level, Confidence::Medium);
        assert!(factors.contains(&"1 human ranking(s)".to_string()));
        assert!(!factors.contains(&"No human rankings yet".to_string()));
    }

    #[test]
    fn test_confidence_high_with_agreeing_humans_confirming_ai() {
        let experiments = vec![
            experiment("e1", "fast", 1.0, None),
            experiment("e2", "smart", 2.0, None),
        ];
        let evals = vec![ai_evaluation("e1", 9.0, 1)];
        let rankings = vec![
            human_ranking("alice", &["e1", "e2"]),
            human_ranking("bob", &["e1", "e2"]),
        ];

        let (level, factors) = confidence("fast", &evals, &rankings, &experiments);
        // 1 (AI) + 2 (humans) + 1 (agreement) + 1 (confirmation) = 5.
        assert_eq!(level, Confidence::High);
        assert!(factors.contains(&"High human agreement".to_string()));
        assert!(factors.contains(&"Humans confirm AI ranking".to_string()));
    }

    #[test]
    fn test_confidence_notes_human_disagreement() {
        let experiments = vec![
            experiment("e1", "fast", 1.0, None),
            experiment("e2", "smart", 2.0, None),
            experiment("e3", "cheap", 3.0, None),
        ];
        let rankings = vec![
            human_ranking("alice", &["e1", "e2", "e3"]),
            human_ranking("bob", &["e3", "e2", "e1"]),
        ];

        let (_, factors) = confidence("fast", &[], &rankings, &experiments);
        assert!(factors.contains(&"Some human disagreement".to_string()));
    }

    #[test]
    fn test_recommendation_fails_without_experiments() {
        let store = StubStore::default();
        let result = calculate_recommendation(&store, "summarize", None);
        assert!(matches!(result, Err(RankingError::NoExperiments(p)) if p == "summarize"));
    }

    #[test]
    fn test_recommendation_end_to_end_weighted() {
        // Three configs; durations 1/2/3 s, costs $0.01/$0.02/$0.03, one
        // human ranking [a, b, c], default weights 0.6/0.3/0.1.
        let store = StubStore {
            experiments: vec![
                experiment("ea", "config-a", 1.0, Some(0.01)),
                experiment("eb", "config-b", 2.0, Some(0.02)),
                experiment("ec", "config-c", 3.0, Some(0.03)),
            ],
            human_rankings: vec![human_ranking("alice", &["ea", "eb", "ec"])],
            ..Default::default()
        };

        let rec = calculate_recommendation(&store, "summarize", None).unwrap();

        assert_eq!(rec.recommended_config, "config-a");
        assert_eq!(rec.runner_up_config.as_deref(), Some("config-b"));

        // quality: a = 10, b = 6.67, c = 3.33
        assert!((rec.quality_score - 10.0).abs() < 0.01);
        // speed: 10 * (1 - 1/3) = 6.67; cost: 10 * (1 - 0.01/0.03) = 6.67
        assert!((rec.speed_score - 6.6667).abs() < 0.01);
        assert!((rec.cost_score - 6.6667).abs() < 0.01);
        // final(a) = 0.6*10 + 0.3*6.67 + 0.1*6.67 = 8.67
        assert!((rec.final_score - 8.6667).abs() < 0.01);
        // final(b) = 0.6*6.67 + 0.3*3.33 + 0.1*3.33 = 5.33; gap = 3.33
        assert!((rec.score_difference - 3.3333).abs() < 0.01);

        assert_eq!(rec.num_human_rankings, 1);
        assert!(rec.reasoning.contains("config-a"));
        assert!(rec.reasoning.contains("the highest"));
    }

    #[test]
    fn test_recommendation_single_config_has_no_runner_up() {
        let store = StubStore {
            experiments: vec![experiment("e1", "only", 2.0, None)],
            ..Default::default()
        };

        let rec = calculate_recommendation(&store, "summarize", None).unwrap();
        assert_eq!(rec.recommended_config, "only");
        assert!(rec.runner_up_config.is_none());
        assert_eq!(rec.score_difference, 0.0);
        // Sole config: duration equals the max, cost data absent.
        assert_eq!(rec.speed_score, 0.0);
        assert_eq!(rec.cost_score, 5.0);
        assert_eq!(rec.quality_score, 5.0);
    }

    #[test]
    fn test_recommendation_neutral_cost_without_cost_data() {
        let store = StubStore {
            experiments: vec![
                experiment("e1", "fast", 1.0, None),
                experiment("e2", "smart", 2.0, None),
            ],
            ..Default::default()
        };

        let rec = calculate_recommendation(&store, "summarize", None).unwrap();
        assert_eq!(rec.cost_score, 5.0);
    }

    #[test]
    fn test_recommendation_supplied_weights_override_store() {
        let store = StubStore {
            experiments: vec![
                // "slow" wins on quality, "fast" on speed.
                experiment("e1", "slow", 10.0, None),
                experiment("e2", "fast", 1.0, None),
            ],
            ai_evals: vec![
                ai_evaluation("e1", 10.0, 1),
                ai_evaluation("e2", 2.0, 2),
            ],
            weights: Some(RankingWeights::new("summarize", 0.0, 0.9, 0.1, "stored").unwrap()),
            ..Default::default()
        };

        // Stored weights are speed-dominated: "fast" wins.
        let rec = calculate_recommendation(&store, "summarize", None).unwrap();
        assert_eq!(rec.recommended_config, "fast");

        // Supplied quality-dominated weights flip the result.
        let supplied = RankingWeights::new("summarize", 1.0, 0.0, 0.0, "caller").unwrap();
        let rec = calculate_recommendation(&store, "summarize", Some(&supplied)).unwrap();
        assert_eq!(rec.recommended_config, "slow");
    }

    #[test]
    fn test_recommendation_consensus_agreement_requires_two_rankings() {
        let experiments = vec![
            experiment("e1", "fast", 1.0, None),
            experiment("e2", "smart", 2.0, None),
        ];

        let one = StubStore {
            experiments: experiments.clone(),
            human_rankings: vec![human_ranking("alice", &["e1", "e2"])],
            ..Default::default()
        };
        assert!(
            calculate_recommendation(&one, "summarize", None)
                .unwrap()
                .consensus_agreement
                .is_none()
        );

        let two = StubStore {
            experiments,
            human_rankings: vec![
                human_ranking("alice", &["e1", "e2"]),
                human_ranking("bob", &["e1", "e2"]),
            ],
            ..Default::default()
        };
        let rec = calculate_recommendation(&two, "summarize", None).unwrap();
        // Recommended config's experiment tops the consensus: 1 - 0/2 = 1.0.
        assert_eq!(rec.consensus_agreement, Some(1.0));
    }

    #[test]
    fn test_recommendation_tie_breaks_on_first_appearance() {
        let store = StubStore {
            experiments: vec![
                experiment("e1", "first", 1.0, None),
                experiment("e2", "second", 1.0, None),
            ],
            ..Default::default()
        };

        let rec = calculate_recommendation(&store, "summarize", None).unwrap();
        assert_eq!(rec.recommended_config, "first");
        assert_eq!(rec.runner_up_config.as_deref(), Some("second"));
        assert_eq!(rec.score_difference, 0.0);
    }
}
