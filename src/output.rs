use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::models::Recommendation;
use crate::ranking::{AgreementResult, ConsensusResult};
use crate::runner::RunSummary;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print run summaries in the specified format
pub fn print_run_summaries(summaries: &[RunSummary], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_runs_plain(summaries),
        OutputFormat::Json => print_json(summaries),
    }
}

fn print_runs_plain(summaries: &[RunSummary]) {
    for (i, summary) in summaries.iter().enumerate() {
        println!("=== Run: {} ===", summary.prompt_name);
        println!();

        for result in &summary.results {
            let status = if result.success { "ok" } else { "FAILED" };
            print!(
                "  {:<28} {:>6}  {:>7.2}s",
                result.config_name, status, result.duration_seconds
            );
            if let Some(tokens) = result.total_tokens {
                print!("  {:>6} tokens", tokens);
            }
            if let Some(cost) = result.estimated_cost_usd {
                print!("  ${:.4}", cost);
            }
            println!();
            if let Some(error) = &result.error {
                println!("      error: {}", error);
            }
        }

        if let Some(batch) = &summary.batch {
            println!();
            println!("AI ranking ({:?}):", batch.status);
            for evaluation in &summary.evaluations {
                let config = summary
                    .results
                    .iter()
                    .find(|r| r.experiment_id == evaluation.experiment_id)
                    .map(|r| r.config_name.as_str())
                    .unwrap_or(evaluation.experiment_id.as_str());
                println!(
                    "  #{} {:<28} {:.1}/10  {}",
                    evaluation.ai_rank, config, evaluation.overall_score, evaluation.justification
                );
            }
        }

        if i < summaries.len() - 1 {
            println!();
            println!("{}", "=".repeat(50));
            println!();
        }
    }
}

/// Print a recommendation in the specified format
pub fn print_recommendation(recommendation: &Recommendation, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_recommendation_plain(recommendation),
        OutputFormat::Json => print_json(recommendation),
    }
}

fn print_recommendation_plain(recommendation: &Recommendation) {
    println!("=== Recommendation: {} ===", recommendation.prompt_name);
    println!();
    println!(
        "Recommended config: {}  ({:.2}/10)",
        recommendation.recommended_config, recommendation.final_score
    );
    println!(
        "  quality {:>5.2}   speed {:>5.2}   cost {:>5.2}",
        recommendation.quality_score, recommendation.speed_score, recommendation.cost_score
    );
    println!();
    println!("Confidence: {}", recommendation.confidence);
    for factor in &recommendation.confidence_factors {
        println!("  - {}", factor);
    }

    if let Some(runner_up) = &recommendation.runner_up_config {
        println!();
        println!(
            "Runner-up: {} (behind by {:.2})",
            runner_up, recommendation.score_difference
        );
    }
    if let Some(agreement) = recommendation.consensus_agreement {
        println!("Consensus agreement: {:.2}", agreement);
    }

    println!();
    println!("{}", recommendation.reasoning);
}

/// Print a consensus in the specified format
pub fn print_consensus(consensus: &ConsensusResult, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_consensus_plain(consensus),
        OutputFormat::Json => print_json(consensus),
    }
}

fn print_consensus_plain(consensus: &ConsensusResult) {
    println!(
        "Consensus of {} ranking(s), variability {:?}:",
        consensus.num_rankers, consensus.variability
    );
    for (position, experiment_id) in consensus.consensus_ranking.iter().enumerate() {
        let score = consensus
            .confidence_scores
            .get(experiment_id)
            .copied()
            .unwrap_or(0.0);
        println!("  {}. {} ({:.0} points)", position + 1, experiment_id, score);
    }
    if let Some(agreement) = &consensus.ai_agreement {
        println!();
        print_agreement_plain(agreement);
    }
}

/// Print agreement metrics against an AI ranking
pub fn print_agreement(agreement: &AgreementResult, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_agreement_plain(agreement),
        OutputFormat::Json => print_json(agreement),
    }
}

fn print_agreement_plain(agreement: &AgreementResult) {
    println!("Agreement with AI ranking:");
    println!("  Kendall tau:          {:.3}", agreement.kendall_tau);
    println!("  Top-3 overlap:        {}", agreement.top_3_overlap);
    println!(
        "  Exact matches:        {} ({:.0}%)",
        agreement.exact_position_matches, agreement.agreement_percentage
    );
    for change in &agreement.changes {
        println!(
            "  {} moved {:?}: {} -> {}",
            change.experiment_id, change.direction, change.from_rank, change.to_rank
        );
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing to JSON: {}", e),
    }
}
