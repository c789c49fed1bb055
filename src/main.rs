use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use prompt_benchmark::config::Config;
use prompt_benchmark::models::{HumanRanking, RankingWeights};
use prompt_benchmark::output::{self, OutputFormat};
use prompt_benchmark::ranking::calculate_agreement;
use prompt_benchmark::recommend::calculate_recommendation;
use prompt_benchmark::runner::Runner;
use prompt_benchmark::storage::{JsonStore, ResultStore};

/// Benchmark LLM configurations and recommend the best one per prompt
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain", global = true)]
    output: OutputFormat,

    /// Verbose output - show per-request progress
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute every configuration against every prompt and judge each run
    Run {
        /// Path to the TOML run file
        run_file: PathBuf,
    },

    /// Compute the best-configuration recommendation for a prompt
    Recommend {
        /// Prompt name
        prompt: String,
        /// Path to the JSON result store
        #[arg(long)]
        store: PathBuf,
        /// Override the quality weight (requires --speed and --cost)
        #[arg(long)]
        quality: Option<f64>,
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long)]
        cost: Option<f64>,
    },

    /// Record a human ranking of a prompt's experiments, best first
    Rank {
        /// Prompt name
        prompt: String,
        #[arg(long)]
        store: PathBuf,
        /// Evaluator name
        #[arg(long)]
        evaluator: String,
        /// Comma-separated experiment ids, best first
        #[arg(long, value_delimiter = ',')]
        order: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Show the Borda consensus of the stored human rankings
    Consensus {
        /// Prompt name
        prompt: String,
        #[arg(long)]
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "prompt_benchmark=debug,info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match args.command {
        Command::Run { run_file } => run_benchmark(&run_file, args.output).await,
        Command::Recommend {
            prompt,
            store,
            quality,
            speed,
            cost,
        } => recommend(&prompt, &store, quality, speed, cost, args.output),
        Command::Rank {
            prompt,
            store,
            evaluator,
            order,
            notes,
        } => record_ranking(&prompt, &store, &evaluator, order, notes, args.output),
        Command::Consensus { prompt, store } => show_consensus(&prompt, &store, args.output),
    }
}

async fn run_benchmark(run_file: &PathBuf, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::from_file(run_file)?;
    let mut store = JsonStore::open(&config.storage_path)?;

    let mut runner = Runner::new(config);
    let summaries = runner.run_all(&mut store).await?;
    store.flush()?;

    output::print_run_summaries(&summaries, format);
    Ok(())
}

fn recommend(
    prompt: &str,
    store_path: &PathBuf,
    quality: Option<f64>,
    speed: Option<f64>,
    cost: Option<f64>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut store = JsonStore::open(store_path)?;

    let weights = match (quality, speed, cost) {
        (None, None, None) => None,
        (Some(quality), Some(speed), Some(cost)) => {
            Some(RankingWeights::new(prompt, quality, speed, cost, "cli")?)
        }
        _ => bail!("Weight overrides require all of --quality, --speed and --cost"),
    };

    let recommendation = calculate_recommendation(&store, prompt, weights.as_ref())?;
    store.save_recommendation(recommendation.clone());
    store.flush()?;

    output::print_recommendation(&recommendation, format);
    Ok(())
}

fn record_ranking(
    prompt: &str,
    store_path: &PathBuf,
    evaluator: &str,
    order: Vec<String>,
    notes: Option<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if order.is_empty() {
        bail!("--order must list at least one experiment id");
    }
    let mut seen = std::collections::HashSet::new();
    for experiment_id in &order {
        if !seen.insert(experiment_id.as_str()) {
            bail!("Duplicate experiment id in --order: {}", experiment_id);
        }
    }

    let mut store = JsonStore::open(store_path)?;

    let known_experiments = store
        .get_successful_experiments(prompt)
        .context("Failed to read experiments")?;
    for experiment_id in &order {
        if !known_experiments
            .iter()
            .any(|e| &e.experiment_id == experiment_id)
        {
            bail!("Unknown experiment id for prompt {}: {}", prompt, experiment_id);
        }
    }

    // Derive agreement metrics against the latest AI batch, if one exists.
    let ai_context = store
        .latest_ai_batch(prompt)
        .map(|batch| {
            (
                batch.batch_id.clone(),
                calculate_agreement(&batch.ranked_experiment_ids, &order),
            )
        });

    let ranking = HumanRanking {
        ranking_id: Uuid::new_v4().to_string(),
        prompt_name: prompt.to_string(),
        evaluator_name: evaluator.to_string(),
        ranked_experiment_ids: order,
        based_on_ai_batch_id: ai_context.as_ref().map(|(batch_id, _)| batch_id.clone()),
        ai_agreement_score: ai_context.as_ref().map(|(_, a)| a.kendall_tau),
        top_3_overlap: ai_context.as_ref().map(|(_, a)| a.top_3_overlap),
        exact_position_matches: ai_context.as_ref().map(|(_, a)| a.exact_position_matches),
        changes_from_ai: ai_context
            .as_ref()
            .map(|(_, a)| a.changes.clone())
            .unwrap_or_default(),
        notes,
        created_at: chrono::Utc::now(),
    };

    store.save_human_ranking(ranking);
    store.flush()?;

    println!("Ranking saved for {} by {}", prompt, evaluator);
    if let Some((_, agreement)) = &ai_context {
        println!();
        output::print_agreement(agreement, format);
    }
    Ok(())
}

fn show_consensus(prompt: &str, store_path: &PathBuf, format: OutputFormat) -> anyhow::Result<()> {
    let store = JsonStore::open(store_path)?;

    let rankings = store.get_human_rankings(prompt)?;
    let ai_ranking = store
        .latest_ai_batch(prompt)
        .map(|batch| batch.ranked_experiment_ids.clone());

    match prompt_benchmark::calculate_consensus(&rankings, ai_ranking.as_deref()) {
        Some(consensus) => output::print_consensus(&consensus, format),
        None => println!("No human rankings recorded for {}", prompt),
    }
    Ok(())
}
