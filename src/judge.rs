//! Batch comparative evaluation with an LLM judge.
//!
//! One judge invocation covers all configurations for a prompt: the
//! judge sees every response simultaneously and ranks them together,
//! rather than scoring pairwise. Reconciling the judge's
//! loosely-formatted configuration names back onto experiments happens
//! here; the ranking core only ever consumes the exactly-keyed output.

use anyhow::{Context, Result};
use async_openai::{Client, config::OpenAIConfig, types::CreateChatCompletionRequestArgs};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::{JudgeConfig, PromptSpec};
use crate::executor::estimate_cost;
use crate::models::{AIEvaluation, AIEvaluationBatch, BatchStatus, ExperimentResult};

/// One parsed entry of the judge's ranking, matched to an experiment.
#[derive(Debug)]
struct JudgedEntry {
    experiment_id: String,
    rank: u32,
    overall_score: f64,
    criteria_scores: HashMap<String, f64>,
    justification: String,
}

/// Batch judge with rate limiting.
pub struct BatchJudge {
    last_request: Option<Instant>,
}

impl BatchJudge {
    pub fn new() -> Self {
        Self { last_request: None }
    }

    /// Enforce rate limiting for judge requests.
    async fn enforce_rate_limit(&mut self, rate_limit_rps: f64) {
        if rate_limit_rps <= 0.0 {
            return;
        }

        let min_interval = Duration::from_secs_f64(1.0 / rate_limit_rps);

        if let Some(last_time) = self.last_request {
            let elapsed = last_time.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        self.last_request = Some(Instant::now());
    }

    /// Judge all of a run's successful results in one comparative call.
    ///
    /// The batch is finalized exactly once: completed with one
    /// evaluation per matched experiment, or failed (empty evaluations)
    /// when the call or its output parsing breaks. Only a missing API
    /// key is an `Err`.
    pub async fn evaluate_run(
        &mut self,
        judge: &JudgeConfig,
        prompt: &PromptSpec,
        results: &[ExperimentResult],
    ) -> Result<(AIEvaluationBatch, Vec<AIEvaluation>)> {
        let client = self.create_client(judge)?;

        self.enforce_rate_limit(judge.rate_limit_rps).await;

        let batch_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut batch = AIEvaluationBatch {
            batch_id: batch_id.clone(),
            prompt_name: prompt.name.clone(),
            model_evaluator: judge.model.clone(),
            status: BatchStatus::Running,
            evaluation_ids: vec![],
            ranked_experiment_ids: vec![],
            started_at,
            completed_at: None,
            estimated_cost: 0.0,
        };

        let judge_prompt = build_judge_prompt(judge, prompt, results);
        let request = self.build_request(judge, &judge_prompt)?;

        let outcome = async {
            let response = client
                .chat()
                .create(request)
                .await
                .context("Judge request failed")?;

            if let Some(usage) = &response.usage {
                if let Some(cost) =
                    estimate_cost(&judge.model, usage.prompt_tokens, usage.completion_tokens)
                {
                    batch.estimated_cost = cost;
                }
            }

            let content = match response.choices.first() {
                Some(choice) => choice.message.content.clone().unwrap_or_default(),
                None => String::new(),
            };
            parse_batch_response(&content, results, &judge.criteria)
        }
        .await;

        match outcome {
            Ok(entries) => {
                let evaluations = finalize_entries(entries, &batch_id);
                batch.evaluation_ids = evaluations
                    .iter()
                    .map(|e| e.evaluation_id.clone())
                    .collect();
                batch.ranked_experiment_ids = evaluations
                    .iter()
                    .map(|e| e.experiment_id.clone())
                    .collect();
                batch.status = BatchStatus::Completed;
                batch.completed_at = Some(Utc::now());
                tracing::info!(
                    batch_id = %batch.batch_id,
                    prompt = %prompt.name,
                    evaluations = evaluations.len(),
                    "batch evaluation completed"
                );
                Ok((batch, evaluations))
            }
            Err(error) => {
                tracing::warn!(
                    batch_id = %batch.batch_id,
                    prompt = %prompt.name,
                    error = %error,
                    "batch evaluation failed"
                );
                batch.status = BatchStatus::Failed;
                batch.completed_at = Some(Utc::now());
                Ok((batch, vec![]))
            }
        }
    }

    /// Create the OpenAI client for the judge API.
    fn create_client(&self, judge: &JudgeConfig) -> Result<Client<OpenAIConfig>> {
        let api_key = std::env::var(&judge.env_var_api_key)
            .with_context(|| format!("Environment variable {} not found", judge.env_var_api_key))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&judge.api_endpoint);

        Ok(Client::with_config(openai_config))
    }

    /// Build the judge chat completion request.
    fn build_request(
        &self,
        judge: &JudgeConfig,
        judge_prompt: &str,
    ) -> Result<async_openai::types::CreateChatCompletionRequest> {
        let system_message = async_openai::types::ChatCompletionRequestSystemMessageArgs::default()
            .content(
                "You are an expert evaluator comparing multiple LLM responses to the same prompt. \
                 Be objective and decisive; every response must receive a distinct rank.",
            )
            .build()
            .context("Failed to build judge system message")?
            .into();

        let user_message = async_openai::types::ChatCompletionRequestUserMessageArgs::default()
            .content(judge_prompt.to_string())
            .build()
            .context("Failed to build judge user message")?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(&judge.model)
            .messages([system_message, user_message])
            .temperature(judge.temperature as f32)
            .build()
            .context("Failed to build judge completion request")
    }
}

impl Default for BatchJudge {
    fn default() -> Self {
        Self::new()
    }
}

/// Comparative prompt listing every response labeled by configuration.
fn build_judge_prompt(
    judge: &JudgeConfig,
    prompt: &PromptSpec,
    results: &[ExperimentResult],
) -> String {
    let criteria = judge.criteria.join(", ");
    let mut text = format!(
        "Compare the following {} responses to the same prompt and rank them from best to worst.\n\n\
         **Original Prompt:**\n{}\n",
        results.len(),
        prompt.rendered()
    );

    for (index, result) in results.iter().enumerate() {
        text.push_str(&format!(
            "\n**Response {} (configuration: {}):**\n{}\n",
            index + 1,
            result.config_name,
            result.response
        ));
    }

    text.push_str(&format!(
        "\nScore each response 0-10 on: {}.\n\
         Return JSON only, in this form:\n\
         {{\"rankings\": [{{\"config_name\": \"<name>\", \"rank\": 1, \"overall_score\": 8.5, \
         \"criteria_scores\": {{\"<criterion>\": 8.0}}, \"justification\": \"2-3 sentences\"}}]}}\n\
         Rank 1 is the best response. Use the configuration names exactly as given.",
        criteria
    ));

    text
}

/// Parse the judge's response into entries matched against experiments.
fn parse_batch_response(
    content: &str,
    results: &[ExperimentResult],
    criteria: &[String],
) -> Result<Vec<JudgedEntry>> {
    let parsed = parse_json_response(content)?;
    let rankings = parsed
        .get("rankings")
        .and_then(|r| r.as_array())
        .context("Judge response has no rankings array")?;

    let mut entries = Vec::new();
    let mut matched_ids: HashSet<String> = HashSet::new();

    for entry in rankings {
        let Some(config_name) = entry.get("config_name").and_then(|c| c.as_str()) else {
            continue;
        };

        let Some(result) = match_experiment(results, config_name) else {
            tracing::warn!(config_name, "judge ranked an unknown configuration; skipping");
            continue;
        };
        // The judge occasionally repeats a configuration; first mention wins.
        if !matched_ids.insert(result.experiment_id.clone()) {
            continue;
        }

        let rank = entry
            .get("rank")
            .and_then(|r| r.as_u64())
            .unwrap_or((entries.len() + 1) as u64) as u32;
        let overall_score = entry
            .get("overall_score")
            .and_then(|s| s.as_f64())
            .unwrap_or(5.0)
            .clamp(0.0, 10.0);

        let mut criteria_scores = HashMap::new();
        if let Some(scores) = entry.get("criteria_scores").and_then(|s| s.as_object()) {
            for criterion in criteria {
                if let Some(score) = scores.get(criterion).and_then(|s| s.as_f64()) {
                    criteria_scores.insert(criterion.clone(), score.clamp(0.0, 10.0));
                }
            }
        }

        let justification = entry
            .get("justification")
            .and_then(|j| j.as_str())
            .unwrap_or("No justification provided")
            .to_string();

        entries.push(JudgedEntry {
            experiment_id: result.experiment_id.clone(),
            rank,
            overall_score,
            criteria_scores,
            justification,
        });
    }

    if entries.is_empty() {
        anyhow::bail!("Judge response matched no experiments");
    }
    Ok(entries)
}

/// Order entries by rank and mint the stored evaluations.
fn finalize_entries(mut entries: Vec<JudgedEntry>, batch_id: &str) -> Vec<AIEvaluation> {
    entries.sort_by_key(|e| e.rank);

    entries
        .into_iter()
        .map(|entry| AIEvaluation {
            evaluation_id: Uuid::new_v4().to_string(),
            experiment_id: entry.experiment_id,
            batch_id: batch_id.to_string(),
            criteria_scores: entry.criteria_scores,
            overall_score: entry.overall_score,
            ai_rank: entry.rank,
            justification: entry.justification,
            evaluated_at: Utc::now(),
        })
        .collect()
}

/// Match a judge-returned configuration name to an experiment: exact,
/// then case-insensitive, then substring in either direction. A patch
/// for unreliable judge output; unmatched names are skipped upstream.
fn match_experiment<'a>(
    results: &'a [ExperimentResult],
    config_name: &str,
) -> Option<&'a ExperimentResult> {
    if let Some(result) = results.iter().find(|r| r.config_name == config_name) {
        return Some(result);
    }

    let lowered = config_name.to_lowercase();
    if let Some(result) = results
        .iter()
        .find(|r| r.config_name.to_lowercase() == lowered)
    {
        return Some(result);
    }

    results.iter().find(|r| {
        let candidate = r.config_name.to_lowercase();
        candidate.contains(&lowered) || lowered.contains(&candidate)
    })
}

/// Parse JSON from the response, handling JSON embedded in prose.
fn parse_json_response(response: &str) -> Result<Value> {
    match serde_json::from_str(response) {
        Ok(parsed) => Ok(parsed),
        Err(_) => try_extract_embedded_json(response),
    }
}

/// Try to extract JSON that might be embedded in text.
fn try_extract_embedded_json(response: &str) -> Result<Value> {
    match response.find('{') {
        Some(start) => match response.rfind('}') {
            Some(end) => serde_json::from_str(&response[start..=end])
                .context("Failed to parse extracted JSON"),
            None => anyhow::bail!("Found opening brace but no closing brace in response"),
        },
        None => anyhow::bail!("No JSON found in response"),
    }
}
