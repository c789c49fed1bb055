//! Experiment execution against an OpenAI-compatible chat endpoint.
//!
//! The request body is built by hand so configuration knobs the typed
//! clients lag behind on (`reasoning_effort`, `verbosity`) pass through
//! untouched. A failed request becomes a `success = false` result with
//! the error recorded; only configuration problems (missing API key)
//! abort a run.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::{ConfigurationSpec, ExecutionConfig, PromptSpec};
use crate::models::ExperimentResult;

/// Cost per million tokens: (model prefix, input, output). Longest
/// prefixes first so variants resolve before their base model.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gpt-5-mini", 0.25, 2.00),
    ("gpt-5-nano", 0.05, 0.40),
    ("gpt-5", 1.25, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4-turbo", 10.00, 30.00),
    ("gpt-4", 30.00, 60.00),
    ("gpt-3.5-turbo", 0.50, 1.50),
    ("o3-mini", 1.10, 4.40),
    ("o3", 2.00, 8.00),
];

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Runs experiments with rate limiting.
pub struct ExperimentExecutor {
    client: reqwest::Client,
    last_request: Option<Instant>,
}

impl ExperimentExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            last_request: None,
        }
    }

    /// Enforce a minimum interval between requests.
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

    /// Execute one prompt under one configuration.
    ///
    /// API and parse failures come back as a failed `ExperimentResult`,
    /// never as an `Err` - a broken configuration must not abort the
    /// rest of the run.
    pub async fn run_experiment(
        &mut self,
        execution: &ExecutionConfig,
        prompt: &PromptSpec,
        configuration: &ConfigurationSpec,
        run_id: &str,
    ) -> Result<ExperimentResult> {
        let api_key = std::env::var(&execution.env_var_api_key).with_context(|| {
            format!("Environment variable {} not found", execution.env_var_api_key)
        })?;

        self.enforce_rate_limit(execution.rate_limit_rps).await;

        let experiment_id = Uuid::new_v4().to_string();
        let rendered_prompt = prompt.rendered();
        let body = build_request_body(prompt, configuration);
        let url = format!(
            "{}/chat/completions",
            execution.api_endpoint.trim_end_matches('/')
        );

        tracing::debug!(
            experiment_id = %experiment_id,
            config = %configuration.name,
            model = %configuration.model,
            "sending experiment request"
        );

        let start = Instant::now();
        let outcome = self.send_request(&url, &api_key, &body).await;
        let duration_seconds = start.elapsed().as_secs_f64();

        let mut result = ExperimentResult {
            experiment_id,
            prompt_name: prompt.name.clone(),
            config_name: configuration.name.clone(),
            run_id: Some(run_id.to_string()),
            rendered_prompt,
            response: String::new(),
            finish_reason: None,
            success: false,
            error: None,
            duration_seconds,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            estimated_cost_usd: None,
            is_acceptable: true,
            created_at: Utc::now(),
        };

        match outcome {
            Ok(response) => {
                if let Some(choice) = response.choices.into_iter().next() {
                    result.response = choice.message.content.unwrap_or_default();
                    result.finish_reason = choice.finish_reason;
                    result.success = true;
                } else {
                    result.error = Some("Response contained no choices".to_string());
                }

                if let Some(usage) = response.usage {
                    result.prompt_tokens = Some(usage.prompt_tokens);
                    result.completion_tokens = Some(usage.completion_tokens);
                    result.total_tokens = Some(usage.total_tokens);
                    result.estimated_cost_usd = estimate_cost(
                        &configuration.model,
                        usage.prompt_tokens,
                        usage.completion_tokens,
                    );
                }
            }
            Err(error) => {
                tracing::warn!(
                    config = %configuration.name,
                    error = %error,
                    "experiment request failed"
                );
                result.error = Some(error.to_string());
            }
        }

        Ok(result)
    }

    async fn send_request(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<ChatResponse> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .context("Request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("API returned {}: {}", status, detail);
        }

        response
            .json::<ChatResponse>()
            .await
            .context("Failed to parse completion response")
    }
}

impl Default for ExperimentExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Chat-completions body for a configuration. Optional knobs are only
/// present when set, so endpoints that reject unknown parameters for
/// older models stay happy.
fn build_request_body(prompt: &PromptSpec, configuration: &ConfigurationSpec) -> serde_json::Value {
    let mut messages = Vec::new();
    if let Some(system) = &prompt.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt.user}));

    let mut body = json!({
        "model": configuration.model,
        "messages": messages,
    });

    if let Some(temperature) = configuration.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_output_tokens) = configuration.max_output_tokens {
        body["max_completion_tokens"] = json!(max_output_tokens);
    }
    if let Some(effort) = &configuration.reasoning_effort {
        body["reasoning_effort"] = json!(effort);
    }
    if let Some(verbosity) = &configuration.verbosity {
        body["verbosity"] = json!(verbosity);
    }

    body
}

/// Estimated USD cost of a completion, by model-prefix pricing lookup.
/// Unknown models yield None rather than a guessed figure.
pub fn estimate_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> Option<f64> {
    MODEL_PRICING
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, input_rate, output_rate)| {
            (prompt_tokens as f64 * input_rate + completion_tokens as f64 * output_rate) / 1e6
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReasoningEffort, Verbosity};

    fn test_prompt() -> PromptSpec {
        PromptSpec {
            name: "summarize".to_string(),
            system: Some("Be concise.".to_string()),
            user: "Summarize the report.".to_string(),
        }
    }

    fn test_configuration() -> ConfigurationSpec {
        ConfigurationSpec {
            name: "gpt-5-minimal".to_string(),
            model: "gpt-5".to_string(),
            temperature: None,
            max_output_tokens: Some(500),
            reasoning_effort: Some(ReasoningEffort::Minimal),
            verbosity: Some(Verbosity::Low),
        }
    }

    fn test_execution_config(endpoint: &str) -> ExecutionConfig {
        ExecutionConfig {
            api_endpoint: endpoint.to_string(),
            env_var_api_key: "PROMPT_BENCHMARK_TEST_KEY".to_string(),
            rate_limit_rps: 0.0,
        }
    }

    #[test]
    fn test_request_body_includes_gpt5_knobs() {
        let body = build_request_body(&test_prompt(), &test_configuration());

        assert_eq!(body["model"], "gpt-5");
        assert_eq!(body["reasoning_effort"], "minimal");
        assert_eq!(body["verbosity"], "low");
        assert_eq!(body["max_completion_tokens"], 500);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Summarize the report.");
    }

    #[test]
    fn test_request_body_omits_unset_knobs() {
        let configuration = ConfigurationSpec {
            name: "baseline".to_string(),
            model: "gpt-4o".to_string(),
            temperature: Some(0.7),
            max_output_tokens: None,
            reasoning_effort: None,
            verbosity: None,
        };
        let prompt = PromptSpec {
            name: "bare".to_string(),
            system: None,
            user: "Hello.".to_string(),
        };

        let body = build_request_body(&prompt, &configuration);
        assert_eq!(body["temperature"], 0.7);
        assert!(body.get("reasoning_effort").is_none());
        assert!(body.get("verbosity").is_none());
        assert!(body.get("max_completion_tokens").is_none());
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_estimate_cost_prefix_matching() {
        // gpt-5-mini must not fall through to the gpt-5 rate.
        let mini = estimate_cost("gpt-5-mini", 1_000_000, 0).unwrap();
        assert!((mini - 0.25).abs() < 1e-9);

        let full = estimate_cost("gpt-5", 1_000_000, 1_000_000).unwrap();
        assert!((full - 11.25).abs() < 1e-9);

        // Dated variants share their base pricing.
        let variant = estimate_cost("gpt-4o-2024-08-06", 1_000_000, 0).unwrap();
        assert!((variant - 2.50).abs() < 1e-9);

        assert!(estimate_cost("unknown-model", 1000, 1000).is_none());
    }

    #[tokio::test]
    async fn test_run_experiment_missing_env_var() {
        let mut executor = ExperimentExecutor::new();
        let mut execution = test_execution_config("https://api.openai.com/v1");
        execution.env_var_api_key = "PROMPT_BENCHMARK_DEFINITELY_UNSET".to_string();

        unsafe {
            std::env::remove_var(&execution.env_var_api_key);
        }

        let result = executor
            .run_experiment(&execution, &test_prompt(), &test_configuration(), "r1")
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_run_experiment_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "choices": [{
                        "message": {"role": "assistant", "content": "A short summary."},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
                }"#,
            )
            .create_async()
            .await;

        unsafe {
            std::env::set_var("PROMPT_BENCHMARK_TEST_KEY", "test-key");
        }

        let mut executor = ExperimentExecutor::new();
        let execution = test_execution_config(&server.url());
        let result = executor
            .run_experiment(&execution, &test_prompt(), &test_configuration(), "r1")
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(result.success);
        assert_eq!(result.response, "A short summary.");
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
        assert_eq!(result.total_tokens, Some(150));
        assert_eq!(result.run_id.as_deref(), Some("r1"));
        // 100 input + 50 output tokens of gpt-5.
        let expected_cost = (100.0 * 1.25 + 50.0 * 10.0) / 1e6;
        assert!((result.estimated_cost_usd.unwrap() - expected_cost).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_run_experiment_api_error_becomes_failed_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        unsafe {
            std::env::set_var("PROMPT_BENCHMARK_TEST_KEY", "test-key");
        }

        let mut executor = ExperimentExecutor::new();
        let execution = test_execution_config(&server.url());
        let result = executor
            .run_experiment(&execution, &test_prompt(), &test_configuration(), "r1")
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("500"));
        assert!(result.response.is_empty());
        assert!(result.estimated_cost_usd.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_sleeps_between_requests() {
        let mut executor = ExperimentExecutor::new();
        executor.last_request = Some(Instant::now());

        let start = Instant::now();
        executor.enforce_rate_limit(100.0).await;
        assert!(start.elapsed() >= Duration::from_millis(8));
    }

    #[tokio::test]
    async fn test_rate_limit_disabled() {
        let mut executor = ExperimentExecutor::new();
        executor.last_request = Some(Instant::now());

        let start = Instant::now();
        executor.enforce_rate_limit(0.0).await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
