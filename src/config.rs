use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::RankingWeights;

/// Endpoint settings for running experiments.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// OpenAI-compatible API endpoint
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    pub env_var_api_key: String,
    /// Rate limit for API requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
}

/// Settings for the batch comparative judge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JudgeConfig {
    /// API endpoint for the judge model
    pub api_endpoint: String,
    /// Environment variable name for the judge API key
    pub env_var_api_key: String,
    /// Model acting as judge
    pub model: String,
    /// Criteria the judge scores, e.g. ["accuracy", "clarity", "completeness"]
    pub criteria: Vec<String>,
    /// Low temperature keeps judging consistent
    #[serde(default = "default_judge_temperature")]
    pub temperature: f64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
}

/// GPT-5 reasoning effort levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

/// GPT-5 text verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

/// A named model configuration under benchmark.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigurationSpec {
    /// Human-readable name, unique within the run file
    pub name: String,
    pub model: String,
    /// Sampling temperature; not supported by reasoning models
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub verbosity: Option<Verbosity>,
}

/// A prompt to benchmark every configuration against.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptSpec {
    /// Unique identifier for the prompt
    pub name: String,
    #[serde(default)]
    pub system: Option<String>,
    pub user: String,
}

impl PromptSpec {
    /// Flatten to a single string for storage alongside results.
    pub fn rendered(&self) -> String {
        match &self.system {
            Some(system) => format!("[system]\n{}\n\n[user]\n{}", system, self.user),
            None => self.user.clone(),
        }
    }
}

/// Optional default weights carried in the run file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeightsConfig {
    pub quality: f64,
    pub speed: f64,
    pub cost: f64,
}

/// Root run-file configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub judge: JudgeConfig,
    /// Where the JSON result store lives
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    #[serde(default)]
    pub weights: Option<WeightsConfig>,
    pub prompts: Vec<PromptSpec>,
    pub configurations: Vec<ConfigurationSpec>,
}

fn default_rate_limit() -> f64 {
    10.0
}

fn default_judge_temperature() -> f64 {
    0.3
}

fn default_storage_path() -> String {
    "data/benchmark.json".to_string()
}

impl Config {
    /// Load configuration from a TOML file, rejecting structurally valid
    /// files that would misbehave at run time (duplicate names, empty
    /// sections, weights off the sum invariant).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.prompts.is_empty() {
            bail!("Run file defines no prompts");
        }
        if self.configurations.is_empty() {
            bail!("Run file defines no configurations");
        }

        let prompt_names: Vec<&str> = self.prompts.iter().map(|p| p.name.as_str()).collect();
        let config_names: Vec<&str> = self
            .configurations
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        for (label, names) in [("prompt", prompt_names), ("configuration", config_names)] {
            let mut seen = std::collections::HashSet::new();
            for name in names {
                if !seen.insert(name) {
                    bail!("Duplicate {} name: {}", label, name);
                }
            }
        }

        if let Some(weights) = &self.weights {
            // Fails on a bad sum before any experiment runs.
            RankingWeights::new(
                crate::models::DEFAULT_WEIGHTS_KEY,
                weights.quality,
                weights.speed,
                weights.cost,
                "run-file",
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASE_CONFIG: &str = r#"
storage_path = "/tmp/benchmark-test.json"

[execution]
api_endpoint = "https://api.openai.com/v1"
env_var_api_key = "OPENAI_API_KEY"
rate_limit_rps = 5.0

[judge]
api_endpoint = "https://api.openai.com/v1"
env_var_api_key = "OPENAI_API_KEY"
model = "gpt-4o"
criteria = ["accuracy", "clarity"]

[[prompts]]
name = "summarize"
system = "You are concise."
user = "Summarize the attached report."

[[prompts]]
name = "translate"
user = "Translate to French: hello."

[[configurations]]
name = "gpt-5-minimal"
model = "gpt-5"
reasoning_effort = "minimal"
verbosity = "low"

[[configurations]]
name = "gpt-4o-baseline"
model = "gpt-4o"
temperature = 0.7
max_output_tokens = 800
"#;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_config_parsing() {
        let file = write_config(BASE_CONFIG);
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.prompts.len(), 2);
        assert_eq!(config.configurations.len(), 2);
        assert_eq!(config.execution.rate_limit_rps, 5.0);
        assert_eq!(config.judge.model, "gpt-4o");
        assert_eq!(config.judge.temperature, 0.3); // default
        assert_eq!(
            config.configurations[0].reasoning_effort,
            Some(ReasoningEffort::Minimal)
        );
        assert_eq!(config.configurations[0].verbosity, Some(Verbosity::Low));
        assert_eq!(config.configurations[1].temperature, Some(0.7));
        assert!(config.configurations[1].reasoning_effort.is_none());
    }

    #[test]
    fn test_config_weights_validated_on_load() {
        let with_weights = format!("{}\n[weights]\nquality = 0.7\nspeed = 0.2\ncost = 0.1\n", BASE_CONFIG);
        let file = write_config(&with_weights);
        assert!(Config::from_file(file.path()).is_ok());

        let bad_weights = format!("{}\n[weights]\nquality = 0.5\nspeed = 0.5\ncost = 0.5\n", BASE_CONFIG);
        let file = write_config(&bad_weights);
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_config_rejects_duplicate_configuration_names() {
        let duplicated = format!(
            "{}\n[[configurations]]\nname = \"gpt-5-minimal\"\nmodel = \"gpt-5\"\n",
            BASE_CONFIG
        );
        let file = write_config(&duplicated);
        let error = Config::from_file(file.path()).unwrap_err();
        assert!(error.to_string().contains("Duplicate configuration name"));
    }

    #[test]
    fn test_config_rejects_empty_prompts() {
        let content = r#"
[execution]
api_endpoint = "https://api.openai.com/v1"
env_var_api_key = "OPENAI_API_KEY"

[judge]
api_endpoint = "https://api.openai.com/v1"
env_var_api_key = "OPENAI_API_KEY"
model = "gpt-4o"
criteria = ["accuracy"]

[[configurations]]
name = "baseline"
model = "gpt-4o"
"#;
        let file = write_config(content);
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_prompt_rendering() {
        let prompt = PromptSpec {
            name: "summarize".to_string(),
            system: Some("Be terse.".to_string()),
            user: "Summarize.".to_string(),
        };
        assert_eq!(prompt.rendered(), "[system]\nBe terse.\n\n[user]\nSummarize.");

        let bare = PromptSpec {
            name: "summarize".to_string(),
            system: None,
            user: "Summarize.".to_string(),
        };
        assert_eq!(bare.rendered(), "Summarize.");
    }
}
