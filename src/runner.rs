//! Orchestrates a benchmark: every configuration against every prompt,
//! one run per prompt, followed by a batch judge evaluation of the
//! run's successful results.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::executor::ExperimentExecutor;
use crate::judge::BatchJudge;
use crate::models::{
    AIEvaluation, AIEvaluationBatch, ExperimentResult, ExperimentRun, RunStatus,
};
use crate::storage::JsonStore;

/// Everything one prompt's run produced, for presentation.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub prompt_name: String,
    pub run_id: String,
    pub results: Vec<ExperimentResult>,
    pub batch: Option<AIEvaluationBatch>,
    pub evaluations: Vec<AIEvaluation>,
}

/// Main runner that executes the benchmark described by a run file.
pub struct Runner {
    config: Config,
    executor: ExperimentExecutor,
    judge: BatchJudge,
}

impl Runner {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            executor: ExperimentExecutor::new(),
            judge: BatchJudge::new(),
        }
    }

    /// Run every prompt, persisting results and evaluations into `store`.
    /// The caller owns flushing the store to disk.
    pub async fn run_all(&mut self, store: &mut JsonStore) -> Result<Vec<RunSummary>> {
        let mut summaries = Vec::new();
        let prompts = self.config.prompts.clone();
        let total = prompts.len();

        for (index, prompt) in prompts.iter().enumerate() {
            tracing::info!(
                prompt = %prompt.name,
                progress = %format!("{}/{}", index + 1, total),
                "starting run"
            );
            let summary = self.run_prompt(store, prompt).await?;
            summaries.push(summary);
        }

        Ok(summaries)
    }

    /// Execute one prompt under every configuration, then judge the run.
    async fn run_prompt(
        &mut self,
        store: &mut JsonStore,
        prompt: &crate::config::PromptSpec,
    ) -> Result<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        store.save_run(ExperimentRun {
            run_id: run_id.clone(),
            prompt_name: prompt.name.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            num_configs: self.config.configurations.len(),
            total_cost: None,
        });

        let mut results = Vec::new();
        let configurations = self.config.configurations.clone();
        for configuration in &configurations {
            let result = self
                .executor
                .run_experiment(&self.config.execution, prompt, configuration, &run_id)
                .await?;
            store.save_result(result.clone());
            results.push(result);
        }
        store.update_run_status(&run_id, RunStatus::ExperimentsCompleted)?;

        // Comparative judging needs at least two responses to compare.
        let successful: Vec<ExperimentResult> =
            results.iter().filter(|r| r.success).cloned().collect();
        let (batch, evaluations) = if successful.len() >= 2 {
            let (batch, evaluations) = self
                .judge
                .evaluate_run(&self.config.judge, prompt, &successful)
                .await?;
            store.save_ai_batch(batch.clone());
            for evaluation in &evaluations {
                store.save_ai_evaluation(evaluation.clone());
            }
            (Some(batch), evaluations)
        } else {
            tracing::warn!(
                prompt = %prompt.name,
                successful = successful.len(),
                "skipping batch evaluation; not enough successful results"
            );
            (None, vec![])
        };
        store.update_run_status(&run_id, RunStatus::AnalysisCompleted)?;

        Ok(RunSummary {
            prompt_name: prompt.name.clone(),
            run_id,
            results,
            batch,
            evaluations,
        })
    }
}
