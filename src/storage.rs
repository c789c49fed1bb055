//! Result store: the persistence boundary the ranking core reads through.
//!
//! The core only ever sees point-in-time snapshots via [`ResultStore`];
//! the JSON-file implementation below also carries the writer surface the
//! runner and CLI need.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{
    AIEvaluation, AIEvaluationBatch, DEFAULT_WEIGHTS_KEY, ExperimentResult, ExperimentRun,
    HumanRanking, RankingWeights, Recommendation, RunStatus,
};

/// Read surface the recommendation engine consumes.
///
/// Every call returns a snapshot; callers must not assume exclusivity or
/// freshness. A running batch simply means fewer evaluations in the
/// snapshot.
pub trait ResultStore {
    /// Successful, acceptable experiments for a prompt.
    fn get_successful_experiments(&self, prompt_name: &str) -> Result<Vec<ExperimentResult>>;

    /// AI evaluations for a prompt, aggregated across all batches.
    fn get_ai_evaluations(&self, prompt_name: &str) -> Result<Vec<AIEvaluation>>;

    fn get_human_rankings(&self, prompt_name: &str) -> Result<Vec<HumanRanking>>;

    /// Stored weights for a prompt, falling back to the global default
    /// entry when the prompt has none.
    fn get_weights(&self, prompt_name: &str) -> Result<Option<RankingWeights>>;
}

/// Everything the store persists, as one serde document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    results: Vec<ExperimentResult>,
    #[serde(default)]
    runs: Vec<ExperimentRun>,
    #[serde(default)]
    ai_batches: Vec<AIEvaluationBatch>,
    #[serde(default)]
    ai_evaluations: Vec<AIEvaluation>,
    #[serde(default)]
    human_rankings: Vec<HumanRanking>,
    #[serde(default)]
    weights: Vec<RankingWeights>,
    #[serde(default)]
    recommendations: Vec<Recommendation>,
}

/// JSON-file backed store. Loads the whole document on open; writes go
/// to memory until [`JsonStore::flush`].
pub struct JsonStore {
    path: PathBuf,
    document: StoreDocument,
}

impl JsonStore {
    /// Open a store at `path`, reading the document if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse store file: {}", path.display()))?
        } else {
            StoreDocument::default()
        };

        Ok(Self { path, document })
    }

    /// Write the document back to disk as pretty-printed JSON.
    pub fn flush(&self) -> Result<()> {
        if let Some(parent) = Path::new(&self.path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(&self.document)
            .context("Failed to serialize store document")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write store file: {}", self.path.display()))
    }

    pub fn save_result(&mut self, result: ExperimentResult) {
        self.document.results.push(result);
    }

    pub fn save_run(&mut self, run: ExperimentRun) {
        self.document.runs.push(run);
    }

    /// Advance a run's lifecycle; stamps `completed_at` when analysis is done.
    pub fn update_run_status(&mut self, run_id: &str, status: RunStatus) -> Result<()> {
        let run = self
            .document
            .runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .with_context(|| format!("Unknown run: {}", run_id))?;
        run.status = status;
        if status == RunStatus::AnalysisCompleted {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Insert or replace a batch by id. Finalization (completed/failed)
    /// arrives as a replace of the running entry.
    pub fn save_ai_batch(&mut self, batch: AIEvaluationBatch) {
        match self
            .document
            .ai_batches
            .iter_mut()
            .find(|b| b.batch_id == batch.batch_id)
        {
            Some(existing) => *existing = batch,
            None => self.document.ai_batches.push(batch),
        }
    }

    pub fn save_ai_evaluation(&mut self, evaluation: AIEvaluation) {
        self.document.ai_evaluations.push(evaluation);
    }

    pub fn save_human_ranking(&mut self, ranking: HumanRanking) {
        self.document.human_rankings.push(ranking);
    }

    /// Store weights, replacing any previous entry for the same name.
    /// The sum invariant is checked before anything is written.
    pub fn save_weights(&mut self, weights: RankingWeights) -> Result<()> {
        weights.validate()?;
        self.document.weights.retain(|w| w.prompt_name != weights.prompt_name);
        self.document.weights.push(weights);
        Ok(())
    }

    /// Store a recommendation, replacing any previous one for the prompt.
    /// Recommendations are derived values: always fully regenerated.
    pub fn save_recommendation(&mut self, recommendation: Recommendation) {
        self.document
            .recommendations
            .retain(|r| r.prompt_name != recommendation.prompt_name);
        self.document.recommendations.push(recommendation);
    }

    /// Most recently started AI batch for a prompt.
    pub fn latest_ai_batch(&self, prompt_name: &str) -> Option<&AIEvaluationBatch> {
        self.document
            .ai_batches
            .iter()
            .filter(|b| b.prompt_name == prompt_name)
            .max_by_key(|b| b.started_at)
    }

    /// Human override: mark a technically-successful result unusable
    /// (or usable again).
    pub fn mark_acceptability(&mut self, experiment_id: &str, acceptable: bool) -> Result<()> {
        let result = self
            .document
            .results
            .iter_mut()
            .find(|r| r.experiment_id == experiment_id);
        match result {
            Some(result) => {
                result.is_acceptable = acceptable;
                Ok(())
            }
            None => bail!("Unknown experiment: {}", experiment_id),
        }
    }

    pub fn runs_for_prompt(&self, prompt_name: &str) -> Vec<&ExperimentRun> {
        self.document
            .runs
            .iter()
            .filter(|r| r.prompt_name == prompt_name)
            .collect()
    }
}

impl ResultStore for JsonStore {
    fn get_successful_experiments(&self, prompt_name: &str) -> Result<Vec<ExperimentResult>> {
        Ok(self
            .document
            .results
            .iter()
            .filter(|r| r.prompt_name == prompt_name && r.success && r.is_acceptable)
            .cloned()
            .collect())
    }

    fn get_ai_evaluations(&self, prompt_name: &str) -> Result<Vec<AIEvaluation>> {
        let batch_ids: Vec<&str> = self
            .document
            .ai_batches
            .iter()
            .filter(|b| b.prompt_name == prompt_name)
            .map(|b| b.batch_id.as_str())
            .collect();

        Ok(self
            .document
            .ai_evaluations
            .iter()
            .filter(|e| batch_ids.contains(&e.batch_id.as_str()))
            .cloned()
            .collect())
    }

    fn get_human_rankings(&self, prompt_name: &str) -> Result<Vec<HumanRanking>> {
        Ok(self
            .document
            .human_rankings
            .iter()
            .filter(|r| r.prompt_name == prompt_name)
            .cloned()
            .collect())
    }

    fn get_weights(&self, prompt_name: &str) -> Result<Option<RankingWeights>> {
        let lookup = |name: &str| {
            self.document
                .weights
                .iter()
                .find(|w| w.prompt_name == name)
                .cloned()
        };
        Ok(lookup(prompt_name).or_else(|| lookup(DEFAULT_WEIGHTS_KEY)))
    }
}
