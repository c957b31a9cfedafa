//! Batch processing for pre-configured task sets.
//!
//! A batch file names its agent roster and tasks in TOML. Tasks run through the
//! orchestrator in dependency order with bounded concurrency, and the results
//! can be summarized on stdout and saved as JSON.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::EngineError;
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::{Orchestrator, TaskOutcome};
use crate::settings::Settings;
use crate::task::Task;

/// Batch job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub job: JobMetadata,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub settings: BatchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Overrides `orchestrator.max_concurrent_tasks` for this batch.
    pub max_concurrent_tasks: Option<usize>,
    pub output_file: Option<PathBuf>,
    /// Treat any failed task as a failed batch.
    #[serde(default)]
    pub fail_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Cached,
    Failed,
    Skipped,
}

/// Per-task entry of a batch result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub agent_id: Option<String>,
    pub completion_time: Option<f64>,
    pub predicted_completion: Option<f64>,
    pub error: Option<String>,
}

impl From<&TaskOutcome> for BatchTaskResult {
    fn from(outcome: &TaskOutcome) -> Self {
        let status = match outcome {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Cached(_) => TaskStatus::Cached,
            TaskOutcome::Failed { error: EngineError::DependencyFailed { .. }, .. } => TaskStatus::Skipped,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
        };
        let result = outcome.result();
        Self {
            task_id: outcome.task_id().to_string(),
            status,
            agent_id: result.map(|r| r.agent_id.clone()),
            completion_time: result.map(|r| r.completion_time),
            predicted_completion: result.map(|r| r.predicted_completion),
            error: outcome.error().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub run_id: Uuid,
    pub job_name: String,
    pub status: BatchStatus,
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    pub total_duration_ms: u64,
    pub task_results: Vec<BatchTaskResult>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    PartialSuccess,
    Failed,
}

/// Execute a batch job from configuration file
#[instrument(skip(settings))]
pub async fn run(config_path: PathBuf, settings: Settings) -> Result<()> {
    info!("Starting batch execution from config: {:?}", config_path);

    let config = load_batch_config(&config_path).context("Failed to load batch configuration")?;
    info!("Loaded batch job: {} (version: {})", config.job.name, config.job.version);

    let output_file = config.settings.output_file.clone();
    let fail_on_error = config.settings.fail_on_error;

    let result = execute_batch(config, &settings).await.context("Batch execution failed")?;
    print_batch_summary(&result);

    if let Some(ref output_file_path) = output_file {
        save_batch_results(&result, output_file_path).context("Failed to save batch results")?;
    }

    match result.status {
        BatchStatus::Success => Ok(()),
        BatchStatus::PartialSuccess if !fail_on_error => {
            warn!("Batch completed with some failures");
            Ok(())
        }
        _ => {
            error!("Batch execution failed");
            Err(anyhow!(
                "Batch execution failed: {} of {} tasks did not complete",
                result.failed_tasks + result.skipped_tasks,
                result.total_tasks
            ))
        }
    }
}

/// Load batch configuration from TOML file
pub fn load_batch_config(config_path: &Path) -> Result<BatchConfig> {
    let contents = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

    let config: BatchConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse TOML config: {:?}", config_path))?;

    validate_batch_config(&config)?;
    Ok(config)
}

/// Validate batch configuration
pub fn validate_batch_config(config: &BatchConfig) -> Result<()> {
    if config.agents.is_empty() {
        return Err(anyhow!("Batch configuration must contain at least one agent"));
    }
    if config.tasks.is_empty() {
        return Err(anyhow!("Batch configuration must contain at least one task"));
    }
    if config.settings.max_concurrent_tasks == Some(0) {
        return Err(anyhow!("max_concurrent_tasks cannot be 0"));
    }

    let mut agent_ids = HashSet::new();
    for agent in &config.agents {
        if !agent_ids.insert(&agent.id) {
            return Err(anyhow!("Duplicate agent ID: {}", agent.id));
        }
    }

    let mut task_ids = HashSet::new();
    for task in &config.tasks {
        if !task_ids.insert(&task.id) {
            return Err(anyhow!("Duplicate task ID: {}", task.id));
        }
    }

    for task in &config.tasks {
        for dep in &task.dependencies {
            if !task_ids.contains(dep) {
                return Err(anyhow!("Task {} depends on non-existent task: {}", task.id, dep));
            }
        }
    }

    Ok(())
}

/// Build an orchestrator for the batch roster and process every task.
pub async fn execute_batch(config: BatchConfig, settings: &Settings) -> Result<BatchResult> {
    let start_time = Instant::now();
    let total_tasks = config.tasks.len();
    let max_concurrent = config
        .settings
        .max_concurrent_tasks
        .unwrap_or(settings.orchestrator.max_concurrent_tasks);

    let orchestrator = Arc::new(
        Orchestrator::new(settings, config.agents).context("Failed to initialize orchestrator")?,
    );
    let outcomes = orchestrator.process_batch(config.tasks, max_concurrent).await;

    let task_results: Vec<BatchTaskResult> = outcomes.iter().map(BatchTaskResult::from).collect();
    let count = |status: TaskStatus| task_results.iter().filter(|r| r.status == status).count();
    let successful_tasks = count(TaskStatus::Completed) + count(TaskStatus::Cached);
    let failed_tasks = count(TaskStatus::Failed);
    let skipped_tasks = count(TaskStatus::Skipped);

    let status = if successful_tasks == total_tasks {
        BatchStatus::Success
    } else if successful_tasks > 0 {
        BatchStatus::PartialSuccess
    } else {
        BatchStatus::Failed
    };

    Ok(BatchResult {
        run_id: Uuid::new_v4(),
        job_name: config.job.name,
        status,
        total_tasks,
        successful_tasks,
        failed_tasks,
        skipped_tasks,
        total_duration_ms: start_time.elapsed().as_millis() as u64,
        task_results,
        metrics: orchestrator.metrics(),
    })
}

/// Print batch execution summary
fn print_batch_summary(result: &BatchResult) {
    println!("\n=== Batch Execution Summary ===");
    println!("Job: {} (run {})", result.job_name, result.run_id);
    println!("Status: {:?}", result.status);
    println!("Total Tasks: {}", result.total_tasks);
    println!("Successful: {}", result.successful_tasks);
    println!("Failed: {}", result.failed_tasks);
    println!("Skipped: {}", result.skipped_tasks);
    println!("Duration: {}ms", result.total_duration_ms);
    println!("Cache hit rate: {:.2}", result.metrics.cache_hit_rate);
    println!("Load variance: {:.4}", result.metrics.load_balance_variance);
    println!("Knowledge transfers: {}", result.metrics.knowledge_transfers);

    if result.failed_tasks + result.skipped_tasks > 0 {
        println!("\nFailed Tasks:");
        for task in &result.task_results {
            if matches!(task.status, TaskStatus::Failed | TaskStatus::Skipped) {
                println!("  - {}: {}", task.task_id, task.error.as_deref().unwrap_or("Unknown error"));
            }
        }
    }
    println!("===============================\n");
}

/// Save batch results to JSON file
fn save_batch_results(result: &BatchResult, output_file: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize batch results")?;

    std::fs::write(output_file, json)
        .with_context(|| format!("Failed to write results to: {:?}", output_file))?;

    info!("Batch results saved to: {:?}", output_file);
    Ok(())
}

fn default_version() -> String {
    "1.0".to_string()
}
