//! Layered configuration: embedded defaults, optional file, then environment.

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::agent::DEFAULT_PERFORMANCE_HISTORY;
use crate::cache::CacheConfig;
use crate::knowledge::KnowledgeConfig;
use crate::predictor::{PredictionWeights, PredictorWindows};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            enable_target: false,
        }
    }
}

/// Scheduler and load predictor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub weights: PredictionWeights,
    /// Draw the prediction weights at random instead of using `weights`.
    pub randomize_weights: bool,
    pub weights_seed: Option<u64>,
    pub windows: PredictorWindows,
    pub learning_rate: f64,
    /// Give an agent's reserved load back once its task finishes.
    pub release_load_on_completion: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            weights: PredictionWeights::default(),
            randomize_weights: false,
            weights_seed: None,
            windows: PredictorWindows::default(),
            learning_rate: 0.1,
            release_load_on_completion: false,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    /// Wall-clock seconds slept per simulated task second.
    pub time_scale: f64,
    pub task_timeout_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            time_scale: 1.0,
            task_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    pub performance_history_limit: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            performance_history_limit: DEFAULT_PERFORMANCE_HISTORY,
        }
    }
}

/// Main settings structure with all configuration sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

impl Settings {
    /// Load settings from the embedded defaults, an optional config file and
    /// `ATE__`-prefixed environment variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from_str(include_str!("../config.toml"), FileFormat::Toml));

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("task_engine").required(false)),
        };

        let config = builder
            .add_source(
                Environment::with_prefix("ATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings for consistency
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(anyhow!("Unknown log format '{}'", self.logging.format));
        }

        let w = &self.scheduler.weights;
        PredictionWeights::new(w.historical, w.pattern, w.specialization)?;
        let windows = &self.scheduler.windows;
        if windows.load_window == 0 || windows.pattern_window == 0 || windows.pattern_sample == 0 {
            return Err(anyhow!("Predictor windows must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.scheduler.learning_rate) {
            return Err(anyhow!("Scheduler learning rate must be in [0, 1]"));
        }

        if self.cache.capacity == 0 {
            return Err(anyhow!("Cache capacity cannot be 0"));
        }
        if self.cache.tiers == 0 {
            return Err(anyhow!("Cache needs at least one tier"));
        }
        if self.cache.classifier.update_frequency == 0 {
            return Err(anyhow!("Classifier update frequency cannot be 0"));
        }

        let k = &self.knowledge;
        if !(0.0..=1.0).contains(&k.learning_rate) {
            return Err(anyhow!("Knowledge learning rate must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&k.transfer_threshold) {
            return Err(anyhow!("Transfer threshold must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&k.transfer_discount) {
            return Err(anyhow!("Transfer discount must be in [0, 1]"));
        }

        let o = &self.orchestrator;
        if o.max_concurrent_tasks == 0 {
            return Err(anyhow!("Max concurrent tasks cannot be 0"));
        }
        if !(o.time_scale.is_finite() && o.time_scale >= 0.0) {
            return Err(anyhow!("Time scale must be a non-negative number"));
        }
        if o.task_timeout_seconds == 0 {
            return Err(anyhow!("Task timeout cannot be 0"));
        }

        if self.agents.performance_history_limit == 0 {
            return Err(anyhow!("Performance history limit cannot be 0"));
        }
        Ok(())
    }
}
