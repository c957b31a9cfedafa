//! Execution seam between the orchestrator and whatever actually runs a task.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{EngineError, EngineResult};
use crate::task::Task;

/// What an executor hands back for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Observed duration in task time units (seconds).
    pub duration: f64,
    pub output: Value,
}

/// Runs a task on an assigned agent.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, agent_id: &str, task: &Task) -> EngineResult<ExecutionReport>;
}

/// Pretends to run a task by sleeping for its estimated duration.
///
/// Wall-clock sleep is `estimated_duration * time_scale`, so a scale of 0
/// runs instantly. The reported duration stays in task time and can be
/// perturbed by a seeded jitter.
pub struct SimulatedExecutor {
    time_scale: f64,
    jitter: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedExecutor {
    pub fn new(time_scale: f64) -> Self {
        Self {
            time_scale: time_scale.max(0.0),
            jitter: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    /// Report durations within `±fraction` of the estimate.
    pub fn with_jitter(mut self, fraction: f64, seed: u64) -> Self {
        self.jitter = fraction.clamp(0.0, 0.95);
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn observed_duration(&self, estimated: f64) -> f64 {
        if self.jitter == 0.0 {
            return estimated;
        }
        let factor = self.rng.lock().gen_range(-self.jitter..=self.jitter);
        estimated * (1.0 + factor)
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn execute(&self, agent_id: &str, task: &Task) -> EngineResult<ExecutionReport> {
        let duration = self.observed_duration(task.estimated_duration);
        let wall = Duration::try_from_secs_f64(duration * self.time_scale).map_err(|e| EngineError::Execution {
            task_id: task.id.clone(),
            message: format!("cannot simulate a duration of {duration}: {e}"),
        })?;
        if !wall.is_zero() {
            tokio::time::sleep(wall).await;
        }
        debug!(agent_id, duration, "simulated execution finished");

        Ok(ExecutionReport {
            duration,
            output: json!({
                "task_id": task.id,
                "agent_id": agent_id,
                "capabilities": task.required_capabilities,
            }),
        })
    }
}
