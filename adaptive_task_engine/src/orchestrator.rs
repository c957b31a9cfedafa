//! Core coordinator: cache lookup, scheduling, execution and learning for
//! every submitted task.

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::agent::{Agent, AgentCatalog};
use crate::cache::{AccessContext, HierarchicalCache};
use crate::error::{EngineError, EngineResult};
use crate::executor::{SimulatedExecutor, TaskExecutor};
use crate::knowledge::{KnowledgeStore, TransferRecord};
use crate::metrics::{CompletionRecord, EngineMetrics, LiveGauges, MetricsSnapshot};
use crate::predictor::{LoadPredictor, PredictionWeights};
use crate::scheduler::{Assignment, Scheduler};
use crate::settings::Settings;
use crate::task::{Complexity, Task};

/// Result of one executed task. This is also what the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_id: String,
    pub complexity: Complexity,
    /// Observed duration in seconds.
    pub completion_time: f64,
    pub predicted_completion: f64,
    pub performance: f64,
    pub output: Value,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(TaskResult),
    /// Served from the cache; no agent was scheduled.
    Cached(TaskResult),
    Failed { task_id: String, error: EngineError },
}

impl TaskOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Completed(result) | Self::Cached(result) => &result.task_id,
            Self::Failed { task_id, .. } => task_id,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            Self::Completed(result) | Self::Cached(result) => Some(result),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Cache key for a task's result.
pub fn cache_key(task: &Task) -> String {
    format!("task_{}_{}", task.id, task.complexity.level())
}

pub struct Orchestrator {
    catalog: Arc<AgentCatalog>,
    scheduler: Scheduler,
    cache: HierarchicalCache<TaskResult>,
    knowledge: KnowledgeStore,
    executor: Arc<dyn TaskExecutor>,
    metrics: EngineMetrics,
    task_timeout: Duration,
    release_load: bool,
    max_concurrent: usize,
}

impl Orchestrator {
    /// Build the engine over `agents` using a [`SimulatedExecutor`] scaled by
    /// `orchestrator.time_scale`.
    #[instrument(skip(settings, agents), fields(agents = agents.len()))]
    pub fn new(settings: &Settings, agents: Vec<Agent>) -> EngineResult<Self> {
        let executor = Arc::new(SimulatedExecutor::new(settings.orchestrator.time_scale));
        Self::with_executor(settings, agents, executor)
    }

    pub fn with_executor(
        settings: &Settings,
        agents: Vec<Agent>,
        executor: Arc<dyn TaskExecutor>,
    ) -> EngineResult<Self> {
        let catalog = Arc::new(
            AgentCatalog::new(agents)?.with_performance_limit(settings.agents.performance_history_limit),
        );

        let scheduler_config = &settings.scheduler;
        let weights = if scheduler_config.randomize_weights {
            let mut rng = match scheduler_config.weights_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            PredictionWeights::random(&mut rng)
        } else {
            let w = scheduler_config.weights;
            PredictionWeights::new(w.historical, w.pattern, w.specialization)?
        };
        let predictor = LoadPredictor::new(weights, scheduler_config.windows);
        let scheduler = Scheduler::new(catalog.clone(), predictor)
            .with_learning_rate(scheduler_config.learning_rate);

        let cache = HierarchicalCache::new(settings.cache.clone())?;
        let knowledge = KnowledgeStore::new(catalog.clone(), settings.knowledge.clone());

        info!(
            agents = catalog.len(),
            cache_capacity = cache.capacity(),
            executor = executor.name(),
            "orchestrator initialized"
        );

        Ok(Self {
            catalog,
            scheduler,
            cache,
            knowledge,
            executor,
            metrics: EngineMetrics::new(),
            task_timeout: Duration::from_secs(settings.orchestrator.task_timeout_seconds),
            release_load: scheduler_config.release_load_on_completion,
            max_concurrent: settings.orchestrator.max_concurrent_tasks.max(1),
        })
    }

    pub fn catalog(&self) -> &Arc<AgentCatalog> {
        &self.catalog
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &HierarchicalCache<TaskResult> {
        &self.cache
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Assign a task to an agent without executing it.
    pub fn schedule(&self, task: &Task) -> EngineResult<Assignment> {
        self.scheduler.assign(task)
    }

    pub fn cache_get(&self, key: &str, context: &AccessContext) -> Option<TaskResult> {
        self.cache.get(key, context)
    }

    pub fn cache_put(&self, key: &str, value: TaskResult, context: &AccessContext) {
        self.cache.put(key, value, context)
    }

    /// Feed an observed performance score back into knowledge, specialization
    /// and the agent's performance history, in that order.
    pub fn record_outcome(&self, agent_id: &str, task: &Task, performance: f64) -> EngineResult<Vec<TransferRecord>> {
        let knowledge_key = task.pattern_key().to_string();
        let transfers = self
            .knowledge
            .update_knowledge(agent_id, &knowledge_key, performance)?;
        self.scheduler
            .update_specialization(agent_id, task, performance)?;
        self.catalog.record_performance(agent_id, performance)?;
        Ok(transfers)
    }

    /// Serve a task from the cache or schedule, execute and learn from it.
    /// Failures are recorded and returned, never propagated.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn process_task(&self, task: &Task) -> TaskOutcome {
        self.metrics.record_submitted();
        match self.run_task(task).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(%error, "task failed");
                self.metrics.record_failure();
                TaskOutcome::Failed {
                    task_id: task.id.clone(),
                    error,
                }
            }
        }
    }

    async fn run_task(&self, task: &Task) -> EngineResult<TaskOutcome> {
        task.validate()?;

        let key = cache_key(task);
        let context = AccessContext::now().with_complexity(task.complexity.level());
        if let Some(result) = self.cache.get(&key, &context) {
            debug!("served from cache");
            self.metrics.record_cache_hit();
            return Ok(TaskOutcome::Cached(result));
        }
        self.metrics.record_cache_miss();

        let assignment = self.scheduler.assign(task)?;
        let agent_id = assignment.agent_id.clone();

        let executed = tokio::time::timeout(self.task_timeout, self.executor.execute(&agent_id, task)).await;
        if self.release_load {
            self.catalog.release_load(&agent_id, task.estimated_duration)?;
        }
        let report = match executed {
            Ok(Ok(report)) => report,
            Ok(Err(error)) => return Err(self.abandon(task, &assignment, error)),
            Err(_) => {
                let error = EngineError::Timeout {
                    task_id: task.id.clone(),
                };
                return Err(self.abandon(task, &assignment, error));
            }
        };

        let performance = if report.duration > 0.0 { 1.0 / report.duration } else { 1.0 };
        let transfers = self.record_outcome(&agent_id, task, performance)?;

        let result = TaskResult {
            task_id: task.id.clone(),
            agent_id: agent_id.clone(),
            complexity: task.complexity,
            completion_time: report.duration,
            predicted_completion: assignment.predicted_completion,
            performance,
            output: report.output,
            finished_at: Utc::now(),
        };
        self.cache
            .put(&key, result.clone(), &context.with_agent(agent_id.as_str()));
        self.metrics.record_completion(CompletionRecord {
            task_id: task.id.clone(),
            agent_id: agent_id.clone(),
            predicted_completion: assignment.predicted_completion,
            actual_completion: Some(report.duration),
            success: true,
        });

        info!(
            agent_id = %agent_id,
            completion_time = report.duration,
            predicted = assignment.predicted_completion,
            transfers = transfers.len(),
            "task completed"
        );
        Ok(TaskOutcome::Completed(result))
    }

    fn abandon(&self, task: &Task, assignment: &Assignment, error: EngineError) -> EngineError {
        self.metrics.record_completion(CompletionRecord {
            task_id: task.id.clone(),
            agent_id: assignment.agent_id.clone(),
            predicted_completion: assignment.predicted_completion,
            actual_completion: None,
            success: false,
        });
        error
    }

    /// Process tasks in dependency order, at most `max_concurrent` at a time.
    ///
    /// Tasks become ready in waves once every dependency has resolved. A task
    /// whose dependency failed, is missing from the batch, or sits on a cycle
    /// fails with [`EngineError::DependencyFailed`] without being run.
    /// Outcomes are returned in input order.
    #[instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    pub async fn process_batch(self: &Arc<Self>, tasks: Vec<Task>, max_concurrent: usize) -> Vec<TaskOutcome> {
        let total = tasks.len();
        let batch_ids: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        // outcomes are slotted by input position so repeated ids keep their own entry
        let mut remaining: Vec<(usize, Task)> = tasks.into_iter().enumerate().collect();
        let mut outcomes: Vec<Option<TaskOutcome>> = (0..total).map(|_| None).collect();
        let mut succeeded: HashSet<String> = HashSet::new();
        let mut settled: HashSet<String> = HashSet::new();
        let mut wave = 0usize;

        while !remaining.is_empty() {
            // tasks blocked by a failed or unknown dependency are settled first
            let (blocked, rest): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|(_, task)| {
                task.dependencies
                    .iter()
                    .any(|dep| !batch_ids.contains(dep) || (settled.contains(dep) && !succeeded.contains(dep)))
            });
            for (index, task) in blocked {
                settled.insert(task.id.clone());
                outcomes[index] = Some(self.fail_dependency(&task, &succeeded));
            }

            let (mut ready, waiting): (Vec<_>, Vec<_>) = rest
                .into_iter()
                .partition(|(_, task)| task.dependencies.iter().all(|dep| succeeded.contains(dep)));

            if ready.is_empty() {
                // what is left can never run: its dependencies form a cycle
                for (index, task) in waiting {
                    outcomes[index] = Some(self.fail_dependency(&task, &succeeded));
                }
                break;
            }

            wave += 1;
            ready.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority));
            debug!(wave, ready = ready.len(), waiting = waiting.len(), "dispatching wave");

            let mut slots = Vec::with_capacity(ready.len());
            let mut handles = Vec::with_capacity(ready.len());
            for (index, task) in ready {
                // the semaphore is never closed, so a permit is always granted
                let permit = semaphore.clone().acquire_owned().await.ok();
                let engine = Arc::clone(self);
                slots.push((index, task.id.clone()));
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    engine.process_task(&task).await
                }));
            }

            let joined = futures::future::join_all(handles).await;
            for ((index, task_id), joined) in slots.into_iter().zip(joined) {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(join_error) => {
                        self.metrics.record_failure();
                        TaskOutcome::Failed {
                            task_id: task_id.clone(),
                            error: EngineError::Execution {
                                task_id: task_id.clone(),
                                message: join_error.to_string(),
                            },
                        }
                    }
                };
                if outcome.is_success() {
                    succeeded.insert(task_id.clone());
                }
                settled.insert(task_id);
                outcomes[index] = Some(outcome);
            }

            remaining = waiting;
        }

        info!(waves = wave, succeeded = succeeded.len(), total, "batch finished");
        outcomes.into_iter().flatten().collect()
    }

    fn fail_dependency(&self, task: &Task, succeeded: &HashSet<String>) -> TaskOutcome {
        let dependency = task
            .dependencies
            .iter()
            .find(|dep| !succeeded.contains(*dep))
            .cloned()
            .unwrap_or_default();
        warn!(task_id = %task.id, %dependency, "dependency not satisfied");
        self.metrics.record_submitted();
        self.metrics.record_failure();
        TaskOutcome::Failed {
            task_id: task.id.clone(),
            error: EngineError::DependencyFailed {
                task_id: task.id.clone(),
                dependency,
            },
        }
    }

    pub fn completions(&self) -> Vec<CompletionRecord> {
        self.metrics.completions()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(LiveGauges {
            load_balance_variance: self.catalog.load_variance(),
            knowledge_transfers: self.knowledge.transfer_count(),
            cache_hit_rate: self.cache.hit_rate(),
            cache_residency_ratio: self.cache.residency_ratio(),
        })
    }
}
