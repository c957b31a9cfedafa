//! Per-agent knowledge with similarity-gated propagation between agents.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::agent::{Agent, AgentCatalog};
use crate::error::{EngineError, EngineResult};

const CAPABILITY_WEIGHT: f64 = 0.4;
const PERFORMANCE_WEIGHT: f64 = 0.3;
const SPECIALIZATION_WEIGHT: f64 = 0.3;
const NEUTRAL: f64 = 0.5;

/// One propagation event. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub source: String,
    pub target: String,
    pub knowledge_key: String,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
    pub source_value: f64,
    pub resulting_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub learning_rate: f64,
    /// Minimum similarity for propagation.
    pub transfer_threshold: f64,
    /// Extra discount applied on top of `learning_rate * similarity`.
    pub transfer_discount: f64,
    /// Performance samples compared by the similarity metric.
    pub performance_window: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            transfer_threshold: 0.7,
            transfer_discount: 0.5,
            performance_window: 10,
        }
    }
}

/// Pairwise agent similarity in [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct SimilarityIndex {
    performance_window: usize,
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SimilarityIndex {
    pub fn new(performance_window: usize) -> Self {
        Self {
            performance_window: performance_window.max(1),
        }
    }

    pub fn similarity(&self, a: &Agent, b: &Agent) -> f64 {
        let total = CAPABILITY_WEIGHT * capability_overlap(a, b)
            + PERFORMANCE_WEIGHT * self.performance_closeness(a, b)
            + SPECIALIZATION_WEIGHT * specialization_agreement(a, b);
        total.clamp(0.0, 1.0)
    }

    /// Every other agent in `roster` whose similarity to `agent` reaches
    /// `threshold`, in roster order.
    pub fn neighbours(&self, agent: &Agent, roster: &[Agent], threshold: f64) -> Vec<(String, f64)> {
        roster
            .iter()
            .filter(|other| other.id != agent.id)
            .map(|other| (other.id.clone(), self.similarity(agent, other)))
            .filter(|(_, similarity)| *similarity >= threshold)
            .collect()
    }

    /// Similarity for every ordered pair of distinct agents.
    pub fn matrix(&self, roster: &[Agent]) -> HashMap<(String, String), f64> {
        let mut matrix = HashMap::new();
        for (i, a) in roster.iter().enumerate() {
            for b in &roster[i + 1..] {
                let s = self.similarity(a, b);
                matrix.insert((a.id.clone(), b.id.clone()), s);
                matrix.insert((b.id.clone(), a.id.clone()), s);
            }
        }
        matrix
    }

    fn performance_closeness(&self, a: &Agent, b: &Agent) -> f64 {
        match (
            a.recent_performance(self.performance_window),
            b.recent_performance(self.performance_window),
        ) {
            (Some(pa), Some(pb)) => 1.0 - (pa - pb).abs() / pa.max(pb).max(1.0),
            _ => NEUTRAL,
        }
    }
}

fn capability_overlap(a: &Agent, b: &Agent) -> f64 {
    if a.capabilities.is_empty() || b.capabilities.is_empty() {
        return 0.0;
    }
    let shared = a.capabilities.intersection(&b.capabilities).count();
    let union = a.capabilities.union(&b.capabilities).count();
    shared as f64 / union as f64
}

fn specialization_agreement(a: &Agent, b: &Agent) -> f64 {
    match (a.specialization.is_empty(), b.specialization.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return NEUTRAL,
        (false, false) => {}
    }
    // sorted so the sum is bit-identical whichever agent comes first
    let mut shared: Vec<&String> = a
        .specialization
        .keys()
        .filter(|cap| b.specialization.contains_key(*cap))
        .collect();
    if shared.is_empty() {
        return 0.0;
    }
    shared.sort();
    let total: f64 = shared
        .iter()
        .map(|cap| 1.0 - (a.specialization[*cap] - b.specialization[*cap]).abs())
        .sum();
    total / shared.len() as f64
}

#[derive(Default)]
struct KnowledgeState {
    bases: HashMap<String, HashMap<String, f64>>,
    transfers: Vec<TransferRecord>,
}

/// Scalar knowledge per `(agent, key)` plus the transfer log.
pub struct KnowledgeStore {
    catalog: Arc<AgentCatalog>,
    config: KnowledgeConfig,
    similarity: SimilarityIndex,
    state: RwLock<KnowledgeState>,
}

impl KnowledgeStore {
    pub fn new(catalog: Arc<AgentCatalog>, config: KnowledgeConfig) -> Self {
        let similarity = SimilarityIndex::new(config.performance_window);
        Self {
            catalog,
            config,
            similarity,
            state: RwLock::new(KnowledgeState::default()),
        }
    }

    /// Similarity between two catalog agents, from their current state.
    pub fn similarity(&self, a: &str, b: &str) -> EngineResult<f64> {
        let a = self.agent(a)?;
        let b = self.agent(b)?;
        Ok(self.similarity.similarity(&a, &b))
    }

    /// Blend `reward` into the agent's own knowledge, then propagate it to
    /// every sufficiently similar agent. Returns the transfers made.
    #[instrument(skip(self))]
    pub fn update_knowledge(&self, agent_id: &str, key: &str, reward: f64) -> EngineResult<Vec<TransferRecord>> {
        let agent = self.agent(agent_id)?;
        let reward = if reward.is_finite() { reward } else { 0.0 };

        // similarity reads agent locks; done before taking the store lock
        let roster = self.catalog.snapshot();
        let neighbours = self
            .similarity
            .neighbours(&agent, &roster, self.config.transfer_threshold);

        let mut state = self.state.write();
        let rate = self.config.learning_rate;
        let own = state.bases.entry(agent_id.to_string()).or_default();
        own.entry(key.to_string())
            .and_modify(|value| *value = (1.0 - rate) * *value + rate * reward)
            .or_insert(reward);

        let mut records = Vec::with_capacity(neighbours.len());
        for (target, similarity) in neighbours {
            let transfer_rate = rate * similarity * self.config.transfer_discount;
            if let Some(record) = Self::transfer_locked(&mut state, agent_id, &target, key, transfer_rate) {
                records.push(record);
            }
        }
        debug!(transfers = records.len(), "knowledge updated");
        Ok(records)
    }

    /// Move part of `source`'s value for `key` into `target`. A target that
    /// has never seen the key starts at the discounted `rate * value`.
    pub fn transfer(&self, source: &str, target: &str, key: &str, rate: f64) -> EngineResult<Option<TransferRecord>> {
        for id in [source, target] {
            if !self.catalog.contains(id) {
                return Err(EngineError::UnknownAgent(id.to_string()));
            }
        }
        let mut state = self.state.write();
        Ok(Self::transfer_locked(&mut state, source, target, key, rate))
    }

    /// Knowledge value for `(agent, key)`, 0 when never observed.
    pub fn knowledge(&self, agent_id: &str, key: &str) -> f64 {
        self.try_knowledge(agent_id, key).unwrap_or(0.0)
    }

    pub fn try_knowledge(&self, agent_id: &str, key: &str) -> Option<f64> {
        self.state
            .read()
            .bases
            .get(agent_id)
            .and_then(|base| base.get(key))
            .copied()
    }

    pub fn transfer_count(&self) -> usize {
        self.state.read().transfers.len()
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.state.read().transfers.clone()
    }

    pub fn transfers_between(&self, source: &str, target: &str) -> Vec<TransferRecord> {
        self.state
            .read()
            .transfers
            .iter()
            .filter(|r| r.source == source && r.target == target)
            .cloned()
            .collect()
    }

    fn transfer_locked(
        state: &mut KnowledgeState,
        source: &str,
        target: &str,
        key: &str,
        rate: f64,
    ) -> Option<TransferRecord> {
        if source == target {
            return None;
        }
        let source_value = *state.bases.get(source)?.get(key)?;
        let rate = rate.clamp(0.0, 1.0);

        let target_base = state.bases.entry(target.to_string()).or_default();
        let resulting_value = match target_base.get_mut(key) {
            Some(value) => {
                *value = (1.0 - rate) * *value + rate * source_value;
                *value
            }
            None => {
                let value = rate * source_value;
                target_base.insert(key.to_string(), value);
                value
            }
        };

        let record = TransferRecord {
            source: source.to_string(),
            target: target.to_string(),
            knowledge_key: key.to_string(),
            rate,
            timestamp: Utc::now(),
            source_value,
            resulting_value,
        };
        state.transfers.push(record.clone());
        Some(record)
    }

    fn agent(&self, agent_id: &str) -> EngineResult<Agent> {
        self.catalog
            .get(agent_id)
            .ok_or_else(|| EngineError::UnknownAgent(agent_id.to_string()))
    }
}
