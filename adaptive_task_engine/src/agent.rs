//! Agent records and the catalog that owns them.
//!
//! The catalog keeps each agent behind its own lock so that scoring can read
//! many agents while a single agent's load or specialization is being updated.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::{debug, instrument};

use crate::error::{EngineError, EngineResult};

/// Default bound on an agent's performance history.
pub const DEFAULT_PERFORMANCE_HISTORY: usize = 100;

/// A worker able to execute tasks that need any of its capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub current_load: f64,
    #[serde(default = "default_capacity")]
    pub max_capacity: f64,
    #[serde(default)]
    pub performance_history: VecDeque<f64>,
    /// Learned affinity per capability, kept in [0, 1].
    #[serde(default)]
    pub specialization: HashMap<String, f64>,
}

fn default_capacity() -> f64 {
    1.0
}

impl Agent {
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            current_load: 0.0,
            max_capacity: default_capacity(),
            performance_history: VecDeque::new(),
            specialization: HashMap::new(),
        }
    }

    pub fn with_capacity(mut self, max_capacity: f64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.current_load = load.max(0.0);
        self
    }

    pub fn with_specialization(mut self, capability: impl Into<String>, score: f64) -> Self {
        self.specialization.insert(capability.into(), score.clamp(0.0, 1.0));
        self
    }

    pub fn with_performance_history<I: IntoIterator<Item = f64>>(mut self, history: I) -> Self {
        self.performance_history = history.into_iter().collect();
        self
    }

    /// True if the agent offers at least one of `required`.
    pub fn can_handle(&self, required: &BTreeSet<String>) -> bool {
        required.iter().any(|cap| self.capabilities.contains(cap))
    }

    /// Mean specialization over `required`, missing capabilities counting 0.
    pub fn specialization_coverage(&self, required: &BTreeSet<String>) -> f64 {
        if required.is_empty() {
            return 0.0;
        }
        let sum: f64 = required
            .iter()
            .filter_map(|cap| self.specialization.get(cap))
            .sum();
        (sum / required.len() as f64).clamp(0.0, 1.0)
    }

    /// Mean of the last `window` performance scores, `None` without history.
    pub fn recent_performance(&self, window: usize) -> Option<f64> {
        let n = self.performance_history.len().min(window);
        if n == 0 {
            return None;
        }
        let sum: f64 = self.performance_history.iter().rev().take(n).sum();
        Some(sum / n as f64)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidConfig("agent id cannot be empty".to_string()));
        }
        if !(self.max_capacity.is_finite() && self.max_capacity > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "agent '{}' must have a positive max_capacity",
                self.id
            )));
        }
        if !(self.current_load.is_finite() && self.current_load >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "agent '{}' has a negative or non-finite load",
                self.id
            )));
        }
        if self.specialization.values().any(|s| !(0.0..=1.0).contains(s)) {
            return Err(EngineError::InvalidConfig(format!(
                "agent '{}' has a specialization score outside [0, 1]",
                self.id
            )));
        }
        Ok(())
    }
}

/// Owns the roster. Agents are never removed during a run.
pub struct AgentCatalog {
    agents: Vec<RwLock<Agent>>,
    index: HashMap<String, usize>,
    performance_limit: usize,
}

impl AgentCatalog {
    pub fn new(agents: Vec<Agent>) -> EngineResult<Self> {
        let mut index = HashMap::with_capacity(agents.len());
        for (position, agent) in agents.iter().enumerate() {
            agent.validate()?;
            if index.insert(agent.id.clone(), position).is_some() {
                return Err(EngineError::InvalidConfig(format!("duplicate agent id '{}'", agent.id)));
            }
        }

        Ok(Self {
            agents: agents.into_iter().map(RwLock::new).collect(),
            index,
            performance_limit: DEFAULT_PERFORMANCE_HISTORY,
        })
    }

    pub fn with_performance_limit(mut self, limit: usize) -> Self {
        self.performance_limit = limit.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agent ids in catalog order.
    pub fn ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.read().id.clone()).collect()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.index.contains_key(agent_id)
    }

    /// Copy of one agent's current state.
    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.slot(agent_id).map(|slot| slot.read().clone())
    }

    /// Copy of the whole roster in catalog order.
    pub fn snapshot(&self) -> Vec<Agent> {
        self.agents.iter().map(|a| a.read().clone()).collect()
    }

    pub fn loads(&self) -> Vec<f64> {
        self.agents.iter().map(|a| a.read().current_load).collect()
    }

    /// Run `f` over every agent in catalog order under its read lock.
    pub fn for_each<F: FnMut(usize, &Agent)>(&self, mut f: F) {
        for (position, slot) in self.agents.iter().enumerate() {
            f(position, &slot.read());
        }
    }

    /// Mutate one agent under its write lock.
    pub fn update<R>(&self, agent_id: &str, f: impl FnOnce(&mut Agent) -> R) -> EngineResult<R> {
        let slot = self
            .slot(agent_id)
            .ok_or_else(|| EngineError::UnknownAgent(agent_id.to_string()))?;
        Ok(f(&mut slot.write()))
    }

    /// Add `amount` to an agent's load and return the new load.
    #[instrument(skip(self))]
    pub fn reserve_load(&self, agent_id: &str, amount: f64) -> EngineResult<f64> {
        self.update(agent_id, |agent| {
            agent.current_load = (agent.current_load + amount.max(0.0)).max(0.0);
            debug!(load = agent.current_load, "load reserved");
            agent.current_load
        })
    }

    /// Subtract `amount` from an agent's load, never going below zero.
    pub fn release_load(&self, agent_id: &str, amount: f64) -> EngineResult<f64> {
        self.update(agent_id, |agent| {
            agent.current_load = (agent.current_load - amount.max(0.0)).max(0.0);
            agent.current_load
        })
    }

    /// Append a performance score to the agent's bounded history.
    pub fn record_performance(&self, agent_id: &str, performance: f64) -> EngineResult<()> {
        let limit = self.performance_limit;
        let score = if performance.is_finite() { performance.max(0.0) } else { 0.0 };
        self.update(agent_id, |agent| {
            agent.performance_history.push_back(score);
            while agent.performance_history.len() > limit {
                agent.performance_history.pop_front();
            }
        })
    }

    /// Population variance of `current_load` across the roster.
    pub fn load_variance(&self) -> f64 {
        let loads = self.loads();
        if loads.is_empty() {
            return 0.0;
        }
        let n = loads.len() as f64;
        let mean = loads.iter().sum::<f64>() / n;
        loads.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n
    }

    fn slot(&self, agent_id: &str) -> Option<&RwLock<Agent>> {
        self.index.get(agent_id).map(|&position| &self.agents[position])
    }
}
