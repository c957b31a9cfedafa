//! Task descriptors consumed by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Coarse complexity tier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple = 1,
    Medium = 2,
    Complex = 3,
    VeryComplex = 4,
}

impl Complexity {
    pub fn level(self) -> u8 {
        self as u8
    }

    pub const ALL: [Complexity; 4] = [
        Complexity::Simple,
        Complexity::Medium,
        Complexity::Complex,
        Complexity::VeryComplex,
    ];
}

/// Groups tasks for duration history and knowledge sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey {
    pub complexity: Complexity,
    pub capability_count: usize,
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.complexity.level(), self.capability_count)
    }
}

/// A unit of work submitted to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub complexity: Complexity,
    /// Expected duration in seconds.
    pub estimated_duration: f64,
    pub required_capabilities: BTreeSet<String>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_priority() -> u32 {
    1
}

impl Task {
    pub fn new<I, S>(id: impl Into<String>, complexity: Complexity, estimated_duration: f64, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            complexity,
            estimated_duration,
            required_capabilities: capabilities.into_iter().map(Into::into).collect(),
            priority: default_priority(),
            deadline: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn pattern_key(&self) -> PatternKey {
        PatternKey {
            complexity: self.complexity,
            capability_count: self.required_capabilities.len(),
        }
    }

    /// Reject tasks the scheduler cannot reason about.
    pub fn validate(&self) -> EngineResult<()> {
        if self.required_capabilities.is_empty() {
            return Err(self.invalid("required capability set is empty"));
        }
        if !self.estimated_duration.is_finite() || self.estimated_duration <= 0.0 {
            return Err(self.invalid("estimated duration must be a positive number"));
        }
        Ok(())
    }

    /// Deadline urgency in [0, 1]: `1/(1 + hours_remaining)`, saturating at 1
    /// once the deadline has passed and 0 without a deadline.
    pub fn urgency(&self, now: DateTime<Utc>) -> f64 {
        let Some(deadline) = self.deadline else {
            return 0.0;
        };
        let hours_remaining = (deadline - now).num_milliseconds() as f64 / 3_600_000.0;
        if hours_remaining <= 0.0 {
            1.0
        } else {
            1.0 / (1.0 + hours_remaining)
        }
    }

    fn invalid(&self, reason: &str) -> EngineError {
        EngineError::InvalidTask {
            task_id: self.id.clone(),
            reason: reason.to_string(),
        }
    }
}
