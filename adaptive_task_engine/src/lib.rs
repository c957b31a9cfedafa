//! Adaptive Task Engine - Core Library
//!
//! Schedules tasks onto agents from a load forecast, caches results in tiers
//! learned from access patterns, and spreads learned performance between
//! similar agents.

pub mod agent;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod error;
pub mod executor;
pub mod knowledge;
pub mod metrics;
pub mod orchestrator;
pub mod predictor;
pub mod scheduler;
pub mod settings;
pub mod simulation;
pub mod task;
pub mod telemetry;

pub use agent::{Agent, AgentCatalog};
pub use cache::{AccessContext, HierarchicalCache};
pub use error::{EngineError, EngineResult};
pub use knowledge::{KnowledgeStore, SimilarityIndex, TransferRecord};
pub use orchestrator::{Orchestrator, TaskOutcome, TaskResult};
pub use scheduler::{Assignment, Scheduler};
pub use task::{Complexity, Task};
