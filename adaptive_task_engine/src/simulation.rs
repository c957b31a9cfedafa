//! Synthetic workload over a small city-services roster.

use anyhow::{Context, Result};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::agent::Agent;
use crate::executor::SimulatedExecutor;
use crate::orchestrator::{Orchestrator, TaskOutcome};
use crate::settings::Settings;
use crate::task::{Complexity, Task};

pub const CITY_CAPABILITIES: [&str; 4] = ["traffic", "safety", "weather", "parking"];

/// Four agents covering every pair-wise mix of the city capabilities.
pub fn city_roster() -> Vec<Agent> {
    vec![
        Agent::new("agent_1", ["traffic", "safety"]),
        Agent::new("agent_2", ["weather", "parking"]),
        Agent::new("agent_3", ["traffic", "weather"]),
        Agent::new("agent_4", ["safety", "parking"]),
    ]
}

/// Draw `count` tasks from a pool of `count / 2 + 1` templates so that some
/// tasks repeat and can be served from the cache.
pub fn generate_tasks(count: usize, seed: u64) -> Vec<Task> {
    let mut rng = StdRng::seed_from_u64(seed);
    let templates: Vec<Task> = (0..count / 2 + 1)
        .map(|i| {
            let complexity = Complexity::ALL[rng.gen_range(0..Complexity::ALL.len())];
            let duration = 0.1 * complexity.level() as f64;
            let width = if rng.gen_bool(0.2) { 2 } else { 1 };
            let capabilities: Vec<&str> = CITY_CAPABILITIES
                .choose_multiple(&mut rng, width)
                .copied()
                .collect();
            Task::new(format!("task_{}", i + 1), complexity, duration, capabilities)
                .with_priority(rng.gen_range(1..=3))
        })
        .collect();

    (0..count)
        .filter_map(|_| templates.choose(&mut rng).cloned())
        .collect()
}

/// Process a generated workload one task at a time and print the metrics.
#[instrument(skip(settings))]
pub async fn run(tasks: usize, seed: u64, settings: Settings) -> Result<()> {
    let executor = SimulatedExecutor::new(settings.orchestrator.time_scale).with_jitter(0.2, seed);
    let engine = Orchestrator::with_executor(&settings, city_roster(), Arc::new(executor))
        .context("Failed to initialize orchestrator")?;

    let workload = generate_tasks(tasks, seed);
    info!(tasks = workload.len(), seed, "starting simulation");

    let mut outcomes = Vec::with_capacity(workload.len());
    for task in &workload {
        outcomes.push(engine.process_task(task).await);
    }

    for outcome in &outcomes {
        match outcome {
            TaskOutcome::Completed(r) => println!("{:<10} -> {} ({:.3}s)", r.task_id, r.agent_id, r.completion_time),
            TaskOutcome::Cached(r) => println!("{:<10} -> cached", r.task_id),
            TaskOutcome::Failed { task_id, error } => println!("{:<10} -> failed: {}", task_id, error),
        }
    }

    let metrics = serde_json::to_string_pretty(&engine.metrics()).context("Failed to serialize metrics")?;
    println!("\nSystem Performance Metrics:\n{metrics}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tasks_are_valid_and_repeatable() {
        let a = generate_tasks(30, 9);
        let b = generate_tasks(30, 9);
        assert_eq!(a, b);
        assert_eq!(a.len(), 30);
        for task in &a {
            task.validate().unwrap();
            assert!(task
                .required_capabilities
                .iter()
                .all(|cap| CITY_CAPABILITIES.contains(&cap.as_str())));
        }
    }

    #[test]
    fn test_roster_covers_every_capability() {
        let roster = city_roster();
        for cap in CITY_CAPABILITIES {
            assert_eq!(roster.iter().filter(|a| a.capabilities.contains(cap)).count(), 2);
        }
    }

    #[tokio::test]
    async fn test_simulation_runs() {
        let mut settings = Settings::default();
        settings.orchestrator.time_scale = 0.0;
        run(12, 3, settings).await.unwrap();
    }
}
