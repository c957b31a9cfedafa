//! Integration tests for the adaptive task engine.
//!
//! These exercise the public surface end to end: scheduling, the learned
//! cache, knowledge propagation and concurrent batch processing.

use adaptive_task_engine::{
    agent::{Agent, AgentCatalog},
    cache::{AccessContext, CacheConfig, HierarchicalCache},
    knowledge::SimilarityIndex,
    orchestrator::{Orchestrator, TaskOutcome},
    predictor::{LoadPredictor, PredictionWeights, PredictorWindows},
    scheduler::Scheduler,
    settings::Settings,
    task::{Complexity, Task},
};
use std::sync::Arc;
use tracing_test::traced_test;

fn quick_settings() -> Settings {
    let mut settings = Settings::default();
    settings.orchestrator.time_scale = 0.0;
    settings
}

fn scheduler(agents: Vec<Agent>) -> Scheduler {
    Scheduler::new(
        Arc::new(AgentCatalog::new(agents).unwrap()),
        LoadPredictor::new(PredictionWeights::default(), PredictorWindows::default()),
    )
}

#[tokio::test]
#[traced_test]
async fn test_only_capable_agent_receives_task() {
    let engine = Orchestrator::new(
        &quick_settings(),
        vec![Agent::new("A", ["x", "y"]), Agent::new("B", ["y"])],
    )
    .unwrap();

    let task = Task::new("t1", Complexity::Simple, 0.3, ["x"]);
    let assignment = engine.schedule(&task).unwrap();
    assert_eq!(assignment.agent_id, "A");
    assert_eq!(assignment.predicted_completion, 0.3);
    assert_eq!(engine.catalog().get("A").unwrap().current_load, 0.3);
    assert_eq!(engine.catalog().get("B").unwrap().current_load, 0.0);
}

#[tokio::test]
#[traced_test]
async fn test_capacity_two_cache_evicts_one_of_first_two() {
    let mut settings = quick_settings();
    settings.cache.capacity = 2;
    let engine = Orchestrator::new(&settings, vec![Agent::new("A", ["x"])]).unwrap();

    let mut results = Vec::new();
    for id in ["k1", "k2", "k3"] {
        let task = Task::new(id, Complexity::Simple, 0.1, ["x"]);
        if let TaskOutcome::Completed(result) = engine.process_task(&task).await {
            results.push(result);
        }
    }
    assert_eq!(results.len(), 3);
    assert_eq!(engine.cache().len(), 2);

    let resident: Vec<bool> = ["task_k1_1", "task_k2_1"]
        .iter()
        .map(|key| engine.cache().peek(key).is_some())
        .collect();
    assert_eq!(resident.iter().filter(|r| **r).count(), 1);
    assert!(engine.cache().peek("task_k3_1").is_some());
}

#[tokio::test]
#[traced_test]
async fn test_identical_agents_converge() {
    let engine = Orchestrator::new(
        &quick_settings(),
        vec![
            Agent::new("A", ["x"]).with_performance_history([1.0]),
            Agent::new("B", ["x"]).with_performance_history([1.0]),
        ],
    )
    .unwrap();
    assert!((engine.knowledge().similarity("A", "B").unwrap() - 1.0).abs() < 1e-9);

    let task = Task::new("t", Complexity::Medium, 1.0, ["x"]);
    let key = task.pattern_key().to_string();
    let mut gap = f64::INFINITY;
    for _ in 0..20 {
        let transfers = engine.record_outcome("A", &task, 1.0).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].target, "B");

        let next = (engine.knowledge().knowledge("A", &key) - engine.knowledge().knowledge("B", &key)).abs();
        assert!(next < gap, "gap grew from {gap} to {next}");
        gap = next;
    }
    assert_eq!(engine.knowledge().transfers_between("A", "B").len(), 20);
    assert!(engine.knowledge().transfers_between("B", "A").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_concurrent_processing_keeps_counts_consistent() {
    let roster = vec![
        Agent::new("agent_1", ["traffic", "safety"]),
        Agent::new("agent_2", ["weather", "parking"]),
        Agent::new("agent_3", ["traffic", "weather"]),
        Agent::new("agent_4", ["safety", "parking"]),
    ];
    let engine = Arc::new(Orchestrator::new(&quick_settings(), roster).unwrap());
    let caps = ["traffic", "safety", "weather", "parking"];

    let mut handles = Vec::new();
    for i in 0..40 {
        let engine = engine.clone();
        let task = Task::new(format!("t{i}"), Complexity::ALL[i % 4], 0.1, [caps[i % 4]]);
        handles.push(tokio::spawn(async move { engine.process_task(&task).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    let metrics = engine.metrics();
    assert_eq!(metrics.total_tasks, 40);
    assert_eq!(metrics.completed_tasks, 40);
    assert_eq!(metrics.failed_tasks, 0);

    // cumulative load: every reservation stays on the books
    let total_load: f64 = engine.catalog().loads().iter().sum();
    assert!((total_load - 4.0).abs() < 1e-9);
    let total_history: usize = engine
        .catalog()
        .snapshot()
        .iter()
        .map(|a| a.performance_history.len())
        .sum();
    assert_eq!(total_history, 40);
}

#[tokio::test]
#[traced_test]
async fn test_batch_with_chain_of_dependencies() {
    let engine = Arc::new(Orchestrator::new(&quick_settings(), vec![Agent::new("A", ["x"])]).unwrap());
    let tasks = vec![
        Task::new("c", Complexity::Simple, 0.1, ["x"]).with_dependencies(["b"]),
        Task::new("b", Complexity::Simple, 0.1, ["x"]).with_dependencies(["a"]),
        Task::new("a", Complexity::Simple, 0.1, ["x"]),
    ];
    let outcomes = engine.process_batch(tasks, 3).await;
    assert!(outcomes.iter().all(TaskOutcome::is_success));

    let finished: Vec<_> = outcomes.iter().map(|o| o.result().unwrap().finished_at).collect();
    // c waited on b, which waited on a
    assert!(finished[2] <= finished[1]);
    assert!(finished[1] <= finished[0]);
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn capability_set() -> impl Strategy<Value = Vec<String>> {
        proptest::sample::subsequence(vec!["a", "b", "c", "d"], 0..=4)
            .prop_map(|caps| caps.into_iter().map(String::from).collect())
    }

    fn agent(id: &'static str) -> impl Strategy<Value = Agent> {
        (
            capability_set(),
            proptest::collection::vec(0.0f64..10.0, 0..5),
            proptest::collection::vec(0.0f64..=1.0, 0..3),
        )
            .prop_map(move |(caps, history, spec)| {
                let mut agent = Agent::new(id, caps).with_performance_history(history);
                for (cap, score) in ["a", "b", "c"].iter().zip(spec) {
                    agent = agent.with_specialization(*cap, score);
                }
                agent
            })
    }

    proptest! {
        #[test]
        fn test_similarity_is_symmetric_and_bounded(a in agent("a"), b in agent("b")) {
            let index = SimilarityIndex::default();
            let ab = index.similarity(&a, &b);
            let ba = index.similarity(&b, &a);
            prop_assert_eq!(ab, ba);
            prop_assert!((0.0..=1.0).contains(&ab));
        }

        #[test]
        fn test_assignment_is_deterministic(
            roster in (agent("p"), agent("q"), agent("r")),
            loads in proptest::collection::vec(0.0f64..3.0, 3),
            tasks in proptest::collection::vec(
                (capability_set().prop_filter("task needs a capability", |caps| !caps.is_empty()), 0.01f64..2.0),
                1..20,
            ),
        ) {
            let (p, q, r) = roster;
            let roster = vec![p.with_load(loads[0]), q.with_load(loads[1]), r.with_load(loads[2])];
            let first = scheduler(roster.clone());
            let second = scheduler(roster);
            for (i, (caps, duration)) in tasks.into_iter().enumerate() {
                let task = Task::new(format!("t{i}"), Complexity::Medium, duration, caps);
                prop_assert_eq!(first.assign(&task), second.assign(&task));
            }
            prop_assert_eq!(first.catalog().loads(), second.catalog().loads());
        }

        #[test]
        fn test_transfers_never_target_their_source(
            roster in (agent("a"), agent("b"), agent("c")),
            outcomes in proptest::collection::vec((0usize..3, 0.0f64..5.0, 1u8..=4), 1..30),
        ) {
            let (a, b, c) = roster;
            let engine = Orchestrator::new(&quick_settings(), vec![a, b, c]).unwrap();
            let ids = ["a", "b", "c"];
            for (who, performance, level) in outcomes {
                let task = Task::new("t", Complexity::ALL[usize::from(level) - 1], 1.0, ["a"]);
                let transfers = engine.record_outcome(ids[who], &task, performance).unwrap();
                for transfer in &transfers {
                    prop_assert_eq!(transfer.source.as_str(), ids[who]);
                    prop_assert_ne!(&transfer.source, &transfer.target);
                }
            }
            prop_assert!(engine.knowledge().transfers().iter().all(|t| t.source != t.target));
        }

        #[test]
        fn test_loads_never_decrease(durations in proptest::collection::vec(0.01f64..2.0, 1..30)) {
            let s = scheduler(vec![Agent::new("p", ["x"]), Agent::new("q", ["x", "y"])]);
            for (i, duration) in durations.iter().enumerate() {
                let before = s.catalog().loads();
                let assignment = s.assign(&Task::new(format!("t{i}"), Complexity::Simple, *duration, ["x"])).unwrap();
                let after = s.catalog().loads();
                for (b, a) in before.iter().zip(&after) {
                    prop_assert!(a >= b);
                }
                let total_before: f64 = before.iter().sum();
                let total_after: f64 = after.iter().sum();
                prop_assert!((total_after - total_before - duration).abs() < 1e-9);
                let idx = if assignment.agent_id == "p" { 0 } else { 1 };
                prop_assert!((assignment.load_after - after[idx]).abs() < 1e-12);
            }
        }

        #[test]
        fn test_specialization_stays_in_unit_interval(scores in proptest::collection::vec(-5.0f64..50.0, 1..50)) {
            let s = scheduler(vec![Agent::new("p", ["x", "y"])]);
            let task = Task::new("t", Complexity::Simple, 0.1, ["x", "y"]);
            for score in scores {
                s.update_specialization("p", &task, score).unwrap();
                let agent = s.catalog().get("p").unwrap();
                for value in agent.specialization.values() {
                    prop_assert!((0.0..=1.0).contains(value));
                }
            }
        }

        #[test]
        fn test_cache_never_exceeds_capacity(
            capacity in 1usize..8,
            ops in proptest::collection::vec((0u8..20, any::<bool>()), 1..200),
        ) {
            let cache = HierarchicalCache::new(CacheConfig {
                capacity,
                ..CacheConfig::default()
            })
            .unwrap();
            let ctx = AccessContext::default();
            for (key, is_put) in ops {
                let key = format!("key_{key}");
                if is_put {
                    cache.put(&key, key.len(), &ctx);
                } else {
                    let before = cache.len();
                    let _ = cache.get(&key, &ctx);
                    prop_assert_eq!(cache.len(), before);
                }
                prop_assert!(cache.len() <= capacity);
            }
        }
    }
}
