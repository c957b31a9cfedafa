//! Run counters and the system-wide metrics snapshot.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Completion records kept for inspection.
const COMPLETION_LOG: usize = 1_000;

/// Outcome of one execution attempt on an assigned agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub task_id: String,
    pub agent_id: String,
    pub predicted_completion: f64,
    /// Observed duration, absent when execution failed or timed out.
    pub actual_completion: Option<f64>,
    pub success: bool,
}

#[derive(Debug, Default)]
struct Counters {
    total_tasks: u64,
    completed_tasks: u64,
    failed_tasks: u64,
    cache_hits: u64,
    cache_misses: u64,
    completion_time_sum: f64,
    accuracy_sum: f64,
    log: VecDeque<CompletionRecord>,
}

/// Gauges read from the live subsystems when a snapshot is taken.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveGauges {
    pub load_balance_variance: f64,
    pub knowledge_transfers: usize,
    pub cache_hit_rate: f64,
    pub cache_residency_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub cache_residency_ratio: f64,
    pub load_balance_variance: f64,
    /// Mean observed duration of executed (non-cached) tasks.
    pub average_completion_time: f64,
    pub knowledge_transfers: usize,
    /// Mean of `1 - |predicted - actual| / max(predicted, actual)`.
    pub prediction_accuracy: f64,
}

#[derive(Debug, Default)]
pub struct EngineMetrics {
    counters: Mutex<Counters>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.counters.lock().total_tasks += 1;
    }

    pub fn record_cache_hit(&self) {
        let mut c = self.counters.lock();
        c.cache_hits += 1;
        c.completed_tasks += 1;
    }

    pub fn record_cache_miss(&self) {
        self.counters.lock().cache_misses += 1;
    }

    /// Log an execution attempt; successful ones feed the completion and
    /// accuracy means. Failures are counted by [`EngineMetrics::record_failure`].
    pub fn record_completion(&self, record: CompletionRecord) {
        let mut c = self.counters.lock();
        if let (true, Some(actual)) = (record.success, record.actual_completion) {
            c.completed_tasks += 1;
            c.completion_time_sum += actual;
            c.accuracy_sum += prediction_accuracy(record.predicted_completion, actual);
        }
        c.log.push_back(record);
        while c.log.len() > COMPLETION_LOG {
            c.log.pop_front();
        }
    }

    /// Most recent completion records, oldest first.
    pub fn completions(&self) -> Vec<CompletionRecord> {
        self.counters.lock().log.iter().cloned().collect()
    }

    pub fn record_failure(&self) {
        self.counters.lock().failed_tasks += 1;
    }

    pub fn snapshot(&self, gauges: LiveGauges) -> MetricsSnapshot {
        let c = self.counters.lock();
        let executed = c.completed_tasks.saturating_sub(c.cache_hits);
        let mean = |sum: f64| if executed == 0 { 0.0 } else { sum / executed as f64 };
        MetricsSnapshot {
            total_tasks: c.total_tasks,
            completed_tasks: c.completed_tasks,
            failed_tasks: c.failed_tasks,
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            cache_hit_rate: gauges.cache_hit_rate,
            cache_residency_ratio: gauges.cache_residency_ratio,
            load_balance_variance: gauges.load_balance_variance,
            average_completion_time: mean(c.completion_time_sum),
            knowledge_transfers: gauges.knowledge_transfers,
            prediction_accuracy: mean(c.accuracy_sum),
        }
    }
}

/// Relative agreement between a prediction and the observed duration.
pub fn prediction_accuracy(predicted: f64, actual: f64) -> f64 {
    let scale = predicted.abs().max(actual.abs());
    if scale == 0.0 {
        return 1.0;
    }
    (1.0 - (predicted - actual).abs() / scale).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_accuracy() {
        assert_eq!(prediction_accuracy(1.0, 1.0), 1.0);
        assert_eq!(prediction_accuracy(0.0, 0.0), 1.0);
        assert!((prediction_accuracy(2.0, 1.0) - 0.5).abs() < 1e-12);
        assert_eq!(prediction_accuracy(0.0, 3.0), 0.0);
    }

    fn done(actual: f64, predicted: f64) -> CompletionRecord {
        CompletionRecord {
            task_id: "t".to_string(),
            agent_id: "a".to_string(),
            predicted_completion: predicted,
            actual_completion: Some(actual),
            success: true,
        }
    }

    #[test]
    fn test_snapshot_means_ignore_cache_hits() {
        let m = EngineMetrics::new();
        for _ in 0..3 {
            m.record_submitted();
        }
        m.record_cache_miss();
        m.record_completion(done(0.2, 0.2));
        m.record_cache_miss();
        m.record_completion(done(0.4, 0.2));
        m.record_cache_hit();

        let s = m.snapshot(LiveGauges::default());
        assert_eq!(s.total_tasks, 3);
        assert_eq!(s.completed_tasks, 3);
        assert_eq!(s.cache_hits, 1);
        assert_eq!(s.cache_misses, 2);
        assert!((s.average_completion_time - 0.3).abs() < 1e-12);
        assert!((s.prediction_accuracy - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_failed_attempts_are_logged_only() {
        let m = EngineMetrics::new();
        m.record_completion(CompletionRecord {
            actual_completion: None,
            success: false,
            ..done(0.0, 0.5)
        });
        m.record_failure();
        let s = m.snapshot(LiveGauges::default());
        assert_eq!(s.completed_tasks, 0);
        assert_eq!(s.failed_tasks, 1);
        assert_eq!(m.completions().len(), 1);
        assert!(!m.completions()[0].success);
    }

    #[test]
    fn test_empty_snapshot() {
        let s = EngineMetrics::new().snapshot(LiveGauges {
            knowledge_transfers: 4,
            ..LiveGauges::default()
        });
        assert_eq!(s.average_completion_time, 0.0);
        assert_eq!(s.prediction_accuracy, 0.0);
        assert_eq!(s.knowledge_transfers, 4);
    }
}
