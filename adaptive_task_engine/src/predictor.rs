//! Load forecasting from three blended signals.

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::agent::Agent;
use crate::error::{EngineError, EngineResult};
use crate::task::{PatternKey, Task};

/// Points needed before the historical term fits a trend.
const MIN_TREND_POINTS: usize = 3;

/// Convex blend weights `[historical, pattern, specialization]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionWeights {
    pub historical: f64,
    pub pattern: f64,
    pub specialization: f64,
}

impl Default for PredictionWeights {
    fn default() -> Self {
        Self {
            historical: 1.0 / 3.0,
            pattern: 1.0 / 3.0,
            specialization: 1.0 / 3.0,
        }
    }
}

impl PredictionWeights {
    /// Normalize raw non-negative weights so they sum to one.
    pub fn new(historical: f64, pattern: f64, specialization: f64) -> EngineResult<Self> {
        let raw = [historical, pattern, specialization];
        if raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::InvalidConfig(
                "prediction weights must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = raw.iter().sum();
        if sum <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "prediction weights must not all be zero".to_string(),
            ));
        }
        Ok(Self {
            historical: historical / sum,
            pattern: pattern / sum,
            specialization: specialization / sum,
        })
    }

    /// Random weights drawn once and held fixed for the run.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let raw: [f64; 3] = [rng.gen(), rng.gen(), rng.gen()];
        Self::new(raw[0], raw[1], raw[2]).unwrap_or_default()
    }
}

/// History windows used by the predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorWindows {
    /// Recorded loads kept per agent.
    pub load_window: usize,
    /// Recorded durations kept per pattern key.
    pub pattern_window: usize,
    /// Most recent pattern durations averaged by the pattern term.
    pub pattern_sample: usize,
}

impl Default for PredictorWindows {
    fn default() -> Self {
        Self {
            load_window: 10,
            pattern_window: 20,
            pattern_sample: 5,
        }
    }
}

/// Breakdown of one prediction, useful for logging decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadForecast {
    pub historical: f64,
    pub pattern: f64,
    pub specialization: f64,
    pub load: f64,
}

/// Forecasts the load an agent would carry after accepting a task.
///
/// Prediction is a pure read; the scheduler feeds history through
/// [`LoadPredictor::record_load`] and [`LoadPredictor::record_duration`].
pub struct LoadPredictor {
    weights: PredictionWeights,
    windows: PredictorWindows,
    load_history: DashMap<String, VecDeque<f64>>,
    pattern_history: DashMap<PatternKey, VecDeque<f64>>,
}

impl LoadPredictor {
    pub fn new(weights: PredictionWeights, windows: PredictorWindows) -> Self {
        Self {
            weights,
            windows: PredictorWindows {
                load_window: windows.load_window.max(1),
                pattern_window: windows.pattern_window.max(1),
                pattern_sample: windows.pattern_sample.max(1),
            },
            load_history: DashMap::new(),
            pattern_history: DashMap::new(),
        }
    }

    pub fn predict(&self, agent: &Agent, task: &Task) -> f64 {
        self.forecast(agent, task).load
    }

    pub fn forecast(&self, agent: &Agent, task: &Task) -> LoadForecast {
        let historical = bounded(self.historical_term(&agent.id));
        let pattern = bounded(self.pattern_term(task.pattern_key()));
        let specialization = bounded(1.0 - agent.specialization_coverage(&task.required_capabilities));

        let load = self.weights.historical * historical
            + self.weights.pattern * pattern
            + self.weights.specialization * specialization;

        LoadForecast {
            historical,
            pattern,
            specialization,
            load: bounded(load),
        }
    }

    pub fn record_load(&self, agent_id: &str, load: f64) {
        let mut history = self.load_history.entry(agent_id.to_string()).or_default();
        history.push_back(load);
        while history.len() > self.windows.load_window {
            history.pop_front();
        }
    }

    pub fn record_duration(&self, pattern: PatternKey, duration: f64) {
        let mut history = self.pattern_history.entry(pattern).or_default();
        history.push_back(duration);
        while history.len() > self.windows.pattern_window {
            history.pop_front();
        }
    }

    pub fn load_history(&self, agent_id: &str) -> Vec<f64> {
        self.load_history
            .get(agent_id)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn pattern_history(&self, pattern: PatternKey) -> Vec<f64> {
        self.pattern_history
            .get(&pattern)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    fn historical_term(&self, agent_id: &str) -> f64 {
        let Some(history) = self.load_history.get(agent_id) else {
            return 0.0;
        };
        let points: Vec<f64> = history.iter().copied().collect();
        match points.last() {
            None => 0.0,
            Some(&last) if points.len() < MIN_TREND_POINTS => last,
            Some(&last) => last + linear_slope(&points),
        }
    }

    fn pattern_term(&self, pattern: PatternKey) -> f64 {
        let Some(history) = self.pattern_history.get(&pattern) else {
            return 0.0;
        };
        let n = history.len().min(self.windows.pattern_sample);
        if n == 0 {
            return 0.0;
        }
        history.iter().rev().take(n).sum::<f64>() / n as f64
    }
}

/// Least-squares slope of `values` against their index.
fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

fn bounded(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Complexity;
    use rand::{rngs::StdRng, SeedableRng};

    fn predictor() -> LoadPredictor {
        LoadPredictor::new(PredictionWeights::default(), PredictorWindows::default())
    }

    #[test]
    fn test_slope() {
        assert!((linear_slope(&[0.1, 0.2, 0.3, 0.4]) - 0.1).abs() < 1e-12);
        assert_eq!(linear_slope(&[0.5, 0.5, 0.5]), 0.0);
    }

    #[test]
    fn test_weights_normalize() {
        let w = PredictionWeights::new(2.0, 1.0, 1.0).unwrap();
        assert!((w.historical - 0.5).abs() < 1e-12);
        assert!(PredictionWeights::new(0.0, 0.0, 0.0).is_err());
        assert!(PredictionWeights::new(-1.0, 1.0, 1.0).is_err());

        let mut rng = StdRng::seed_from_u64(7);
        let r = PredictionWeights::random(&mut rng);
        assert!((r.historical + r.pattern + r.specialization - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fresh_agent_prediction_is_specialization_only() {
        let p = predictor();
        let agent = Agent::new("a", ["x"]);
        let task = Task::new("t", Complexity::Simple, 0.2, ["x"]);
        let forecast = p.forecast(&agent, &task);
        assert_eq!(forecast.historical, 0.0);
        assert_eq!(forecast.pattern, 0.0);
        assert_eq!(forecast.specialization, 1.0);
        assert!((forecast.load - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_short_history_uses_last_value() {
        let p = predictor();
        p.record_load("a", 0.2);
        p.record_load("a", 0.6);
        let agent = Agent::new("a", ["x"]).with_specialization("x", 1.0);
        let task = Task::new("t", Complexity::Simple, 0.2, ["x"]);
        assert!((p.forecast(&agent, &task).historical - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_trend_projection_and_clamp() {
        let p = predictor();
        for load in [0.1, 0.2, 0.3] {
            p.record_load("a", load);
        }
        let agent = Agent::new("a", ["x"]);
        let task = Task::new("t", Complexity::Simple, 0.2, ["x"]);
        assert!((p.forecast(&agent, &task).historical - 0.4).abs() < 1e-9);

        for load in [5.0, 9.0, 13.0] {
            p.record_load("a", load);
        }
        assert_eq!(p.forecast(&agent, &task).historical, 1.0);
    }

    #[test]
    fn test_windows_are_bounded() {
        let p = predictor();
        for i in 0..15 {
            p.record_load("a", i as f64);
        }
        assert_eq!(p.load_history("a").len(), 10);
        assert_eq!(p.load_history("a")[0], 5.0);

        let key = Task::new("t", Complexity::Medium, 0.1, ["x"]).pattern_key();
        for i in 0..25 {
            p.record_duration(key, i as f64 / 100.0);
        }
        assert_eq!(p.pattern_history(key).len(), 20);
    }

    #[test]
    fn test_pattern_term_averages_last_five() {
        let p = predictor();
        let task = Task::new("t", Complexity::Medium, 0.1, ["x"]);
        for d in [0.9, 0.9, 0.1, 0.2, 0.3, 0.4, 0.5] {
            p.record_duration(task.pattern_key(), d);
        }
        let agent = Agent::new("a", ["x"]);
        assert!((p.forecast(&agent, &task).pattern - 0.3).abs() < 1e-12);
    }
}
