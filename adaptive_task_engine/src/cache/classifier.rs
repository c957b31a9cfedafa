//! Access-pattern learning for cache tier placement.
//!
//! Every access is logged per key. Every `update_frequency` accesses the
//! classifier re-clusters the recent feature vectors of well-observed keys and
//! publishes the new key→cluster map by swapping an `Arc`. Readers only ever
//! see a complete map, and the clustering itself runs without any lock held.

use ahash::RandomState;
use chrono::{DateTime, Datelike, Timelike, Utc};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::kmeans::{standardize, KMeans};

/// Bucket count for the bounded key and agent hashes.
const HASH_BUCKETS: u64 = 100;

/// Number of features produced per access.
pub const FEATURE_COUNT: usize = 7;

/// Request context attached to a cache access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessContext {
    pub agent_id: Option<String>,
    pub task_complexity: u8,
    /// Seconds since midnight UTC.
    pub time_of_day: f64,
    /// 0 = Monday.
    pub day_of_week: u8,
}

impl AccessContext {
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            agent_id: None,
            task_complexity: 0,
            time_of_day: time.num_seconds_from_midnight() as f64,
            day_of_week: time.weekday().num_days_from_monday() as u8,
        }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.task_complexity = complexity;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Re-cluster every this many accesses.
    pub update_frequency: u64,
    /// Accesses remembered per key.
    pub pattern_window: usize,
    /// Accesses a key needs before it takes part in clustering.
    pub min_accesses_per_key: usize,
    /// Eligible keys needed before clustering runs.
    pub min_keys: usize,
    /// Most recent accesses per key fed to clustering.
    pub recent_per_key: usize,
    pub max_clusters: usize,
    pub seed: u64,
    /// Distinct keys whose access windows are kept; the least recently
    /// accessed key is forgotten beyond this.
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
}

fn default_max_tracked_keys() -> usize {
    10_000
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            update_frequency: 50,
            pattern_window: 100,
            min_accesses_per_key: 5,
            min_keys: 10,
            recent_per_key: 10,
            max_clusters: 5,
            seed: 42,
            max_tracked_keys: default_max_tracked_keys(),
        }
    }
}

pub struct PatternClassifier {
    config: ClassifierConfig,
    hasher: RandomState,
    log: Mutex<LruCache<String, VecDeque<AccessContext>>>,
    access_count: AtomicU64,
    clusters: RwLock<Arc<HashMap<String, usize>>>,
    refreshing: AtomicBool,
    generation: AtomicU64,
}

impl PatternClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let tracked = NonZeroUsize::new(config.max_tracked_keys).unwrap_or(NonZeroUsize::MIN);
        Self {
            config: ClassifierConfig {
                update_frequency: config.update_frequency.max(1),
                pattern_window: config.pattern_window.max(1),
                recent_per_key: config.recent_per_key.max(1),
                ..config
            },
            // fixed seeds keep the hash feature stable across runs
            hasher: RandomState::with_seeds(0x243f_6a88, 0x85a3_08d3, 0x1319_8a2e, 0x0370_7344),
            log: Mutex::new(LruCache::new(tracked)),
            access_count: AtomicU64::new(0),
            clusters: RwLock::new(Arc::new(HashMap::new())),
            refreshing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Numeric features for one access.
    pub fn features(&self, key: &str, context: &AccessContext) -> [f64; FEATURE_COUNT] {
        let agent_code = context
            .agent_id
            .as_deref()
            .map(|id| self.bounded_hash(id))
            .unwrap_or(0.0);
        [
            key.len() as f64,
            key.matches('_').count() as f64,
            self.bounded_hash(key),
            agent_code,
            context.task_complexity as f64,
            context.time_of_day,
            context.day_of_week as f64,
        ]
    }

    /// Log an access; re-clusters when the access count hits the refresh
    /// frequency. Returns true if a new cluster map was published.
    pub fn record_access(&self, key: &str, context: &AccessContext) -> bool {
        {
            let mut log = self.log.lock();
            if let Some(accesses) = log.get_mut(key) {
                accesses.push_back(context.clone());
                while accesses.len() > self.config.pattern_window {
                    accesses.pop_front();
                }
            } else if let Some((forgotten, _)) = log.push(key.to_string(), VecDeque::from([context.clone()])) {
                debug!(key = %forgotten, "access log forgot least recent key");
            }
        }

        let count = self.access_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.config.update_frequency == 0 {
            self.refresh().is_some()
        } else {
            false
        }
    }

    /// Re-cluster now. Returns the number of clusters published, or `None`
    /// when there is not yet enough signal or another refresh is running.
    pub fn refresh(&self) -> Option<usize> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let published = self.recluster();
        self.refreshing.store(false, Ordering::Release);
        published
    }

    pub fn cluster_of(&self, key: &str) -> Option<usize> {
        self.clusters.read().get(key).copied()
    }

    /// Tier for `key` among `tiers` ordered tiers; unclustered keys go to 0.
    pub fn tier_for(&self, key: &str, tiers: usize) -> usize {
        match self.cluster_of(key) {
            Some(cluster) => (cluster + 1).min(tiers.saturating_sub(1)),
            None => 0,
        }
    }

    /// Current cluster map; stays valid even if a refresh swaps it.
    pub fn snapshot(&self) -> Arc<HashMap<String, usize>> {
        self.clusters.read().clone()
    }

    /// Number of published cluster maps so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn total_accesses(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Accesses currently held in the bounded per-key logs.
    pub fn logged_accesses(&self) -> usize {
        self.log.lock().iter().map(|(_, accesses)| accesses.len()).sum()
    }

    /// Distinct keys currently tracked in the access log.
    pub fn tracked_keys(&self) -> usize {
        self.log.lock().len()
    }

    fn recluster(&self) -> Option<usize> {
        // copy what we need and drop the log lock before the heavy work
        let mut samples: Vec<(String, Vec<AccessContext>)> = {
            let log = self.log.lock();
            log.iter()
                .filter(|(_, accesses)| accesses.len() >= self.config.min_accesses_per_key)
                .map(|(key, accesses)| {
                    let skip = accesses.len().saturating_sub(self.config.recent_per_key);
                    (key.clone(), accesses.iter().skip(skip).cloned().collect())
                })
                .collect()
        };

        if samples.len() < self.config.min_keys {
            debug!(eligible = samples.len(), "not enough keys to cluster");
            return None;
        }
        samples.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rows = Vec::new();
        let mut owners = Vec::new();
        for (key, accesses) in &samples {
            for context in accesses {
                rows.push(self.features(key, context).to_vec());
                owners.push(key.as_str());
            }
        }
        if rows.len() < 10 {
            return None;
        }

        let k = self.config.max_clusters.min(samples.len());
        if k < 2 {
            return None;
        }

        standardize(&mut rows);
        let labels = KMeans::new(k).with_seed(self.config.seed).fit_predict(&rows);

        // a key takes the label of its most recent access
        let assignments: HashMap<String, usize> = owners
            .into_iter()
            .zip(labels)
            .map(|(key, label)| (key.to_string(), label))
            .collect();

        let keys = assignments.len();
        *self.clusters.write() = Arc::new(assignments);
        self.generation.fetch_add(1, Ordering::Relaxed);
        info!(keys, clusters = k, "access-pattern clusters refreshed");
        Some(k)
    }

    fn bounded_hash(&self, value: &str) -> f64 {
        (BuildHasher::hash_one(&self.hasher, value) % HASH_BUCKETS) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AccessContext {
        AccessContext::default().with_complexity(2)
    }

    #[test]
    fn test_features_are_stable() {
        let c = PatternClassifier::new(ClassifierConfig::default());
        let f = c.features("task_1_2", &ctx().with_agent("agent_1"));
        assert_eq!(f[0], 8.0);
        assert_eq!(f[1], 2.0);
        assert!(f[2] < 100.0);
        assert!(f[3] < 100.0);
        assert_eq!(f[4], 2.0);
        assert_eq!(f, c.features("task_1_2", &ctx().with_agent("agent_1")));

        let other = PatternClassifier::new(ClassifierConfig::default());
        assert_eq!(f, other.features("task_1_2", &ctx().with_agent("agent_1")));
    }

    #[test]
    fn test_too_few_keys_skips_silently() {
        let c = PatternClassifier::new(ClassifierConfig::default());
        for _ in 0..10 {
            for key in ["a", "b", "c"] {
                c.record_access(key, &ctx());
            }
        }
        assert_eq!(c.refresh(), None);
        assert_eq!(c.generation(), 0);
        assert_eq!(c.tier_for("a", 3), 0);
    }

    #[test]
    fn test_periodic_refresh_clusters_keys() {
        let c = PatternClassifier::new(ClassifierConfig::default());
        let mut published = false;
        // 10 keys x 5 accesses; the 50th access triggers a refresh
        for round in 0..5 {
            for i in 0..10 {
                let key = if i % 2 == 0 { format!("k{i}") } else { format!("long_key_{i}_x") };
                published |= c.record_access(&key, &ctx().with_complexity((i % 4) as u8 + round % 2));
            }
        }
        assert!(published);
        assert_eq!(c.generation(), 1);

        let snapshot = c.snapshot();
        assert!(!snapshot.is_empty());
        for cluster in snapshot.values() {
            assert!(*cluster < 5);
        }
        for key in snapshot.keys() {
            let tier = c.tier_for(key, 3);
            assert!((1..=2).contains(&tier));
        }
        assert_eq!(c.tier_for("never_seen", 3), 0);
    }

    #[test]
    fn test_log_is_bounded() {
        let c = PatternClassifier::new(ClassifierConfig {
            pattern_window: 4,
            ..ClassifierConfig::default()
        });
        for _ in 0..10 {
            c.record_access("k", &ctx());
        }
        assert_eq!(c.logged_accesses(), 4);
        assert_eq!(c.total_accesses(), 10);
    }

    #[test]
    fn test_distinct_keys_are_bounded() {
        let c = PatternClassifier::new(ClassifierConfig {
            max_tracked_keys: 3,
            ..ClassifierConfig::default()
        });
        c.record_access("hot", &ctx());
        for i in 0..20 {
            c.record_access(&format!("task_{i}_1"), &ctx());
            c.record_access("hot", &ctx());
        }
        assert_eq!(c.tracked_keys(), 3);
        // "hot" is touched every round so it is never the one forgotten
        assert_eq!(c.logged_accesses(), 21 + 2);
        assert_eq!(c.total_accesses(), 41);
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let c = PatternClassifier::new(ClassifierConfig::default());
        let before = c.snapshot();
        for round in 0..5 {
            for i in 0..10 {
                c.record_access(&format!("key_{i}"), &ctx().with_complexity(round));
            }
        }
        c.refresh();
        assert!(before.is_empty());
        assert!(!c.snapshot().is_empty());
    }
}
