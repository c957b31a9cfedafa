//! Hierarchical cache whose tier placement is learned from access patterns.
//!
//! Tiers are ordered: tier 0 is the cold default, higher tiers hold keys whose
//! access cluster marks them as more valuable. Eviction always drains the
//! lowest non-empty tier first, least recently touched entry first.

pub mod classifier;
pub mod kmeans;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument};

pub use classifier::{AccessContext, ClassifierConfig, PatternClassifier};

use crate::error::{EngineError, EngineResult};

/// Cache entry with access metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub tier: usize,
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn new(key: String, value: V, tier: usize) -> Self {
        Self {
            key,
            value,
            tier,
            access_count: 0,
            last_access: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.access_count += 1;
        self.last_access = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum resident entries across all tiers.
    pub capacity: usize,
    pub tiers: usize,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            tiers: 3,
            classifier: ClassifierConfig::default(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Resident entries over logged accesses; see [`HierarchicalCache::residency_ratio`].
    pub residency_ratio: f64,
    pub resident: usize,
    pub tier_sizes: Vec<usize>,
    pub evictions: u64,
    pub promotions: u64,
    pub cluster_generation: u64,
}

pub struct HierarchicalCache<V> {
    capacity: usize,
    tiers: Mutex<Vec<LruCache<String, CacheEntry<V>>>>,
    classifier: PatternClassifier,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
}

impl<V: Clone> HierarchicalCache<V> {
    pub fn new(config: CacheConfig) -> EngineResult<Self> {
        if config.capacity == 0 {
            return Err(EngineError::InvalidConfig("cache capacity must be positive".to_string()));
        }
        if config.tiers == 0 {
            return Err(EngineError::InvalidConfig("cache needs at least one tier".to_string()));
        }

        Ok(Self {
            capacity: config.capacity,
            tiers: Mutex::new((0..config.tiers).map(|_| LruCache::unbounded()).collect()),
            classifier: PatternClassifier::new(config.classifier),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.lock().len()
    }

    pub fn classifier(&self) -> &PatternClassifier {
        &self.classifier
    }

    /// Tier a key would be placed in right now.
    pub fn tier_for(&self, key: &str) -> usize {
        self.classifier.tier_for(key, self.tier_count())
    }

    /// Look up `key`, promoting it if its learned tier is higher than the one
    /// holding it. A miss is `None`, never an error.
    #[instrument(skip(self, context))]
    pub fn get(&self, key: &str, context: &AccessContext) -> Option<V> {
        // may re-cluster; runs before the tier lock is taken
        self.classifier.record_access(key, context);

        let mut tiers = self.tiers.lock();
        let target = self.classifier.tier_for(key, tiers.len());

        let Some(current) = tiers.iter().position(|tier| tier.contains(key)) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let level = if target > current {
            match tiers[current].pop(key) {
                Some(mut entry) => {
                    entry.tier = target;
                    tiers[target].put(key.to_string(), entry);
                    self.promotions.fetch_add(1, Ordering::Relaxed);
                    debug!(from = current, to = target, "entry promoted");
                    target
                }
                None => current,
            }
        } else {
            current
        };

        let value = tiers[level].get_mut(key).map(|entry| {
            entry.touch();
            entry.value.clone()
        });
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    /// Insert or replace `key` at its learned tier, evicting first if full.
    /// Placement depends only on the key's learned cluster; the context is
    /// accepted for symmetry with [`HierarchicalCache::get`].
    #[instrument(skip(self, value, _context))]
    pub fn put(&self, key: &str, value: V, _context: &AccessContext) {
        let mut tiers = self.tiers.lock();
        let target = self.classifier.tier_for(key, tiers.len());

        let replaced = tiers.iter_mut().any(|tier| tier.pop(key).is_some());
        if !replaced {
            let resident: usize = tiers.iter().map(LruCache::len).sum();
            if resident >= self.capacity {
                if let Some(evicted) = tiers.iter_mut().find_map(|tier| tier.pop_lru()) {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(evicted = %evicted.0, tier = evicted.1.tier, "entry evicted");
                }
            }
        }

        tiers[target].put(key.to_string(), CacheEntry::new(key.to_string(), value, target));
    }

    /// Tier currently holding `key`.
    pub fn tier_of(&self, key: &str) -> Option<usize> {
        self.tiers.lock().iter().position(|tier| tier.contains(key))
    }

    /// Copy of the entry for `key` without counting an access.
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.tiers
            .lock()
            .iter()
            .find_map(|tier| tier.peek(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.tiers.lock().iter().map(LruCache::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tier_sizes(&self) -> Vec<usize> {
        self.tiers.lock().iter().map(LruCache::len).collect()
    }

    /// True hit rate over every `get` so far.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Resident entries divided by logged accesses. This is an occupancy
    /// proxy, not a hit rate, and is kept for comparison with older reports.
    pub fn residency_ratio(&self) -> f64 {
        let accesses = self.classifier.logged_accesses();
        if accesses == 0 {
            0.0
        } else {
            self.len() as f64 / accesses as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        let tier_sizes = self.tier_sizes();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            residency_ratio: self.residency_ratio(),
            resident: tier_sizes.iter().sum(),
            tier_sizes,
            evictions: self.evictions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            cluster_generation: self.classifier.generation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> HierarchicalCache<String> {
        HierarchicalCache::new(CacheConfig {
            capacity,
            ..CacheConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_degenerate_config() {
        assert!(HierarchicalCache::<u32>::new(CacheConfig { capacity: 0, ..CacheConfig::default() }).is_err());
        assert!(HierarchicalCache::<u32>::new(CacheConfig { tiers: 0, ..CacheConfig::default() }).is_err());
    }

    #[test]
    fn test_miss_is_none_every_time() {
        let c = cache(4);
        let ctx = AccessContext::default();
        for _ in 0..3 {
            assert_eq!(c.get("never_put", &ctx), None);
        }
        assert_eq!(c.stats().misses, 3);
        assert_eq!(c.hit_rate(), 0.0);
    }

    #[test]
    fn test_put_get_roundtrip_in_cold_tier() {
        let c = cache(4);
        let ctx = AccessContext::default();
        c.put("k1", "v1".to_string(), &ctx);
        assert_eq!(c.tier_of("k1"), Some(0));
        assert_eq!(c.get("k1", &ctx), Some("v1".to_string()));
        assert_eq!(c.peek("k1").unwrap().access_count, 1);
        assert_eq!(c.hit_rate(), 1.0);
    }

    #[test]
    fn test_capacity_two_evicts_one_of_first_two() {
        let c = cache(2);
        let ctx = AccessContext::default();
        c.put("k1", "v1".to_string(), &ctx);
        c.put("k2", "v2".to_string(), &ctx);
        c.put("k3", "v3".to_string(), &ctx);

        assert_eq!(c.len(), 2);
        let survivors = ["k1", "k2"].iter().filter(|k| c.tier_of(k).is_some()).count();
        assert_eq!(survivors, 1);
        assert!(c.tier_of("k3").is_some());
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_least_recently_touched_goes_first() {
        let c = cache(2);
        let ctx = AccessContext::default();
        c.put("k1", "v1".to_string(), &ctx);
        c.put("k2", "v2".to_string(), &ctx);
        c.get("k1", &ctx);
        c.put("k3", "v3".to_string(), &ctx);
        assert!(c.tier_of("k1").is_some());
        assert!(c.tier_of("k2").is_none());
    }

    #[test]
    fn test_replacing_key_keeps_single_copy() {
        let c = cache(2);
        let ctx = AccessContext::default();
        c.put("k1", "v1".to_string(), &ctx);
        c.put("k2", "v2".to_string(), &ctx);
        c.put("k1", "v1b".to_string(), &ctx);
        assert_eq!(c.len(), 2);
        assert_eq!(c.stats().evictions, 0);
        assert_eq!(c.get("k1", &ctx), Some("v1b".to_string()));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let c = cache(8);
        let ctx = AccessContext::default();
        for i in 0..50 {
            c.put(&format!("key_{i}"), i.to_string(), &ctx);
            assert!(c.len() <= 8);
        }
    }

    #[test]
    fn test_clustered_keys_are_promoted() {
        let c = cache(64);
        let ctx = AccessContext::default().with_complexity(1);
        for i in 0..10 {
            c.put(&format!("key_{i}"), i.to_string(), &ctx);
        }
        for round in 0..5 {
            for i in 0..10 {
                c.get(&format!("key_{i}"), &ctx.clone().with_complexity(round));
            }
        }
        assert_eq!(c.classifier().generation(), 1);

        // after clustering every key maps to tier 1 or 2
        for i in 0..10 {
            let key = format!("key_{i}");
            c.get(&key, &ctx);
            assert!(c.tier_of(&key).unwrap() >= 1);
        }
        assert!(c.stats().promotions >= 10);
        assert_eq!(c.len(), 10);
    }

    #[test]
    fn test_residency_ratio_is_an_occupancy_proxy() {
        let c = cache(4);
        let ctx = AccessContext::default();
        c.put("a", "1".to_string(), &ctx);
        c.put("b", "2".to_string(), &ctx);
        c.get("a", &ctx);
        c.get("zzz", &ctx);
        // 2 resident / 2 logged accesses, while the true hit rate is 0.5
        assert_eq!(c.residency_ratio(), 1.0);
        assert_eq!(c.hit_rate(), 0.5);
    }
}
