//! Short-lived result cache keyed by a sparse frame fingerprint.
//!
//! Consecutive camera frames are often near-identical, so analysis results
//! are reused for a short TTL. The fingerprint hashes every Nth row and
//! column of the color image together with the request's classifier set and
//! the options that change analysis output.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use vhub_models::{AnalysisRequest, AnalysisResult};

use crate::frame::Frame;
use crate::metrics;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    /// Sample every Nth row and column when fingerprinting.
    pub sample_stride: u32,
    /// Interval of the background expiry sweep.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(100),
            max_entries: 100,
            sample_stride: 8,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub ttl_ms: u64,
}

struct CacheEntry {
    result: AnalysisResult,
    created_at: Instant,
    last_access: Instant,
    access_count: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct ResultCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fingerprint of a frame plus the output-relevant parts of a request.
    pub fn key_for(&self, frame: &Frame, request: &AnalysisRequest) -> String {
        let mut hasher = Sha256::new();
        let (width, height) = frame.resolution();
        hasher.update(width.to_le_bytes());
        hasher.update(height.to_le_bytes());

        let stride = self.config.sample_stride.max(1) as usize;
        for y in (0..height).step_by(stride) {
            for x in (0..width).step_by(stride) {
                hasher.update(frame.color.get_pixel(x, y).0);
            }
        }

        for classifier in request.sorted_classifiers() {
            hasher.update(classifier.as_str().as_bytes());
            hasher.update(b",");
        }
        hasher.update(request.options.cache_key().as_bytes());

        // Non-empty filters change the payload.
        if let Some(filters) = request.filters.as_ref().filter(|f| !f.is_empty()) {
            hasher.update(b"|filters:");
            hasher.update(serde_json::to_vec(filters).unwrap_or_default());
        }

        format!("{:x}", hasher.finalize())
    }

    /// Look up a fresh result for this frame and request.
    pub fn get(&self, frame: &Frame, request: &AnalysisRequest) -> Option<AnalysisResult> {
        let key = self.key_for(frame, request);
        self.get_at(&key, Instant::now())
    }

    /// Store a result for this frame and request. Last writer wins.
    pub fn put(&self, frame: &Frame, request: &AnalysisRequest, result: &AnalysisResult) {
        let key = self.key_for(frame, request);
        self.insert_at(key, result.clone(), Instant::now());
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<AnalysisResult> {
        let mut state = self.lock();
        let fresh = match state.entries.get(key) {
            Some(entry) => now.duration_since(entry.created_at) < self.config.ttl,
            None => {
                state.misses += 1;
                metrics::record_cache_lookup(false);
                return None;
            }
        };

        if !fresh {
            state.entries.remove(key);
            state.misses += 1;
            metrics::record_cache_lookup(false);
            return None;
        }

        state.hits += 1;
        metrics::record_cache_lookup(true);
        let entry = state.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_access = now;
        let mut result = entry.result.clone();
        result.cache_hit = true;
        Some(result)
    }

    fn insert_at(&self, key: String, mut result: AnalysisResult, now: Instant) {
        if self.config.max_entries == 0 {
            return;
        }
        result.cache_hit = false;

        let mut state = self.lock();
        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_entries {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                state.evictions += 1;
                metrics::record_cache_eviction();
                debug!(key = %oldest, "Evicted least recently used cache entry");
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                result,
                created_at: now,
                last_access: now,
                access_count: 0,
            },
        );
        metrics::set_cache_size(state.entries.len());
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    fn sweep_expired_at(&self, now: Instant) -> usize {
        let ttl = self.config.ttl;
        let mut state = self.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| now.duration_since(entry.created_at) < ttl);
        let removed = before - state.entries.len();
        if removed > 0 {
            metrics::set_cache_size(state.entries.len());
            debug!(removed, remaining = state.entries.len(), "Swept expired cache entries");
        }
        removed
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let count = state.entries.len();
        state.entries.clear();
        metrics::set_cache_size(0);
        count
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            capacity: self.config.max_entries,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            evictions: state.evictions,
            ttl_ms: self.config.ttl.as_millis() as u64,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use vhub_models::{AnalysisOptions, ClassifierType, DetectionFilters};

    fn cache(ttl_ms: u64, max_entries: usize) -> ResultCache {
        ResultCache::new(CacheConfig {
            ttl: Duration::from_millis(ttl_ms),
            max_entries,
            ..Default::default()
        })
    }

    fn frame(fill: u8) -> Frame {
        Frame::new(1, RgbImage::from_pixel(64, 48, Rgb([fill, fill, fill])))
    }

    fn result(frame_id: u64) -> AnalysisResult {
        AnalysisResult::empty(frame_id, (64, 48))
    }

    #[test]
    fn test_hit_within_ttl_marks_cache_hit() {
        let cache = cache(100, 10);
        let req = AnalysisRequest::new([ClassifierType::Person]);
        let frame = frame(10);

        assert!(cache.get(&frame, &req).is_none());
        cache.put(&frame, &req, &result(7));

        let hit = cache.get(&frame, &req).unwrap();
        assert!(hit.cache_hit);
        assert_eq!(hit.frame_id, 7);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_key_ignores_classifier_order_and_unrelated_options() {
        let cache = cache(100, 10);
        let frame = frame(10);
        let a = AnalysisRequest::new([ClassifierType::Face, ClassifierType::Person]);
        let mut b = AnalysisRequest::new([ClassifierType::Person, ClassifierType::Face])
            .with_client_id("someone");
        b.options
            .extra
            .insert("debug".to_string(), serde_json::json!(true));
        assert_eq!(cache.key_for(&frame, &a), cache.key_for(&frame, &b));

        let c = a.clone().with_options(AnalysisOptions {
            include_3d_position: true,
            ..Default::default()
        });
        assert_ne!(cache.key_for(&frame, &a), cache.key_for(&frame, &c));
    }

    #[test]
    fn test_key_includes_non_empty_filters() {
        let cache = cache(100, 10);
        let frame = frame(10);
        let plain = AnalysisRequest::new([ClassifierType::Object]);
        let empty = plain.clone().with_filters(DetectionFilters::default());
        let strict = plain.clone().with_filters(DetectionFilters {
            min_confidence: Some(0.8),
            ..Default::default()
        });

        assert_eq!(cache.key_for(&frame, &plain), cache.key_for(&frame, &empty));
        assert_ne!(cache.key_for(&frame, &plain), cache.key_for(&frame, &strict));
    }

    #[test]
    fn test_key_depends_on_sampled_pixels() {
        let cache = cache(100, 10);
        let req = AnalysisRequest::new([ClassifierType::Person]);
        let base = frame(10);

        let mut sampled = base.clone();
        sampled.color.put_pixel(8, 8, Rgb([200, 0, 0]));
        assert_ne!(cache.key_for(&base, &req), cache.key_for(&sampled, &req));

        // (3, 5) falls between sample points with the default stride of 8.
        let mut unsampled = base.clone();
        unsampled.color.put_pixel(3, 5, Rgb([200, 0, 0]));
        assert_eq!(cache.key_for(&base, &req), cache.key_for(&unsampled, &req));
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_removed() {
        let cache = cache(100, 10);
        let start = Instant::now();
        cache.insert_at("k".to_string(), result(1), start);

        assert!(cache.get_at("k", start + Duration::from_millis(50)).is_some());
        assert!(cache
            .get_at("k", start + Duration::from_millis(150))
            .is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_lru_eviction_prefers_least_recently_accessed() {
        let cache = cache(10_000, 2);
        let t0 = Instant::now();
        cache.insert_at("a".to_string(), result(1), t0);
        cache.insert_at("b".to_string(), result(2), t0 + Duration::from_millis(1));
        assert!(cache.get_at("a", t0 + Duration::from_millis(2)).is_some());

        cache.insert_at("c".to_string(), result(3), t0 + Duration::from_millis(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get_at("b", t0 + Duration::from_millis(4)).is_none());
        assert!(cache.get_at("a", t0 + Duration::from_millis(4)).is_some());
        assert!(cache.get_at("c", t0 + Duration::from_millis(4)).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_existing_key_does_not_evict() {
        let cache = cache(10_000, 1);
        let t0 = Instant::now();
        cache.insert_at("a".to_string(), result(1), t0);
        cache.insert_at("a".to_string(), result(2), t0);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get_at("a", t0).unwrap().frame_id, 2);
    }

    #[test]
    fn test_sweep_and_clear() {
        let cache = cache(100, 10);
        let t0 = Instant::now();
        cache.insert_at("old".to_string(), result(1), t0);
        cache.insert_at("new".to_string(), result(2), t0 + Duration::from_millis(90));

        assert_eq!(cache.sweep_expired_at(t0 + Duration::from_millis(120)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
