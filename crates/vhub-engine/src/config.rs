//! Engine configuration.

use std::time::Duration;

use vhub_models::ClassifierType;

use crate::broadcast::BroadcastConfig;
use crate::cache::CacheConfig;
use crate::pipeline::PipelineConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub broadcast: BroadcastConfig,
    /// Target rate of the background analysis driver.
    pub fps: u32,
    /// Classifiers created and initialized at startup.
    pub default_classifiers: Vec<ClassifierType>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            broadcast: BroadcastConfig::default(),
            fps: 15,
            default_classifiers: ClassifierType::ALL.to_vec(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let default_classifiers = std::env::var("VHUB_CLASSIFIERS")
            .ok()
            .map(|s| parse_classifier_list(&s))
            .unwrap_or_else(|| ClassifierType::ALL.to_vec());

        Self {
            cache: CacheConfig {
                ttl: env_millis("VHUB_CACHE_TTL_MS", 100),
                max_entries: env_parse("VHUB_CACHE_MAX_ENTRIES", 100),
                sample_stride: env_parse("VHUB_CACHE_SAMPLE_STRIDE", 8).max(1),
                sweep_interval: env_millis("VHUB_CACHE_SWEEP_INTERVAL_MS", 1000),
            },
            pipeline: PipelineConfig {
                classifier_timeout: env_millis("VHUB_CLASSIFIER_TIMEOUT_MS", 2000),
                max_parallel_inference: env_parse("VHUB_MAX_PARALLEL_INFERENCE", 4).max(1),
            },
            broadcast: BroadcastConfig {
                queue_capacity: env_parse("VHUB_BROADCAST_QUEUE", 16).max(1),
                client_buffer: env_parse("VHUB_CLIENT_BUFFER", 32).max(1),
                poll_interval: env_millis("VHUB_BROADCAST_POLL_MS", 1000),
            },
            fps: env_parse("VHUB_FPS", 15).max(1),
            default_classifiers,
        }
    }

    /// Interval between driver ticks.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_parse(key, default))
}

/// Parse a comma separated classifier list, skipping unknown names.
fn parse_classifier_list(raw: &str) -> Vec<ClassifierType> {
    let mut types: Vec<ClassifierType> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(ty) => Some(ty),
            Err(e) => {
                tracing::warn!(value = s, error = %e, "Ignoring unknown classifier in VHUB_CLASSIFIERS");
                None
            }
        })
        .collect();
    types.sort();
    types.dedup();
    types
}
