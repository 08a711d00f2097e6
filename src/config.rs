//! Configuration types for the detection engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    /// Detection settings
    pub detection: DetectionConfig,

    /// Cache settings
    pub cache: CacheConfig,

    /// Signal collection settings
    pub collector: CollectorConfig,

    /// Hook bridge settings
    pub hooks: HookConfig,

    /// Cross-context channel settings
    pub channel: ChannelConfig,
}

/// Detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Master enable switch
    pub enabled: bool,

    /// Include fingerprinting detectors in results
    pub show_fingerprinting: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            show_fingerprinting: true,
        }
    }
}

/// Detection cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry time-to-live in hours
    pub ttl_hours: u64,

    /// Persist entries through the host key-value store
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 12,
            persist: true,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

/// Signal collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Maximum length of the captured HTML excerpt in bytes
    pub html_excerpt_max: usize,

    /// Delay before the first vendor-global presence check, in ms
    pub initial_check_delay_ms: u64,

    /// Delays for the re-checks covering lazily-injected scripts, in ms
    pub global_recheck_delays_ms: Vec<u64>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            html_excerpt_max: 100_000,
            initial_check_delay_ms: 100,
            global_recheck_delays_ms: vec![2_000, 5_000],
        }
    }
}

/// Hook bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Debounce window for hook batch flushing, in ms
    pub debounce_ms: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self { debounce_ms: 50 }
    }
}

impl HookConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Cross-context channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Delay before the single retry of a failed page-data request, in ms
    pub retry_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1_000,
        }
    }
}

impl ChannelConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
