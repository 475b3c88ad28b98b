//! Layer configuration.
//!
//! A driver layer has no config file of its own, so the few knobs it has
//! come from the environment of the traced application. Everything is
//! read once, on first use.

use std::sync::OnceLock;
use std::time::Duration;

/// Runtime configuration for the timing layer.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// Minimum interval between clock re-synchronizations on a queue.
    /// `VK_TIMING_SYNC_INTERVAL_MS`, default 100 ms.
    pub sync_interval: Duration,

    /// Observe queues but never instrument them. `VK_TIMING_DISABLE`.
    pub disabled: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_millis(100),
            disabled: false,
        }
    }
}

impl LayerConfig {
    fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(ms) = std::env::var("VK_TIMING_SYNC_INTERVAL_MS") {
            match ms.trim().parse::<u64>() {
                Ok(ms) => config.sync_interval = Duration::from_millis(ms),
                Err(_) => log::warn!("ignoring malformed VK_TIMING_SYNC_INTERVAL_MS={:?}", ms),
            }
        }
        if let Ok(v) = std::env::var("VK_TIMING_DISABLE") {
            config.disabled = v != "0";
        }
        config
    }

    /// Sync interval in boot-clock nanoseconds, the unit the submit path
    /// compares against.
    pub fn sync_interval_ns(&self) -> i64 {
        self.sync_interval.as_nanos() as i64
    }
}

/// The process-wide configuration.
pub fn get() -> &'static LayerConfig {
    static CONFIG: OnceLock<LayerConfig> = OnceLock::new();
    CONFIG.get_or_init(LayerConfig::from_env)
}
