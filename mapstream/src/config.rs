//! Pipeline tuning knobs.
//!
//! These arrive as plain data from whatever configuration loader the host
//! application uses; the library only defines the shape and the defaults.

use std::time::Duration;

use serde::Deserialize;

/// Default idle age before a tile record is swept out of the cache table.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(5);

/// Default wait timeout for the download worker when no work exists.
pub const DEFAULT_DOWNLOAD_WAIT: Duration = Duration::from_secs(10);

/// Default wait timeout for the decode worker when no work exists.
pub const DEFAULT_DECODE_WAIT: Duration = Duration::from_secs(10);

/// Default number of pixel-buffer slots per resolution tier.
pub const DEFAULT_SLOTS_PER_TIER: usize = 8;

/// Default edge length, in pixels, of a fully decoded tile.
pub const DEFAULT_TILE_PIXELS: u16 = 256;

/// Default resolution tier count of the imagery pyramid.
pub const DEFAULT_PYRAMID_TIERS: u8 = 3;

/// Tuning for the cache table, workers and buffer pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Records not requested for longer than this are swept.
    #[serde(with = "duration_secs")]
    pub max_idle: Duration,

    /// Download worker wait-with-timeout; also the transient-failure retry
    /// reset window.
    #[serde(with = "duration_secs")]
    pub download_wait: Duration,

    /// Decode worker wait-with-timeout.
    #[serde(with = "duration_secs")]
    pub decode_wait: Duration,

    /// Fixed slot count for every pool tier.
    pub slots_per_tier: usize,

    /// Edge length of a fully decoded tile; coarser tiers halve it per
    /// step. Pool slots are sized from this at construction.
    pub tile_pixels: u16,

    /// Tier count of the imagery pyramid the pool provisions for.
    pub pyramid_tiers: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            download_wait: DEFAULT_DOWNLOAD_WAIT,
            decode_wait: DEFAULT_DECODE_WAIT,
            slots_per_tier: DEFAULT_SLOTS_PER_TIER,
            tile_pixels: DEFAULT_TILE_PIXELS,
            pyramid_tiers: DEFAULT_PYRAMID_TIERS,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_windows() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_idle, Duration::from_secs(5));
        assert_eq!(config.download_wait, Duration::from_secs(10));
        assert_eq!(config.slots_per_tier, 8);
    }
}
