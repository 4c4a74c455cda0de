//! Configuration for FlashKV
//!
//! Centralized configuration with sensible defaults.

use crate::entry::MAX_PAYLOAD_LEN;
use crate::error::{FlashError, Result};

/// Main configuration for a Store instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// A page qualifies for reclamation when `live_slots / capacity` is
    /// strictly below this ratio. `1.0` means any reclaimable slot qualifies.
    pub compaction_threshold: f32,

    // -------------------------------------------------------------------------
    // Entry Configuration
    // -------------------------------------------------------------------------
    /// Largest STR/BLOB payload accepted by `set` (bytes)
    pub max_value_len: usize,

    // -------------------------------------------------------------------------
    // Device Configuration
    // -------------------------------------------------------------------------
    /// Call `BlockDevice::sync` after every committed record
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compaction_threshold: 1.0,
            max_value_len: MAX_PAYLOAD_LEN,
            sync_writes: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that every field is within its supported range
    pub fn validate(&self) -> Result<()> {
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(FlashError::Config(format!(
                "compaction_threshold must be in (0, 1], got {}",
                self.compaction_threshold
            )));
        }

        if self.max_value_len > MAX_PAYLOAD_LEN {
            return Err(FlashError::Config(format!(
                "max_value_len {} exceeds the format limit of {}",
                self.max_value_len, MAX_PAYLOAD_LEN
            )));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the live-ratio threshold below which pages are reclaimed
    pub fn compaction_threshold(mut self, ratio: f32) -> Self {
        self.config.compaction_threshold = ratio;
        self
    }

    /// Set the maximum STR/BLOB payload length (in bytes)
    pub fn max_value_len(mut self, len: usize) -> Self {
        self.config.max_value_len = len;
        self
    }

    /// Enable or disable a device sync after each record
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.config.sync_writes = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
