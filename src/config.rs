//! Configuration for SectorKV
//!
//! Centralized configuration with sensible defaults. A `Config` is fixed for
//! the lifetime of a store; geometry checks against the partition happen in
//! `KeyValueStore::init`.

use serde::{Deserialize, Serialize};

use crate::error::{KvError, Result};

/// Hard ceiling on key length (the entry header stores it in one byte)
pub const KEY_LENGTH_LIMIT: usize = u8::MAX as usize;

/// Hard ceiling on value size (0xFFFF is reserved for tombstones)
pub const VALUE_SIZE_LIMIT: usize = 0xFFFE;

/// Main configuration for a SectorKV instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Format Configuration
    // -------------------------------------------------------------------------
    /// Marker written at the start of every entry. Entries carrying a
    /// different magic are never indexed; their space is reclaimed by
    /// garbage collection.
    pub magic: u32,

    // -------------------------------------------------------------------------
    // Capacity Configuration
    // -------------------------------------------------------------------------
    /// Key directory capacity (distinct keys, tombstones included)
    pub max_entries: usize,

    /// Largest partition (in sectors) this store will manage
    pub max_usable_sectors: usize,

    /// Longest accepted key in bytes
    pub max_key_length: usize,

    /// Largest accepted value in bytes
    pub max_value_size: usize,

    // -------------------------------------------------------------------------
    // Integrity Configuration
    // -------------------------------------------------------------------------
    /// Read back and checksum-verify every entry right after writing it
    pub verify_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            magic: 0x5EC7_0C4B,
            max_entries: 256,
            max_usable_sectors: 256,
            max_key_length: 64,
            max_value_size: 1024,
            verify_on_write: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the partition-independent limits
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(KvError::InvalidArgument(
                "max_entries must be at least 1".to_string(),
            ));
        }
        if self.max_usable_sectors < 2 {
            return Err(KvError::InvalidArgument(
                "max_usable_sectors must be at least 2".to_string(),
            ));
        }
        if self.max_key_length == 0 || self.max_key_length > KEY_LENGTH_LIMIT {
            return Err(KvError::InvalidArgument(format!(
                "max_key_length must be in 1..={}, got {}",
                KEY_LENGTH_LIMIT, self.max_key_length
            )));
        }
        if self.max_value_size > VALUE_SIZE_LIMIT {
            return Err(KvError::InvalidArgument(format!(
                "max_value_size must be at most {}, got {}",
                VALUE_SIZE_LIMIT, self.max_value_size
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
    /// Set the entry magic marker
    pub fn magic(mut self, magic: u32) -> Self {
        self.config.magic = magic;
        self
    }

    /// Set the key directory capacity
    pub fn max_entries(mut self, count: usize) -> Self {
        self.config.max_entries = count;
        self
    }

    /// Set the largest partition size (in sectors) the store accepts
    pub fn max_usable_sectors(mut self, count: usize) -> Self {
        self.config.max_usable_sectors = count;
        self
    }

    /// Set the longest accepted key
    pub fn max_key_length(mut self, len: usize) -> Self {
        self.config.max_key_length = len;
        self
    }

    /// Set the largest accepted value
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = size;
        self
    }

    /// Enable read-back verification of written entries
    pub fn verify_on_write(mut self, enabled: bool) -> Self {
        self.config.verify_on_write = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
