//! Cache configuration.

use std::time::Duration;

use carelink_common::resilience::ConfigError;

const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CAPACITY: usize = 256;

/// Configuration for [`QueryCache`](super::QueryCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a fetch does not override it.
    pub default_ttl: Duration,
    /// Maximum number of entries; inserts beyond this evict oldest-first.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { default_ttl: DEFAULT_TTL, capacity: DEFAULT_CAPACITY }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "capacity must be greater than 0".to_string(),
            });
        }
        if self.default_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                message: "default_ttl must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self { config: CacheConfig::default() }
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
