//! Cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use knk_core::constants::{
    DEFAULT_CACHE_TTL, DEFAULT_CACHE_TTL_SECS, ENV_CACHE_TTL_SECONDS, ENV_LOAD_TIMEOUT_MS,
};
use knk_core::error::{KnkError, Result};

/// Configuration shared by every domain cache.
///
/// One TTL governs all caches uniformly; there is no per-type override.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live in seconds; zero means "use the default"
    pub ttl_seconds: u64,
    /// Default per-load timeout in milliseconds
    #[serde(default)]
    pub load_timeout_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_CACHE_TTL_SECS, // 1 minute
            load_timeout_ms: None,
        }
    }
}

impl CacheConfig {
    /// Creates a config with the given TTL.
    ///
    /// The TTL must be a positive whole number of seconds.
    pub fn with_ttl(ttl: Duration) -> Result<Self> {
        if ttl.as_secs() == 0 || ttl.subsec_nanos() != 0 {
            return Err(KnkError::ConfigError(format!(
                "cache TTL must be a positive whole number of seconds, got {:?}",
                ttl
            )));
        }
        Ok(Self {
            ttl_seconds: ttl.as_secs(),
            ..Default::default()
        })
    }

    /// Sets the default per-load timeout.
    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Effective TTL, falling back to one minute when unset.
    pub fn ttl(&self) -> Duration {
        if self.ttl_seconds == 0 {
            DEFAULT_CACHE_TTL
        } else {
            Duration::from_secs(self.ttl_seconds)
        }
    }

    /// Effective per-load timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.load_timeout_ms.map(Duration::from_millis)
    }

    /// Loads overrides from the environment (and a `.env` file when present).
    ///
    /// Reads `KNK_CACHE_TTL_SECONDS` and `KNK_LOAD_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_CACHE_TTL_SECONDS) {
            config.ttl_seconds = parse_u64(ENV_CACHE_TTL_SECONDS, &raw)?;
        }
        if let Ok(raw) = std::env::var(ENV_LOAD_TIMEOUT_MS) {
            config.load_timeout_ms = Some(parse_u64(ENV_LOAD_TIMEOUT_MS, &raw)?);
        }
        Ok(config)
    }
}

fn parse_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| KnkError::ConfigError(format!("{} must be a whole number, got '{}'", name, raw)))
}
