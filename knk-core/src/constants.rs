//! Defaults shared across the cache and resolver crates.

use std::time::Duration;

/// Default time-to-live for every domain cache, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// Default time-to-live for every domain cache.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(DEFAULT_CACHE_TTL_SECS);

/// Upper bound on ancestor levels walked for one entity.
///
/// The containment tree is at most four levels deep (structure, street,
/// district, town); anything deeper is corrupt data.
pub const DEFAULT_MAX_HIERARCHY_DEPTH: usize = 8;

/// Environment variable overriding the cache TTL (seconds).
pub const ENV_CACHE_TTL_SECONDS: &str = "KNK_CACHE_TTL_SECONDS";

/// Environment variable setting the provider load timeout (milliseconds).
pub const ENV_LOAD_TIMEOUT_MS: &str = "KNK_LOAD_TIMEOUT_MS";
