//! Configuration knobs for the cache engine (spec.md §6).

use std::{env, path::PathBuf, time::Duration};

/// Soft cap on `*.json` entries under `root/`, enforced lazily by [`crate::store::FileStore::purge`].
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Expiration applied to freshly-stored entries that lack a `max-age`.
pub const DEFAULT_INITIAL_EXPIRATION: Duration = Duration::from_secs(60 * 60 * 24 * 2);

/// Expiration applied to refreshes without an explicit new `max-age`.
pub const DEFAULT_REFRESH_EXPIRATION: Duration = Duration::from_secs(60 * 60 * 24 * 2);

/// Configuration for a [`crate::facade::Cache`] and the [`crate::store::FileStore`] it wraps.
///
/// # Examples
///
/// ```rust
/// use file_http_cache::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::default()
///     .with_max_entries(5_000)
///     .with_default_initial_expiration(Duration::from_secs(3600));
/// assert_eq!(config.max_entries, 5_000);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Soft cap on `*.json` entries under `root/`.
    pub max_entries: usize,
    /// Expiration applied to freshly-stored entries that lack a `max-age`.
    pub default_initial_expiration: Duration,
    /// Expiration applied to refreshes without an explicit new `max-age`.
    pub default_refresh_expiration: Duration,
    /// When true, an un-parseable bearer token yields a `null` (`None`) key
    /// instead of falling back to the raw `Authorization` header value.
    pub require_jwt_token: bool,
    /// Directory holding the permanent cache entries and `temp/` staging area.
    pub root: PathBuf,
    /// How often [`crate::store::FileStore::purge`] is scheduled to run.
    pub purge_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_initial_expiration: DEFAULT_INITIAL_EXPIRATION,
            default_refresh_expiration: DEFAULT_REFRESH_EXPIRATION,
            require_jwt_token: false,
            root: default_root(),
            purge_interval: Duration::from_secs(5 * 60),
        }
    }
}

fn default_root() -> PathBuf {
    env::temp_dir().join("HttpClient.FileCache")
}

impl CacheConfig {
    /// Override `root`.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Override `max_entries`.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Override `default_initial_expiration`.
    #[must_use]
    pub fn with_default_initial_expiration(mut self, d: Duration) -> Self {
        self.default_initial_expiration = d;
        self
    }

    /// Override `default_refresh_expiration`.
    #[must_use]
    pub fn with_default_refresh_expiration(mut self, d: Duration) -> Self {
        self.default_refresh_expiration = d;
        self
    }

    /// Override `require_jwt_token`.
    #[must_use]
    pub fn with_require_jwt_token(mut self, require: bool) -> Self {
        self.require_jwt_token = require;
        self
    }
}
