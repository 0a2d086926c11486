//! Database configuration.

use persistdb_storage::MEMORY_LOCATION;

/// Default number of objects kept in the cache.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Configuration for connecting to a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Journal file path, or `":memory:"` for a transient database.
    pub location: String,

    /// Whether to log every store statement at debug level.
    pub debug: bool,

    /// Maximum number of cached objects (0 disables caching).
    pub cache_size: usize,

    /// Whether to sync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: MEMORY_LOCATION.to_string(),
            debug: false,
            cache_size: DEFAULT_CACHE_SIZE,
            sync_on_commit: true,
        }
    }
}

impl Config {
    /// Creates a configuration with default values (in memory).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the location.
    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Sets whether store statements are logged.
    #[must_use]
    pub const fn debug(mut self, value: bool) -> Self {
        self.debug = value;
        self
    }

    /// Sets the cache size.
    #[must_use]
    pub const fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Returns true if the location selects an in-memory database.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.location == MEMORY_LOCATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.is_in_memory());
        assert!(!config.debug);
        assert_eq!(config.cache_size, 1000);
        assert!(config.sync_on_commit);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .location("data/app.journal")
            .debug(true)
            .cache_size(0)
            .sync_on_commit(false);

        assert!(!config.is_in_memory());
        assert!(config.debug);
        assert_eq!(config.cache_size, 0);
        assert!(!config.sync_on_commit);
    }
}
