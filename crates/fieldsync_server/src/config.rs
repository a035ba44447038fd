//! Server configuration.

use fieldsync_core::Config;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Most deltas accepted in one batch.
    pub max_push_batch: u32,
    /// Page size when a changes request names no limit.
    pub default_pull_limit: u32,
    /// Largest page size a changes request may ask for.
    pub max_pull_limit: u32,
    /// Engine configuration.
    pub engine: Config,
}

impl ServerConfig {
    /// Creates a configuration with default limits over `engine`.
    pub fn new(engine: Config) -> Self {
        Self {
            max_push_batch: 500,
            default_pull_limit: 100,
            max_pull_limit: 1000,
            engine,
        }
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the default pull page size.
    pub fn with_default_pull_limit(mut self, limit: u32) -> Self {
        self.default_pull_limit = limit;
        self
    }

    /// Sets the maximum pull page size.
    pub fn with_max_pull_limit(mut self, limit: u32) -> Self {
        self.max_pull_limit = limit;
        self
    }

    /// Replaces the engine configuration.
    pub fn with_engine(mut self, engine: Config) -> Self {
        self.engine = engine;
        self
    }

    /// Page size for a requested limit: the default when absent, otherwise
    /// clamped to `[1, max_pull_limit]`.
    pub fn pull_limit(&self, requested: Option<u32>) -> usize {
        let limit = requested
            .unwrap_or(self.default_pull_limit)
            .clamp(1, self.max_pull_limit.max(1));
        limit as usize
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
