//! Engine configuration.

use fieldsync_protocol::AutoResolvePolicy;

/// Configuration for opening a sync engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to flush the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Number of lock stripes guarding per-entity read-decide-write.
    pub lock_stripes: usize,

    /// Largest payload a single delta may carry.
    pub max_payload_bytes: usize,

    /// Policy applied to new conflicts without an operator.
    pub auto_resolve: AutoResolvePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            lock_stripes: 64,
            max_payload_bytes: 4 * 1024 * 1024, // 4 MiB
            auto_resolve: AutoResolvePolicy::Manual,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to flush the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the number of lock stripes (at least one is always used).
    #[must_use]
    pub const fn lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    /// Sets the largest accepted payload.
    #[must_use]
    pub const fn max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Sets the automatic resolution policy.
    #[must_use]
    pub const fn auto_resolve(mut self, policy: AutoResolvePolicy) -> Self {
        self.auto_resolve = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.sync_on_commit);
        assert_eq!(config.lock_stripes, 64);
        assert_eq!(config.auto_resolve, AutoResolvePolicy::Manual);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .sync_on_commit(false)
            .lock_stripes(8)
            .max_payload_bytes(1024)
            .auto_resolve(AutoResolvePolicy::ServerWins);

        assert!(!config.sync_on_commit);
        assert_eq!(config.lock_stripes, 8);
        assert_eq!(config.max_payload_bytes, 1024);
        assert_eq!(config.auto_resolve, AutoResolvePolicy::ServerWins);
    }
}
