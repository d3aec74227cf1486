//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{Configuration, DatabaseConfig, DocumentStoreConfig};

/// Builder for configurations suitable for tests.
///
/// Small batch sizes are useful to force pagination with a handful of
/// documents; a near-zero backoff keeps retry tests fast.
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Defaults plus a 1ms retry backoff.
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.filesystem.retry_backoff = Duration::from_millis(1);
        Self { config }
    }

    /// In-memory SQLite catalog and in-memory document store.
    pub fn in_memory(mut self) -> Self {
        self.config.database = DatabaseConfig::in_memory();
        self.config.document_store = DocumentStoreConfig::in_memory();
        self
    }

    pub fn with_database_dsn(mut self, dsn: &str) -> Self {
        self.config.database.dsn = dsn.to_string();
        self
    }

    pub fn with_document_store_dsn(mut self, dsn: &str) -> Self {
        self.config.document_store.dsn = dsn.to_string();
        self
    }

    /// Page size for iteration and for dependency writes.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.config.filesystem.batch_size = size;
        self.config.filesystem.snapshot_batch_size = size;
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.config.filesystem.retries = retries;
        self.config.filesystem.retry_backoff = backoff;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory() {
        let config = TestConfigBuilder::new().in_memory().build();
        assert_eq!(config.database.dsn, "sqlite::memory:");
        assert_eq!(config.document_store.dsn, "memory://");
        assert_eq!(config.filesystem.retry_backoff, Duration::from_millis(1));
    }

    #[test]
    fn test_batch_size_applies_to_both() {
        let config = TestConfigBuilder::new().with_batch_size(2).build();
        assert_eq!(config.filesystem.batch_size, 2);
        assert_eq!(config.filesystem.snapshot_batch_size, 2);
    }
}
