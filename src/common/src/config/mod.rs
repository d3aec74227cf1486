use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::retry::RetryPolicy;

/// Relational metadata catalog (dataset and snapshot rows, locks).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/datarepo.db"),
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
        }
    }
}

/// Document store holding directory entries and dependency edges.
///
/// The DSN scheme selects the backend: `sqlite:`, `postgres:` or `memory://`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentStoreConfig {
    pub dsn: String,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/documents.db"),
        }
    }
}

impl DocumentStoreConfig {
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("memory://"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Page size used when streaming query results
    pub batch_size: usize,
    /// Number of dependency edges written per call
    pub snapshot_batch_size: usize,
    /// Attempts per store call, including the first
    pub retries: u32,
    /// Fixed pause between attempts
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            snapshot_batch_size: 500,
            retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl FilesystemConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.retry_backoff)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Metadata catalog
    pub database: DatabaseConfig,
    pub document_store: DocumentStoreConfig,
    pub filesystem: FilesystemConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment().extract().map_err(Box::new)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("datarepo.toml"))
            .merge(Env::prefixed("DATAREPO__").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.database.dsn, "sqlite://.data/datarepo.db");
        assert_eq!(config.document_store.dsn, "sqlite://.data/documents.db");
        assert_eq!(config.filesystem.batch_size, 500);
        assert_eq!(
            config.filesystem.retry_policy(),
            RetryPolicy::new(3, Duration::from_millis(500))
        );
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert_eq!(config.database.dsn, "sqlite://.data/datarepo.db");
            assert_eq!(config.filesystem.snapshot_batch_size, 500);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "datarepo.toml",
                r#"
                [document_store]
                dsn = "memory://"

                [filesystem]
                batch_size = 50
                retry_backoff = "2s"
                "#,
            )?;

            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert_eq!(config.document_store.dsn, "memory://");
            assert_eq!(config.filesystem.batch_size, 50);
            assert_eq!(config.filesystem.retry_backoff, Duration::from_secs(2));
            // untouched keys keep their defaults
            assert_eq!(config.filesystem.retries, 3);
            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.create_file("datarepo.toml", "[database]\ndsn = \"sqlite://./file.db\"\n")?;
            jail.set_env("DATAREPO__DATABASE__DSN", "postgres://localhost/datarepo");
            jail.set_env("DATAREPO__FILESYSTEM__RETRIES", "5");

            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert_eq!(config.database.dsn, "postgres://localhost/datarepo");
            assert_eq!(config.filesystem.retries, 5);
            Ok(())
        });
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("DATAREPO__FILESYSTEM__RETRY_BACKOFF", "soon");
            assert!(Configuration::load().is_err());
            Ok(())
        });
    }
}
