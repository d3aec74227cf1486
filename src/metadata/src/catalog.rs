use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, Row, SqlitePool, query};
use uuid::Uuid;

use common::{Error, Result};

use crate::lock::ResourceLocks;

/// Kinds of metadata rows that carry a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockableResource {
    Dataset,
    Snapshot,
}

impl LockableResource {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            LockableResource::Dataset => "datasets",
            LockableResource::Snapshot => "snapshots",
        }
    }
}

impl fmt::Display for LockableResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockableResource::Dataset => write!(f, "dataset"),
            LockableResource::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// A dataset or snapshot row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub locks: ResourceLocks,
}

/// Relational catalog of datasets and snapshots (PostgreSQL or SQLite).
#[derive(Debug, Clone)]
pub enum MetadataCatalog {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl MetadataCatalog {
    /// Connect and initialize the schema.
    pub async fn new(dsn: &str) -> Result<Self> {
        log::info!("Connecting to metadata catalog with DSN: {dsn}");

        let catalog = if dsn.starts_with("sqlite:") {
            let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);
            let pool = if dsn.contains(":memory:") {
                // a second connection would see a different, empty database
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect_with(options)
                    .await?
            } else {
                SqlitePool::connect_with(options).await.map_err(|e| {
                    log::error!("Failed to connect to SQLite database with DSN '{dsn}': {e}");
                    e
                })?
            };
            MetadataCatalog::Sqlite(pool)
        } else {
            let pool = PgPool::connect(dsn).await.map_err(|e| {
                log::error!("Failed to connect to PostgreSQL database with DSN '{dsn}': {e}");
                e
            })?;
            MetadataCatalog::Postgres(pool)
        };

        log::info!("Database connection established successfully");
        catalog.init().await.map_err(|e| {
            log::error!("Failed to initialize metadata schema: {e}");
            e
        })?;
        log::info!("Metadata schema initialized successfully");
        Ok(catalog)
    }

    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn init(&self) -> Result<()> {
        for resource in [LockableResource::Dataset, LockableResource::Snapshot] {
            let table = resource.table();
            match self {
                MetadataCatalog::Sqlite(pool) => {
                    let stmt = format!(
                        r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL,
                    exclusive_lock TEXT,
                    shared_locks TEXT NOT NULL DEFAULT '[]'
                )"#
                    );
                    query(&stmt).execute(pool).await?;
                }
                MetadataCatalog::Postgres(pool) => {
                    let stmt = format!(
                        r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id UUID PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    exclusive_lock TEXT,
                    shared_locks TEXT[] NOT NULL DEFAULT '{{}}'
                )"#
                    );
                    query(&stmt).execute(pool).await?;
                }
            }
        }
        Ok(())
    }

    /// Insert a row that is already exclusively locked by `flight_id`.
    ///
    /// Running it again for the same id and flight succeeds; any other clash
    /// on id or name is invalid input.
    pub async fn create_and_lock(
        &self,
        resource: LockableResource,
        id: Uuid,
        name: &str,
        flight_id: &str,
    ) -> Result<()> {
        let table = resource.table();
        let inserted = match self {
            MetadataCatalog::Sqlite(pool) => {
                let stmt = format!(
                    "INSERT INTO {table} (id, name, created_at, exclusive_lock) \
                     VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING"
                );
                query(&stmt)
                    .bind(id.to_string())
                    .bind(name)
                    .bind(Utc::now().to_rfc3339())
                    .bind(flight_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            MetadataCatalog::Postgres(pool) => {
                let stmt = format!(
                    "INSERT INTO {table} (id, name, created_at, exclusive_lock) \
                     VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING"
                );
                query(&stmt)
                    .bind(id)
                    .bind(name)
                    .bind(Utc::now())
                    .bind(flight_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        if inserted == 0 {
            match self.retrieve_summary(resource, id).await {
                Ok(existing)
                    if existing.name == name
                        && existing.locks.exclusive.as_deref() == Some(flight_id) =>
                {
                    log::debug!("{resource} {id} was already created by flight {flight_id}");
                    return Ok(());
                }
                Ok(_) => {
                    return Err(Error::invalid_input(format!(
                        "{resource} id {id} is already in use"
                    )));
                }
                Err(e) if e.is_not_found() => {
                    return Err(Error::invalid_input(format!(
                        "a {resource} named '{name}' already exists"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        log::info!("Created {resource} {name} ({id}) locked by flight {flight_id}");
        Ok(())
    }

    /// Delete the row if `flight_id` holds its exclusive lock.
    pub async fn delete_locked(
        &self,
        resource: LockableResource,
        id: Uuid,
        flight_id: &str,
    ) -> Result<bool> {
        let table = resource.table();
        let deleted = match self {
            MetadataCatalog::Sqlite(pool) => {
                let stmt = format!("DELETE FROM {table} WHERE id = ? AND exclusive_lock = ?");
                query(&stmt)
                    .bind(id.to_string())
                    .bind(flight_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            MetadataCatalog::Postgres(pool) => {
                let stmt = format!("DELETE FROM {table} WHERE id = $1 AND exclusive_lock = $2");
                query(&stmt)
                    .bind(id)
                    .bind(flight_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };
        if deleted > 0 {
            log::info!("Deleted {resource} {id} (flight {flight_id})");
        }
        Ok(deleted > 0)
    }

    pub async fn retrieve_summary(
        &self,
        resource: LockableResource,
        id: Uuid,
    ) -> Result<ResourceSummary> {
        let table = resource.table();
        match self {
            MetadataCatalog::Sqlite(pool) => {
                let stmt = format!(
                    "SELECT name, created_at, exclusive_lock, shared_locks FROM {table} WHERE id = ?"
                );
                let row = query(&stmt)
                    .bind(id.to_string())
                    .fetch_optional(pool)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("{resource} {id} not found")))?;

                let created_at: String = row.try_get("created_at")?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| {
                        Error::corruption(format!("{resource} {id} has a bad timestamp: {e}"))
                    })?
                    .with_timezone(&Utc);
                let shared: String = row.try_get("shared_locks")?;
                Ok(ResourceSummary {
                    id,
                    name: row.try_get("name")?,
                    created_at,
                    locks: ResourceLocks {
                        exclusive: row.try_get("exclusive_lock")?,
                        shared: crate::lock::decode_shared_locks(&shared)?,
                    },
                })
            }
            MetadataCatalog::Postgres(pool) => {
                let stmt = format!(
                    "SELECT name, created_at, exclusive_lock, shared_locks FROM {table} WHERE id = $1"
                );
                let row = query(&stmt)
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("{resource} {id} not found")))?;
                Ok(ResourceSummary {
                    id,
                    name: row.try_get("name")?,
                    created_at: row.try_get("created_at")?,
                    locks: ResourceLocks {
                        exclusive: row.try_get("exclusive_lock")?,
                        shared: row.try_get("shared_locks")?,
                    },
                })
            }
        }
    }
}
