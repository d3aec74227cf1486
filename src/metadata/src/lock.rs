//! Shared/exclusive advisory locks embedded in metadata rows.
//!
//! Every transition is a single conditional `UPDATE`, so concurrent workers
//! racing on the same row are serialized by the database. A lock that
//! updates nothing is then classified by reading the row: missing means
//! not found, present means somebody else holds it.
//!
//! Unlocking never fails for a lock that is not held; undo actions rely on
//! being able to run it any number of times.

use serde::{Deserialize, Serialize};
use sqlx::{Row, query};
use uuid::Uuid;

use common::{Error, Result};

use crate::catalog::{LockableResource, MetadataCatalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Exclusive,
    Shared,
}

/// Current lock holders of a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLocks {
    pub exclusive: Option<String>,
    pub shared: Vec<String>,
}

impl ResourceLocks {
    pub fn is_unlocked(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

pub(crate) fn decode_shared_locks(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| Error::corruption(format!("unreadable shared lock list '{raw}': {e}")))
}

impl MetadataCatalog {
    pub async fn lock(
        &self,
        resource: LockableResource,
        id: Uuid,
        mode: LockMode,
        flight_id: &str,
    ) -> Result<()> {
        match mode {
            LockMode::Exclusive => self.lock_exclusive(resource, id, flight_id).await,
            LockMode::Shared => self.lock_shared(resource, id, flight_id).await,
        }
    }

    pub async fn unlock(
        &self,
        resource: LockableResource,
        id: Uuid,
        mode: LockMode,
        flight_id: &str,
    ) -> Result<bool> {
        match mode {
            LockMode::Exclusive => self.unlock_exclusive(resource, id, flight_id).await,
            LockMode::Shared => self.unlock_shared(resource, id, flight_id).await,
        }
    }

    /// Take the exclusive lock. Succeeds if `flight_id` already holds it.
    pub async fn lock_exclusive(
        &self,
        resource: LockableResource,
        id: Uuid,
        flight_id: &str,
    ) -> Result<()> {
        let table = resource.table();
        let updated = match self {
            MetadataCatalog::Sqlite(pool) => {
                let stmt = format!(
                    "UPDATE {table} SET exclusive_lock = ? \
                     WHERE id = ? AND (exclusive_lock IS NULL OR exclusive_lock = ?) \
                     AND json_array_length(shared_locks) = 0"
                );
                query(&stmt)
                    .bind(flight_id)
                    .bind(id.to_string())
                    .bind(flight_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            MetadataCatalog::Postgres(pool) => {
                let stmt = format!(
                    "UPDATE {table} SET exclusive_lock = $1 \
                     WHERE id = $2 AND (exclusive_lock IS NULL OR exclusive_lock = $1) \
                     AND CARDINALITY(shared_locks) = 0"
                );
                query(&stmt)
                    .bind(flight_id)
                    .bind(id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        if updated == 0 {
            return Err(self.lock_failure(resource, id, LockMode::Exclusive).await);
        }
        log::debug!("Flight {flight_id} holds the exclusive lock on {resource} {id}");
        Ok(())
    }

    /// Add `flight_id` to the shared holders. Repeating it is harmless.
    pub async fn lock_shared(
        &self,
        resource: LockableResource,
        id: Uuid,
        flight_id: &str,
    ) -> Result<()> {
        let table = resource.table();
        let updated = match self {
            MetadataCatalog::Sqlite(pool) => {
                let stmt = format!(
                    "UPDATE {table} SET shared_locks = CASE \
                         WHEN EXISTS (SELECT 1 FROM json_each({table}.shared_locks) WHERE value = ?) \
                         THEN shared_locks \
                         ELSE json_insert(shared_locks, '$[#]', ?) END \
                     WHERE id = ? AND exclusive_lock IS NULL"
                );
                query(&stmt)
                    .bind(flight_id)
                    .bind(flight_id)
                    .bind(id.to_string())
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            MetadataCatalog::Postgres(pool) => {
                let stmt = format!(
                    "UPDATE {table} SET shared_locks = CASE \
                         WHEN $1::text = ANY(shared_locks) THEN shared_locks \
                         ELSE ARRAY_APPEND(shared_locks, $1::text) END \
                     WHERE id = $2 AND exclusive_lock IS NULL"
                );
                query(&stmt)
                    .bind(flight_id)
                    .bind(id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        if updated == 0 {
            return Err(self.lock_failure(resource, id, LockMode::Shared).await);
        }
        log::debug!("Flight {flight_id} holds a shared lock on {resource} {id}");
        Ok(())
    }

    /// Release the exclusive lock if `flight_id` holds it. Returns whether
    /// anything was released.
    pub async fn unlock_exclusive(
        &self,
        resource: LockableResource,
        id: Uuid,
        flight_id: &str,
    ) -> Result<bool> {
        let table = resource.table();
        let updated = match self {
            MetadataCatalog::Sqlite(pool) => {
                let stmt = format!(
                    "UPDATE {table} SET exclusive_lock = NULL WHERE id = ? AND exclusive_lock = ?"
                );
                query(&stmt)
                    .bind(id.to_string())
                    .bind(flight_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            MetadataCatalog::Postgres(pool) => {
                let stmt = format!(
                    "UPDATE {table} SET exclusive_lock = NULL WHERE id = $1 AND exclusive_lock = $2"
                );
                query(&stmt)
                    .bind(id)
                    .bind(flight_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };
        if updated == 0 {
            log::debug!("Flight {flight_id} held no exclusive lock on {resource} {id}");
        }
        Ok(updated > 0)
    }

    /// Remove `flight_id` from the shared holders if present.
    pub async fn unlock_shared(
        &self,
        resource: LockableResource,
        id: Uuid,
        flight_id: &str,
    ) -> Result<bool> {
        let table = resource.table();
        let updated = match self {
            MetadataCatalog::Sqlite(pool) => {
                let stmt = format!(
                    "UPDATE {table} SET shared_locks = \
                         (SELECT COALESCE(json_group_array(value), '[]') \
                          FROM json_each({table}.shared_locks) WHERE value <> ?) \
                     WHERE id = ? \
                     AND EXISTS (SELECT 1 FROM json_each({table}.shared_locks) WHERE value = ?)"
                );
                query(&stmt)
                    .bind(flight_id)
                    .bind(id.to_string())
                    .bind(flight_id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            MetadataCatalog::Postgres(pool) => {
                let stmt = format!(
                    "UPDATE {table} SET shared_locks = ARRAY_REMOVE(shared_locks, $1::text) \
                     WHERE id = $2 AND $1::text = ANY(shared_locks)"
                );
                query(&stmt)
                    .bind(flight_id)
                    .bind(id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };
        if updated == 0 {
            log::debug!("Flight {flight_id} held no shared lock on {resource} {id}");
        }
        Ok(updated > 0)
    }

    pub async fn lock_state(&self, resource: LockableResource, id: Uuid) -> Result<ResourceLocks> {
        let table = resource.table();
        match self {
            MetadataCatalog::Sqlite(pool) => {
                let stmt =
                    format!("SELECT exclusive_lock, shared_locks FROM {table} WHERE id = ?");
                let row = query(&stmt)
                    .bind(id.to_string())
                    .fetch_optional(pool)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("{resource} {id} not found")))?;
                let shared: String = row.try_get("shared_locks")?;
                Ok(ResourceLocks {
                    exclusive: row.try_get("exclusive_lock")?,
                    shared: decode_shared_locks(&shared)?,
                })
            }
            MetadataCatalog::Postgres(pool) => {
                let stmt =
                    format!("SELECT exclusive_lock, shared_locks FROM {table} WHERE id = $1");
                let row = query(&stmt)
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("{resource} {id} not found")))?;
                Ok(ResourceLocks {
                    exclusive: row.try_get("exclusive_lock")?,
                    shared: row.try_get("shared_locks")?,
                })
            }
        }
    }

    /// Explain why a conditional lock update matched no row.
    async fn lock_failure(&self, resource: LockableResource, id: Uuid, mode: LockMode) -> Error {
        match self.lock_state(resource, id).await {
            Ok(locks) => {
                let holders = match &locks.exclusive {
                    Some(holder) => format!("exclusively locked by flight {holder}"),
                    None => format!("shared-locked by {} flight(s)", locks.shared.len()),
                };
                let mode = match mode {
                    LockMode::Exclusive => "exclusive",
                    LockMode::Shared => "shared",
                };
                log::info!("Cannot take {mode} lock on {resource} {id}: {holders}");
                Error::conflict(format!("{resource} {id} is {holders}"))
            }
            Err(e) => e,
        }
    }
}
