use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{PgPool, Row, SqlitePool, query};
use std::str::FromStr;

use common::{Error, Result};

use super::{Document, DocumentStore, OrderBy, Query};

/// Document store backed by a single `documents` table in SQLite or
/// PostgreSQL.
#[derive(Debug, Clone)]
pub enum SqlDocumentStore {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl SqlDocumentStore {
    /// Connect and ensure the schema exists.
    pub async fn new(dsn: &str) -> Result<Self> {
        log::info!("Connecting to document store with DSN: {dsn}");

        let store = if dsn.starts_with("sqlite:") {
            let pool = if dsn.contains(":memory:") {
                // every connection to :memory: is a separate database
                let options = SqliteConnectOptions::from_str(dsn)?;
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect_with(options)
                    .await?
            } else {
                let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);
                SqlitePool::connect_with(options).await.map_err(|e| {
                    log::error!("Failed to connect to SQLite document store '{dsn}': {e}");
                    e
                })?
            };
            SqlDocumentStore::Sqlite(pool)
        } else {
            let pool = PgPool::connect(dsn).await.map_err(|e| {
                log::error!("Failed to connect to PostgreSQL document store '{dsn}': {e}");
                e
            })?;
            SqlDocumentStore::Postgres(pool)
        };

        store.init().await.map_err(|e| {
            log::error!("Failed to initialize document store schema: {e}");
            e
        })?;
        log::info!("Document store schema initialized successfully");
        Ok(store)
    }

    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn init(&self) -> Result<()> {
        match self {
            SqlDocumentStore::Sqlite(pool) => {
                query(
                    r#"
                CREATE TABLE IF NOT EXISTS documents (
                    collection TEXT NOT NULL,
                    doc_id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    PRIMARY KEY (collection, doc_id)
                )"#,
                )
                .execute(pool)
                .await?;

                query(
                    "CREATE INDEX IF NOT EXISTS idx_documents_file_id \
                     ON documents (collection, json_extract(body, '$.fileId'))",
                )
                .execute(pool)
                .await?;

                query(
                    "CREATE INDEX IF NOT EXISTS idx_documents_path \
                     ON documents (collection, json_extract(body, '$.path'))",
                )
                .execute(pool)
                .await?;
            }
            SqlDocumentStore::Postgres(pool) => {
                // "C" collation so ordering matches byte order on every backend
                query(
                    r#"
                CREATE TABLE IF NOT EXISTS documents (
                    collection TEXT NOT NULL,
                    doc_id TEXT COLLATE "C" NOT NULL,
                    body JSONB NOT NULL,
                    PRIMARY KEY (collection, doc_id)
                )"#,
                )
                .execute(pool)
                .await?;

                query(
                    "CREATE INDEX IF NOT EXISTS idx_documents_file_id \
                     ON documents (collection, (body->>'fileId'))",
                )
                .execute(pool)
                .await?;

                query(
                    "CREATE INDEX IF NOT EXISTS idx_documents_path \
                     ON documents (collection, (body->>'path'))",
                )
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    fn field_expr(&self, field: &str) -> String {
        match self {
            SqlDocumentStore::Sqlite(_) => format!("json_extract(body, '$.{field}')"),
            SqlDocumentStore::Postgres(_) => format!("(body->>'{field}')"),
        }
    }

    fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDocumentStore::Sqlite(_) => "?".to_string(),
            SqlDocumentStore::Postgres(_) => format!("${n}"),
        }
    }

    /// Build the SELECT for a validated query and the values to bind, in order.
    fn build_select(&self, q: &Query) -> (String, Vec<String>) {
        let mut binds = vec![q.collection.clone()];
        let mut sql = format!(
            "SELECT doc_id, body FROM documents WHERE collection = {}",
            self.placeholder(1)
        );

        for (field, value) in &q.filters {
            binds.push(value.clone());
            sql.push_str(&format!(
                " AND {} = {}",
                self.field_expr(field),
                self.placeholder(binds.len())
            ));
        }

        let order_expr = match &q.order_by {
            OrderBy::DocumentId => None,
            OrderBy::Field(field) => Some(match self {
                SqlDocumentStore::Sqlite(_) => format!("COALESCE({}, '')", self.field_expr(field)),
                SqlDocumentStore::Postgres(_) => {
                    format!("COALESCE({}, '') COLLATE \"C\"", self.field_expr(field))
                }
            }),
        };

        if let Some(cursor) = &q.start_after {
            match &order_expr {
                Some(expr) => {
                    binds.push(cursor.value.clone());
                    let gt = self.placeholder(binds.len());
                    binds.push(cursor.value.clone());
                    let eq = self.placeholder(binds.len());
                    binds.push(cursor.id.clone());
                    let id = self.placeholder(binds.len());
                    sql.push_str(&format!(
                        " AND ({expr} > {gt} OR ({expr} = {eq} AND doc_id > {id}))"
                    ));
                }
                None => {
                    binds.push(cursor.id.clone());
                    sql.push_str(&format!(" AND doc_id > {}", self.placeholder(binds.len())));
                }
            }
        }

        match &order_expr {
            Some(expr) => sql.push_str(&format!(" ORDER BY {expr}, doc_id")),
            None => sql.push_str(" ORDER BY doc_id"),
        }

        if let Some(limit) = q.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        (sql, binds)
    }
}

fn decode_sqlite_body(id: &str, body: &str) -> Result<Value> {
    serde_json::from_str(body)
        .map_err(|e| Error::corruption(format!("document '{id}' has an undecodable body: {e}")))
}

#[async_trait]
impl DocumentStore for SqlDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        match self {
            SqlDocumentStore::Sqlite(pool) => {
                let row = query("SELECT body FROM documents WHERE collection = ? AND doc_id = ?")
                    .bind(collection)
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
                match row {
                    Some(row) => {
                        let body: String = row.try_get("body")?;
                        Ok(Some(Document::new(id, decode_sqlite_body(id, &body)?)))
                    }
                    None => Ok(None),
                }
            }
            SqlDocumentStore::Postgres(pool) => {
                let row = query("SELECT body FROM documents WHERE collection = $1 AND doc_id = $2")
                    .bind(collection)
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
                match row {
                    Some(row) => {
                        let Json(body): Json<Value> = row.try_get("body")?;
                        Ok(Some(Document::new(id, body)))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    async fn set(&self, collection: &str, doc: &Document) -> Result<()> {
        match self {
            SqlDocumentStore::Sqlite(pool) => {
                query(
                    "INSERT INTO documents (collection, doc_id, body) VALUES (?, ?, ?) \
                     ON CONFLICT (collection, doc_id) DO UPDATE SET body = excluded.body",
                )
                .bind(collection)
                .bind(&doc.id)
                .bind(doc.data.to_string())
                .execute(pool)
                .await?;
            }
            SqlDocumentStore::Postgres(pool) => {
                query(
                    "INSERT INTO documents (collection, doc_id, body) VALUES ($1, $2, $3) \
                     ON CONFLICT (collection, doc_id) DO UPDATE SET body = EXCLUDED.body",
                )
                .bind(collection)
                .bind(&doc.id)
                .bind(Json(&doc.data))
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn create(&self, collection: &str, doc: &Document) -> Result<bool> {
        let result = match self {
            SqlDocumentStore::Sqlite(pool) => {
                query(
                    "INSERT INTO documents (collection, doc_id, body) VALUES (?, ?, ?) \
                     ON CONFLICT (collection, doc_id) DO NOTHING",
                )
                .bind(collection)
                .bind(&doc.id)
                .bind(doc.data.to_string())
                .execute(pool)
                .await?
                .rows_affected()
            }
            SqlDocumentStore::Postgres(pool) => {
                query(
                    "INSERT INTO documents (collection, doc_id, body) VALUES ($1, $2, $3) \
                     ON CONFLICT (collection, doc_id) DO NOTHING",
                )
                .bind(collection)
                .bind(&doc.id)
                .bind(Json(&doc.data))
                .execute(pool)
                .await?
                .rows_affected()
            }
        };
        Ok(result == 1)
    }

    async fn create_batch(&self, collection: &str, docs: &[Document]) -> Result<usize> {
        let mut created = 0u64;
        match self {
            SqlDocumentStore::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for doc in docs {
                    created += query(
                        "INSERT INTO documents (collection, doc_id, body) VALUES (?, ?, ?) \
                         ON CONFLICT (collection, doc_id) DO NOTHING",
                    )
                    .bind(collection)
                    .bind(&doc.id)
                    .bind(doc.data.to_string())
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                }
                tx.commit().await?;
            }
            SqlDocumentStore::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for doc in docs {
                    created += query(
                        "INSERT INTO documents (collection, doc_id, body) VALUES ($1, $2, $3) \
                         ON CONFLICT (collection, doc_id) DO NOTHING",
                    )
                    .bind(collection)
                    .bind(&doc.id)
                    .bind(Json(&doc.data))
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                }
                tx.commit().await?;
            }
        }
        Ok(usize::try_from(created).unwrap_or(usize::MAX))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let deleted = match self {
            SqlDocumentStore::Sqlite(pool) => {
                query("DELETE FROM documents WHERE collection = ? AND doc_id = ?")
                    .bind(collection)
                    .bind(id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            SqlDocumentStore::Postgres(pool) => {
                query("DELETE FROM documents WHERE collection = $1 AND doc_id = $2")
                    .bind(collection)
                    .bind(id)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };
        Ok(deleted > 0)
    }

    async fn query(&self, q: &Query) -> Result<Vec<Document>> {
        q.validate()?;
        let (sql, binds) = self.build_select(q);
        log::trace!("Document query: {sql}");

        match self {
            SqlDocumentStore::Sqlite(pool) => {
                let mut stmt = query(&sql);
                for value in &binds {
                    stmt = stmt.bind(value);
                }
                let rows = stmt.fetch_all(pool).await?;
                rows.iter()
                    .map(|row| -> Result<Document> {
                        let id: String = row.try_get("doc_id")?;
                        let body: String = row.try_get("body")?;
                        let data = decode_sqlite_body(&id, &body)?;
                        Ok(Document::new(id, data))
                    })
                    .collect()
            }
            SqlDocumentStore::Postgres(pool) => {
                let mut stmt = query(&sql);
                for value in &binds {
                    stmt = stmt.bind(value);
                }
                let rows = stmt.fetch_all(pool).await?;
                rows.iter()
                    .map(|row| -> Result<Document> {
                        let id: String = row.try_get("doc_id")?;
                        let Json(data): Json<Value> = row.try_get("body")?;
                        Ok(Document::new(id, data))
                    })
                    .collect()
            }
        }
    }
}
