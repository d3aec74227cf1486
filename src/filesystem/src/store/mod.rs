//! Document store abstraction.
//!
//! Documents are JSON bodies addressed by `(collection, id)`. Queries support
//! string equality filters, a single ordering key (the document id or one
//! body field, ties broken by id), keyset continuation and a row limit. That
//! is exactly what the namespace and dependency code need and nothing more.

mod memory;
mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use common::config::DocumentStoreConfig;
use common::{Error, Result, RetryPolicy};

pub use memory::MemoryDocumentStore;
pub use sql::SqlDocumentStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// String value of a top-level body field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBy {
    DocumentId,
    Field(String),
}

/// Keyset position: the ordering value and id of the last document seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub value: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, String)>,
    pub order_by: OrderBy,
    pub start_after: Option<Cursor>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: OrderBy::DocumentId,
            start_after: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: &str, value: impl Into<String>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by_field(mut self, field: &str) -> Self {
        self.order_by = OrderBy::Field(field.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// The value this query orders `doc` by.
    pub fn ordering_value(&self, doc: &Document) -> String {
        match &self.order_by {
            OrderBy::DocumentId => doc.id.clone(),
            OrderBy::Field(name) => doc.field(name).unwrap_or_default().to_string(),
        }
    }

    /// Cursor positioned just after `doc`.
    pub fn cursor_after(&self, doc: &Document) -> Cursor {
        Cursor {
            value: self.ordering_value(doc),
            id: doc.id.clone(),
        }
    }

    /// Field names end up inside SQL text, so only plain identifiers pass.
    pub(crate) fn validate(&self) -> Result<()> {
        let fields = self
            .filters
            .iter()
            .map(|(field, _)| field.as_str())
            .chain(match &self.order_by {
                OrderBy::Field(name) => Some(name.as_str()),
                OrderBy::DocumentId => None,
            });
        for field in fields {
            let valid = !field.is_empty()
                && field
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(Error::invalid_input(format!(
                    "invalid document field name '{field}'"
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(Error::invalid_input("query limit must be positive"));
        }
        Ok(())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Unconditional upsert.
    async fn set(&self, collection: &str, doc: &Document) -> Result<()>;

    /// Insert if absent; `false` when a document with that id already exists.
    async fn create(&self, collection: &str, doc: &Document) -> Result<bool>;

    /// Insert-if-absent for many documents in one round trip. Returns how
    /// many were actually inserted.
    async fn create_batch(&self, collection: &str, docs: &[Document]) -> Result<usize>;

    /// `false` when nothing was deleted.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>>;
}

/// Open the backend selected by the DSN scheme.
pub async fn open(config: &DocumentStoreConfig) -> Result<Arc<dyn DocumentStore>> {
    if config.dsn.starts_with("memory:") {
        log::info!("Using in-memory document store");
        Ok(Arc::new(MemoryDocumentStore::new()))
    } else {
        Ok(Arc::new(SqlDocumentStore::new(&config.dsn).await?))
    }
}

/// A store handle whose calls are retried according to a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryingStore {
    inner: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }

    pub fn inner(&self) -> &Arc<dyn DocumentStore> {
        &self.inner
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.retry
            .run("get", || self.inner.get(collection, id))
            .await
    }

    pub async fn set(&self, collection: &str, doc: &Document) -> Result<()> {
        self.retry
            .run("set", || self.inner.set(collection, doc))
            .await
    }

    pub async fn create(&self, collection: &str, doc: &Document) -> Result<bool> {
        self.retry
            .run("create", || self.inner.create(collection, doc))
            .await
    }

    pub async fn create_batch(&self, collection: &str, docs: &[Document]) -> Result<usize> {
        self.retry
            .run("createBatch", || self.inner.create_batch(collection, docs))
            .await
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.retry
            .run("delete", || self.inner.delete(collection, id))
            .await
    }

    pub async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        self.retry.run("query", || self.inner.query(query)).await
    }
}
