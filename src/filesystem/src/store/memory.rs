use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use common::{Error, Result};

use super::{Document, DocumentStore, Query};

/// In-process document store.
///
/// Besides serving as the `memory://` backend it can inject failures: a
/// number of upcoming calls can be made to fail with a retryable error, and
/// writes can be cut off after a budget to simulate a worker crashing in the
/// middle of a multi-write operation.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    pending_faults: AtomicUsize,
    /// Remaining successful writes before the simulated crash; negative = unlimited.
    write_budget: AtomicI64,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            pending_faults: AtomicUsize::new(0),
            write_budget: AtomicI64::new(-1),
        }
    }

    /// Fail the next `count` calls with a retryable error.
    pub fn inject_faults(&self, count: usize) {
        self.pending_faults.store(count, Ordering::SeqCst);
    }

    /// Allow `writes` more mutations, then fail every write until [`Self::recover`].
    pub fn crash_after_writes(&self, writes: usize) {
        let writes = i64::try_from(writes).unwrap_or(i64::MAX);
        self.write_budget.store(writes, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.write_budget.store(-1, Ordering::SeqCst);
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    fn check_fault(&self) -> Result<()> {
        let injected = self
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::retryable("injected transient failure"));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        self.check_fault()?;
        let budget = self.write_budget.load(Ordering::SeqCst);
        if budget < 0 {
            return Ok(());
        }
        if budget == 0 {
            return Err(Error::fatal("simulated crash"));
        }
        self.write_budget.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn matches(query: &Query, doc: &Document) -> bool {
        query
            .filters
            .iter()
            .all(|(field, value)| doc.field(field) == Some(value.as_str()))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.check_fault()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn set(&self, collection: &str, doc: &Document) -> Result<()> {
        self.check_write()?;
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id.clone(), doc.data.clone());
        Ok(())
    }

    async fn create(&self, collection: &str, doc: &Document) -> Result<bool> {
        self.check_write()?;
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&doc.id) {
            return Ok(false);
        }
        docs.insert(doc.id.clone(), doc.data.clone());
        Ok(true)
    }

    async fn create_batch(&self, collection: &str, docs: &[Document]) -> Result<usize> {
        self.check_write()?;
        let mut collections = self.collections.write().await;
        let existing = collections.entry(collection.to_string()).or_default();
        let mut created = 0;
        for doc in docs {
            if !existing.contains_key(&doc.id) {
                existing.insert(doc.id.clone(), doc.data.clone());
                created += 1;
            }
        }
        Ok(created)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.check_write()?;
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        query.validate()?;
        self.check_fault()?;
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(String, Document)> = docs
            .iter()
            .map(|(id, data)| Document::new(id.clone(), data.clone()))
            .filter(|doc| Self::matches(query, doc))
            .map(|doc| (query.ordering_value(&doc), doc))
            .filter(|(value, doc)| match &query.start_after {
                Some(cursor) => {
                    (value.as_str(), doc.id.as_str()) > (cursor.value.as_str(), cursor.id.as_str())
                }
                None => true,
            })
            .collect();
        matched.sort_by(|(a, da), (b, db)| (a, &da.id).cmp(&(b, &db.id)));

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().take(limit).map(|(_, doc)| doc).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, name: &str, path: &str) -> Document {
        Document::new(id, json!({"name": name, "path": path}))
    }

    #[tokio::test]
    async fn test_create_is_insert_if_absent() {
        let store = MemoryDocumentStore::new();
        assert!(store.create("c", &doc("a", "x", "/")).await.unwrap());
        assert!(!store.create("c", &doc("a", "y", "/")).await.unwrap());

        let stored = store.get("c", "a").await.unwrap().unwrap();
        assert_eq!(stored.field("name"), Some("x"));
    }

    #[tokio::test]
    async fn test_query_orders_by_field_then_id() {
        let store = MemoryDocumentStore::new();
        store.set("c", &doc("3", "b", "/")).await.unwrap();
        store.set("c", &doc("1", "c", "/")).await.unwrap();
        store.set("c", &doc("2", "b", "/")).await.unwrap();
        store.set("c", &doc("4", "a", "/other")).await.unwrap();

        let query = Query::collection("c").filter("path", "/").order_by_field("name");
        let ids: Vec<String> = store
            .query(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["2", "3", "1"]);

        let page = store
            .query(&query.clone().start_after(query.cursor_after(&doc("2", "b", "/"))).limit(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "3");
    }

    #[tokio::test]
    async fn test_injected_faults_are_retryable() {
        let store = MemoryDocumentStore::new();
        store.inject_faults(1);
        let err = store.get("c", "a").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.get("c", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crash_after_writes() {
        let store = MemoryDocumentStore::new();
        store.crash_after_writes(1);
        store.set("c", &doc("a", "x", "/")).await.unwrap();
        assert!(store.set("c", &doc("b", "x", "/")).await.is_err());
        // reads keep working
        assert!(store.get("c", "a").await.unwrap().is_some());

        store.recover();
        store.set("c", &doc("b", "x", "/")).await.unwrap();
        assert_eq!(store.len("c").await, 2);
    }
}
