use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use common::config::FilesystemConfig;
use common::{Error, Result};

use crate::batch::BatchIterator;
use crate::store::{Document, DocumentStore, Query, RetryingStore};

/// A snapshot's reference to a dataset file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub dataset_id: String,
    pub snapshot_id: String,
    pub file_id: String,
}

impl DependencyEdge {
    /// One document per (snapshot, file) pair.
    pub fn document_id(snapshot_id: &str, file_id: &str) -> String {
        format!("{snapshot_id}\u{1f}{file_id}")
    }

    fn to_document(&self) -> Result<Document> {
        Ok(Document::new(
            Self::document_id(&self.snapshot_id, &self.file_id),
            serde_json::to_value(self)?,
        ))
    }
}

/// Tracks which snapshots reference which dataset files.
///
/// Edges for a dataset live in the `<datasetId>-dependencies` collection.
#[derive(Debug, Clone)]
pub struct DependencyDao {
    store: RetryingStore,
    batch_size: usize,
    snapshot_batch_size: usize,
}

impl DependencyDao {
    pub fn new(store: Arc<dyn DocumentStore>, config: &FilesystemConfig) -> Self {
        Self {
            store: RetryingStore::new(store, config.retry_policy()),
            batch_size: config.batch_size,
            snapshot_batch_size: config.snapshot_batch_size.max(1),
        }
    }

    pub fn collection_name(dataset_id: &str) -> String {
        format!("{dataset_id}-dependencies")
    }

    fn iterate(&self, query: Query) -> BatchIterator {
        BatchIterator::new(
            self.store.inner().clone(),
            query,
            self.batch_size,
            self.store.retry_policy().clone(),
        )
    }

    /// Record that `snapshot_id` references each of `file_ids`. Repeating the
    /// call, or repeating ids, never creates a second edge.
    pub async fn store_snapshot_file_dependencies(
        &self,
        dataset_id: &str,
        snapshot_id: &str,
        file_ids: &[String],
    ) -> Result<usize> {
        let collection = Self::collection_name(dataset_id);
        let unique: BTreeSet<&String> = file_ids.iter().collect();
        let docs = unique
            .into_iter()
            .map(|file_id| {
                DependencyEdge {
                    dataset_id: dataset_id.to_string(),
                    snapshot_id: snapshot_id.to_string(),
                    file_id: file_id.clone(),
                }
                .to_document()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut created = 0;
        for chunk in docs.chunks(self.snapshot_batch_size) {
            created += self.store.create_batch(&collection, chunk).await?;
        }
        log::debug!(
            "Stored {created} new dependencies of snapshot {snapshot_id} on dataset {dataset_id}"
        );
        Ok(created)
    }

    pub async fn file_has_snapshot_reference(
        &self,
        dataset_id: &str,
        file_id: &str,
    ) -> Result<bool> {
        let query = Query::collection(Self::collection_name(dataset_id))
            .filter("fileId", file_id)
            .limit(1);
        Ok(!self.store.query(&query).await?.is_empty())
    }

    pub async fn dataset_has_snapshot_reference(&self, dataset_id: &str) -> Result<bool> {
        let query = Query::collection(Self::collection_name(dataset_id)).limit(1);
        Ok(!self.store.query(&query).await?.is_empty())
    }

    /// Remove every edge of a snapshot. Safe to repeat.
    pub async fn delete_snapshot_file_dependencies(
        &self,
        dataset_id: &str,
        snapshot_id: &str,
    ) -> Result<usize> {
        let collection = Self::collection_name(dataset_id);
        let mut it = self.iterate(Query::collection(&collection).filter("snapshotId", snapshot_id));
        let mut deleted = 0;
        while let Some(page) = it.get_batch().await? {
            for doc in page {
                if self.store.delete(&collection, &doc.id).await? {
                    deleted += 1;
                }
            }
        }
        log::debug!("Deleted {deleted} dependencies of snapshot {snapshot_id}");
        Ok(deleted)
    }

    /// File ids referenced by one snapshot.
    pub async fn get_dataset_snapshot_file_ids(
        &self,
        dataset_id: &str,
        snapshot_id: &str,
    ) -> Result<Vec<String>> {
        let query =
            Query::collection(Self::collection_name(dataset_id)).filter("snapshotId", snapshot_id);
        self.iterate(query)
            .collect_all()
            .await?
            .into_iter()
            .map(|doc| {
                doc.field("fileId").map(str::to_string).ok_or_else(|| {
                    Error::corruption(format!("dependency '{}' has no file id", doc.id))
                })
            })
            .collect()
    }

    /// Snapshots holding an edge into the dataset, optionally only those
    /// referencing `file_id`.
    pub async fn get_referencing_snapshot_ids(
        &self,
        dataset_id: &str,
        file_id: Option<&str>,
    ) -> Result<BTreeSet<String>> {
        let mut query = Query::collection(Self::collection_name(dataset_id));
        if let Some(file_id) = file_id {
            query = query.filter("fileId", file_id);
        }
        let mut snapshot_ids = BTreeSet::new();
        let mut it = self.iterate(query);
        while let Some(page) = it.get_batch().await? {
            for doc in page {
                let snapshot_id = doc.field("snapshotId").ok_or_else(|| {
                    Error::corruption(format!("dependency '{}' has no snapshot id", doc.id))
                })?;
                snapshot_ids.insert(snapshot_id.to_string());
            }
        }
        Ok(snapshot_ids)
    }

    /// Remove a single edge; no-op when it does not exist.
    pub async fn remove_snapshot_file_dependency(
        &self,
        dataset_id: &str,
        snapshot_id: &str,
        file_id: &str,
    ) -> Result<bool> {
        self.store
            .delete(
                &Self::collection_name(dataset_id),
                &DependencyEdge::document_id(snapshot_id, file_id),
            )
            .await
    }
}
