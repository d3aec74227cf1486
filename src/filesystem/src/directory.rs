//! Namespace tree over the document store.
//!
//! Every entry is stored under its lookup path, so resolving a full path is a
//! point read and "create this directory unless it exists" is a single
//! insert-if-absent write. Entries are found by file id with a query.
//!
//! Ancestors are created root side first, so an interrupted create can simply
//! be run again. A delete removes the entry first and then walks upward,
//! removing each directory only while it is empty. A creator re-checks its
//! ancestors after writing and a cleanup re-checks a directory after
//! removing it, so a create racing a cascade always ends with its parents
//! in place.

use std::sync::Arc;

use common::config::FilesystemConfig;
use common::{Error, Result, ShutdownSignal};

use crate::batch::BatchIterator;
use crate::entry::DirectoryEntry;
use crate::path;
use crate::store::{DocumentStore, Query, RetryingStore};

#[derive(Debug, Clone)]
pub struct DirectoryDao {
    store: RetryingStore,
    batch_size: usize,
}

impl DirectoryDao {
    pub fn new(store: Arc<dyn DocumentStore>, config: &FilesystemConfig) -> Self {
        Self {
            store: RetryingStore::new(store, config.retry_policy()),
            batch_size: config.batch_size,
        }
    }

    fn iterate(&self, query: Query) -> BatchIterator {
        BatchIterator::new(
            self.store.inner().clone(),
            query,
            self.batch_size,
            self.store.retry_policy().clone(),
        )
    }

    /// Store `entry`, creating any missing ancestor directories first.
    pub async fn create_entry(
        &self,
        collection: &str,
        entry: DirectoryEntry,
    ) -> Result<DirectoryEntry> {
        if entry.name.is_empty() || entry.name.contains('/') {
            return Err(Error::invalid_input(format!(
                "invalid entry name '{}'",
                entry.name
            )));
        }
        let mut entry = entry;
        entry.path = path::validate(&entry.path)?;
        let full_path = entry.full_path();

        if let Some(existing) = self.retrieve_by_path(collection, &full_path).await? {
            if existing.is_file_ref != entry.is_file_ref {
                return Err(Error::invalid_input(format!(
                    "'{full_path}' already exists as a {}",
                    if existing.is_file_ref { "file" } else { "directory" }
                )));
            }
        }

        self.ensure_ancestors(collection, &entry.path).await?;
        self.store.set(collection, &entry.to_document()?).await?;
        log::debug!("Stored entry {full_path} ({}) in {collection}", entry.file_id);

        // a cascade may have removed a directory between the walk and the write
        let repaired = self.ensure_ancestors(collection, &entry.path).await?;
        if repaired > 0 {
            log::info!("Recreated {repaired} directories above {full_path} in {collection}");
        }
        Ok(entry)
    }

    /// Create the directories of `dir_path` that are missing, root side
    /// first. Returns how many were created.
    async fn ensure_ancestors(&self, collection: &str, dir_path: &str) -> Result<usize> {
        let mut missing = Vec::new();
        for dir in path::ancestors(dir_path) {
            match self.retrieve_by_path(collection, &dir).await? {
                Some(existing) if existing.is_file_ref => {
                    return Err(Error::invalid_input(format!(
                        "'{dir}' is a file, not a directory"
                    )));
                }
                Some(_) => break,
                None => missing.push(dir),
            }
        }

        let mut created = 0;
        for dir in missing.iter().rev() {
            if self
                .store_entry_if_absent(collection, &DirectoryEntry::directory(dir))
                .await?
            {
                log::debug!("Created directory {dir} in {collection}");
                created += 1;
            }
        }
        Ok(created)
    }

    /// Look up an entry by file id.
    pub async fn retrieve_by_id(
        &self,
        collection: &str,
        file_id: &str,
    ) -> Result<Option<DirectoryEntry>> {
        let query = Query::collection(collection)
            .filter("fileId", file_id)
            .limit(2);
        let mut docs = self.store.query(&query).await?;
        if docs.len() > 1 {
            return Err(Error::corruption(format!(
                "file id {file_id} resolves to more than one entry in {collection}"
            )));
        }
        docs.pop().map(DirectoryEntry::from_document).transpose()
    }

    /// Look up an entry by full path; `"/"` is the root.
    pub async fn retrieve_by_path(
        &self,
        collection: &str,
        full_path: &str,
    ) -> Result<Option<DirectoryEntry>> {
        let lookup = path::lookup_path(&path::normalize(full_path));
        self.store
            .get(collection, &lookup)
            .await?
            .map(DirectoryEntry::from_document)
            .transpose()
    }

    /// Immediate children of a directory, sorted by name.
    pub async fn enumerate_directory(
        &self,
        collection: &str,
        dir_path: &str,
    ) -> Result<Vec<DirectoryEntry>> {
        let query = Query::collection(collection)
            .filter("path", path::normalize(dir_path))
            .order_by_field("name");
        self.iterate(query)
            .collect_all()
            .await?
            .into_iter()
            .map(DirectoryEntry::from_document)
            .collect()
    }

    /// Number of entries directly under `dir_path`; `cap` only bounds the query.
    async fn child_count(&self, collection: &str, dir_path: &str, cap: usize) -> Result<usize> {
        let query = Query::collection(collection)
            .filter("path", dir_path)
            .limit(cap);
        Ok(self.store.query(&query).await?.len())
    }

    /// Delete an entry, then every ancestor directory it leaves empty.
    /// Returns `false` if no entry has that file id.
    ///
    /// The entry goes first. If the cascade is cut short, finish it with
    /// [`Self::delete_empty_ancestors`] on the entry's directory.
    pub async fn delete_entry(&self, collection: &str, file_id: &str) -> Result<bool> {
        let Some(entry) = self.retrieve_by_id(collection, file_id).await? else {
            return Ok(false);
        };
        if entry.is_root() {
            return Err(Error::invalid_input("the namespace root cannot be deleted"));
        }

        self.store.delete(collection, &entry.lookup_path()).await?;
        log::debug!(
            "Deleted entry {} ({file_id}) from {collection}",
            entry.full_path()
        );
        self.delete_empty_ancestors(collection, &entry.path).await?;
        Ok(true)
    }

    /// Remove `dir_path` and its ancestors, bottom up, for as long as each
    /// has no children at the moment it is removed. Missing directories count
    /// as empty. Stops at the root.
    ///
    /// A directory that gains a child while being removed is put back, so a
    /// concurrent `create_entry` never ends up without its parent.
    pub async fn delete_empty_ancestors(&self, collection: &str, dir_path: &str) -> Result<usize> {
        let mut removed = 0;
        for dir in path::ancestors(dir_path) {
            if dir == path::ROOT || self.child_count(collection, &dir, 1).await? > 0 {
                break;
            }
            let Some(existing) = self.retrieve_by_path(collection, &dir).await? else {
                continue;
            };
            if !self.store.delete(collection, &existing.lookup_path()).await? {
                continue;
            }
            if self.child_count(collection, &dir, 1).await? > 0 {
                self.store_entry_if_absent(collection, &existing).await?;
                log::info!(
                    "Kept directory {dir} in {collection}: a child appeared during cleanup"
                );
                break;
            }
            log::debug!("Removed empty directory {dir} from {collection}");
            removed += 1;
        }
        Ok(removed)
    }

    /// File ids from `file_ids` with no entry in the collection.
    pub async fn validate_ref_ids(
        &self,
        collection: &str,
        file_ids: &[String],
    ) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for file_id in file_ids {
            if self.retrieve_by_id(collection, file_id).await?.is_none() {
                missing.push(file_id.clone());
            }
        }
        Ok(missing)
    }

    /// Delete every document in the collection, page by page. Stops with an
    /// `Interrupted` error if shutdown is requested; running it again
    /// continues where it left off.
    pub async fn delete_entries_from_collection(
        &self,
        collection: &str,
        shutdown: ShutdownSignal,
    ) -> Result<usize> {
        let mut it = self
            .iterate(Query::collection(collection))
            .with_shutdown(shutdown);
        let mut deleted = 0;
        while let Some(page) = it.get_batch().await? {
            for doc in page {
                if self.store.delete(collection, &doc.id).await? {
                    deleted += 1;
                }
            }
        }
        log::info!("Deleted {deleted} entries from {collection}");
        Ok(deleted)
    }

    /// Copy of `entry` relocated under `prefix`; nothing is written.
    pub fn copy_entry_under_new_path(entry: &DirectoryEntry, prefix: &str) -> DirectoryEntry {
        DirectoryEntry {
            path: path::normalize(&format!("/{prefix}{}", entry.path)),
            ..entry.clone()
        }
    }

    /// Overwrite an existing entry as-is.
    pub async fn update_entry(&self, collection: &str, entry: &DirectoryEntry) -> Result<()> {
        self.store.set(collection, &entry.to_document()?).await
    }

    /// Write a prepared entry unless its path is taken. Returns whether it was written.
    pub async fn store_entry_if_absent(
        &self,
        collection: &str,
        entry: &DirectoryEntry,
    ) -> Result<bool> {
        self.store.create(collection, &entry.to_document()?).await
    }
}
