//! Snapshot namespaces: projection of dataset files and checksum rollup.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use md5::{Digest, Md5};

use common::{Error, Result, ShutdownSignal};

use crate::directory::DirectoryDao;
use crate::entry::DirectoryEntry;
use crate::path;

/// Size and checksums of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    pub checksum_crc32c: String,
    pub checksum_md5: Option<String>,
}

/// Source of per-file metadata, typically the dataset's file store.
#[async_trait]
pub trait FileMetadataSource: Send + Sync {
    async fn file_metadata(&self, dataset_id: &str, file_id: &str) -> Result<FileMetadata>;
}

#[derive(Debug, Clone, Default)]
struct Rollup {
    size: u64,
    crc32c: Option<String>,
    md5: Option<String>,
}

/// Combine child values: sort the lowercased values, concatenate them and
/// hash the result.
fn combine<F>(values: impl Iterator<Item = String>, hash: F) -> Option<String>
where
    F: Fn(&[u8]) -> String,
{
    let mut values: Vec<String> = values.map(|v| v.to_lowercase()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort();
    Some(hash(values.concat().as_bytes()))
}

fn crc32c_hex(bytes: &[u8]) -> String {
    format!("{:x}", crc32c::crc32c(bytes))
}

fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

#[derive(Debug, Clone)]
pub struct SnapshotFileSystem {
    directory: DirectoryDao,
}

impl SnapshotFileSystem {
    pub fn new(directory: DirectoryDao) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &DirectoryDao {
        &self.directory
    }

    /// Copy the given dataset files, and every directory above them, into
    /// the snapshot namespace under `/<dataset_name>`. Directory ids are
    /// preserved so the snapshot mirrors the dataset tree.
    pub async fn add_files_to_snapshot(
        &self,
        dataset_collection: &str,
        dataset_name: &str,
        snapshot_collection: &str,
        file_ids: &[String],
    ) -> Result<usize> {
        let top = path::validate(dataset_name)?;
        if top == path::ROOT || path::parent(&top).as_deref() != Some(path::ROOT) {
            return Err(Error::invalid_input(format!(
                "invalid dataset name '{dataset_name}'"
            )));
        }
        let dataset_name = path::name(&top).to_string();

        for dir in ["/", top.as_str()] {
            self.directory
                .store_entry_if_absent(snapshot_collection, &DirectoryEntry::directory(dir))
                .await?;
        }

        let mut projected: HashSet<String> = HashSet::new();
        let mut added = 0;
        for file_id in file_ids {
            let entry = self
                .directory
                .retrieve_by_id(dataset_collection, file_id)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("file {file_id} not found in {dataset_collection}"))
                })?;
            if !entry.is_file_ref {
                return Err(Error::invalid_input(format!(
                    "{file_id} is a directory; only files can be added to a snapshot"
                )));
            }

            // ancestors below the dataset root, root side first
            let mut dirs: Vec<String> = path::ancestors(&entry.path)
                .into_iter()
                .filter(|dir| dir != path::ROOT)
                .collect();
            dirs.reverse();

            for dir in dirs {
                if !projected.insert(dir.clone()) {
                    continue;
                }
                let source = self
                    .directory
                    .retrieve_by_path(dataset_collection, &dir)
                    .await?
                    .ok_or_else(|| {
                        Error::corruption(format!(
                            "directory {dir} is missing above file {file_id} in {dataset_collection}"
                        ))
                    })?;
                let copy = DirectoryDao::copy_entry_under_new_path(&source, &dataset_name);
                self.directory
                    .store_entry_if_absent(snapshot_collection, &copy)
                    .await?;
            }

            let copy = DirectoryDao::copy_entry_under_new_path(&entry, &dataset_name);
            if self
                .directory
                .store_entry_if_absent(snapshot_collection, &copy)
                .await?
            {
                added += 1;
            }
        }
        log::info!(
            "Added {added} files from {dataset_collection} to snapshot {snapshot_collection}"
        );
        Ok(added)
    }

    /// Fill in size and checksums for every entry of the snapshot, bottom
    /// up, and return the updated root.
    pub async fn compute_snapshot(
        &self,
        snapshot_collection: &str,
        source: &dyn FileMetadataSource,
    ) -> Result<DirectoryEntry> {
        let root = self
            .directory
            .retrieve_by_path(snapshot_collection, path::ROOT)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("snapshot {snapshot_collection} has no root directory"))
            })?;

        // breadth-first, so every directory is listed after its parent
        let mut order: Vec<DirectoryEntry> = Vec::new();
        let mut children: HashMap<String, Vec<DirectoryEntry>> = HashMap::new();
        let mut queue = VecDeque::from([root]);
        while let Some(dir) = queue.pop_front() {
            let full_path = dir.full_path();
            let listing = self
                .directory
                .enumerate_directory(snapshot_collection, &full_path)
                .await?;
            queue.extend(listing.iter().filter(|e| !e.is_file_ref).cloned());
            children.insert(full_path, listing);
            order.push(dir);
        }

        let mut rollups: HashMap<String, Rollup> = HashMap::new();
        let mut computed_root = None;
        for mut dir in order.into_iter().rev() {
            let full_path = dir.full_path();
            let mut parts = Vec::new();
            for child in children.remove(&full_path).unwrap_or_default() {
                if child.is_file_ref {
                    parts.push(self.compute_file(snapshot_collection, child, source).await?);
                } else {
                    let rollup = rollups.remove(&child.full_path()).ok_or_else(|| {
                        Error::fatal(format!("directory {} was not computed", child.full_path()))
                    })?;
                    parts.push(rollup);
                }
            }

            let rollup = Rollup {
                size: parts.iter().map(|p| p.size).sum(),
                crc32c: combine(parts.iter().filter_map(|p| p.crc32c.clone()), crc32c_hex)
                    .or_else(|| Some(crc32c_hex(b""))),
                md5: combine(parts.iter().filter_map(|p| p.md5.clone()), md5_hex),
            };
            dir.size = Some(rollup.size);
            dir.checksum_crc32c = rollup.crc32c.clone();
            dir.checksum_md5 = rollup.md5.clone();
            self.directory.update_entry(snapshot_collection, &dir).await?;

            if dir.is_root() {
                computed_root = Some(dir);
            }
            rollups.insert(full_path, rollup);
        }

        computed_root.ok_or_else(|| Error::fatal("snapshot root was not computed"))
    }

    async fn compute_file(
        &self,
        snapshot_collection: &str,
        mut file: DirectoryEntry,
        source: &dyn FileMetadataSource,
    ) -> Result<Rollup> {
        let dataset_id = file.dataset_id.clone().ok_or_else(|| {
            Error::corruption(format!("file {} has no dataset id", file.file_id))
        })?;
        let metadata = source.file_metadata(&dataset_id, &file.file_id).await?;

        file.size = Some(metadata.size);
        file.checksum_crc32c = Some(metadata.checksum_crc32c.clone());
        file.checksum_md5 = metadata.checksum_md5.clone();
        self.directory.update_entry(snapshot_collection, &file).await?;

        Ok(Rollup {
            size: metadata.size,
            crc32c: Some(metadata.checksum_crc32c),
            md5: metadata.checksum_md5,
        })
    }

    /// Remove the whole snapshot namespace.
    pub async fn delete_files_from_snapshot(
        &self,
        snapshot_collection: &str,
        shutdown: ShutdownSignal,
    ) -> Result<usize> {
        self.directory
            .delete_entries_from_collection(snapshot_collection, shutdown)
            .await
    }
}
