use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{Error, FlightContext, Result, Step, StepResult};
use filesystem::{DependencyDao, DirectoryDao, DirectoryEntry, path};
use metadata::{LockableResource, MetadataCatalog};

use crate::keys;

/// What the ingest step did with the target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestAction {
    /// This flight wrote the entry and owns it.
    Created,
    /// An entry from an earlier load with the same tag was reused.
    Adopted,
}

/// Refuse to delete what a snapshot still depends on. An edge whose
/// snapshot row no longer exists is corruption rather than a veto.
async fn check_snapshot_references(
    catalog: &MetadataCatalog,
    dependencies: &DependencyDao,
    dataset_id: &str,
    file_id: Option<&str>,
) -> Result<()> {
    let snapshot_ids = dependencies
        .get_referencing_snapshot_ids(dataset_id, file_id)
        .await?;
    for snapshot_id in &snapshot_ids {
        let id = Uuid::parse_str(snapshot_id).map_err(|e| {
            Error::corruption(format!(
                "dataset {dataset_id} depends on malformed snapshot id '{snapshot_id}': {e}"
            ))
        })?;
        match catalog.retrieve_summary(LockableResource::Snapshot, id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(Error::corruption(format!(
                    "dataset {dataset_id} has dependencies on snapshot {snapshot_id}, \
                     which does not exist"
                )));
            }
            Err(e) => return Err(e),
        }
    }
    if snapshot_ids.is_empty() {
        return Ok(());
    }
    let target = match file_id {
        Some(file_id) => format!("file {file_id}"),
        None => format!("dataset {dataset_id}"),
    };
    Err(Error::invalid_input(format!(
        "{target} is used by {} snapshot(s) and cannot be deleted",
        snapshot_ids.len()
    )))
}

/// Create the directory entry for a file being ingested.
///
/// The resulting file id is written to the working map under `fileId`: it is
/// the input id, or the id of an entry adopted from an earlier run with the
/// same load tag.
#[derive(Debug, Clone)]
pub struct IngestFileDirectoryStep {
    directory: DirectoryDao,
}

impl IngestFileDirectoryStep {
    pub fn new(directory: DirectoryDao) -> Self {
        Self { directory }
    }

    async fn ingest(&self, context: &mut FlightContext) -> Result<()> {
        let dataset_id: Uuid = context.input(keys::DATASET_ID)?;
        let dataset_id = dataset_id.to_string();
        let file_id: String = context.input(keys::FILE_ID)?;
        let target: String = context.input(keys::TARGET_PATH)?;
        let load_tag: String = context.input(keys::LOAD_TAG)?;
        let target = path::validate(&target)?;

        let action = match self.directory.retrieve_by_path(&dataset_id, &target).await? {
            None => {
                let entry = DirectoryEntry::file(&file_id, &target, &dataset_id, &load_tag);
                self.directory.create_entry(&dataset_id, entry).await?;
                context.put_working(keys::FILE_ID, &file_id)?;
                IngestAction::Created
            }
            Some(existing) if !existing.is_file_ref => {
                return Err(Error::invalid_input(format!(
                    "{target} is a directory in dataset {dataset_id}"
                )));
            }
            Some(existing) if existing.load_tag.as_deref() != Some(load_tag.as_str()) => {
                return Err(Error::invalid_input(format!(
                    "{target} already exists in dataset {dataset_id} from a different load"
                )));
            }
            Some(existing) if existing.file_id == file_id => {
                // an earlier attempt of this step got this far
                context.put_working(keys::FILE_ID, &file_id)?;
                IngestAction::Created
            }
            Some(existing) => {
                log::info!(
                    "Reusing {target} ({}) from load {load_tag} instead of {file_id}",
                    existing.file_id
                );
                context.put_working(keys::FILE_ID, &existing.file_id)?;
                IngestAction::Adopted
            }
        };
        context.put_working(keys::INGEST_ACTION, &action)?;
        Ok(())
    }

    async fn remove(&self, context: &FlightContext) -> Result<()> {
        if context.working::<IngestAction>(keys::INGEST_ACTION)? != Some(IngestAction::Created) {
            return Ok(());
        }
        let dataset_id: Uuid = context.input(keys::DATASET_ID)?;
        let file_id: String = context.input(keys::FILE_ID)?;
        self.directory
            .delete_entry(&dataset_id.to_string(), &file_id)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Step for IngestFileDirectoryStep {
    fn name(&self) -> &'static str {
        "IngestFileDirectory"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.ingest(context).await.into()
    }

    async fn undo_step(&self, context: &mut FlightContext) -> StepResult {
        crate::undo_completed(self.name(), self.remove(context).await)
    }
}

/// Remove a file's directory entry and any directories it leaves empty.
#[derive(Debug, Clone)]
pub struct DeleteFileDirectoryStep {
    catalog: MetadataCatalog,
    directory: DirectoryDao,
    dependencies: DependencyDao,
}

impl DeleteFileDirectoryStep {
    pub fn new(
        catalog: MetadataCatalog,
        directory: DirectoryDao,
        dependencies: DependencyDao,
    ) -> Self {
        Self {
            catalog,
            directory,
            dependencies,
        }
    }

    async fn delete(&self, context: &mut FlightContext) -> Result<()> {
        let dataset_id: Uuid = context.input(keys::DATASET_ID)?;
        let dataset_id = dataset_id.to_string();
        let file_id: String = context.input(keys::FILE_ID)?;

        check_snapshot_references(
            &self.catalog,
            &self.dependencies,
            &dataset_id,
            Some(&file_id),
        )
        .await?;

        match self.directory.retrieve_by_id(&dataset_id, &file_id).await? {
            Some(entry) => {
                context.put_working(keys::DELETED_PATH, &entry.full_path())?;
                self.directory.delete_entry(&dataset_id, &file_id).await?;
            }
            None => {
                let Some(deleted) = context.working::<String>(keys::DELETED_PATH)? else {
                    return Err(Error::not_found(format!(
                        "file {file_id} not found in dataset {dataset_id}"
                    )));
                };
                // entry already gone; make sure no empty directories stay behind
                if let Some(parent) = path::parent(&deleted) {
                    self.directory
                        .delete_empty_ancestors(&dataset_id, &parent)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Step for DeleteFileDirectoryStep {
    fn name(&self) -> &'static str {
        "DeleteFileDirectory"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.delete(context).await.into()
    }

    async fn undo_step(&self, _context: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

/// Remove every directory entry of a dataset. Refuses while any snapshot
/// still depends on one of its files.
#[derive(Debug, Clone)]
pub struct DeleteDatasetFileSystemStep {
    catalog: MetadataCatalog,
    directory: DirectoryDao,
    dependencies: DependencyDao,
}

impl DeleteDatasetFileSystemStep {
    pub fn new(
        catalog: MetadataCatalog,
        directory: DirectoryDao,
        dependencies: DependencyDao,
    ) -> Self {
        Self {
            catalog,
            directory,
            dependencies,
        }
    }

    async fn delete(&self, context: &FlightContext) -> Result<()> {
        let dataset_id: Uuid = context.input(keys::DATASET_ID)?;
        let dataset_id = dataset_id.to_string();
        check_snapshot_references(&self.catalog, &self.dependencies, &dataset_id, None).await?;
        self.directory
            .delete_entries_from_collection(&dataset_id, context.shutdown().clone())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Step for DeleteDatasetFileSystemStep {
    fn name(&self) -> &'static str {
        "DeleteDatasetFileSystem"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.delete(context).await.into()
    }

    async fn undo_step(&self, _context: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}
