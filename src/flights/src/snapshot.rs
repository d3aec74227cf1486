use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use common::{Error, FlightContext, Result, Step, StepResult};
use filesystem::{DependencyDao, DirectoryDao, FileMetadataSource, SnapshotFileSystem};

use crate::keys;

struct SnapshotInput {
    dataset_id: String,
    snapshot_id: String,
}

impl SnapshotInput {
    fn read(context: &FlightContext) -> Result<Self> {
        let dataset_id: Uuid = context.input(keys::DATASET_ID)?;
        let snapshot_id: Uuid = context.input(keys::SNAPSHOT_ID)?;
        Ok(Self {
            dataset_id: dataset_id.to_string(),
            snapshot_id: snapshot_id.to_string(),
        })
    }
}

/// Fail the flight if any requested file id is unknown in the dataset.
#[derive(Debug, Clone)]
pub struct CreateSnapshotValidateRefsStep {
    directory: DirectoryDao,
}

impl CreateSnapshotValidateRefsStep {
    pub fn new(directory: DirectoryDao) -> Self {
        Self { directory }
    }

    async fn validate(&self, context: &FlightContext) -> Result<()> {
        let dataset_id: Uuid = context.input(keys::DATASET_ID)?;
        let file_ids: Vec<String> = context.input(keys::FILE_IDS)?;
        let missing = self
            .directory
            .validate_ref_ids(&dataset_id.to_string(), &file_ids)
            .await?;
        if !missing.is_empty() {
            return Err(Error::invalid_input(format!(
                "{} file reference(s) not found in dataset {dataset_id}: {}",
                missing.len(),
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Step for CreateSnapshotValidateRefsStep {
    fn name(&self) -> &'static str {
        "CreateSnapshotValidateRefs"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.validate(context).await.into()
    }

    async fn undo_step(&self, _context: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

/// Project the requested files into the snapshot namespace and record the
/// snapshot's dependency on each of them.
#[derive(Debug, Clone)]
pub struct CreateSnapshotFileSystemStep {
    snapshots: SnapshotFileSystem,
    dependencies: DependencyDao,
}

impl CreateSnapshotFileSystemStep {
    pub fn new(snapshots: SnapshotFileSystem, dependencies: DependencyDao) -> Self {
        Self {
            snapshots,
            dependencies,
        }
    }

    async fn build(&self, context: &FlightContext) -> Result<()> {
        let input = SnapshotInput::read(context)?;
        let dataset_name: String = context.input(keys::DATASET_NAME)?;
        let file_ids: Vec<String> = context.input(keys::FILE_IDS)?;

        self.snapshots
            .add_files_to_snapshot(
                &input.dataset_id,
                &dataset_name,
                &input.snapshot_id,
                &file_ids,
            )
            .await?;
        self.dependencies
            .store_snapshot_file_dependencies(&input.dataset_id, &input.snapshot_id, &file_ids)
            .await?;
        Ok(())
    }

    async fn tear_down(&self, context: &FlightContext) -> Result<()> {
        let input = SnapshotInput::read(context)?;
        self.dependencies
            .delete_snapshot_file_dependencies(&input.dataset_id, &input.snapshot_id)
            .await?;
        self.snapshots
            .delete_files_from_snapshot(&input.snapshot_id, context.shutdown().clone())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Step for CreateSnapshotFileSystemStep {
    fn name(&self) -> &'static str {
        "CreateSnapshotFileSystem"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.build(context).await.into()
    }

    async fn undo_step(&self, context: &mut FlightContext) -> StepResult {
        crate::undo_completed(self.name(), self.tear_down(context).await)
    }
}

/// Roll sizes and checksums up the snapshot tree.
#[derive(Clone)]
pub struct CreateSnapshotComputeStep {
    snapshots: SnapshotFileSystem,
    metadata: Arc<dyn FileMetadataSource>,
}

impl std::fmt::Debug for CreateSnapshotComputeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateSnapshotComputeStep")
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}

impl CreateSnapshotComputeStep {
    pub fn new(snapshots: SnapshotFileSystem, metadata: Arc<dyn FileMetadataSource>) -> Self {
        Self {
            snapshots,
            metadata,
        }
    }

    async fn compute(&self, context: &mut FlightContext) -> Result<()> {
        let snapshot_id: Uuid = context.input(keys::SNAPSHOT_ID)?;
        let root = self
            .snapshots
            .compute_snapshot(&snapshot_id.to_string(), self.metadata.as_ref())
            .await?;
        context.put_working(keys::SNAPSHOT_SIZE, &root.size.unwrap_or_default())?;
        Ok(())
    }
}

#[async_trait]
impl Step for CreateSnapshotComputeStep {
    fn name(&self) -> &'static str {
        "CreateSnapshotCompute"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.compute(context).await.into()
    }

    async fn undo_step(&self, _context: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

/// Remove the snapshot namespace, then the dependency edges that kept its
/// files alive in the dataset.
#[derive(Debug, Clone)]
pub struct DeleteSnapshotFileSystemStep {
    snapshots: SnapshotFileSystem,
    dependencies: DependencyDao,
}

impl DeleteSnapshotFileSystemStep {
    pub fn new(snapshots: SnapshotFileSystem, dependencies: DependencyDao) -> Self {
        Self {
            snapshots,
            dependencies,
        }
    }

    async fn delete(&self, context: &FlightContext) -> Result<()> {
        let input = SnapshotInput::read(context)?;
        self.snapshots
            .delete_files_from_snapshot(&input.snapshot_id, context.shutdown().clone())
            .await?;
        self.dependencies
            .delete_snapshot_file_dependencies(&input.dataset_id, &input.snapshot_id)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Step for DeleteSnapshotFileSystemStep {
    fn name(&self) -> &'static str {
        "DeleteSnapshotFileSystem"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.delete(context).await.into()
    }

    async fn undo_step(&self, _context: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}
