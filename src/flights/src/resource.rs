use async_trait::async_trait;
use uuid::Uuid;

use common::{Error, FlightContext, Result, Step, StepResult};
use metadata::{LockableResource, MetadataCatalog};

use crate::keys;

/// Row-level operations shared by the dataset and snapshot metadata steps.
#[derive(Debug, Clone)]
struct ResourceRow {
    catalog: MetadataCatalog,
    resource: LockableResource,
}

impl ResourceRow {
    fn id(&self, context: &FlightContext) -> Result<Uuid> {
        match self.resource {
            LockableResource::Dataset => context.input(keys::DATASET_ID),
            LockableResource::Snapshot => context.input(keys::SNAPSHOT_ID),
        }
    }

    fn name(&self, context: &FlightContext) -> Result<String> {
        match self.resource {
            LockableResource::Dataset => context.input(keys::DATASET_NAME),
            LockableResource::Snapshot => context.input(keys::SNAPSHOT_NAME),
        }
    }

    async fn create(&self, context: &FlightContext) -> Result<()> {
        let id = self.id(context)?;
        let name = self.name(context)?;
        self.catalog
            .create_and_lock(self.resource, id, &name, context.flight_id())
            .await
    }

    /// Undo of create: only removes a row this flight still holds.
    async fn remove(&self, context: &FlightContext) -> Result<()> {
        let id = self.id(context)?;
        self.catalog
            .delete_locked(self.resource, id, context.flight_id())
            .await?;
        Ok(())
    }

    async fn delete(&self, context: &FlightContext) -> Result<()> {
        let id = self.id(context)?;
        if self
            .catalog
            .delete_locked(self.resource, id, context.flight_id())
            .await?
        {
            return Ok(());
        }
        match self.catalog.retrieve_summary(self.resource, id).await {
            // deleted by an earlier attempt of this step
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
            Ok(_) => Err(Error::fatal(format!(
                "{} {id} is not exclusively locked by flight {}",
                self.resource,
                context.flight_id()
            ))),
        }
    }
}

/// Insert the dataset row, locked exclusively by this flight.
#[derive(Debug, Clone)]
pub struct CreateDatasetMetadataStep {
    row: ResourceRow,
}

impl CreateDatasetMetadataStep {
    pub fn new(catalog: MetadataCatalog) -> Self {
        Self {
            row: ResourceRow {
                catalog,
                resource: LockableResource::Dataset,
            },
        }
    }
}

#[async_trait]
impl Step for CreateDatasetMetadataStep {
    fn name(&self) -> &'static str {
        "CreateDatasetMetadata"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.row.create(context).await.into()
    }

    async fn undo_step(&self, context: &mut FlightContext) -> StepResult {
        crate::undo_completed(self.name(), self.row.remove(context).await)
    }
}

/// Delete the dataset row; the flight must hold its exclusive lock.
#[derive(Debug, Clone)]
pub struct DeleteDatasetMetadataStep {
    row: ResourceRow,
}

impl DeleteDatasetMetadataStep {
    pub fn new(catalog: MetadataCatalog) -> Self {
        Self {
            row: ResourceRow {
                catalog,
                resource: LockableResource::Dataset,
            },
        }
    }
}

#[async_trait]
impl Step for DeleteDatasetMetadataStep {
    fn name(&self) -> &'static str {
        "DeleteDatasetMetadata"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.row.delete(context).await.into()
    }

    async fn undo_step(&self, context: &mut FlightContext) -> StepResult {
        log::warn!(
            "Flight {} cannot restore a deleted dataset row",
            context.flight_id()
        );
        StepResult::Success
    }
}

/// Insert the snapshot row, locked exclusively by this flight.
#[derive(Debug, Clone)]
pub struct CreateSnapshotMetadataStep {
    row: ResourceRow,
}

impl CreateSnapshotMetadataStep {
    pub fn new(catalog: MetadataCatalog) -> Self {
        Self {
            row: ResourceRow {
                catalog,
                resource: LockableResource::Snapshot,
            },
        }
    }
}

#[async_trait]
impl Step for CreateSnapshotMetadataStep {
    fn name(&self) -> &'static str {
        "CreateSnapshotMetadata"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.row.create(context).await.into()
    }

    async fn undo_step(&self, context: &mut FlightContext) -> StepResult {
        crate::undo_completed(self.name(), self.row.remove(context).await)
    }
}

#[derive(Debug, Clone)]
pub struct DeleteSnapshotMetadataStep {
    row: ResourceRow,
}

impl DeleteSnapshotMetadataStep {
    pub fn new(catalog: MetadataCatalog) -> Self {
        Self {
            row: ResourceRow {
                catalog,
                resource: LockableResource::Snapshot,
            },
        }
    }
}

#[async_trait]
impl Step for DeleteSnapshotMetadataStep {
    fn name(&self) -> &'static str {
        "DeleteSnapshotMetadata"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.row.delete(context).await.into()
    }

    async fn undo_step(&self, _context: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}
