//! Step lists for each flight. Lock steps bracket the work so the engine can
//! undo them in reverse order.

use std::sync::Arc;

use common::Step;
use filesystem::FileMetadataSource;
use metadata::{LockMode, LockableResource};

use crate::keys;
use crate::{
    CreateDatasetMetadataStep, CreateSnapshotComputeStep, CreateSnapshotFileSystemStep,
    CreateSnapshotMetadataStep, CreateSnapshotValidateRefsStep, DeleteDatasetFileSystemStep,
    DeleteDatasetMetadataStep, DeleteFileDirectoryStep, DeleteSnapshotFileSystemStep,
    DeleteSnapshotMetadataStep, IngestFileDirectoryStep, LockResourceStep, NotFoundPolicy,
    Services, UnlockResourceStep,
};

pub type Flight = Vec<Arc<dyn Step>>;

fn lock(
    services: &Services,
    resource: LockableResource,
    mode: LockMode,
    not_found: NotFoundPolicy,
) -> Arc<dyn Step> {
    Arc::new(LockResourceStep::new(
        services.catalog.clone(),
        resource,
        mode,
        id_key(resource),
        not_found,
    ))
}

fn unlock(services: &Services, resource: LockableResource, mode: LockMode) -> Arc<dyn Step> {
    Arc::new(UnlockResourceStep::new(
        services.catalog.clone(),
        resource,
        mode,
        id_key(resource),
    ))
}

fn id_key(resource: LockableResource) -> &'static str {
    match resource {
        LockableResource::Dataset => keys::DATASET_ID,
        LockableResource::Snapshot => keys::SNAPSHOT_ID,
    }
}

/// Inputs: `datasetId`, `datasetName`.
pub fn create_dataset(services: &Services) -> Flight {
    vec![
        Arc::new(CreateDatasetMetadataStep::new(services.catalog.clone())),
        unlock(services, LockableResource::Dataset, LockMode::Exclusive),
    ]
}

/// Inputs: `datasetId`.
pub fn delete_dataset(services: &Services) -> Flight {
    vec![
        lock(
            services,
            LockableResource::Dataset,
            LockMode::Exclusive,
            NotFoundPolicy::Ignore,
        ),
        Arc::new(DeleteDatasetFileSystemStep::new(
            services.catalog.clone(),
            services.directory.clone(),
            services.dependencies.clone(),
        )),
        Arc::new(DeleteDatasetMetadataStep::new(services.catalog.clone())),
    ]
}

/// Inputs: `datasetId`, `fileId`, `targetPath`, `loadTag`.
pub fn ingest_file(services: &Services) -> Flight {
    vec![
        lock(
            services,
            LockableResource::Dataset,
            LockMode::Shared,
            NotFoundPolicy::Fail,
        ),
        Arc::new(IngestFileDirectoryStep::new(services.directory.clone())),
        unlock(services, LockableResource::Dataset, LockMode::Shared),
    ]
}

/// Inputs: `datasetId`, `fileId`.
pub fn delete_file(services: &Services) -> Flight {
    vec![
        lock(
            services,
            LockableResource::Dataset,
            LockMode::Shared,
            NotFoundPolicy::Fail,
        ),
        Arc::new(DeleteFileDirectoryStep::new(
            services.catalog.clone(),
            services.directory.clone(),
            services.dependencies.clone(),
        )),
        unlock(services, LockableResource::Dataset, LockMode::Shared),
    ]
}

/// Inputs: `datasetId`, `datasetName`, `snapshotId`, `snapshotName`,
/// `fileIds`.
pub fn create_snapshot(services: &Services, metadata: Arc<dyn FileMetadataSource>) -> Flight {
    vec![
        lock(
            services,
            LockableResource::Dataset,
            LockMode::Shared,
            NotFoundPolicy::Fail,
        ),
        Arc::new(CreateSnapshotMetadataStep::new(services.catalog.clone())),
        Arc::new(CreateSnapshotValidateRefsStep::new(services.directory.clone())),
        Arc::new(CreateSnapshotFileSystemStep::new(
            services.snapshots.clone(),
            services.dependencies.clone(),
        )),
        Arc::new(CreateSnapshotComputeStep::new(
            services.snapshots.clone(),
            metadata,
        )),
        unlock(services, LockableResource::Snapshot, LockMode::Exclusive),
        unlock(services, LockableResource::Dataset, LockMode::Shared),
    ]
}

/// Inputs: `datasetId`, `snapshotId`.
pub fn delete_snapshot(services: &Services) -> Flight {
    vec![
        lock(
            services,
            LockableResource::Dataset,
            LockMode::Shared,
            NotFoundPolicy::Fail,
        ),
        lock(
            services,
            LockableResource::Snapshot,
            LockMode::Exclusive,
            NotFoundPolicy::Ignore,
        ),
        Arc::new(DeleteSnapshotFileSystemStep::new(
            services.snapshots.clone(),
            services.dependencies.clone(),
        )),
        Arc::new(DeleteSnapshotMetadataStep::new(services.catalog.clone())),
        unlock(services, LockableResource::Dataset, LockMode::Shared),
    ]
}
