//! Workflow steps for dataset, file and snapshot flights.
//!
//! Each step does one idempotent piece of work against the metadata catalog
//! or the document store and knows how to compensate for it. Sequencing,
//! persistence of the working map and retries belong to the orchestration
//! engine; `definitions` lists the steps of each flight in order.

pub mod definitions;
pub mod file;
pub mod keys;
pub mod lock;
pub mod resource;
pub mod services;
pub mod snapshot;

pub use file::{
    DeleteDatasetFileSystemStep, DeleteFileDirectoryStep, IngestAction, IngestFileDirectoryStep,
};
pub use lock::{LockResourceStep, NotFoundPolicy, UnlockResourceStep};
pub use resource::{
    CreateDatasetMetadataStep, CreateSnapshotMetadataStep, DeleteDatasetMetadataStep,
    DeleteSnapshotMetadataStep,
};
pub use services::Services;
pub use snapshot::{
    CreateSnapshotComputeStep, CreateSnapshotFileSystemStep, CreateSnapshotValidateRefsStep,
    DeleteSnapshotFileSystemStep,
};

use common::{Result, StepResult};

/// Undo never fails a flight: an error is logged for an operator and the
/// engine moves on to the next step.
pub(crate) fn undo_completed(step: &str, result: Result<()>) -> StepResult {
    if let Err(e) = result {
        log::error!("Undo of {step} failed: {e}");
    }
    StepResult::Success
}
