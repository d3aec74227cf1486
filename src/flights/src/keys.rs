//! Names of flight input parameters and working-map entries.

pub const DATASET_ID: &str = "datasetId";
pub const DATASET_NAME: &str = "datasetName";
pub const SNAPSHOT_ID: &str = "snapshotId";
pub const SNAPSHOT_NAME: &str = "snapshotName";
pub const FILE_ID: &str = "fileId";
pub const FILE_IDS: &str = "fileIds";
pub const TARGET_PATH: &str = "targetPath";
pub const LOAD_TAG: &str = "loadTag";

/// Working map: what the ingest step did with the directory entry.
pub const INGEST_ACTION: &str = "ingestDirectoryAction";
/// Working map: full path of the entry being deleted.
pub const DELETED_PATH: &str = "deletedPath";
/// Working map: total size computed for a snapshot.
pub const SNAPSHOT_SIZE: &str = "snapshotSize";
