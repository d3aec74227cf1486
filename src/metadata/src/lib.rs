pub mod catalog;
pub mod lock;

pub use catalog::{LockableResource, MetadataCatalog, ResourceSummary};
pub use lock::{LockMode, ResourceLocks};
