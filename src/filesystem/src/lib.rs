//! Namespaces of files and directories stored as documents, plus the
//! snapshot-to-file dependency edges that protect them.

pub mod batch;
pub mod dependency;
pub mod directory;
pub mod entry;
pub mod path;
pub mod snapshot;
pub mod store;

pub use batch::BatchIterator;
pub use dependency::{DependencyDao, DependencyEdge};
pub use directory::DirectoryDao;
pub use entry::DirectoryEntry;
pub use snapshot::{FileMetadata, FileMetadataSource, SnapshotFileSystem};
pub use store::{Document, DocumentStore, MemoryDocumentStore, Query, SqlDocumentStore};
