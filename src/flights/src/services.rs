use std::sync::Arc;

use common::Result;
use common::config::Configuration;
use filesystem::store::{self, DocumentStore};
use filesystem::{DependencyDao, DirectoryDao, SnapshotFileSystem};
use metadata::MetadataCatalog;

/// Handles shared by every step.
#[derive(Debug, Clone)]
pub struct Services {
    pub catalog: MetadataCatalog,
    pub directory: DirectoryDao,
    pub dependencies: DependencyDao,
    pub snapshots: SnapshotFileSystem,
}

impl Services {
    /// Open both stores described by `config` and ensure their schemas.
    pub async fn open(config: &Configuration) -> Result<Self> {
        let catalog = MetadataCatalog::new(&config.database.dsn).await?;
        let documents = store::open(&config.document_store).await?;
        Ok(Self::with_stores(catalog, documents, config))
    }

    pub fn with_stores(
        catalog: MetadataCatalog,
        documents: Arc<dyn DocumentStore>,
        config: &Configuration,
    ) -> Self {
        let directory = DirectoryDao::new(documents.clone(), &config.filesystem);
        Self {
            catalog,
            dependencies: DependencyDao::new(documents, &config.filesystem),
            snapshots: SnapshotFileSystem::new(directory.clone()),
            directory,
        }
    }
}
