//! Minimal stand-in for the orchestration engine: runs steps in order,
//! retries retryable failures a few times and undoes completed steps in
//! reverse order when the flight fails.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::testing::TestConfigBuilder;
use common::{Error, FlightContext, Result, StepResult};
use filesystem::store::MemoryDocumentStore;
use filesystem::{FileMetadata, FileMetadataSource};
use flights::Services;
use flights::definitions::Flight;
use metadata::MetadataCatalog;

const MAX_ATTEMPTS: usize = 3;

pub async fn run_flight(flight: &Flight, context: &mut FlightContext) -> Result<()> {
    for (index, step) in flight.iter().enumerate() {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match step.do_step(context).await {
                StepResult::Success => break,
                StepResult::RetryableFailure(_) if attempts < MAX_ATTEMPTS => continue,
                StepResult::RetryableFailure(e) | StepResult::FatalFailure(e) => {
                    for done in flight[..=index].iter().rev() {
                        let undone = done.undo_step(context).await;
                        assert!(undone.is_success(), "undo of {} failed", done.name());
                    }
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}

pub struct Harness {
    pub services: Services,
    pub store: Arc<MemoryDocumentStore>,
}

pub async fn harness() -> Harness {
    let config = TestConfigBuilder::new()
        .in_memory()
        .with_batch_size(3)
        .build();
    let catalog = MetadataCatalog::new_in_memory().await.unwrap();
    let store = Arc::new(MemoryDocumentStore::new());
    let services = Services::with_stores(catalog, store.clone(), &config);
    Harness { services, store }
}

#[derive(Default)]
pub struct StaticMetadata {
    files: HashMap<String, FileMetadata>,
}

impl StaticMetadata {
    pub fn with(mut self, file_id: &str, size: u64, crc: &str) -> Self {
        self.files.insert(
            file_id.to_string(),
            FileMetadata {
                size,
                checksum_crc32c: crc.to_string(),
                checksum_md5: None,
            },
        );
        self
    }
}

#[async_trait]
impl FileMetadataSource for StaticMetadata {
    async fn file_metadata(&self, _dataset_id: &str, file_id: &str) -> Result<FileMetadata> {
        self.files
            .get(file_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no metadata for {file_id}")))
    }
}
