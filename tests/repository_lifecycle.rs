use std::sync::Arc;

use async_trait::async_trait;
use common::testing::TestConfigBuilder;
use common::{Error, ErrorKind, FlightContext, FlightInput, Result, StepResult};
use filesystem::{FileMetadata, FileMetadataSource};
use flights::definitions::{self, Flight};
use flights::{Services, keys};
use metadata::LockableResource;
use serde_json::json;
use uuid::Uuid;

async fn run(flight: Flight, flight_id: &str, input: FlightInput) -> Result<FlightContext> {
    let mut context = FlightContext::new(flight_id, input.build());
    for (index, step) in flight.iter().enumerate() {
        let mut result = step.do_step(&mut context).await;
        for _ in 0..3 {
            if !result.is_retryable() {
                break;
            }
            result = step.do_step(&mut context).await;
        }
        if let StepResult::RetryableFailure(e) = result {
            result = StepResult::FatalFailure(e);
        }
        if let StepResult::FatalFailure(e) = result {
            for done in flight[..=index].iter().rev() {
                assert!(done.undo_step(&mut context).await.is_success());
            }
            return Err(e);
        }
    }
    Ok(context)
}

struct Sizes;

#[async_trait]
impl FileMetadataSource for Sizes {
    async fn file_metadata(&self, _dataset_id: &str, file_id: &str) -> Result<FileMetadata> {
        let size = match file_id {
            "reads-1" => 100,
            "reads-2" => 250,
            "notes" => 7,
            other => return Err(Error::not_found(format!("no blob for {other}"))),
        };
        Ok(FileMetadata {
            size,
            checksum_crc32c: format!("{size:x}"),
            checksum_md5: None,
        })
    }
}

#[tokio::test]
async fn test_dataset_lifecycle() {
    let config = TestConfigBuilder::new().in_memory().with_batch_size(2).build();
    let services = Services::open(&config).await.unwrap();
    let dataset_id = Uuid::new_v4();
    let ds = dataset_id.to_string();

    run(
        definitions::create_dataset(&services),
        "create",
        FlightInput::new()
            .with(keys::DATASET_ID, dataset_id)
            .with(keys::DATASET_NAME, "cohort"),
    )
    .await
    .unwrap();

    for (file_id, target) in [
        ("reads-1", "/run-1/lane-1/reads.fastq"),
        ("reads-2", "/run-1/lane-2/reads.fastq"),
        ("notes", "/README"),
    ] {
        run(
            definitions::ingest_file(&services),
            &format!("ingest-{file_id}"),
            FlightInput::new()
                .with(keys::DATASET_ID, dataset_id)
                .with(keys::FILE_ID, file_id)
                .with(keys::TARGET_PATH, target)
                .with(keys::LOAD_TAG, "batch-1"),
        )
        .await
        .unwrap();
    }

    let lanes = services
        .directory
        .enumerate_directory(&ds, "/run-1")
        .await
        .unwrap();
    let names: Vec<_> = lanes.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["lane-1", "lane-2"]);

    let snapshot_id = Uuid::new_v4();
    let context = run(
        definitions::create_snapshot(&services, Arc::new(Sizes)),
        "snapshot",
        FlightInput::new()
            .with(keys::DATASET_ID, dataset_id)
            .with(keys::DATASET_NAME, "cohort")
            .with(keys::SNAPSHOT_ID, snapshot_id)
            .with(keys::SNAPSHOT_NAME, "v1")
            .with(keys::FILE_IDS, json!(["reads-1", "reads-2"])),
    )
    .await
    .unwrap();
    assert_eq!(context.working::<u64>(keys::SNAPSHOT_SIZE).unwrap(), Some(350));

    let delete_reads = || {
        FlightInput::new()
            .with(keys::DATASET_ID, dataset_id)
            .with(keys::FILE_ID, "reads-1")
    };
    let err = run(definitions::delete_file(&services), "rm-1", delete_reads())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    run(
        definitions::delete_snapshot(&services),
        "drop-snapshot",
        FlightInput::new()
            .with(keys::DATASET_ID, dataset_id)
            .with(keys::SNAPSHOT_ID, snapshot_id),
    )
    .await
    .unwrap();

    run(definitions::delete_file(&services), "rm-2", delete_reads())
        .await
        .unwrap();
    assert!(
        services
            .directory
            .retrieve_by_path(&ds, "/run-1/lane-1")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        services
            .directory
            .retrieve_by_path(&ds, "/run-1/lane-2/reads.fastq")
            .await
            .unwrap()
            .is_some()
    );

    run(
        definitions::delete_dataset(&services),
        "drop-dataset",
        FlightInput::new().with(keys::DATASET_ID, dataset_id),
    )
    .await
    .unwrap();
    assert!(services.directory.retrieve_by_path(&ds, "/").await.unwrap().is_none());
    let summary = services
        .catalog
        .retrieve_summary(LockableResource::Dataset, dataset_id)
        .await;
    assert!(summary.unwrap_err().is_not_found());
}
