use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::testing::TestConfigBuilder;
use common::{Error, ErrorKind, Result, ShutdownSignal};
use filesystem::store::MemoryDocumentStore;
use filesystem::{
    DirectoryDao, DirectoryEntry, FileMetadata, FileMetadataSource, SnapshotFileSystem,
};

const DS: &str = "dataset-1";
const SNAP: &str = "snapshot-1";

#[derive(Default)]
struct StaticMetadata {
    files: HashMap<String, FileMetadata>,
}

impl StaticMetadata {
    fn with(mut self, file_id: &str, size: u64, crc: &str, md5: Option<&str>) -> Self {
        self.files.insert(
            file_id.to_string(),
            FileMetadata {
                size,
                checksum_crc32c: crc.to_string(),
                checksum_md5: md5.map(str::to_string),
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

async fn setup() -> (SnapshotFileSystem, DirectoryDao) {
    let store = Arc::new(MemoryDocumentStore::new());
    let config = TestConfigBuilder::new().with_batch_size(2).build();
    let dao = DirectoryDao::new(store, &config.filesystem);

    for (id, p) in [
        ("f-1", "/raw/a/one.bam"),
        ("f-2", "/raw/a/two.bam"),
        ("f-3", "/raw/three.bam"),
        ("f-4", "/other/four.bam"),
    ] {
        dao.create_entry(DS, DirectoryEntry::file(id, p, DS, "load-1"))
            .await
            .unwrap();
    }
    (SnapshotFileSystem::new(dao.clone()), dao)
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_projection_preserves_directory_ids() {
    let (fs, dao) = setup().await;
    let added = fs
        .add_files_to_snapshot(DS, "mydataset", SNAP, &ids(&["f-1", "f-3"]))
        .await
        .unwrap();
    assert_eq!(added, 2);

    for (dataset_path, snapshot_path) in [
        ("/raw", "/mydataset/raw"),
        ("/raw/a", "/mydataset/raw/a"),
        ("/raw/a/one.bam", "/mydataset/raw/a/one.bam"),
    ] {
        let original = dao.retrieve_by_path(DS, dataset_path).await.unwrap().unwrap();
        let copy = dao.retrieve_by_path(SNAP, snapshot_path).await.unwrap().unwrap();
        assert_eq!(original.file_id, copy.file_id, "{snapshot_path}");
    }

    assert!(dao.retrieve_by_path(SNAP, "/mydataset").await.unwrap().is_some());
    assert!(dao.retrieve_by_path(SNAP, "/").await.unwrap().is_some());
    assert!(dao.retrieve_by_path(SNAP, "/mydataset/raw/a/two.bam").await.unwrap().is_none());
    assert!(dao.retrieve_by_path(SNAP, "/mydataset/other").await.unwrap().is_none());

    // re-running the projection adds nothing new
    let again = fs
        .add_files_to_snapshot(DS, "mydataset", SNAP, &ids(&["f-1", "f-3"]))
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_projection_rejects_directories_and_unknown_ids() {
    let (fs, dao) = setup().await;
    let dir = dao.retrieve_by_path(DS, "/raw").await.unwrap().unwrap();

    let err = fs
        .add_files_to_snapshot(DS, "mydataset", SNAP, &[dir.file_id])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = fs
        .add_files_to_snapshot(DS, "mydataset", SNAP, &ids(&["nope"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_single_file_directory_takes_the_file_size() {
    let (fs, dao) = setup().await;
    fs.add_files_to_snapshot(DS, "mydataset", SNAP, &ids(&["f-3"]))
        .await
        .unwrap();

    let metadata = StaticMetadata::default().with("f-3", 42, "ABCD", Some("0123"));
    let root = fs.compute_snapshot(SNAP, &metadata).await.unwrap();
    assert_eq!(root.size, Some(42));

    let raw = dao.retrieve_by_path(SNAP, "/mydataset/raw").await.unwrap().unwrap();
    assert_eq!(raw.size, Some(42));
    assert_eq!(
        raw.checksum_crc32c.as_deref(),
        Some(format!("{:x}", crc32c::crc32c(b"abcd")).as_str())
    );

    let file = dao.retrieve_by_path(SNAP, "/mydataset/raw/three.bam").await.unwrap().unwrap();
    assert_eq!(file.size, Some(42));
    assert_eq!(file.checksum_crc32c.as_deref(), Some("ABCD"));
}

#[tokio::test]
async fn test_rollup_is_order_independent() {
    let (fs, dao) = setup().await;
    fs.add_files_to_snapshot(DS, "mydataset", SNAP, &ids(&["f-2", "f-1", "f-3"]))
        .await
        .unwrap();

    let metadata = StaticMetadata::default()
        .with("f-1", 10, "bb", Some("m1"))
        .with("f-2", 20, "aa", None)
        .with("f-3", 5, "cc", Some("m3"));
    let root = fs.compute_snapshot(SNAP, &metadata).await.unwrap();
    assert_eq!(root.size, Some(35));

    let a = dao.retrieve_by_path(SNAP, "/mydataset/raw/a").await.unwrap().unwrap();
    assert_eq!(a.size, Some(30));
    let expected_crc = format!("{:x}", crc32c::crc32c(b"aabb"));
    assert_eq!(a.checksum_crc32c.as_deref(), Some(expected_crc.as_str()));
    // children without an md5 are skipped
    let expected_md5 = hex::encode(<md5::Md5 as md5::Digest>::digest(b"m1"));
    assert_eq!(a.checksum_md5.as_deref(), Some(expected_md5.as_str()));

    let raw = dao.retrieve_by_path(SNAP, "/mydataset/raw").await.unwrap().unwrap();
    assert_eq!(raw.size, Some(35));
    let mut parts = vec![expected_crc, "cc".to_string()];
    parts.sort();
    let expected_raw = format!("{:x}", crc32c::crc32c(parts.concat().as_bytes()));
    assert_eq!(raw.checksum_crc32c.as_deref(), Some(expected_raw.as_str()));
}

#[tokio::test]
async fn test_compute_fails_without_metadata() {
    let (fs, _) = setup().await;
    fs.add_files_to_snapshot(DS, "mydataset", SNAP, &ids(&["f-1"]))
        .await
        .unwrap();
    let err = fs
        .compute_snapshot(SNAP, &StaticMetadata::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_delete_files_from_snapshot() {
    let (fs, dao) = setup().await;
    fs.add_files_to_snapshot(DS, "mydataset", SNAP, &ids(&["f-1", "f-4"]))
        .await
        .unwrap();
    let removed = fs
        .delete_files_from_snapshot(SNAP, ShutdownSignal::never())
        .await
        .unwrap();
    // root, /mydataset, raw, raw/a, one.bam, other, four.bam
    assert_eq!(removed, 7);
    assert!(dao.retrieve_by_path(SNAP, "/").await.unwrap().is_none());
    // the dataset namespace is untouched
    assert!(dao.retrieve_by_id(DS, "f-1").await.unwrap().is_some());
}
