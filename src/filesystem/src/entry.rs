use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{Error, Result};

use crate::path;
use crate::store::Document;

/// One node of a namespace: a directory or a file reference.
///
/// `path` is the directory that contains the entry, so the full path is
/// `path` joined with `name`. The root has an empty path and an empty name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub file_id: String,
    pub is_file_ref: bool,
    pub path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_created_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_crc32c: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl DirectoryEntry {
    /// A file reference at `full_path`.
    pub fn file(file_id: &str, full_path: &str, dataset_id: &str, load_tag: &str) -> Self {
        let full_path = path::normalize(full_path);
        Self {
            file_id: file_id.to_string(),
            is_file_ref: true,
            path: path::parent(&full_path).unwrap_or_default(),
            name: path::name(&full_path).to_string(),
            dataset_id: Some(dataset_id.to_string()),
            load_tag: Some(load_tag.to_string()),
            file_created_date: None,
            checksum_crc32c: None,
            checksum_md5: None,
            size: None,
        }
    }

    /// A directory at `full_path` with a fresh id. `"/"` yields the root.
    pub fn directory(full_path: &str) -> Self {
        let full_path = path::normalize(full_path);
        Self {
            file_id: Uuid::new_v4().to_string(),
            is_file_ref: false,
            path: path::parent(&full_path).unwrap_or_default(),
            name: path::name(&full_path).to_string(),
            dataset_id: None,
            load_tag: None,
            file_created_date: Some(Utc::now().to_rfc3339()),
            checksum_crc32c: None,
            checksum_md5: None,
            size: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty() && self.name.is_empty()
    }

    pub fn full_path(&self) -> String {
        path::join(&self.path, &self.name)
    }

    /// Document id under which this entry is stored.
    pub fn lookup_path(&self) -> String {
        path::lookup_path(&self.full_path())
    }

    pub fn to_document(&self) -> Result<Document> {
        Ok(Document::new(self.lookup_path(), serde_json::to_value(self)?))
    }

    pub fn from_document(doc: Document) -> Result<Self> {
        let id = doc.id;
        serde_json::from_value(doc.data)
            .map_err(|e| Error::corruption(format!("directory entry '{id}' is undecodable: {e}")))
    }
}
