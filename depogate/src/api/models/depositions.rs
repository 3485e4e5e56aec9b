//! Archive deposition types, as returned by the archival service and passed back to callers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::{IntoParams, ToSchema};

/// Snapshot of a remote deposition.
///
/// Fetched fresh before each upload (for the bucket link) and again afterwards (for the
/// file list). Never cached: the bucket link can change between two fetches.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResourceDescriptor {
    pub id: u64,
    /// Whether the deposition has been published
    #[serde(default)]
    pub submitted: bool,
    /// Files attached to the deposition, in upload order
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub links: DepositionLinks,
    /// Every other field of the archive's representation, passed through untouched
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ResourceDescriptor {
    /// The one-time upload target for this snapshot.
    pub fn bucket_url(&self) -> Option<&Url> {
        self.links.bucket.as_ref()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DepositionLinks {
    /// Storage bucket the file bytes are streamed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub bucket: Option<Url>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// What the storage bucket answers to a successful PUT.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Returned when the file landed in the bucket but the follow-up fetch of the deposition
/// failed, so the post-upload state is unknown.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PartialUpload {
    /// Always `false`
    pub reconciled: bool,
    pub resource_id: u64,
    /// The bucket's answer to the upload
    pub file: UploadResponse,
    /// Why the deposition could not be re-fetched
    pub detail: String,
}

/// Query parameters for the upload endpoint
#[derive(Debug, Deserialize, IntoParams)]
pub struct UploadQuery {
    /// Deposition to attach the file to
    #[serde(rename = "resourceId", alias = "deposition_id")]
    #[param(rename = "resourceId")]
    pub resource_id: u64,
}
