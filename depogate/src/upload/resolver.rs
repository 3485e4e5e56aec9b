//! Fetching the deposition that an upload targets.

use async_trait::async_trait;
use url::Url;

use super::error::UploadError;
use super::retry::RetryPolicy;
use crate::api::models::depositions::ResourceDescriptor;
use crate::clients::ArchiveClient;

/// Source of fresh deposition snapshots.
///
/// Called twice per upload: once for the bucket link, once afterwards for the updated file
/// list. Implementations must not cache between calls.
#[async_trait]
pub trait BucketResolver: Send + Sync {
    async fn resolve(&self, resource_id: u64) -> Result<ResourceDescriptor, UploadError>;
}

/// Extract the bucket link from a snapshot, failing if the deposition has none.
pub fn bucket_url(descriptor: &ResourceDescriptor) -> Result<Url, UploadError> {
    descriptor.bucket_url().cloned().ok_or(UploadError::MissingBucket {
        resource_id: descriptor.id,
    })
}

/// Resolves depositions through the archive client, retrying transient failures.
pub struct ArchiveResolver {
    client: ArchiveClient,
    retry: RetryPolicy,
}

impl ArchiveResolver {
    pub fn new(client: ArchiveClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }
}

#[async_trait]
impl BucketResolver for ArchiveResolver {
    async fn resolve(&self, resource_id: u64) -> Result<ResourceDescriptor, UploadError> {
        self.retry
            .execute("deposition fetch", || self.client.fetch_deposition(resource_id))
            .await
    }
}
