//! The bucket transfer, run on its own task.
//!
//! [`UploadExecutor::start`] returns immediately with a [`TransferHandle`]. The transfer
//! itself runs on a spawned task behind a small semaphore, so the caller is free to watch
//! for a disconnect while bytes are moving, and a flood of uploads queues for a permit
//! instead of opening unbounded connections to the archive.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, info_span};
use url::Url;

use super::content::UploadContent;
use super::error::UploadError;
use super::retry::RetryPolicy;
use crate::api::models::depositions::UploadResponse;

/// Something that can take the bytes of one file into a bucket.
#[async_trait]
pub trait BucketTransport: Send + Sync {
    /// One attempt at a whole-body PUT. The body must be read from the start of `content`.
    async fn put(&self, bucket_url: &Url, file_name: &str, content: &UploadContent) -> Result<UploadResponse, UploadError>;
}

#[derive(Clone)]
pub struct UploadExecutor {
    transport: Arc<dyn BucketTransport>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl UploadExecutor {
    pub fn new(transport: Arc<dyn BucketTransport>, retry: RetryPolicy, max_concurrent_transfers: usize) -> Self {
        Self {
            transport,
            retry,
            permits: Arc::new(Semaphore::new(max_concurrent_transfers.max(1))),
        }
    }

    /// Spawn the transfer of `content` to `{bucket_url}/{file_name}`.
    ///
    /// Transient failures are retried with the executor's policy. Once the returned handle
    /// is cancelled (or dropped) no new attempt starts, a queued transfer gives up its place,
    /// and an in-flight attempt is abandoned. Bytes already sent are not recalled.
    pub fn start(&self, bucket_url: Url, file_name: String, content: Arc<UploadContent>) -> TransferHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let transport = self.transport.clone();
        let retry = self.retry.clone();
        let permits = self.permits.clone();

        let span = info_span!("transfer", bucket = %bucket_url, file_name = %file_name, size = content.len());
        let task = tokio::spawn(
            async move {
                let _permit = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => {
                        tracing::debug!("Transfer cancelled while waiting for a free slot");
                        return Err(UploadError::Cancelled);
                    }
                    permit = permits.acquire_owned() => {
                        permit.map_err(|_| anyhow::anyhow!("transfer pool has been shut down"))?
                    }
                };

                tracing::debug!("Transfer started");
                retry
                    .execute_cancellable("bucket upload", &task_token, || {
                        transport.put(&bucket_url, &file_name, &content)
                    })
                    .await
            }
            .instrument(span),
        );

        TransferHandle {
            task,
            guard: token.clone().drop_guard(),
            token,
        }
    }
}

/// Owner's view of a running transfer. Dropping the handle cancels the transfer.
pub struct TransferHandle {
    task: JoinHandle<Result<UploadResponse, UploadError>>,
    token: CancellationToken,
    guard: DropGuard,
}

impl TransferHandle {
    /// Ask the transfer to stop. Returns without waiting for it to do so.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A detached cancel switch for this transfer, for handing to a watcher.
    pub fn canceller(&self) -> TransferCanceller {
        TransferCanceller(self.token.clone())
    }

    /// Wait for the transfer to finish. Resolves to `Cancelled` if it was stopped.
    pub async fn join(self) -> Result<UploadResponse, UploadError> {
        let TransferHandle { task, guard, .. } = self;
        let result = match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(UploadError::Cancelled),
            Err(e) => Err(UploadError::Unclassified(anyhow::anyhow!("transfer task panicked: {e}"))),
        };
        guard.disarm();
        result
    }
}

#[derive(Clone)]
pub struct TransferCanceller(CancellationToken);

impl TransferCanceller {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}
