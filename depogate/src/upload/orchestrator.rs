use std::fmt;
use std::sync::Arc;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::content::UploadContent;
use super::error::UploadError;
use super::executor::UploadExecutor;
use super::monitor::{CancellationMonitor, WatchOutcome};
use super::resolver::{BucketResolver, bucket_url};
use super::size::SizePolicy;
use crate::api::models::depositions::{ResourceDescriptor, UploadResponse};

/// One file bound for one deposition.
#[derive(Debug)]
pub struct UploadRequest {
    pub resource_id: u64,
    pub file_name: String,
    /// Known before anything is sent; checked against the ceiling
    pub declared_size: u64,
    pub content: UploadContent,
}

/// The deposition after a successful transfer.
#[derive(Debug)]
pub enum Reconciled {
    /// Re-fetched after the transfer
    Full(ResourceDescriptor),
    /// The file landed but the re-fetch failed; only the bucket's answer is known
    Partial { file: UploadResponse, reason: UploadError },
}

/// Exactly one of these is produced per upload.
#[derive(Debug)]
pub enum TransferOutcome {
    Completed(Reconciled),
    /// The client went away mid-transfer
    Cancelled,
    Failed(UploadError),
}

impl TransferOutcome {
    fn label(&self) -> &'static str {
        match self {
            TransferOutcome::Completed(Reconciled::Full(_)) => "completed",
            TransferOutcome::Completed(Reconciled::Partial { .. }) => "partial",
            TransferOutcome::Cancelled => "cancelled",
            TransferOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Validating,
    ResolvingBucket,
    Transferring,
    Reconciling,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadPhase::Validating => "validating",
            UploadPhase::ResolvingBucket => "resolving_bucket",
            UploadPhase::Transferring => "transferring",
            UploadPhase::Reconciling => "reconciling",
        })
    }
}

/// Drives a single upload from size check to reconciled deposition.
pub struct UploadOrchestrator {
    resolver: Arc<dyn BucketResolver>,
    executor: UploadExecutor,
    size_policy: SizePolicy,
    monitor: CancellationMonitor,
}

impl UploadOrchestrator {
    pub fn new(
        resolver: Arc<dyn BucketResolver>,
        executor: UploadExecutor,
        size_policy: SizePolicy,
        monitor: CancellationMonitor,
    ) -> Self {
        Self {
            resolver,
            executor,
            size_policy,
            monitor,
        }
    }

    pub fn size_policy(&self) -> SizePolicy {
        self.size_policy
    }

    /// Run the upload. `disconnected` is polled while the transfer is in flight; once it
    /// returns `true` the transfer is cancelled and the outcome is `Cancelled`.
    #[instrument(skip_all, fields(resource_id = request.resource_id, file_name = %request.file_name, size = request.declared_size))]
    pub async fn upload<P>(&self, request: UploadRequest, disconnected: P) -> TransferOutcome
    where
        P: Fn() -> bool + Send,
    {
        let outcome = self.run(request, disconnected).await;

        match &outcome {
            TransferOutcome::Completed(Reconciled::Full(descriptor)) => {
                tracing::info!(files = descriptor.files.len(), "Upload completed");
            }
            TransferOutcome::Completed(Reconciled::Partial { reason, .. }) => {
                tracing::warn!(error = %reason, "Upload completed but the deposition could not be re-fetched");
            }
            TransferOutcome::Cancelled => tracing::info!("Upload cancelled by client disconnect"),
            TransferOutcome::Failed(err) => tracing::warn!(kind = err.kind(), error = %err, "Upload failed"),
        }
        counter!("depogate_uploads_total", "outcome" => outcome.label()).increment(1);

        outcome
    }

    async fn run<P>(&self, request: UploadRequest, disconnected: P) -> TransferOutcome
    where
        P: Fn() -> bool + Send,
    {
        let UploadRequest {
            resource_id,
            file_name,
            declared_size,
            content,
        } = request;

        tracing::debug!(phase = %UploadPhase::Validating, "Checking declared size");
        if let Err(err) = self.size_policy.check(declared_size) {
            return TransferOutcome::Failed(err);
        }

        tracing::debug!(phase = %UploadPhase::ResolvingBucket, "Fetching deposition");
        let bucket = match self.resolver.resolve(resource_id).await.and_then(|d| bucket_url(&d)) {
            Ok(bucket) => bucket,
            Err(err) => return TransferOutcome::Failed(err),
        };

        tracing::debug!(phase = %UploadPhase::Transferring, bucket = %bucket, "Starting transfer");
        let handle = self.executor.start(bucket, file_name, Arc::new(content));
        let canceller = handle.canceller();
        let settled = CancellationToken::new();

        let transfer = async {
            let result = handle.join().await;
            settled.cancel();
            result
        };
        let watch = self.monitor.watch(disconnected, settled.clone(), move || canceller.cancel());
        let (result, watched) = tokio::join!(transfer, watch);

        // A client that is gone gets no reconciliation, even if the last bytes made it
        if watched == WatchOutcome::Disconnected {
            return TransferOutcome::Cancelled;
        }
        let file = match result {
            Ok(file) => file,
            Err(UploadError::Cancelled) => return TransferOutcome::Cancelled,
            Err(err) => return TransferOutcome::Failed(err),
        };
        counter!("depogate_upload_bytes_total").increment(declared_size);

        tracing::debug!(phase = %UploadPhase::Reconciling, "Re-fetching deposition");
        match self.resolver.resolve(resource_id).await {
            Ok(descriptor) => TransferOutcome::Completed(Reconciled::Full(descriptor)),
            Err(reason) => TransferOutcome::Completed(Reconciled::Partial { file, reason }),
        }
    }
}
