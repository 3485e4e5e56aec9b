//! The large-file upload pipeline.
//!
//! ```text
//! UploadOrchestrator::upload(request, disconnected)
//!   ├─ Validating:      SizePolicy::check(declared_size)      // no network before this passes
//!   ├─ ResolvingBucket: BucketResolver::resolve(resource_id)  // retried: RetryPolicy::execute
//!   │                     └─ links.bucket, or MissingBucket
//!   ├─ Transferring:
//!   │    ├─ UploadExecutor::start() ──► spawned task:
//!   │    │                                ├─ acquire pool permit (or give up if cancelled)
//!   │    │                                └─ RetryPolicy::execute_cancellable(PUT bucket/file)
//!   │    └─ CancellationMonitor::watch()  // polls `disconnected` every interval
//!   │         └─ on disconnect ──► TransferHandle cancel ──► Cancelled (499)
//!   └─ Reconciling:     BucketResolver::resolve(resource_id)  // failure → partial success
//! ```
//!
//! Every failure is an [`UploadError`] whose [`FailureClass`] decides whether it is retried.

mod content;
mod error;
mod executor;
mod monitor;
mod orchestrator;
mod resolver;
mod retry;
mod size;


pub use content::{Spool, UploadContent};
pub use error::{Classify, FailureClass, Interrupted, UploadError, classify_transport};
pub use executor::{BucketTransport, TransferCanceller, TransferHandle, UploadExecutor};
pub use monitor::{CancellationMonitor, ClientConnection, WatchOutcome};
pub use orchestrator::{Reconciled, TransferOutcome, UploadOrchestrator, UploadPhase, UploadRequest};
pub use resolver::{ArchiveResolver, BucketResolver, bucket_url};
pub use retry::RetryPolicy;
pub use size::{SizePolicy, format_bytes};
