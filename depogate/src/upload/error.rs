//! Failure taxonomy for the upload pipeline.

use std::error::Error as StdError;
use std::io;

use super::size::format_bytes;

/// Closed classification of every failure the pipeline can observe.
///
/// The retrier only ever looks at this, never at a transport's error type, so the retry
/// predicate is an exhaustive `match` over these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The connection dropped after it was established (reset, aborted, closed mid-message)
    ConnectionReset,
    /// The remote side accepted the connection but stopped answering
    ReadTimeout,
    /// The connection could not be established in time
    ConnectTimeout,
    /// The remote service answered with a non-success status
    RemoteApplication,
    /// The local caller asked for the work to stop
    Cancelled,
    /// Rejected locally before any network activity
    Rejected,
    /// Anything else
    Other,
}

impl FailureClass {
    /// Whether a failure of this class is worth another attempt.
    pub fn is_transient(self) -> bool {
        match self {
            FailureClass::ConnectionReset | FailureClass::ReadTimeout | FailureClass::ConnectTimeout => true,
            FailureClass::RemoteApplication | FailureClass::Cancelled | FailureClass::Rejected | FailureClass::Other => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::ConnectionReset => "connection_reset",
            FailureClass::ReadTimeout => "read_timeout",
            FailureClass::ConnectTimeout => "connect_timeout",
            FailureClass::RemoteApplication => "remote_application",
            FailureClass::Cancelled => "cancelled",
            FailureClass::Rejected => "rejected",
            FailureClass::Other => "other",
        }
    }
}

/// Anything that can be sorted into a [`FailureClass`].
pub trait Classify {
    fn failure_class(&self) -> FailureClass;
}

/// Marker produced when a cancellable operation is stopped by its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Declared size is above the configured ceiling
    #[error("{} exceeds the limit: {}", format_bytes(*declared), format_bytes(*ceiling))]
    PayloadTooLarge { declared: u64, ceiling: u64 },

    /// Connection reset or timeout talking to the archive, after retries were exhausted
    #[error("network failure ({}) talking to {operation}: {detail}", class.as_str())]
    TransientNetwork {
        class: FailureClass,
        operation: String,
        detail: String,
    },

    /// Non-success application response from the archive
    #[error("archive API error {status}: {message}")]
    RemoteApi { status: u16, message: String },

    /// The deposition exists but exposes no bucket to stream into (e.g. it is already published)
    #[error("deposition {resource_id} has no upload bucket")]
    MissingBucket { resource_id: u64 },

    /// The transfer was stopped because the client went away
    #[error("upload cancelled: client closed request")]
    Cancelled,

    /// Anything else; never shown to the caller verbatim
    #[error(transparent)]
    Unclassified(#[from] anyhow::Error),
}

impl Classify for UploadError {
    fn failure_class(&self) -> FailureClass {
        match self {
            UploadError::PayloadTooLarge { .. } => FailureClass::Rejected,
            UploadError::TransientNetwork { class, .. } => *class,
            UploadError::RemoteApi { .. } | UploadError::MissingBucket { .. } => FailureClass::RemoteApplication,
            UploadError::Cancelled => FailureClass::Cancelled,
            UploadError::Unclassified(_) => FailureClass::Other,
        }
    }
}

impl From<Interrupted> for UploadError {
    fn from(_: Interrupted) -> Self {
        UploadError::Cancelled
    }
}

impl UploadError {
    /// Stable tag used in structured error responses and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::PayloadTooLarge { .. } => "payload_too_large",
            UploadError::TransientNetwork { .. } => "transient_network_failure",
            UploadError::RemoteApi { .. } => "remote_api_error",
            UploadError::MissingBucket { .. } => "missing_bucket",
            UploadError::Cancelled => "cancelled",
            UploadError::Unclassified(_) => "unclassified",
        }
    }

    /// Wrap a transport error from a call against `operation`.
    pub fn from_transport(operation: impl Into<String>, err: reqwest::Error) -> Self {
        let operation = operation.into();
        match classify_transport(&err) {
            class if class.is_transient() => UploadError::TransientNetwork {
                class,
                operation,
                detail: err.to_string(),
            },
            _ => UploadError::Unclassified(anyhow::Error::new(err).context(format!("request to {operation} failed"))),
        }
    }
}

/// Sort a reqwest error into a [`FailureClass`].
///
/// Timeouts split on whether the connection was ever established. After that, a timed-out
/// read underneath the request is a read timeout and any other broken connection is a reset.
pub fn classify_transport(err: &reqwest::Error) -> FailureClass {
    if err.is_timeout() {
        return if err.is_connect() {
            FailureClass::ConnectTimeout
        } else {
            FailureClass::ReadTimeout
        };
    }
    if err.is_connect() {
        return FailureClass::Other;
    }
    if err.is_status() {
        return FailureClass::RemoteApplication;
    }
    if let Some(class) = io_cause_class(err) {
        return class;
    }
    if err.is_request() || err.is_body() {
        return FailureClass::ConnectionReset;
    }
    FailureClass::Other
}

/// Class of the first I/O error in the source chain, if there is one.
fn io_cause_class(err: &(dyn StdError + 'static)) -> Option<FailureClass> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::TimedOut => Some(FailureClass::ReadTimeout),
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => Some(FailureClass::ConnectionReset),
                _ => None,
            };
        }
        source = cause.source();
    }
    None
}
