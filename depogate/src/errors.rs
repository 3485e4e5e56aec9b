use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

use crate::upload::UploadError;

/// Non-standard status used when the caller went away before we could answer.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided, or rejected by the manuscript service
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// The manuscript service refused the token with a client error other than 401
    #[error("Token rejected with status {status}: {message}")]
    Forbidden { status: StatusCode, message: String },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// An external service could not be reached
    #[error("{service} unavailable: {detail}")]
    ServiceUnavailable { service: &'static str, detail: String },

    /// Failure in the upload pipeline or an archive call
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Stable, machine-readable tag
    pub kind: String,
    /// Human-readable message
    pub detail: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { status, .. } => *status,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Upload(err) => match err {
                UploadError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                UploadError::TransientNetwork { .. } => StatusCode::SERVICE_UNAVAILABLE,
                UploadError::RemoteApi { .. } => StatusCode::BAD_GATEWAY,
                UploadError::MissingBucket { .. } => StatusCode::CONFLICT,
                UploadError::Cancelled => {
                    StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                }
                UploadError::Unclassified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable tag for the `kind` field of the response body
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::Forbidden { .. } => "forbidden",
            Error::BadRequest { .. } => "bad_request",
            Error::ServiceUnavailable { .. } => "transient_network_failure",
            Error::Upload(err) => match err {
                UploadError::Cancelled => "client_closed_request",
                UploadError::Unclassified(_) => "internal_error",
                other => other.kind(),
            },
            Error::Internal { .. } | Error::Other(_) => "internal_error",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message, .. } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::ServiceUnavailable { service, .. } => format!("{service} is temporarily unreachable, please retry"),
            Error::Upload(err) => match err {
                UploadError::PayloadTooLarge { .. } | UploadError::MissingBucket { .. } | UploadError::Cancelled => err.to_string(),
                UploadError::TransientNetwork { operation, .. } => {
                    format!("Network failure during {operation}, please retry")
                }
                UploadError::RemoteApi { status, message } => format!("Archive responded with {status}: {message}"),
                UploadError::Unclassified(_) => "Internal server error".to_string(),
            },
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Internal { .. } | Error::Other(_) | Error::Upload(UploadError::Unclassified(_)) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::ServiceUnavailable { .. }
            | Error::Upload(UploadError::TransientNetwork { .. })
            | Error::Upload(UploadError::RemoteApi { .. }) => {
                tracing::warn!("Upstream error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::Upload(_) => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorBody {
            kind: self.kind().to_string(),
            detail: self.user_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
