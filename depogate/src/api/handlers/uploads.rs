use axum::{
    Json,
    extract::{Multipart, Query, State, multipart::Field, rejection::QueryRejection},
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::AppState;
use crate::api::models::depositions::{PartialUpload, ResourceDescriptor, UploadQuery};
use crate::auth::Authorized;
use crate::errors::{Error, ErrorBody, Result};
use crate::upload::{ClientConnection, Reconciled, SizePolicy, Spool, TransferOutcome, UploadContent, UploadError, UploadRequest};

/// Multipart field that carries the file.
const FILE_FIELD: &str = "file";

#[utoipa::path(
    post,
    path = "/upload",
    tag = "uploads",
    summary = "Upload a file to a deposition",
    description = "Stream a file into the deposition's storage bucket and return the deposition as it stands afterwards. \
                   If the transfer succeeds but the deposition cannot be re-read, the bucket's own record of the file is returned with `reconciled: false`.",
    params(UploadQuery),
    request_body(
        content_type = "multipart/form-data",
        description = "A single `file` part"
    ),
    responses(
        (status = 200, description = "File uploaded. The body is a `PartialUpload` instead when the deposition could not be re-read.", body = ResourceDescriptor),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 401, description = "Missing or rejected bearer token", body = ErrorBody),
        (status = 409, description = "Deposition has no bucket to upload into", body = ErrorBody),
        (status = 413, description = "File exceeds the size limit", body = ErrorBody),
        (status = 499, description = "Client disconnected during the transfer", body = ErrorBody),
        (status = 502, description = "Archive rejected the request", body = ErrorBody),
        (status = 503, description = "Archive unreachable after retries", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    security(("BearerAuth" = []))
)]
pub async fn upload_file(
    State(state): State<AppState>,
    _auth: Authorized,
    query: std::result::Result<Query<UploadQuery>, QueryRejection>,
    mut multipart: Multipart,
) -> Result<Response> {
    let Query(UploadQuery { resource_id }) = query.map_err(|e| Error::BadRequest { message: e.body_text() })?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {e}"),
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::BadRequest {
                message: "The file part has no filename".to_string(),
            })?;
        let content = spool_field(field, state.orchestrator.size_policy()).await?;
        upload = Some((file_name, content));
        break;
    }
    let (file_name, content) = upload.ok_or_else(|| Error::BadRequest {
        message: format!("Missing `{FILE_FIELD}` field in multipart body"),
    })?;

    let request = UploadRequest {
        resource_id,
        file_name,
        declared_size: content.len(),
        content,
    };

    // The guard stays in this future. If hyper drops us because the client went away, the
    // connection flips to disconnected and the spawned upload cancels its transfer.
    let (connection, guard) = ClientConnection::new();
    let orchestrator = state.orchestrator.clone();
    let outcome = tokio::spawn(
        async move { orchestrator.upload(request, move || connection.is_disconnected()).await }.in_current_span(),
    )
    .await
    .map_err(|e| Error::Internal {
        operation: format!("run upload task: {e}"),
    })?;
    guard.disarm();

    match outcome {
        TransferOutcome::Completed(Reconciled::Full(descriptor)) => Ok(Json(descriptor).into_response()),
        TransferOutcome::Completed(Reconciled::Partial { file, reason }) => Ok(Json(PartialUpload {
            reconciled: false,
            resource_id,
            file,
            detail: reason.to_string(),
        })
        .into_response()),
        TransferOutcome::Cancelled => Err(UploadError::Cancelled.into()),
        TransferOutcome::Failed(err) => Err(err.into()),
    }
}

/// Stream one multipart field to disk. Stops with `PayloadTooLarge` as soon as the ceiling
/// is passed, so an oversized body is never read to the end.
async fn spool_field(mut field: Field<'_>, policy: SizePolicy) -> Result<UploadContent> {
    let mut spool = Spool::create(policy).await?;
    while let Some(chunk) = field.chunk().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to read file data: {e}"),
    })? {
        spool.write_chunk(&chunk).await?;
    }
    tracing::debug!(bytes = spool.len(), "Spooled upload body");
    Ok(spool.finish().await?)
}
