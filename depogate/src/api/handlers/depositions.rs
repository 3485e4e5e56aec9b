//! Deposition pass-through. Each route is one call on [`crate::clients::ArchiveClient`];
//! archive errors come back as 502 with the archive's message, transport failures as 503.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::AppState;
use crate::api::models::depositions::ResourceDescriptor;
use crate::auth::Authorized;
use crate::errors::{ErrorBody, Result};

#[utoipa::path(
    post,
    path = "/depositions",
    tag = "depositions",
    summary = "Create deposition",
    description = "Create an empty dataset deposition filed under the configured community.",
    responses(
        (status = 201, description = "Deposition created", body = ResourceDescriptor),
        (status = 401, description = "Missing or rejected bearer token", body = ErrorBody),
        (status = 502, description = "Archive rejected the request", body = ErrorBody),
        (status = 503, description = "Archive unreachable", body = ErrorBody)
    ),
    security(("BearerAuth" = []))
)]
pub async fn create_deposition(
    State(state): State<AppState>,
    _auth: Authorized,
) -> Result<(StatusCode, Json<ResourceDescriptor>)> {
    let descriptor = state.archive.create_deposition().await?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

#[utoipa::path(
    get,
    path = "/depositions/{id}",
    tag = "depositions",
    summary = "Get deposition",
    params(("id" = u64, Path, description = "Deposition ID")),
    responses(
        (status = 200, description = "Deposition", body = ResourceDescriptor),
        (status = 401, description = "Missing or rejected bearer token", body = ErrorBody),
        (status = 502, description = "Archive rejected the request", body = ErrorBody),
        (status = 503, description = "Archive unreachable after retries", body = ErrorBody)
    ),
    security(("BearerAuth" = []))
)]
pub async fn get_deposition(
    State(state): State<AppState>,
    _auth: Authorized,
    Path(id): Path<u64>,
) -> Result<Json<ResourceDescriptor>> {
    let descriptor = state
        .config
        .upload
        .retry
        .execute("deposition fetch", || state.archive.fetch_deposition(id))
        .await?;
    Ok(Json(descriptor))
}

#[utoipa::path(
    put,
    path = "/depositions/{id}",
    tag = "depositions",
    summary = "Update deposition",
    description = "Forward the body unchanged to the archive, e.g. `{\"metadata\": {...}}`.",
    params(("id" = u64, Path, description = "Deposition ID")),
    request_body(content = Object, description = "Deposition fields to update", content_type = "application/json"),
    responses(
        (status = 200, description = "Deposition updated", body = ResourceDescriptor),
        (status = 401, description = "Missing or rejected bearer token", body = ErrorBody),
        (status = 502, description = "Archive rejected the update", body = ErrorBody),
        (status = 503, description = "Archive unreachable", body = ErrorBody)
    ),
    security(("BearerAuth" = []))
)]
pub async fn update_deposition(
    State(state): State<AppState>,
    _auth: Authorized,
    Path(id): Path<u64>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ResourceDescriptor>> {
    let descriptor = state.archive.update_deposition(id, &body).await?;
    Ok(Json(descriptor))
}

#[utoipa::path(
    post,
    path = "/depositions/{id}/versions",
    tag = "depositions",
    summary = "Create new version",
    description = "Open a new draft version of a published deposition.",
    params(("id" = u64, Path, description = "Deposition ID")),
    responses(
        (status = 201, description = "Draft version created", body = ResourceDescriptor),
        (status = 401, description = "Missing or rejected bearer token", body = ErrorBody),
        (status = 502, description = "Archive rejected the request", body = ErrorBody),
        (status = 503, description = "Archive unreachable", body = ErrorBody)
    ),
    security(("BearerAuth" = []))
)]
pub async fn create_version(
    State(state): State<AppState>,
    _auth: Authorized,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<ResourceDescriptor>)> {
    let descriptor = state.archive.new_version(id).await?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}
