//! Request authentication.
//!
//! The gateway does not validate tokens itself. A route that takes [`Authorized`] forwards
//! the caller's `Authorization` header to the manuscript service and lets it decide.

use axum::{
    extract::FromRequestParts,
    http::{HeaderValue, header::AUTHORIZATION, request::Parts},
};
use tracing::instrument;

use crate::AppState;
use crate::errors::{Error, Result};

/// Proof that the manuscript service accepted the caller's bearer token.
#[derive(Debug, Clone, Copy)]
pub struct Authorized;

impl FromRequestParts<AppState> for Authorized {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let authorization = bearer_header(parts)?;
        state.manuscripts.check_user(authorization).await?;
        Ok(Authorized)
    }
}

/// The `Authorization` header, if it carries a bearer token.
fn bearer_header(parts: &Parts) -> Result<&HeaderValue> {
    parts
        .headers
        .get(AUTHORIZATION)
        .filter(|value| value.to_str().is_ok_and(|s| s.contains("Bearer")))
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("Bearer token is missing".to_string()),
        })
}
