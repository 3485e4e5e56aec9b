//! Token check against the manuscript service.

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use reqwest::Client;
use tracing::instrument;
use url::Url;

use super::{ensure_slash, error_message, http_client};
use crate::config::ManuscriptsConfig;
use crate::errors::Error;

#[derive(Debug, Clone)]
pub struct ManuscriptClient {
    client: Client,
    user_info_url: Url,
    request_timeout: Option<Duration>,
}

impl ManuscriptClient {
    pub fn new(config: &ManuscriptsConfig) -> anyhow::Result<Self> {
        let user_info_url = ensure_slash(&config.url)
            .join(&config.user_info_path)
            .map_err(|e| anyhow::anyhow!("Failed to construct user info URL: {e}"))?;

        Ok(Self {
            client: http_client(None, None)?,
            user_info_url,
            request_timeout: config.request_timeout,
        })
    }

    /// Forward the caller's `Authorization` header verbatim and accept only a 200.
    ///
    /// Client errors keep their status (401 stays 401, 403 stays 403); anything else the
    /// service answers is reported as 401. The `detail` field of the service's error body is
    /// passed through when present.
    #[instrument(skip_all, err)]
    pub async fn check_user(&self, authorization: &HeaderValue) -> Result<(), Error> {
        let mut request = self
            .client
            .get(self.user_info_url.clone())
            .header(AUTHORIZATION, authorization.clone());
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| Error::ServiceUnavailable {
            service: "Manuscript service",
            detail: e.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body, "detail").unwrap_or_else(|| "Invalid or expired token".to_string());
        tracing::debug!(status = status.as_u16(), "Manuscript service rejected token");

        if status.is_client_error() && status != StatusCode::UNAUTHORIZED {
            Err(Error::Forbidden { status, message })
        } else {
            Err(Error::Unauthenticated { message: Some(message) })
        }
    }
}
