//! Client for the archive's deposition API and its storage buckets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::instrument;
use url::Url;

use super::{ensure_slash, error_message, http_client};
use crate::api::models::depositions::{ResourceDescriptor, UploadResponse};
use crate::config::ArchiveConfig;
use crate::upload::{BucketTransport, UploadContent, UploadError};

/// One typed call per archive operation the gateway needs.
///
/// Every call carries the configured access token. No call retries on its own; the
/// upload pipeline wraps the ones that should be retried.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
    request_timeout: Option<Duration>,
    community: String,
}

impl ArchiveClient {
    pub fn new(config: &ArchiveConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config.connect_timeout, config.read_timeout)?,
            base_url: config.url.clone(),
            access_token: config.access_token.clone(),
            request_timeout: config.request_timeout,
            community: config.community.clone(),
        })
    }

    fn depositions_url(&self, suffix: &str) -> Result<Url, UploadError> {
        ensure_slash(&self.base_url)
            .join(&format!("api/deposit/depositions{suffix}"))
            .map_err(|e| anyhow::anyhow!("Failed to construct depositions URL: {e}").into())
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }
        request
    }

    async fn send<T: DeserializeOwned>(&self, operation: &str, request: RequestBuilder) -> Result<T, UploadError> {
        let response = request
            .send()
            .await
            .map_err(|e| UploadError::from_transport(operation, e))?;
        read_json(operation, response).await
    }

    /// `GET api/deposit/depositions/{id}`
    #[instrument(skip(self), fields(resource_id = id), err)]
    pub async fn fetch_deposition(&self, id: u64) -> Result<ResourceDescriptor, UploadError> {
        let url = self.depositions_url(&format!("/{id}"))?;
        self.send("deposition fetch", self.request(Method::GET, url)).await
    }

    /// Create an empty dataset deposition in the configured community.
    #[instrument(skip(self), err)]
    pub async fn create_deposition(&self) -> Result<ResourceDescriptor, UploadError> {
        let url = self.depositions_url("")?;
        let body = json!({
            "metadata": {
                "upload_type": "dataset",
                "communities": [{"identifier": self.community}],
            }
        });
        self.send("deposition create", self.request(Method::POST, url).json(&body))
            .await
    }

    /// Replace the deposition's editable fields with `body`.
    #[instrument(skip(self, body), fields(resource_id = id), err)]
    pub async fn update_deposition(&self, id: u64, body: &serde_json::Value) -> Result<ResourceDescriptor, UploadError> {
        let url = self.depositions_url(&format!("/{id}"))?;
        self.send("deposition update", self.request(Method::PUT, url).json(body))
            .await
    }

    /// Open a new draft version of a published deposition.
    #[instrument(skip(self), fields(resource_id = id), err)]
    pub async fn new_version(&self, id: u64) -> Result<ResourceDescriptor, UploadError> {
        let url = self.depositions_url(&format!("/{id}/actions/newversion"))?;
        self.send("new version", self.request(Method::POST, url)).await
    }

    /// Stream `content` to `{bucket_url}/{file_name}` in a single PUT.
    #[instrument(skip(self, content), fields(bucket = %bucket_url, size = content.len()), err)]
    pub async fn put_file(
        &self,
        bucket_url: &Url,
        file_name: &str,
        content: &UploadContent,
    ) -> Result<UploadResponse, UploadError> {
        let url = file_url(bucket_url, file_name)?;
        let body = content
            .body()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open upload content: {e}"))?;

        let request = self
            .request(Method::PUT, url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, content.len())
            .body(body);
        let response = request
            .send()
            .await
            .map_err(|e| UploadError::from_transport("bucket upload", e))?;
        read_upload_response(response, file_name, content.len()).await
    }
}

#[async_trait]
impl BucketTransport for ArchiveClient {
    async fn put(&self, bucket_url: &Url, file_name: &str, content: &UploadContent) -> Result<UploadResponse, UploadError> {
        self.put_file(bucket_url, file_name, content).await
    }
}

/// `{bucket_url}/{file_name}`, with the file name percent-encoded as a single path segment.
fn file_url(bucket_url: &Url, file_name: &str) -> Result<Url, UploadError> {
    let mut url = bucket_url.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Bucket URL {bucket_url} cannot take a path"))?
        .pop_if_empty()
        .push(file_name);
    Ok(url)
}

/// Decode a success body, or turn anything else into `RemoteApi` with the archive's `message`.
async fn read_json<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T, UploadError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(operation, status = status.as_u16(), body = %body, "Archive returned an error");
        let message = error_message(&body, "message")
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown archive error").to_string());
        return Err(UploadError::RemoteApi {
            status: status.as_u16(),
            message,
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| UploadError::from_transport(operation, e))?;
    serde_json::from_str(&body).map_err(|e| {
        tracing::error!(operation, error = %e, body = %body, "Failed to parse archive response");
        UploadError::Unclassified(anyhow::anyhow!("error decoding {operation} response: {e}"))
    })
}

/// Any 2xx means the bytes landed. The body is only descriptive, so an empty or unexpected
/// one falls back to what was sent.
async fn read_upload_response(response: Response, file_name: &str, len: u64) -> Result<UploadResponse, UploadError> {
    let status = response.status();
    if !status.is_success() {
        return read_json("bucket upload", response).await;
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<UploadResponse>(&body) {
        Ok(uploaded) => Ok(uploaded),
        Err(e) => {
            tracing::warn!(status = status.as_u16(), error = %e, "Bucket accepted the file without a readable body");
            Ok(UploadResponse {
                key: Some(file_name.to_string()),
                size: Some(len),
                ..UploadResponse::default()
            })
        }
    }
}
