//! Typed clients for the two services the gateway sits in front of.
//!
//! - [`archive`]: the data-archival service (depositions and storage buckets)
//! - [`manuscripts`]: the manuscript-management service, used only to check bearer tokens

pub mod archive;
pub mod manuscripts;

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use url::Url;

pub use archive::ArchiveClient;
pub use manuscripts::ManuscriptClient;

/// Install the process-wide rustls crypto provider. Safe to call more than once.
pub fn install_crypto_provider() {
    // Err only means a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Build an HTTP client. `None` leaves the corresponding timeout unbounded.
pub fn http_client(connect_timeout: Option<Duration>, read_timeout: Option<Duration>) -> anyhow::Result<Client> {
    install_crypto_provider();

    let mut builder = Client::builder();
    if let Some(timeout) = connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(timeout) = read_timeout {
        builder = builder.read_timeout(timeout);
    }
    builder.build().context("Failed to create HTTP client")
}

/// Makes sure a url has a trailing slash.
///
/// `Url::join` replaces the last path segment unless the base ends in `/`: joining
/// '/hello' and 'world' gives '/world', but '/hello/' and 'world' gives '/hello/world'.
/// Call this before calling .join
pub(crate) fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

/// Pull a string `field` out of a JSON error body, if there is one.
pub(crate) fn error_message(body: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get(field)?.as_str().map(str::to_owned)
}
