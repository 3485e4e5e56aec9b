//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `DEPOGATE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `DEPOGATE_` override YAML values
//! 3. **Legacy variables** - `ZENODO_URL`, `ZENODO_ACCESS_TOKEN`, `ZENODO_MAX_FILE_SIZE` and
//!    `JANEWAY_URL` override `archive.url`, `archive.access_token`, `archive.max_file_size` and
//!    `manuscripts.url`
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `DEPOGATE_UPLOAD__RETRY__MAX_ATTEMPTS=5` sets the `upload.retry.max_attempts` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! DEPOGATE_PORT=8080
//!
//! # Point at a sandbox archive
//! ZENODO_URL="https://sandbox.zenodo.org"
//! ZENODO_ACCESS_TOKEN="..."
//!
//! # Or, equivalently
//! DEPOGATE_ARCHIVE__URL="https://sandbox.zenodo.org"
//! DEPOGATE_ARCHIVE__ACCESS_TOKEN="..."
//!
//! # Poll for client disconnects twice a second
//! DEPOGATE_UPLOAD__DISCONNECT_POLL_INTERVAL=500ms
//! ```

use std::time::Duration;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::Error;
use crate::upload::RetryPolicy;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "DEPOGATE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty file is a valid (if not very useful) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// The archival service files are deposited into
    pub archive: ArchiveConfig,
    /// The manuscript service used to authenticate callers
    pub manuscripts: ManuscriptsConfig,
    /// Upload pipeline tuning
    pub upload: UploadConfig,
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            archive: ArchiveConfig::default(),
            manuscripts: ManuscriptsConfig::default(),
            upload: UploadConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Base URL of the archive (deposition API lives under `api/deposit/depositions`)
    pub url: Url,
    /// Personal access token, sent as a bearer token on every archive call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Largest file accepted for upload, in bytes (default: 15 GiB)
    pub max_file_size: u64,
    /// Time allowed to establish a connection (default: 30s)
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    /// Time allowed between two reads of a response; unset means wait forever
    #[serde(with = "humantime_serde")]
    pub read_timeout: Option<Duration>,
    /// End-to-end deadline for a single request; unset means no deadline (default)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    /// Community new depositions are filed under
    pub community: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("https://sandbox.zenodo.org").expect("static url is valid"),
            access_token: None,
            max_file_size: 15 * 1024 * 1024 * 1024,
            connect_timeout: Some(Duration::from_secs(30)),
            read_timeout: None,
            request_timeout: None,
            community: "cdrxiv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManuscriptsConfig {
    /// Base URL of the manuscript service
    pub url: Url,
    /// Path, relative to `url`, that answers 200 for a valid bearer token
    pub user_info_path: String,
    /// Deadline for the token check (default: 30s)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

impl Default for ManuscriptsConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost:8000").expect("static url is valid"),
            user_info_path: "api/user_info/".to_string(),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Transfers allowed to run at the same time across all requests (default: 2)
    pub max_concurrent_transfers: usize,
    /// How often an in-flight upload checks whether its client is still connected (default: 1s)
    #[serde(with = "humantime_serde")]
    pub disconnect_poll_interval: Duration,
    /// Backoff applied to the deposition fetches and the bucket transfer
    pub retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 2,
            disconnect_poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600),
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard", serialize_with = "serialize_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn serialize_wildcard<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("*")
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: String| Error::Internal {
            operation: format!("Config validation: {message}"),
        };

        if self.archive.max_file_size == 0 {
            return Err(invalid("archive.max_file_size cannot be 0 (default: 15 GiB).".to_string()));
        }

        let retry = &self.upload.retry;
        if retry.max_attempts == 0 {
            return Err(invalid(
                "upload.retry.max_attempts cannot be 0. It counts the first attempt, so 1 disables retries.".to_string(),
            ));
        }
        if retry.multiplier == 0 {
            return Err(invalid("upload.retry.multiplier cannot be 0 (default: 2).".to_string()));
        }
        if retry.base_delay > retry.max_delay {
            return Err(invalid(format!(
                "upload.retry.base_delay ({:?}) cannot be greater than upload.retry.max_delay ({:?})",
                retry.base_delay, retry.max_delay
            )));
        }

        if self.upload.max_concurrent_transfers == 0 {
            return Err(invalid("upload.max_concurrent_transfers cannot be 0 (default: 2).".to_string()));
        }
        if self.upload.disconnect_poll_interval.is_zero() {
            return Err(invalid("upload.disconnect_poll_interval cannot be 0 (default: 1s).".to_string()));
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(invalid("cors.allowed_origins cannot be empty. Use \"*\" to allow any origin.".to_string()));
        }
        if self.cors.allow_credentials && self.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
            return Err(invalid(
                "cors.allow_credentials cannot be combined with a wildcard origin. List the allowed origins explicitly."
                    .to_string(),
            ));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // DEPOGATE_CONFIG names the file itself and is read by clap
            .merge(Env::prefixed("DEPOGATE_").ignore(&["CONFIG"]).split("__"))
            // Variable names from earlier deployments of the gateway
            .merge(Env::raw().only(&["ZENODO_URL"]).map(|_| "archive.url".into()))
            .merge(Env::raw().only(&["ZENODO_ACCESS_TOKEN"]).map(|_| "archive.access_token".into()))
            .merge(Env::raw().only(&["ZENODO_MAX_FILE_SIZE"]).map(|_| "archive.max_file_size".into()))
            .merge(Env::raw().only(&["JANEWAY_URL"]).map(|_| "manuscripts.url".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
