//! # depogate: gateway in front of a manuscript service and a data archive
//!
//! Client applications talk to `depogate` instead of talking to the archive directly. Every
//! route checks the caller's bearer token against the manuscript service, then either
//! forwards a deposition call to the archive or, for `POST /upload`, runs the file through
//! the upload pipeline in [`upload`].
//!
//! ## Uploads
//!
//! Files headed for a deposition can be many gigabytes. The handler spools the multipart body
//! to disk while counting bytes, so an oversized file is refused before the archive is
//! contacted. The deposition's bucket URL is then fetched (with retries), and the file is
//! streamed to it on a bounded worker pool. While the transfer runs, the request keeps
//! checking that its client is still connected; a client that goes away gets its transfer
//! cancelled rather than left to finish for nobody. See [`upload`] for the full flow.
//!
//! ## Configuration
//!
//! Configuration is layered with [figment](https://docs.rs/figment): a YAML file, then
//! `DEPOGATE_`-prefixed environment variables (`__` separates nested keys), then a few legacy
//! variables such as `ZENODO_ACCESS_TOKEN`. See [`config`].
//!
//! ## Observability
//!
//! Logs go through `tracing` (filtered by `RUST_LOG`), optionally exported over OTLP. Request
//! and pipeline counters are served in Prometheus format at `/internal/metrics` when
//! `enable_metrics` is set.

pub mod api;
pub mod auth;
pub mod clients;
pub mod config;
pub mod errors;
pub mod openapi;
pub mod telemetry;
pub mod upload;

#[cfg(test)]
mod test;

use std::sync::{Arc, OnceLock};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::clients::{ArchiveClient, ManuscriptClient};
use crate::config::CorsOrigin;
use crate::openapi::ApiDoc;
use crate::upload::{ArchiveResolver, CancellationMonitor, SizePolicy, UploadExecutor, UploadOrchestrator};

/// Multipart framing allowed on top of the file itself before the body limit cuts in.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .archive(archive)
///     .manuscripts(manuscripts)
///     .orchestrator(Arc::new(orchestrator))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub archive: ArchiveClient,
    pub manuscripts: ManuscriptClient,
    pub orchestrator: Arc<UploadOrchestrator>,
}

impl AppState {
    /// Wire the clients and the upload pipeline from configuration.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let archive = ArchiveClient::new(&config.archive)?;
        let manuscripts = ManuscriptClient::new(&config.manuscripts)?;

        let upload = &config.upload;
        let resolver = Arc::new(ArchiveResolver::new(archive.clone(), upload.retry.clone()));
        let executor = UploadExecutor::new(
            Arc::new(archive.clone()),
            upload.retry.clone(),
            upload.max_concurrent_transfers,
        );
        let orchestrator = UploadOrchestrator::new(
            resolver,
            executor,
            SizePolicy::new(config.archive.max_file_size),
            CancellationMonitor::new(upload.disconnect_poll_interval),
        );

        Ok(Self::builder()
            .archive(archive)
            .manuscripts(manuscripts)
            .orchestrator(Arc::new(orchestrator))
            .config(config)
            .build())
    }
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // tower-http refuses `*` inside an origin list
    let allow_origin = if config.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PUT])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// The Prometheus layer installs a process-wide recorder, which can only happen once.
fn prometheus_pair() -> &'static (PrometheusMetricLayer<'static>, PrometheusHandle) {
    static PAIR: OnceLock<(PrometheusMetricLayer<'static>, PrometheusHandle)> = OnceLock::new();
    PAIR.get_or_init(PrometheusMetricLayer::pair)
}

/// Build the router: gateway routes behind [`auth::Authorized`], plus health, docs and
/// (optionally) metrics, wrapped in CORS and request tracing.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let upload_body_limit = usize::try_from(state.config.archive.max_file_size.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);

    let gateway_routes = Router::new()
        .route(
            "/upload",
            post(api::handlers::uploads::upload_file).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/depositions", post(api::handlers::depositions::create_deposition))
        .route(
            "/depositions/{id}",
            get(api::handlers::depositions::get_deposition).put(api::handlers::depositions::update_deposition),
        )
        .route("/depositions/{id}/versions", post(api::handlers::depositions::create_version));

    let cors_layer = create_cors_layer(&state.config)?;
    let enable_metrics = state.config.enable_metrics;

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .merge(gateway_routes)
        .with_state(state)
        .layer(cors_layer);

    if enable_metrics {
        let (prometheus_layer, metric_handle) = prometheus_pair().clone();
        router = router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    Ok(router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    ))
}

/// The running gateway: [`Application::new`] wires everything from config,
/// [`Application::serve`] binds and runs until the shutdown future resolves.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!(archive = %config.archive.url, manuscripts = %config.manuscripts.url, "Starting depogate");

        let state = AppState::from_config(config.clone())?;
        let router = build_router(state)?;

        Ok(Self { router, config })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "depogate listening on http://{}, docs at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
