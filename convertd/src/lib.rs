//! # convertd
//!
//! A self-hostable file conversion service: upload a file, see which
//! formats it can become, convert it, download the result.
//!
//! The service classifies uploads by extension, spools them to a temporary
//! store on local disk, and dispatches conversions to one tool adapter per
//! category: the `image` crate for raster images, ffmpeg for audio/video,
//! headless LibreOffice for documents and presentations, calamine/csv for
//! spreadsheets, and poppler for PDFs. Uploads are removed as soon as their
//! conversion completes; a retention sweep collects whatever is abandoned.
//!
//! ## Quickstart
//!
//! ```ignore
//! use convertd::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     Application::new(config)?.serve(std::future::pending()).await
//! }
//! ```
//!
//! ## HTTP API
//!
//! - `POST /upload`: multipart form with a `file` field
//! - `POST /convert`: JSON `{file_id, filename, target_format}`
//! - `GET /health`: liveness probe
//! - `GET /docs`: OpenAPI documentation

pub mod api;
pub mod classify;
pub mod config;
pub mod convert;
pub mod errors;
mod openapi;
mod static_assets;
pub mod store;
pub mod telemetry;

#[cfg(test)]
pub mod test_utils;

use crate::config::CorsOrigin;
use crate::convert::Dispatcher;
use crate::openapi::ApiDoc;
use crate::store::TempStore;
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use regex::Regex;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

/// Application state shared across all request handlers.
///
/// Handlers receive the temporary store and the conversion dispatcher from
/// here rather than from any ambient global; both are constructed once in
/// [`Application::new`].
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<TempStore>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors = &config.cors;
    let has_wildcard = cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));

    let allow_origin = if has_wildcard {
        AllowOrigin::any()
    } else {
        // Origin headers carry no trailing slash, Url::as_str does
        let exact: Vec<String> = cors
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin {
                CorsOrigin::Url(url) => Some(url.as_str().trim_end_matches('/').to_string()),
                CorsOrigin::Wildcard => None,
            })
            .collect();
        let pattern = cors
            .origin_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("cors.origin_regex is not a valid regex")?;

        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin) = origin.to_str() else {
                return false;
            };
            exact.iter().any(|allowed| allowed == origin) || pattern.as_ref().is_some_and(|re| re.is_match(origin))
        })
    };

    let mut layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(cors.allow_credentials);

    if let Some(max_age) = cors.max_age {
        layer = layer.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(layer)
}

/// Build the application router: API endpoints, OpenAPI documentation, the
/// embedded frontend, CORS, and request tracing.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    // Axum's default body limit is far below useful upload sizes; the
    // handler enforces the configured limit incrementally while streaming.
    let body_limit = usize::try_from(state.config.limits.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);

    let api_routes = Router::new()
        .route("/health", get(api::handlers::uploads::health))
        .route("/upload", post(api::handlers::uploads::upload_file))
        .route("/convert", post(api::handlers::conversions::convert_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state.clone());

    let router = Router::new()
        .merge(api_routes)
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/docs"))
        .fallback(api::handlers::static_assets::serve_embedded_asset);

    let cors_layer = create_cors_layer(&state.config)?;

    let router = router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Container for background tasks and their lifecycle management.
///
/// When dropped, the `drop_guard` cancels the shutdown token, signaling all
/// tasks to stop; [`shutdown`](BackgroundServices::shutdown) does the same
/// but also waits for the tasks to finish.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Spawn the retention sweeper, which bounds disk usage against uploads
/// that were never converted and scratch space that was never reclaimed.
fn setup_background_services(store: Arc<TempStore>, config: &Config, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let sweep_interval = config.store.sweep_interval;
    let sweeper_shutdown = shutdown_token.clone();
    let handle = tokio::spawn(async move {
        info!("Starting retention sweeper");
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = sweeper_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let store = store.clone();
                    match tokio::task::spawn_blocking(move || store.sweep()).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "retention sweep removed expired items"),
                        Err(e) => tracing::error!("retention sweep task failed: {e}"),
                    }
                }
            }
        }
        info!("Retention sweeper stopped");
    });
    background_tasks.push(handle);

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting convertd with configuration: {:#?}", config);

        let store = Arc::new(TempStore::new(&config.store).context("failed to create spool directories")?);
        let dispatcher = Arc::new(Dispatcher::new(config.convert.clone()));

        let shutdown_token = CancellationToken::new();
        let bg_services = setup_background_services(store.clone(), &config, shutdown_token);

        let state = AppState::builder().config(config.clone()).store(store).dispatcher(dispatcher).build();
        let router = build_router(&state)?;

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let Self {
            router,
            config,
            bg_services,
        } = self;

        let bind_addr = config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("convertd listening on http://{}, available at http://localhost:{}", bind_addr, config.port);

        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down background services...");
        bg_services.shutdown().await;

        Ok(())
    }
}
