//! HTTP gateway for TripMate.
//!
//! Routes:
//! - `POST /api/chat`: run one exchange, streamed as UI message stream SSE
//! - `GET  /api/conversations/{id}`: stored messages of a conversation
//! - `GET  /health`: liveness
//!
//! Built on Axum. The history store is created here once and handed to the
//! pipeline; a background task compacts it periodically.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{
    Router,
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use tripmate_agent::ChatPipeline;
use tripmate_config::AppConfig;
use tripmate_core::history::HistoryStore;
use tripmate_history::InMemoryHistoryStore;

pub use api::ApiError;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    /// `None` when no model API key is configured; chat requests get 503.
    pub pipeline: Option<ChatPipeline>,
    pub history: Arc<dyn HistoryStore>,
}

impl GatewayState {
    pub fn new(config: AppConfig, pipeline: Option<ChatPipeline>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            config,
            pipeline,
            history,
        }
    }

    /// Wire history, provider, tools and pipeline from configuration.
    ///
    /// A missing API key is not fatal: the server still starts and reports
    /// the problem on every chat request.
    pub fn from_config(config: AppConfig) -> Self {
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::with_limits(
            config.history.capacity,
            config.history.compact_threshold,
        ));

        let pipeline = match tripmate_providers::from_config(&config) {
            Ok(provider) => {
                let tools = Arc::new(tripmate_tools::default_registry(&config));
                Some(ChatPipeline::from_config(&config, provider, tools, history.clone()))
            }
            Err(e) => {
                warn!(error = %e, "Model provider unavailable, chat requests will be rejected");
                None
            }
        };

        Self::new(config, pipeline, history)
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS from `gateway.allowed_origins` (any origin when empty)
/// - Request body size limit (`gateway.max_body_bytes`)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.gateway.allowed_origins);
    let body_limit = state.config.gateway.max_body_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(api::chat_handler))
        .route("/api/conversations/{id}", get(api::conversation_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(api::CONVERSATION_HEADER)])
        .expose_headers([
            HeaderName::from_static(api::CONVERSATION_HEADER),
            HeaderName::from_static(tripmate_agent::UI_STREAM_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}

/// Run `compact()` on `history` every `interval` until the task is aborted.
pub fn spawn_compaction(history: Arc<dyn HistoryStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = history.compact().await;
            if evicted > 0 {
                info!(evicted, "History compacted");
            } else {
                debug!("History compaction: nothing to evict");
            }
        }
    })
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let compact_every = Duration::from_secs(config.history.compact_interval_secs.max(1));

    let state = Arc::new(GatewayState::from_config(config));
    let compaction = spawn_compaction(state.history.clone(), compact_every);
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    compaction.abort();
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
