//! Weather Station API Server
//!
//! HTTP API over the stored sensor readings, plus the wiring that runs the
//! MQTT subscriber alongside it.

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod error;
pub mod rate_limit;
mod routes;

use crate::config::{ApiConfig, AppConfig, LoggingConfig};
use crate::error::StartupError;
use crate::rate_limit::{create_governor_config, DefaultGovernorConfig};
use data_validator::Validator;
use mqtt_ingest::{MessageHandler, Subscriber};
use storage::Repository;

/// Application state shared across handlers
pub struct AppState {
    /// Storage repository
    pub repository: Arc<Repository>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    /// Default `/data/history` page size
    pub history_default_limit: u32,
    /// Largest accepted `?limit=`
    pub history_max_limit: u32,
    /// Prometheus handle when the exporter is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new application state
    pub fn new(repository: Arc<Repository>, api: &ApiConfig) -> Self {
        Self {
            repository,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            history_default_limit: api.history_default_limit,
            history_max_limit: api.history_max_limit,
            metrics: None,
        }
    }

    /// Attach a Prometheus handle for `/metrics`
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
    pub metrics: SystemMetrics,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub database: ComponentHealth,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// System metrics
#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub reading_count: i64,
}

/// Create the application router
///
/// `governor` enables per-IP limiting on the `/data` routes.
pub fn create_router(
    state: Arc<AppState>,
    governor: Option<Arc<DefaultGovernorConfig>>,
) -> Router {
    let mut data = Router::new()
        .route("/data/latest", get(routes::data::get_latest))
        .route("/data/history", get(routes::data::get_history));
    if let Some(config) = governor {
        data = data.layer(GovernorLayer { config });
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(routes::metrics::get_metrics))
        .merge(data)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let database_check = async {
        state.repository.ping().await?;
        state.repository.count().await
    };
    let (database, reading_count) = match database_check.await {
        Ok(count) => (
            ComponentHealth {
                status: "ok".to_string(),
                error: None,
            },
            count,
        ),
        Err(e) => {
            warn!("Health check: database unreachable: {}", e);
            (
                ComponentHealth {
                    status: "down".to_string(),
                    error: Some(e.to_string()),
                },
                0,
            )
        }
    };

    let healthy = database.error.is_none();
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus { database },
        metrics: SystemMetrics { reading_count },
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), StartupError> {
    let level = Level::from_str(&config.level)
        .map_err(|_| StartupError::Logging(format!("unknown log level {:?}", config.level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.map_err(|e| StartupError::Logging(e.to_string()))
}

/// Install the global Prometheus recorder
pub fn install_metrics() -> Result<PrometheusHandle, StartupError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StartupError::Metrics(e.to_string()))
}

/// Run the subscriber and the HTTP server until Ctrl-C / SIGTERM
pub async fn run(config: AppConfig) -> Result<(), StartupError> {
    config.validate()?;
    let addr = config.bind_addr()?;
    let repository = Arc::new(Repository::connect(&config.database).await?);

    let mut state = AppState::new(repository.clone(), &config.api);
    if config.api.metrics_enabled {
        state = state.with_metrics(install_metrics()?);
    }
    let governor = create_governor_config(&config.api.rate_limit)?;
    let app = create_router(Arc::new(state), governor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handler = MessageHandler::new(repository.clone(), Validator::new(config.validation));
    let subscriber = tokio::spawn(Subscriber::new(config.mqtt, handler).run(shutdown_rx));

    info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    let _ = shutdown_tx.send(true);
    match subscriber.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("MQTT subscriber stopped: {}", e),
        Err(e) => error!("MQTT subscriber task failed: {}", e),
    }
    repository.close().await;
    info!("Shutdown complete");

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
