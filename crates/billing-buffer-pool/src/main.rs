//! Billing Buffer - Pre-provisioned Billing Project Pool Service
//!
//! This is the main entry point for the buffer service. It runs the
//! maintenance worker and exposes the assignment, status and cron APIs.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use billing_buffer_core::{ResourceName, Tier};
use billing_buffer_pool::{
    BufferConfig, BufferManager, BufferPool, BufferStatus, CleanReport, HttpProvisioner,
    NoopProvisioner, PoolError, PoolWorker, Provisioner, RecorderSink, RefillReport, SyncReport,
    WorkerConfig,
};
use billing_buffer_store::{PoolEntry, RocksStore};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    pool: Arc<dyn BufferManager>,
    prometheus: PrometheusHandle,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    retriable: bool,
}

/// A pool error rendered as a JSON HTTP response.
struct ApiError(PoolError);

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.http_status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            code,
            retriable: self.0.is_retriable(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize)]
struct AssignRequest {
    principal: String,
    tier: Tier,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "billing-buffer",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.pool.status().await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "store unavailable"),
    }
}

async fn refill_handler(State(state): State<AppState>) -> ApiResult<RefillReport> {
    Ok(Json(state.pool.refill().await?))
}

async fn sync_handler(State(state): State<AppState>) -> ApiResult<SyncReport> {
    Ok(Json(state.pool.sync().await?))
}

async fn clean_handler(State(state): State<AppState>) -> ApiResult<CleanReport> {
    Ok(Json(state.pool.clean().await?))
}

async fn assign_handler(
    State(state): State<AppState>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<PoolEntry> {
    let entry = state.pool.assign(&request.principal, &request.tier).await?;
    Ok(Json(entry))
}

async fn status_handler(State(state): State<AppState>) -> ApiResult<BufferStatus> {
    Ok(Json(state.pool.status().await?))
}

async fn tier_status_handler(
    State(state): State<AppState>,
) -> ApiResult<BTreeMap<Tier, BufferStatus>> {
    Ok(Json(state.pool.status_by_tier().await?))
}

async fn gauges_handler(
    State(state): State<AppState>,
) -> ApiResult<Vec<billing_buffer_pool::Gauge>> {
    Ok(Json(state.pool.gauge_data().await?))
}

/// Refresh every gauge, then render them in the Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> Result<String, ApiError> {
    state.pool.gauge_data().await?;
    state.pool.status_by_tier().await?;
    Ok(state.prometheus.render())
}

async fn entry_handler(
    State(state): State<AppState>,
    Path(name): Path<ResourceName>,
) -> Response {
    match state.pool.find_entry(&name).await {
        Ok(Some(entry)) => Json(entry).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("entry not found: {name}"),
                code: 404,
                retriable: false,
            }),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/cron/refill", post(refill_handler))
        .route("/cron/sync", post(sync_handler))
        .route("/cron/clean", post(clean_handler))
        .route("/v1/assign", post(assign_handler))
        .route("/v1/status", get(status_handler))
        .route("/v1/status/tiers", get(tier_status_handler))
        .route("/v1/status/gauges", get(gauges_handler))
        .route("/v1/entries/:name", get(entry_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,billing_buffer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Billing Buffer");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/data".to_string());
    let worker_enabled = std::env::var("BUFFER_WORKER_ENABLED")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    let config = BufferConfig::from_env();

    tracing::info!(
        tiers = config.tiers.len(),
        capacity = config.buffer_capacity,
        prefix = %config.name_prefix,
        "Loaded buffer configuration"
    );

    // Initialize store
    let store = Arc::new(RocksStore::open(&data_dir)?);
    tracing::info!(data_dir = %data_dir, "Initialized RocksDB store");

    // Initialize provisioning client
    let provisioner: Arc<dyn Provisioner> = match std::env::var("PROVISIONER_URL") {
        Ok(url) => {
            tracing::info!(url = %url, "Using HTTP provisioner");
            Arc::new(HttpProvisioner::new(url)?)
        }
        Err(_) => {
            tracing::warn!("PROVISIONER_URL not set, using no-op provisioner");
            Arc::new(NoopProvisioner::new())
        }
    };

    // Install the Prometheus recorder behind the metrics facade
    let prometheus = PrometheusBuilder::new().install_recorder()?;

    let pool: Arc<dyn BufferManager> = Arc::new(
        BufferPool::new(store, provisioner, config)?.with_metrics(Arc::new(RecorderSink)),
    );

    // Start maintenance worker
    let worker = PoolWorker::new(Arc::clone(&pool), WorkerConfig::from_env());
    let worker_shutdown = worker.shutdown_handle();
    let worker_handle = if worker_enabled {
        Some(tokio::spawn(async move { worker.run().await }))
    } else {
        tracing::info!("Maintenance worker disabled, relying on /cron endpoints");
        None
    };

    // Create router
    let app = create_router(AppState { pool, prometheus });

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = worker_handle {
        worker_shutdown.notify_one();
        handle.await?;
    }

    tracing::info!("Billing Buffer stopped");
    Ok(())
}
