//! Application startup and lifecycle management.

use crate::config::LedgerConfig;
use crate::handlers;
use crate::services::{
    get_metrics, init_metrics, CashFlowAggregator, CogsCalculator, Database, JournalEngine,
    LedgerValidator, PeriodCloser, PgSalesSource,
};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: LedgerConfig,
    pub db: Arc<Database>,
    pub engine: JournalEngine,
    pub cogs: CogsCalculator,
    pub validator: LedgerValidator,
    pub cash_flow: CashFlowAggregator,
    pub periods: PeriodCloser,
}

impl AppState {
    /// Wire every ledger component onto one pool.
    pub fn new(config: LedgerConfig, db: Database) -> Self {
        let pool = db.pool().clone();
        let engine = JournalEngine::new(pool.clone(), config.policy.clone());
        let cogs = CogsCalculator::new(
            engine.clone(),
            Arc::new(PgSalesSource::new(pool.clone())),
            pool.clone(),
            config.accounts.clone(),
        );
        let validator = LedgerValidator::new(pool.clone(), config.policy.clone());
        let periods = PeriodCloser::new(engine.clone(), pool.clone(), config.accounts.clone());
        let cash_flow = CashFlowAggregator::new(
            pool,
            config.cash_flow.clone(),
            config.policy.balance_tolerance,
        );

        Self {
            config,
            db: Arc::new(db),
            engine,
            cogs,
            validator,
            cash_flow,
            periods,
        }
    }
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "journal-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "journal-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Readiness check passed");
            StatusCode::OK
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Build the HTTP router. No route writes a balance directly.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/accounts", post(handlers::create_account))
        .route("/accounts/tree", get(handlers::account_tree))
        .route("/accounts/:id", get(handlers::get_account))
        .route(
            "/cash-banks",
            post(handlers::create_cash_bank).get(handlers::list_cash_banks),
        )
        .route(
            "/cash-banks/:id/transactions",
            get(handlers::cash_bank_transactions),
        )
        .route(
            "/journals",
            post(handlers::post_journal).get(handlers::find_journals),
        )
        .route("/journals/drafts", post(handlers::save_draft))
        .route("/journals/:id", get(handlers::get_journal))
        .route("/journals/:id/post", post(handlers::post_draft))
        .route("/journals/:id/reverse", post(handlers::reverse_journal))
        .route("/posting-intents/check", get(handlers::check_intent))
        .route("/sales/:id/cogs", post(handlers::compute_cogs))
        .route("/cogs/backfill", post(handlers::backfill_cogs))
        .route("/validation", get(handlers::validate_ledger))
        .route("/reports/cash-flow", get(handlers::cash_flow))
        .route("/reports/cogs", get(handlers::cogs_summary))
        .route("/reports/trial-balance", get(handlers::trial_balance))
        .route("/periods", get(handlers::list_periods))
        .route("/periods/close", post(handlers::close_period))
        .route("/periods/status", get(handlers::period_status))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: LedgerConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: LedgerConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: LedgerConfig, run_migrations: bool) -> Result<Self, AppError> {
        // Initialize metrics
        init_metrics();

        // Connect to database
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        // Run migrations only if requested
        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let http_addr = config.common.socket_addr();
        let state = AppState::new(config, db);

        // Bind HTTP listener
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Journal service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Get the shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let http_router = router(self.state);

        tracing::info!(
            service = "journal-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, http_router)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
