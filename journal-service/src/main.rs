//! Journal Service entry point.

use journal_service::config::LedgerConfig;
use journal_service::services::init_metrics;
use journal_service::startup::Application;

use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let config = LedgerConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    // Initialize tracing
    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        otlp_endpoint = ?config.otlp_endpoint,
        "Starting journal-service"
    );

    // Initialize metrics
    init_metrics();

    // Log configuration (mask sensitive values)
    tracing::info!(
        service_name = %config.service_name,
        http_addr = %config.common.socket_addr(),
        database_url = %config.database.redacted_url(),
        db_max_connections = %config.database.max_connections,
        db_min_connections = %config.database.min_connections,
        "Configuration loaded"
    );
    tracing::info!(
        balance_tolerance = %config.policy.balance_tolerance,
        max_post_retries = config.policy.max_post_retries,
        max_numbering_attempts = config.policy.max_numbering_attempts,
        drift_low_threshold = %config.policy.drift_low_threshold,
        drift_critical_threshold = %config.policy.drift_critical_threshold,
        cash_flow_rules = config.cash_flow.rule_count(),
        "Posting policy loaded"
    );

    // Build and run application
    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    // Automatic postings resolve these codes at post time; report gaps early.
    let mapping = app.state().config.accounts.codes();
    let codes: Vec<&str> = mapping.iter().map(|(_, code)| *code).collect();
    match app.db().missing_account_codes(&codes).await {
        Ok(missing) if missing.is_empty() => {
            tracing::info!(accounts = ?mapping, "Account mapping resolved against the chart");
        }
        Ok(missing) => {
            tracing::warn!(
                missing = ?missing,
                "Mapped account codes are not in the chart of accounts"
            );
        }
        Err(e) => tracing::warn!(error = %e, "Could not check the account mapping"),
    }

    // Run with graceful shutdown
    tokio::select! {
        result = app.run_until_stopped() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Application error");
                return Err(e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Graceful shutdown initiated");
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
