use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use payment_verify::app_state::AppState;
use payment_verify::config::AppConfig;
use payment_verify::routes;
use payment_verify::services::payment_api::BackendClient;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing payment-verify server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "payment_verify_attempts_total",
        "Verify calls issued against the backend"
    );
    metrics::describe_counter!(
        "payment_verify_sessions_total",
        "Verification sessions finished, by outcome"
    );
    metrics::describe_counter!(
        "payment_verify_reconcile_total",
        "Manual reconciliation requests, by result"
    );
    metrics::describe_gauge!(
        "payment_verify_active_sessions",
        "Sessions currently polling or reconciling"
    );

    tracing::info!(backend = %config.backend_base_url, "Initializing backend client");
    let backend = BackendClient::new(
        &config.backend_base_url,
        config.backend_api_token.clone(),
        config.backend_cookie.clone(),
        config.backend_timeout(),
    )
    .expect("Failed to initialize backend client");

    let settings = config.poller_settings();
    tracing::info!(
        max_attempts = settings.max_attempts,
        interval_ms = settings.interval.as_millis() as u64,
        slow_notice_attempt = settings.slow_notice_attempt,
        "Verification poller configured"
    );

    let state = AppState::new(Arc::new(backend), settings, config.session_retention());
    let app = routes::router(state, prometheus_handle);

    tracing::info!("Starting payment-verify on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
