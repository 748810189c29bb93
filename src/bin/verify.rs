use payment_verify::{
    config::AppConfig,
    models::{
        payment::TransactionRef,
        session::{NoticeLevel, VerificationState},
    },
    services::{
        payment_api::BackendClient,
        poller::{self, PollEvent, RunEnd, SessionObserver},
    },
};
use std::process::ExitCode;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Logs every session event as it happens.
struct LogObserver;

impl SessionObserver for LogObserver {
    fn publish(&self, event: PollEvent) {
        match event {
            PollEvent::State(VerificationState::Polling { attempt }) => {
                tracing::debug!(attempt, "Checking payment status");
            }
            PollEvent::State(state) => tracing::info!(state = ?state, "Session state changed"),
            PollEvent::Notice(notice) => match notice.level {
                NoticeLevel::Info => tracing::info!("{}", notice.message),
                NoticeLevel::Warning => tracing::warn!("{}", notice.message),
                NoticeLevel::Error => tracing::error!("{}", notice.message),
            },
            PollEvent::AttemptFailed(message) => {
                tracing::debug!(error = %message, "Attempt failed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let mut reconcile = false;
    let mut raw_reference = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--reconcile" => reconcile = true,
            _ => raw_reference = Some(arg),
        }
    }

    let reference = match TransactionRef::parse(raw_reference.as_deref()) {
        Ok(reference) => reference,
        Err(e) => {
            tracing::error!(error = %e, "Usage: verify [--reconcile] <tran_id>");
            return ExitCode::from(1);
        }
    };

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let backend = BackendClient::new(
        &config.backend_base_url,
        config.backend_api_token.clone(),
        config.backend_cookie.clone(),
        config.backend_timeout(),
    )
    .expect("Failed to initialize backend client");
    let settings = config.poller_settings();

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupted, stopping verification");
                let _ = cancel_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would cancel the run.
                tracing::warn!(error = %e, "Ctrl-C handler unavailable");
                let _keep = cancel_tx;
                std::future::pending::<()>().await;
            }
        }
    });

    let end = if reconcile {
        poller::reconcile_session(&backend, &reference, &settings, &LogObserver, &mut cancel_rx)
            .await
    } else {
        poller::run_session(&backend, &reference, &settings, &LogObserver, &mut cancel_rx).await
    };

    match end {
        RunEnd::Finished(VerificationState::Confirmed { attempts }) => {
            tracing::info!(tran_id = %reference, attempts, "Payment confirmed");
            ExitCode::SUCCESS
        }
        RunEnd::Finished(state) => {
            tracing::warn!(tran_id = %reference, state = ?state, "Payment needs attention");
            ExitCode::from(2)
        }
        RunEnd::Cancelled => ExitCode::from(130),
    }
}
