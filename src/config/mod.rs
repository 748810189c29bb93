use serde::Deserialize;
use std::time::Duration;

use crate::services::poller::PollerSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the CLI.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL of the events backend REST API (e.g., "https://api.example.com/api/v1")
    pub backend_base_url: String,

    /// Bearer token sent with every backend call
    pub backend_api_token: Option<String>,

    /// Raw cookie header forwarded to the backend (session credentials)
    pub backend_cookie: Option<String>,

    /// Per-request timeout for backend calls. Unset means no timeout.
    pub backend_timeout_secs: Option<u64>,

    /// Total verify calls allowed per session, shared by every retry cause
    #[serde(default = "default_max_attempts")]
    pub verify_max_attempts: u32,

    /// Fixed delay between verify calls
    #[serde(default = "default_poll_interval_ms")]
    pub verify_poll_interval_ms: u64,

    /// Attempt on which a still-pending payment raises the "taking longer" notice
    #[serde(default = "default_slow_notice_attempt")]
    pub verify_slow_notice_attempt: u32,

    /// Delay between a successful manual reconciliation and the fresh poll
    #[serde(default = "default_reconcile_restart_delay_ms")]
    pub reconcile_restart_delay_ms: u64,

    /// How long a finished session stays queryable before eviction
    #[serde(default = "default_session_retention_secs")]
    pub session_retention_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_attempts() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_slow_notice_attempt() -> u32 {
    10
}

fn default_reconcile_restart_delay_ms() -> u64 {
    2000
}

fn default_session_retention_secs() -> u64 {
    900
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            max_attempts: self.verify_max_attempts.max(1),
            interval: Duration::from_millis(self.verify_poll_interval_ms),
            slow_notice_attempt: self.verify_slow_notice_attempt,
            reconcile_restart_delay: Duration::from_millis(self.reconcile_restart_delay_ms),
        }
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_backend_is_set() {
        let vars = vec![(
            "BACKEND_BASE_URL".to_string(),
            "http://localhost:8080/api/v1".to_string(),
        )];
        let config: AppConfig = envy::from_iter(vars).expect("config should parse");

        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.verify_max_attempts, 30);
        assert!(config.backend_timeout().is_none());

        let settings = config.poller_settings();
        assert_eq!(settings.max_attempts, 30);
        assert_eq!(settings.interval, Duration::from_secs(2));
        assert_eq!(settings.slow_notice_attempt, 10);
        assert_eq!(settings.reconcile_restart_delay, Duration::from_secs(2));
    }

    #[test]
    fn zero_attempt_budget_is_raised_to_one() {
        let vars = vec![
            ("BACKEND_BASE_URL".to_string(), "http://backend".to_string()),
            ("VERIFY_MAX_ATTEMPTS".to_string(), "0".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).expect("config should parse");
        assert_eq!(config.poller_settings().max_attempts, 1);
    }
}
