use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

use crate::models::payment::{ApiEnvelope, PaymentStatus, TransactionRef, VerifyData};

/// Result of one call to the backend verify endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Envelope with `success: true`.
    Status(PaymentStatus),
    /// Envelope with `success: false`.
    Rejected { message: String },
}

/// Result of a manual reconciliation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Accepted { message: Option<String> },
    Rejected { message: String },
}

/// Remote operations the verification poller depends on.
#[async_trait]
pub trait PaymentApi: Send + Sync {
    /// Ask the backend for the current status of a payment. Safe to call
    /// repeatedly for the same reference.
    async fn verify_payment(&self, reference: &TransactionRef) -> Result<VerifyOutcome, ApiError>;

    /// Ask the backend to re-derive the payment status from the provider.
    async fn trigger_manual_webhook(
        &self,
        reference: &TransactionRef,
    ) -> Result<ReconcileOutcome, ApiError>;
}

/// `reqwest` client for the events backend payment endpoints.
pub struct BackendClient {
    http: Client,
    base_url: Url,
    api_token: Option<String>,
    cookie: Option<String>,
}

impl BackendClient {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        cookie: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::Config(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Config(format!(
                "backend URL cannot be used as a base: {}",
                base_url
            )));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ApiError::Http)?;

        Ok(Self {
            http,
            base_url,
            api_token,
            cookie,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        match &self.cookie {
            Some(cookie) => request.header(reqwest::header::COOKIE, cookie),
            None => request,
        }
    }
}

#[async_trait]
impl PaymentApi for BackendClient {
    async fn verify_payment(&self, reference: &TransactionRef) -> Result<VerifyOutcome, ApiError> {
        let url = self.endpoint(&["payment", "verify", reference.as_str()]);

        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(ApiError::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(ApiError::Http)?;

        match serde_json::from_str::<ApiEnvelope<VerifyData>>(&body) {
            Ok(envelope) => Ok(verify_outcome(envelope)),
            Err(_) if status == StatusCode::NOT_FOUND => Ok(VerifyOutcome::Rejected {
                message: "404 not found".to_string(),
            }),
            Err(_) if !status.is_success() => Err(ApiError::Status {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(ApiError::Decode(e)),
        }
    }

    async fn trigger_manual_webhook(
        &self,
        reference: &TransactionRef,
    ) -> Result<ReconcileOutcome, ApiError> {
        let mut url = self.endpoint(&["payment", "manual-webhook"]);
        url.query_pairs_mut().append_pair("tran_id", reference.as_str());

        let response = self
            .authorize(self.http.post(url))
            .send()
            .await
            .map_err(ApiError::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(ApiError::Http)?;

        match serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body) {
            Ok(envelope) if envelope.success => Ok(ReconcileOutcome::Accepted {
                message: envelope.message,
            }),
            Ok(envelope) => Ok(ReconcileOutcome::Rejected {
                message: envelope
                    .message
                    .unwrap_or_else(|| "Reconciliation was rejected by the backend".to_string()),
            }),
            Err(_) if !status.is_success() => Err(ApiError::Status {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(ApiError::Decode(e)),
        }
    }
}

fn verify_outcome(envelope: ApiEnvelope<VerifyData>) -> VerifyOutcome {
    if !envelope.success {
        return VerifyOutcome::Rejected {
            message: envelope
                .message
                .unwrap_or_else(|| "Verification request was rejected".to_string()),
        };
    }

    match envelope.data {
        Some(data) => VerifyOutcome::Status(PaymentStatus::parse(&data.status)),
        // A success envelope without data carries no status; surface it verbatim.
        None => VerifyOutcome::Status(PaymentStatus::Other(String::new())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Backend client configuration error: {0}")]
    Config(String),
}
