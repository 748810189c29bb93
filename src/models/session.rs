use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of one verification session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum VerificationState {
    Idle,
    Polling { attempt: u32 },
    Reconciling,
    Confirmed { attempts: u32 },
    NeedsAttention { reason: AttentionReason, message: String },
}

impl VerificationState {
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            VerificationState::Polling { .. } | VerificationState::Reconciling
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerificationState::Confirmed { .. } | VerificationState::NeedsAttention { .. }
        )
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, VerificationState::Confirmed { .. })
    }

    pub fn view_status(&self) -> ViewStatus {
        match self {
            VerificationState::Idle => ViewStatus::Idle,
            VerificationState::Polling { .. } | VerificationState::Reconciling => {
                ViewStatus::Verifying
            }
            VerificationState::Confirmed { .. } => ViewStatus::Confirmed,
            VerificationState::NeedsAttention { .. } => ViewStatus::NeedsAttention,
        }
    }

    /// Human-readable line for the landing page.
    pub fn message(&self, max_attempts: u32) -> String {
        match self {
            VerificationState::Idle => "Waiting to verify your payment.".to_string(),
            VerificationState::Polling { attempt: 0 } => "Starting payment verification.".to_string(),
            VerificationState::Polling { attempt } => format!(
                "Verifying your payment (check {} of {}).",
                attempt, max_attempts
            ),
            VerificationState::Reconciling => {
                "Asking the payment provider for the latest status.".to_string()
            }
            VerificationState::Confirmed { .. } => {
                "Payment confirmed. Your booking is complete.".to_string()
            }
            VerificationState::NeedsAttention { message, .. } => message.clone(),
        }
    }
}

/// Why a session stopped without confirming the payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttentionReason {
    /// No transaction reference in the redirect.
    MissingReference,
    PaymentFailed,
    UnknownStatus { raw: String },
    /// Budget exhausted while the backend still had no record.
    RecordNotFound,
    /// Budget exhausted while the payment stayed pending.
    Delayed,
    /// Budget exhausted on transport or backend errors.
    Unreachable,
    ReconcileFailed,
}

/// Status projection the landing page renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewStatus {
    Idle,
    Verifying,
    Confirmed,
    NeedsAttention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Toast-style notification raised during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Everything the render layer needs about one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub transaction_ref: Option<String>,
    pub run_id: Option<Uuid>,
    pub status: ViewStatus,
    pub message: String,
    pub state: VerificationState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub is_polling: bool,
    pub last_error: Option<String>,
    pub notices: Vec<Notice>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
