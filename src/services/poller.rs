use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::models::payment::{PaymentStatus, TransactionRef};
use crate::models::session::{AttentionReason, Notice, NoticeLevel, VerificationState};
use crate::services::payment_api::{ApiError, PaymentApi, ReconcileOutcome, VerifyOutcome};

/// Tuning for one verification session.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Verify calls allowed per session. PENDING responses, "not found"
    /// rejections and transport errors all draw from this one budget, which
    /// bounds a session to roughly `max_attempts * interval` of wall time.
    pub max_attempts: u32,
    /// Fixed delay between verify calls. There is no backoff.
    pub interval: Duration,
    /// Attempt on which a still-pending payment raises the slow notice.
    pub slow_notice_attempt: u32,
    /// Pause between an accepted manual reconciliation and the fresh poll.
    pub reconcile_restart_delay: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_millis(2000),
            slow_notice_attempt: 10,
            reconcile_restart_delay: Duration::from_millis(2000),
        }
    }
}

/// Something observable happened in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    State(VerificationState),
    Notice(Notice),
    /// A single attempt failed; the session may still retry.
    AttemptFailed(String),
}

/// Receives every event of a running session, in order.
pub trait SessionObserver: Send + Sync {
    fn publish(&self, event: PollEvent);
}

/// How a driver call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    Finished(VerificationState),
    Cancelled,
}

/// Decision taken after one verify response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Retry { slow_notice: Option<Notice> },
    Finish {
        state: VerificationState,
        notice: Notice,
    },
}

/// Pure transition logic of the verification poller.
#[derive(Debug, Clone)]
pub struct Poller {
    settings: PollerSettings,
}

impl Poller {
    pub fn new(settings: PollerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Decide what follows the response to `attempt` (1-based).
    pub fn observe(&self, attempt: u32, result: &Result<VerifyOutcome, ApiError>) -> Step {
        match result {
            Ok(VerifyOutcome::Status(PaymentStatus::Success)) => Step::Finish {
                state: VerificationState::Confirmed { attempts: attempt },
                notice: Notice::new(
                    NoticeLevel::Info,
                    "Payment confirmed! Your booking is complete.",
                ),
            },
            Ok(VerifyOutcome::Status(PaymentStatus::Pending)) => {
                let slow_notice = (attempt == self.settings.slow_notice_attempt).then(|| {
                    Notice::new(
                        NoticeLevel::Warning,
                        "Payment verification is taking longer than usual. Please keep this page open.",
                    )
                });
                if attempt < self.settings.max_attempts {
                    Step::Retry { slow_notice }
                } else {
                    attention(
                        AttentionReason::Delayed,
                        "Payment verification is delayed. Use Check Again, trigger a manual status check, or contact support if you were charged.",
                    )
                }
            }
            Ok(VerifyOutcome::Status(PaymentStatus::Failed)) => attention(
                AttentionReason::PaymentFailed,
                "Payment failed. No booking was made; please try again or contact support.",
            ),
            Ok(VerifyOutcome::Status(PaymentStatus::Other(raw))) => attention(
                AttentionReason::UnknownStatus { raw: raw.clone() },
                &format!("Unknown payment status: {}", raw),
            ),
            Ok(VerifyOutcome::Rejected { message }) if is_not_found(message) => {
                self.retry_or(attempt, || {
                    attention(
                        AttentionReason::RecordNotFound,
                        "Payment record not found. If you were charged, trigger a manual status check or contact support.",
                    )
                })
            }
            Ok(VerifyOutcome::Rejected { .. }) | Err(_) => self.retry_or(attempt, || {
                attention(
                    AttentionReason::Unreachable,
                    "Unable to verify payment status. Use Check Again in a moment or contact support.",
                )
            }),
        }
    }

    fn retry_or(&self, attempt: u32, give_up: impl FnOnce() -> Step) -> Step {
        if attempt < self.settings.max_attempts {
            Step::Retry { slow_notice: None }
        } else {
            give_up()
        }
    }
}

fn attention(reason: AttentionReason, message: &str) -> Step {
    Step::Finish {
        state: VerificationState::NeedsAttention {
            reason,
            message: message.to_string(),
        },
        notice: Notice::new(NoticeLevel::Error, message),
    }
}

fn is_not_found(message: &str) -> bool {
    message.to_ascii_lowercase().contains("not found")
}

/// State reported when the redirect carried no transaction reference.
pub fn missing_reference_state() -> VerificationState {
    VerificationState::NeedsAttention {
        reason: AttentionReason::MissingReference,
        message: "No transaction reference was found in the payment redirect. Please contact support."
            .to_string(),
    }
}

/// Resolves once the session is cancelled or its owner is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

/// Poll the verify endpoint until the session reaches a terminal state, the
/// attempt budget runs out, or `cancel` fires.
///
/// Attempts run strictly one after another; cancellation is honoured while a
/// call is in flight and while waiting for the next attempt.
pub async fn run_session(
    api: &dyn PaymentApi,
    reference: &TransactionRef,
    settings: &PollerSettings,
    observer: &dyn SessionObserver,
    cancel: &mut watch::Receiver<bool>,
) -> RunEnd {
    let poller = Poller::new(settings.clone());
    let mut attempt = 0;

    tracing::info!(
        tran_id = %reference,
        max_attempts = settings.max_attempts,
        interval_ms = settings.interval.as_millis() as u64,
        "Starting payment verification"
    );

    loop {
        if *cancel.borrow() {
            return RunEnd::Cancelled;
        }

        attempt += 1;
        observer.publish(PollEvent::State(VerificationState::Polling { attempt }));
        metrics::counter!("payment_verify_attempts_total").increment(1);

        let result = tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                tracing::info!(tran_id = %reference, attempt, "Verification cancelled mid-request");
                return RunEnd::Cancelled;
            }
            result = api.verify_payment(reference) => result,
        };

        match &result {
            Ok(VerifyOutcome::Status(status)) => {
                tracing::debug!(tran_id = %reference, attempt, status = %status, "Verify response");
            }
            Ok(VerifyOutcome::Rejected { message }) => {
                tracing::warn!(tran_id = %reference, attempt, message = %message, "Verify rejected");
                observer.publish(PollEvent::AttemptFailed(message.clone()));
            }
            Err(e) => {
                tracing::warn!(tran_id = %reference, attempt, error = %e, "Verify call failed");
                observer.publish(PollEvent::AttemptFailed(e.to_string()));
            }
        }

        match poller.observe(attempt, &result) {
            Step::Retry { slow_notice } => {
                if let Some(notice) = slow_notice {
                    tracing::warn!(tran_id = %reference, attempt, "Payment still pending");
                    observer.publish(PollEvent::Notice(notice));
                }

                tokio::select! {
                    biased;
                    _ = cancelled(cancel) => {
                        tracing::info!(tran_id = %reference, attempt, "Verification cancelled while waiting");
                        return RunEnd::Cancelled;
                    }
                    _ = sleep(settings.interval) => {}
                }
            }
            Step::Finish { state, notice } => {
                tracing::info!(
                    tran_id = %reference,
                    attempts = attempt,
                    state = ?state,
                    "Payment verification finished"
                );
                metrics::counter!("payment_verify_sessions_total", "outcome" => outcome_label(&state))
                    .increment(1);
                observer.publish(PollEvent::Notice(notice));
                observer.publish(PollEvent::State(state.clone()));
                return RunEnd::Finished(state);
            }
        }
    }
}

/// Send the one-shot manual reconciliation request.
///
/// Never retried. On failure the session is moved to
/// `NeedsAttention{ReconcileFailed}` and the failure message is returned.
pub async fn trigger_reconciliation(
    api: &dyn PaymentApi,
    reference: &TransactionRef,
    observer: &dyn SessionObserver,
) -> Result<(), String> {
    observer.publish(PollEvent::State(VerificationState::Reconciling));
    tracing::info!(tran_id = %reference, "Triggering manual reconciliation");

    let failure = match api.trigger_manual_webhook(reference).await {
        Ok(ReconcileOutcome::Accepted { message }) => {
            metrics::counter!("payment_verify_reconcile_total", "result" => "accepted").increment(1);
            tracing::info!(tran_id = %reference, message = ?message, "Manual reconciliation accepted");
            observer.publish(PollEvent::Notice(Notice::new(
                NoticeLevel::Info,
                message.unwrap_or_else(|| {
                    "Manual status check triggered. Re-checking your payment.".to_string()
                }),
            )));
            return Ok(());
        }
        Ok(ReconcileOutcome::Rejected { message }) => {
            metrics::counter!("payment_verify_reconcile_total", "result" => "rejected").increment(1);
            message
        }
        Err(e) => {
            metrics::counter!("payment_verify_reconcile_total", "result" => "error").increment(1);
            format!("Manual status check failed: {}", e)
        }
    };

    tracing::warn!(tran_id = %reference, message = %failure, "Manual reconciliation failed");
    observer.publish(PollEvent::Notice(Notice::new(NoticeLevel::Error, failure.clone())));
    observer.publish(PollEvent::State(reconcile_failed_state(&failure)));
    Err(failure)
}

/// Wait out the restart delay after an accepted reconciliation, then poll
/// a fresh session from attempt zero.
pub async fn resume_after_reconciliation(
    api: &dyn PaymentApi,
    reference: &TransactionRef,
    settings: &PollerSettings,
    observer: &dyn SessionObserver,
    cancel: &mut watch::Receiver<bool>,
) -> RunEnd {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => return RunEnd::Cancelled,
        _ = sleep(settings.reconcile_restart_delay) => {}
    }

    run_session(api, reference, settings, observer, cancel).await
}

/// Reconcile and, if the backend accepted it, resume polling.
pub async fn reconcile_session(
    api: &dyn PaymentApi,
    reference: &TransactionRef,
    settings: &PollerSettings,
    observer: &dyn SessionObserver,
    cancel: &mut watch::Receiver<bool>,
) -> RunEnd {
    let triggered = tokio::select! {
        biased;
        _ = cancelled(cancel) => return RunEnd::Cancelled,
        result = trigger_reconciliation(api, reference, observer) => result,
    };

    match triggered {
        Ok(()) => resume_after_reconciliation(api, reference, settings, observer, cancel).await,
        Err(message) => RunEnd::Finished(reconcile_failed_state(&message)),
    }
}

fn reconcile_failed_state(message: &str) -> VerificationState {
    VerificationState::NeedsAttention {
        reason: AttentionReason::ReconcileFailed,
        message: message.to_string(),
    }
}

fn outcome_label(state: &VerificationState) -> &'static str {
    match state {
        VerificationState::Confirmed { .. } => "confirmed",
        VerificationState::NeedsAttention { reason, .. } => match reason {
            AttentionReason::MissingReference => "missing_reference",
            AttentionReason::PaymentFailed => "failed",
            AttentionReason::UnknownStatus { .. } => "unknown_status",
            AttentionReason::RecordNotFound => "not_found",
            AttentionReason::Delayed => "delayed",
            AttentionReason::Unreachable => "unreachable",
            AttentionReason::ReconcileFailed => "reconcile_failed",
        },
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poller() -> Poller {
        Poller::new(PollerSettings::default())
    }

    fn status(status: PaymentStatus) -> Result<VerifyOutcome, ApiError> {
        Ok(VerifyOutcome::Status(status))
    }

    fn finished_reason(step: Step) -> AttentionReason {
        match step {
            Step::Finish {
                state: VerificationState::NeedsAttention { reason, .. },
                ..
            } => reason,
            other => panic!("expected needs-attention, got {:?}", other),
        }
    }

    #[test]
    fn success_confirms_on_the_current_attempt() {
        let step = poller().observe(4, &status(PaymentStatus::Success));
        assert!(matches!(
            step,
            Step::Finish {
                state: VerificationState::Confirmed { attempts: 4 },
                ..
            }
        ));
    }

    #[test]
    fn success_on_slow_attempt_raises_no_warning() {
        let step = poller().observe(10, &status(PaymentStatus::Success));
        match step {
            Step::Finish { notice, .. } => assert_eq!(notice.level, NoticeLevel::Info),
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn pending_warns_only_on_the_slow_attempt() {
        let p = poller();
        for attempt in 1..30 {
            match p.observe(attempt, &status(PaymentStatus::Pending)) {
                Step::Retry { slow_notice } => {
                    assert_eq!(slow_notice.is_some(), attempt == 10, "attempt {}", attempt)
                }
                other => panic!("attempt {} should retry, got {:?}", attempt, other),
            }
        }
    }

    #[test]
    fn pending_at_cap_is_delayed() {
        let reason = finished_reason(poller().observe(30, &status(PaymentStatus::Pending)));
        assert_eq!(reason, AttentionReason::Delayed);
    }

    #[test]
    fn failed_and_unknown_are_terminal_immediately() {
        let p = poller();
        assert_eq!(
            finished_reason(p.observe(1, &status(PaymentStatus::Failed))),
            AttentionReason::PaymentFailed
        );

        match p.observe(2, &status(PaymentStatus::Other("REFUNDED".to_string()))) {
            Step::Finish {
                state: VerificationState::NeedsAttention { reason, message },
                ..
            } => {
                assert_eq!(
                    reason,
                    AttentionReason::UnknownStatus {
                        raw: "REFUNDED".to_string()
                    }
                );
                assert!(message.contains("REFUNDED"));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn not_found_retries_then_reports_missing_record() {
        let p = poller();
        let rejected = Ok(VerifyOutcome::Rejected {
            message: "Payment Not Found".to_string(),
        });
        assert_eq!(p.observe(29, &rejected), Step::Retry { slow_notice: None });
        assert_eq!(
            finished_reason(p.observe(30, &rejected)),
            AttentionReason::RecordNotFound
        );
    }

    #[test]
    fn other_errors_retry_then_report_unreachable() {
        let p = poller();
        let error: Result<VerifyOutcome, ApiError> = Err(ApiError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        });
        assert_eq!(p.observe(1, &error), Step::Retry { slow_notice: None });
        assert_eq!(
            finished_reason(p.observe(30, &error)),
            AttentionReason::Unreachable
        );

        let rejected = Ok(VerifyOutcome::Rejected {
            message: "internal error".to_string(),
        });
        assert_eq!(
            finished_reason(p.observe(30, &rejected)),
            AttentionReason::Unreachable
        );
    }

    #[test]
    fn missing_reference_is_a_configuration_error() {
        assert!(matches!(
            missing_reference_state(),
            VerificationState::NeedsAttention {
                reason: AttentionReason::MissingReference,
                ..
            }
        ));
    }
}
