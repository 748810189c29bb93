use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::payment::{ReferenceError, TransactionRef};
use crate::models::session::{
    Notice, NoticeLevel, SessionSnapshot, VerificationState, ViewStatus,
};
use crate::services::payment_api::PaymentApi;
use crate::services::poller::{
    self, missing_reference_state, PollEvent, PollerSettings, RunEnd, SessionObserver,
};

type SessionMap = Arc<Mutex<HashMap<TransactionRef, SessionRecord>>>;

struct SessionRecord {
    run_id: Uuid,
    state: VerificationState,
    attempt: u32,
    last_error: Option<String>,
    notices: Vec<Notice>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    touched: Instant,
    cancel: watch::Sender<bool>,
}

impl SessionRecord {
    fn new(state: VerificationState) -> (Self, watch::Receiver<bool>) {
        let (cancel, cancel_rx) = watch::channel(false);
        let now = Utc::now();
        let record = Self {
            run_id: Uuid::new_v4(),
            state,
            attempt: 0,
            last_error: None,
            notices: Vec::new(),
            started_at: now,
            updated_at: now,
            touched: Instant::now(),
            cancel,
        };
        (record, cancel_rx)
    }

    /// Supersede the current run: cancel it and hand out a fresh run id.
    fn restart(&mut self, state: VerificationState) -> watch::Receiver<bool> {
        let _ = self.cancel.send(true);
        let (cancel, cancel_rx) = watch::channel(false);
        let now = Utc::now();
        self.run_id = Uuid::new_v4();
        self.state = state;
        self.attempt = 0;
        self.last_error = None;
        self.notices.clear();
        self.started_at = now;
        self.updated_at = now;
        self.touched = Instant::now();
        self.cancel = cancel;
        cancel_rx
    }

    fn snapshot(&self, reference: &TransactionRef, max_attempts: u32) -> SessionSnapshot {
        SessionSnapshot {
            transaction_ref: Some(reference.to_string()),
            run_id: Some(self.run_id),
            status: self.state.view_status(),
            message: self.state.message(max_attempts),
            state: self.state.clone(),
            attempt: self.attempt,
            max_attempts,
            is_polling: self.state.is_busy(),
            last_error: self.last_error.clone(),
            notices: self.notices.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RunMode {
    Poll,
    /// Continue after an accepted reconciliation.
    Resume,
}

/// Session counts for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounts {
    pub total: usize,
    pub busy: usize,
}

/// Tracks one verification session per transaction reference and runs
/// at most one poll per reference at a time.
pub struct SessionRegistry {
    api: Arc<dyn PaymentApi>,
    settings: PollerSettings,
    retention: Duration,
    sessions: SessionMap,
}

impl SessionRegistry {
    pub fn new(api: Arc<dyn PaymentApi>, settings: PollerSettings, retention: Duration) -> Self {
        Self {
            api,
            settings,
            retention,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Landing on the success page. Starts polling for a new reference.
    /// A session that ended without confirmation is polled again from
    /// attempt zero; a confirmed or still running one is returned untouched.
    pub fn open(&self, raw_reference: Option<&str>) -> SessionSnapshot {
        let reference = match TransactionRef::parse(raw_reference) {
            Ok(reference) => reference,
            Err(e) => return self.configuration_error(e),
        };

        let mut sessions = lock(&self.sessions);
        self.evict_expired(&mut sessions);

        let (run_id, cancel_rx, snapshot) = match sessions.get_mut(&reference) {
            Some(record) if !record.state.is_terminal() || record.state.is_confirmed() => {
                return record.snapshot(&reference, self.settings.max_attempts);
            }
            Some(record) => {
                tracing::info!(tran_id = %reference, "Reopened unconfirmed session, polling again");
                let cancel_rx = record.restart(VerificationState::Polling { attempt: 0 });
                (
                    record.run_id,
                    cancel_rx,
                    record.snapshot(&reference, self.settings.max_attempts),
                )
            }
            None => {
                let (record, cancel_rx) =
                    SessionRecord::new(VerificationState::Polling { attempt: 0 });
                let run_id = record.run_id;
                let snapshot = record.snapshot(&reference, self.settings.max_attempts);
                sessions.insert(reference.clone(), record);
                (run_id, cancel_rx, snapshot)
            }
        };
        update_busy_gauge(&sessions);
        drop(sessions);

        self.launch(reference, run_id, cancel_rx, RunMode::Poll);
        snapshot
    }

    /// "Check Again": restart polling from attempt zero.
    pub fn check_again(&self, reference: &TransactionRef) -> Result<SessionSnapshot, SessionError> {
        let mut sessions = lock(&self.sessions);
        let record = sessions.get_mut(reference).ok_or(SessionError::NotFound)?;
        if record.state.is_busy() {
            return Err(SessionError::Busy(record.state.view_status()));
        }

        let cancel_rx = record.restart(VerificationState::Polling { attempt: 0 });
        let run_id = record.run_id;
        let snapshot = record.snapshot(reference, self.settings.max_attempts);
        update_busy_gauge(&sessions);
        drop(sessions);

        tracing::info!(tran_id = %reference, run_id = %run_id, "Manual re-check requested");
        self.launch(reference.clone(), run_id, cancel_rx, RunMode::Poll);
        Ok(snapshot)
    }

    /// Manual reconciliation. The backend call is made inline so its
    /// rejection reaches the caller as `ReconcileFailed`; on acceptance a
    /// fresh poll is scheduled after the restart delay. Creates the session
    /// if the reference is unknown.
    pub async fn reconcile(
        &self,
        reference: &TransactionRef,
    ) -> Result<SessionSnapshot, SessionError> {
        let (run_id, mut cancel_rx) = {
            let mut sessions = lock(&self.sessions);
            let started = match sessions.get_mut(reference) {
                Some(record) => {
                    if record.state.is_busy() {
                        return Err(SessionError::Busy(record.state.view_status()));
                    }
                    let cancel_rx = record.restart(VerificationState::Reconciling);
                    (record.run_id, cancel_rx)
                }
                None => {
                    let (record, cancel_rx) = SessionRecord::new(VerificationState::Reconciling);
                    let run_id = record.run_id;
                    sessions.insert(reference.clone(), record);
                    (run_id, cancel_rx)
                }
            };
            update_busy_gauge(&sessions);
            started
        };

        let observer = RunObserver {
            sessions: Arc::clone(&self.sessions),
            reference: reference.clone(),
            run_id,
        };
        let triggered = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|stop| *stop) => return Err(SessionError::NotFound),
            result = poller::trigger_reconciliation(self.api.as_ref(), reference, &observer) => result,
        };
        triggered.map_err(SessionError::ReconcileFailed)?;

        self.launch(reference.clone(), run_id, cancel_rx, RunMode::Resume);
        self.snapshot(reference).ok_or(SessionError::NotFound)
    }

    pub fn snapshot(&self, reference: &TransactionRef) -> Option<SessionSnapshot> {
        lock(&self.sessions)
            .get(reference)
            .map(|record| record.snapshot(reference, self.settings.max_attempts))
    }

    /// The user left the page: stop any running poll and forget the session.
    pub fn discard(&self, reference: &TransactionRef) -> Result<(), SessionError> {
        let mut sessions = lock(&self.sessions);
        let record = sessions.remove(reference).ok_or(SessionError::NotFound)?;
        let _ = record.cancel.send(true);
        update_busy_gauge(&sessions);
        tracing::info!(tran_id = %reference, "Verification session discarded");
        Ok(())
    }

    pub fn counts(&self) -> SessionCounts {
        let sessions = lock(&self.sessions);
        SessionCounts {
            total: sessions.len(),
            busy: sessions.values().filter(|r| r.state.is_busy()).count(),
        }
    }

    fn configuration_error(&self, error: ReferenceError) -> SessionSnapshot {
        tracing::warn!(error = %error, "Payment redirect without a usable transaction reference");
        metrics::counter!("payment_verify_sessions_total", "outcome" => "missing_reference")
            .increment(1);

        let state = missing_reference_state();
        let message = state.message(self.settings.max_attempts);
        let now = Utc::now();
        SessionSnapshot {
            transaction_ref: None,
            run_id: None,
            status: state.view_status(),
            message: message.clone(),
            state,
            attempt: 0,
            max_attempts: self.settings.max_attempts,
            is_polling: false,
            last_error: Some(error.to_string()),
            notices: vec![Notice::new(NoticeLevel::Error, message)],
            started_at: now,
            updated_at: now,
        }
    }

    fn evict_expired(&self, sessions: &mut HashMap<TransactionRef, SessionRecord>) {
        let retention = self.retention;
        sessions.retain(|reference, record| {
            let keep = !record.state.is_terminal() || record.touched.elapsed() < retention;
            if !keep {
                tracing::debug!(tran_id = %reference, "Evicting finished verification session");
            }
            keep
        });
    }

    fn launch(
        &self,
        reference: TransactionRef,
        run_id: Uuid,
        mut cancel: watch::Receiver<bool>,
        mode: RunMode,
    ) {
        let api = Arc::clone(&self.api);
        let settings = self.settings.clone();
        let observer = RunObserver {
            sessions: Arc::clone(&self.sessions),
            reference: reference.clone(),
            run_id,
        };

        tokio::spawn(async move {
            let end = match mode {
                RunMode::Poll => {
                    poller::run_session(api.as_ref(), &reference, &settings, &observer, &mut cancel)
                        .await
                }
                RunMode::Resume => {
                    poller::resume_after_reconciliation(
                        api.as_ref(),
                        &reference,
                        &settings,
                        &observer,
                        &mut cancel,
                    )
                    .await
                }
            };

            if end == RunEnd::Cancelled {
                tracing::debug!(tran_id = %reference, run_id = %run_id, "Verification run cancelled");
            }
        });
    }
}

/// Writes run events into the registry, ignoring runs that were superseded.
struct RunObserver {
    sessions: SessionMap,
    reference: TransactionRef,
    run_id: Uuid,
}

impl SessionObserver for RunObserver {
    fn publish(&self, event: PollEvent) {
        let mut sessions = lock(&self.sessions);
        let Some(record) = sessions.get_mut(&self.reference) else {
            return;
        };
        if record.run_id != self.run_id {
            return;
        }

        record.updated_at = Utc::now();
        record.touched = Instant::now();
        match event {
            PollEvent::State(state) => {
                if let VerificationState::Polling { attempt } = state {
                    record.attempt = attempt;
                }
                record.state = state;
                update_busy_gauge(&sessions);
            }
            PollEvent::Notice(notice) => record.notices.push(notice),
            PollEvent::AttemptFailed(message) => record.last_error = Some(message),
        }
    }
}

fn lock(
    sessions: &Mutex<HashMap<TransactionRef, SessionRecord>>,
) -> MutexGuard<'_, HashMap<TransactionRef, SessionRecord>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

fn update_busy_gauge(sessions: &HashMap<TransactionRef, SessionRecord>) {
    let busy = sessions.values().filter(|r| r.state.is_busy()).count();
    metrics::gauge!("payment_verify_active_sessions").set(busy as f64);
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No verification session for this transaction reference")]
    NotFound,

    #[error("A verification is already in progress ({0:?})")]
    Busy(ViewStatus),

    #[error("{0}")]
    ReconcileFailed(String),
}
