//! Shared fakes for poller, registry and route tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use payment_verify::models::payment::{PaymentStatus, TransactionRef};
use payment_verify::models::session::{Notice, SessionSnapshot};
use payment_verify::services::payment_api::{
    ApiError, PaymentApi, ReconcileOutcome, VerifyOutcome,
};
use payment_verify::services::poller::{PollEvent, PollerSettings, SessionObserver};
use payment_verify::services::sessions::SessionRegistry;

/// One scripted verify response.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(&'static str),
    Rejected(&'static str),
    Error,
    /// Never answers.
    Hang,
}

/// Scripted stand-in for the backend. Replies are consumed in order; once
/// the script is empty every call gets the fallback reply.
pub struct ScriptedApi {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    reconcile: Mutex<Option<ReconcileOutcome>>,
    verify_calls: Mutex<Vec<Instant>>,
    reconcile_calls: Mutex<Vec<Instant>>,
}

impl ScriptedApi {
    pub fn always(reply: Reply) -> Self {
        Self::scripted(Vec::new(), reply)
    }

    pub fn scripted(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            reconcile: Mutex::new(Some(ReconcileOutcome::Accepted { message: None })),
            verify_calls: Mutex::new(Vec::new()),
            reconcile_calls: Mutex::new(Vec::new()),
        }
    }

    /// `None` makes the reconciliation call fail at the transport level.
    pub fn with_reconcile(self, outcome: Option<ReconcileOutcome>) -> Self {
        *self.reconcile.lock().unwrap() = outcome;
        self
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.lock().unwrap().len()
    }

    pub fn verify_times(&self) -> Vec<Instant> {
        self.verify_calls.lock().unwrap().clone()
    }

    pub fn reconcile_count(&self) -> usize {
        self.reconcile_calls.lock().unwrap().len()
    }

    pub fn reconcile_times(&self) -> Vec<Instant> {
        self.reconcile_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentApi for ScriptedApi {
    async fn verify_payment(&self, _reference: &TransactionRef) -> Result<VerifyOutcome, ApiError> {
        self.verify_calls.lock().unwrap().push(Instant::now());
        let reply = {
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
        };

        match reply {
            Reply::Status(raw) => Ok(VerifyOutcome::Status(PaymentStatus::parse(raw))),
            Reply::Rejected(message) => Ok(VerifyOutcome::Rejected {
                message: message.to_string(),
            }),
            Reply::Error => Err(ApiError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn trigger_manual_webhook(
        &self,
        _reference: &TransactionRef,
    ) -> Result<ReconcileOutcome, ApiError> {
        self.reconcile_calls.lock().unwrap().push(Instant::now());
        let outcome = self.reconcile.lock().unwrap().clone();
        outcome.ok_or(ApiError::Status {
            status: 500,
            body: "webhook trigger failed".to_string(),
        })
    }
}

/// Observer that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PollEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<PollEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PollEvent::Notice(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn publish(&self, event: PollEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn reference(raw: &str) -> TransactionRef {
    TransactionRef::parse(Some(raw)).expect("valid reference")
}

pub fn settings() -> PollerSettings {
    PollerSettings::default()
}

/// Sleep in small steps until the session reaches a terminal state.
pub async fn wait_until_settled(
    registry: &SessionRegistry,
    reference: &TransactionRef,
) -> SessionSnapshot {
    for _ in 0..1000 {
        if let Some(snapshot) = registry.snapshot(reference) {
            if snapshot.state.is_terminal() {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("session {} never settled", reference);
}
