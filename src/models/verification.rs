use serde::{Deserialize, Serialize};

/// Query string of the provider's success redirect. The reference is
/// validated by `TransactionRef::parse` after trimming.
#[derive(Debug, Deserialize)]
pub struct PaymentSuccessQuery {
    pub tran_id: Option<String>,
}

/// Response after a manual action was accepted.
#[derive(Debug, Serialize)]
pub struct ActionAccepted {
    pub transaction_ref: String,
    pub action: &'static str,
    pub message: String,
}

/// Error body returned by every API route.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}
