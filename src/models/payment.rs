use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::EnumString;

/// Payment status as reported by the backend verify endpoint.
///
/// Anything outside the known set is kept verbatim in `Other` so contract
/// drift on the backend shows up in the UI instead of being masked.
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
pub enum PaymentStatus {
    #[strum(serialize = "SUCCESS")]
    Success,
    #[strum(serialize = "PENDING")]
    Pending,
    #[strum(serialize = "FAILED")]
    Failed,
    #[strum(default)]
    Other(String),
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Self {
        PaymentStatus::from_str(raw).unwrap_or_else(|_| PaymentStatus::Other(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response envelope shared by every backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

/// `data` payload of the verify endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyData {
    pub status: String,
}

/// Opaque identifier issued by the payment provider and echoed back on the
/// success redirect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Validate)]
pub struct TransactionRef(#[garde(length(chars, min = 1, max = 256))] String);

impl TransactionRef {
    /// Build a reference from an optional raw value, as read from the
    /// redirect query string.
    pub fn parse(raw: Option<&str>) -> Result<Self, ReferenceError> {
        let trimmed = raw.map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            return Err(ReferenceError::Missing);
        }

        let reference = TransactionRef(trimmed.to_string());
        reference.validate().map_err(ReferenceError::Invalid)?;
        Ok(reference)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("No transaction reference was supplied")]
    Missing,

    #[error("Invalid transaction reference: {0}")]
    Invalid(garde::Report),
}
