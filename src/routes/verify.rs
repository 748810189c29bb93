use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::models::payment::{ReferenceError, TransactionRef};
use crate::models::session::SessionSnapshot;
use crate::models::verification::{ActionAccepted, ErrorBody, PaymentSuccessQuery};
use crate::services::sessions::SessionError;

/// Errors surfaced by the verification routes.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("{0}")]
    InvalidReference(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            RouteError::InvalidReference(_) => (StatusCode::BAD_REQUEST, "invalid_reference"),
            RouteError::Session(SessionError::NotFound) => (StatusCode::NOT_FOUND, "not_found"),
            RouteError::Session(SessionError::Busy(_)) => (StatusCode::CONFLICT, "busy"),
            RouteError::Session(SessionError::ReconcileFailed(_)) => {
                (StatusCode::BAD_GATEWAY, "reconcile_failed")
            }
        };
        let body = ErrorBody {
            error,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn parse_reference(raw: &str) -> Result<TransactionRef, RouteError> {
    TransactionRef::parse(Some(raw)).map_err(|e| RouteError::InvalidReference(e.to_string()))
}

/// GET /api/v1/payment-success?tran_id=… — landing after the provider redirect.
pub async fn payment_success(
    State(state): State<AppState>,
    Query(query): Query<PaymentSuccessQuery>,
) -> Result<Json<SessionSnapshot>, RouteError> {
    if let Err(e @ ReferenceError::Invalid(_)) = TransactionRef::parse(query.tran_id.as_deref()) {
        return Err(RouteError::InvalidReference(e.to_string()));
    }

    Ok(Json(state.sessions.open(query.tran_id.as_deref())))
}

/// GET /api/v1/verifications/{tran_id} — current session state.
pub async fn get_session(
    State(state): State<AppState>,
    Path(tran_id): Path<String>,
) -> Result<Json<SessionSnapshot>, RouteError> {
    let reference = parse_reference(&tran_id)?;
    state
        .sessions
        .snapshot(&reference)
        .map(Json)
        .ok_or(RouteError::Session(SessionError::NotFound))
}

/// POST /api/v1/verifications/{tran_id}/check-again
pub async fn check_again(
    State(state): State<AppState>,
    Path(tran_id): Path<String>,
) -> Result<(StatusCode, Json<ActionAccepted>), RouteError> {
    let reference = parse_reference(&tran_id)?;
    let snapshot = state.sessions.check_again(&reference)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ActionAccepted {
            transaction_ref: reference.to_string(),
            action: "check_again",
            message: snapshot.message,
        }),
    ))
}

/// POST /api/v1/verifications/{tran_id}/reconcile — manual webhook trigger.
///
/// 202 once the backend accepted the request, 502 when it rejected it or
/// could not be reached.
pub async fn reconcile(
    State(state): State<AppState>,
    Path(tran_id): Path<String>,
) -> Result<(StatusCode, Json<ActionAccepted>), RouteError> {
    let reference = parse_reference(&tran_id)?;
    let snapshot = state.sessions.reconcile(&reference).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ActionAccepted {
            transaction_ref: reference.to_string(),
            action: "reconcile",
            message: snapshot.message,
        }),
    ))
}

/// DELETE /api/v1/verifications/{tran_id} — the user left the page.
pub async fn discard(
    State(state): State<AppState>,
    Path(tran_id): Path<String>,
) -> Result<StatusCode, RouteError> {
    let reference = parse_reference(&tran_id)?;
    state.sessions.discard(&reference)?;
    Ok(StatusCode::NO_CONTENT)
}
