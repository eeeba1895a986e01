//! HTTP surface of the clear-all protocol. Confirmation tokens live in
//! server memory between the "proceed" and the final confirm/cancel.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use heartline_types::api::{
    AnswerRequest, Claims, ClearAllRequest, ClearAllResponse, DismissRequest, DismissResponse,
    PairStateResponse,
};

use crate::auth::{AppState, AppStateInner};
use crate::error::{HeartlineError, Result};
use crate::protocol::{AnswerKind, ClearConfirmation, Dismissal, PairState};

pub async fn get_state(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<PairStateResponse>> {
    let pair = state.protocol(&claims).await?.state().await?;
    Ok(Json(match pair {
        PairState::Idle => PairStateResponse::Idle,
        PairState::Requested(request) => PairStateResponse::Requested { request },
        PairState::AwaitingMyAnswer(request) => PairStateResponse::AwaitingMyAnswer { request },
        PairState::Responded(response) => PairStateResponse::Responded { response },
    }))
}

pub async fn request_clear(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ClearAllRequest>,
) -> Result<impl IntoResponse> {
    let record = state.protocol(&claims).await?.request(&req.reason).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn answer_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AnswerRequest>,
) -> Result<impl IntoResponse> {
    let kind = if req.accept {
        AnswerKind::Accept
    } else {
        AnswerKind::Decline
    };

    let protocol = state.protocol(&claims).await?;
    let draft = protocol.begin_respond(request_id, kind).await?;
    let response = protocol
        .submit_respond(draft, req.reason.as_deref().unwrap_or_default())
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn dismiss_response(
    State(state): State<AppState>,
    Path(response_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DismissRequest>,
) -> Result<Json<DismissResponse>> {
    let dismissal = if req.proceed {
        Dismissal::Proceed
    } else {
        Dismissal::Close
    };

    let confirmation = state
        .protocol(&claims)
        .await?
        .dismiss(response_id, dismissal)
        .await?;

    let confirmation_pending = match confirmation {
        Some(confirmation) => {
            park(&state, claims.sub, confirmation)?;
            true
        }
        None => false,
    };
    Ok(Json(DismissResponse {
        confirmation_pending,
    }))
}

pub async fn confirm_clear(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ClearAllResponse>> {
    let protocol = state.protocol(&claims).await?;
    let confirmation = take(&state, claims.sub)?;
    let report = protocol.confirm(confirmation).await?;
    Ok(Json(ClearAllResponse {
        deleted: report.deleted,
    }))
}

pub async fn cancel_clear(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode> {
    let protocol = state.protocol(&claims).await?;
    protocol.cancel(take(&state, claims.sub)?);
    Ok(StatusCode::NO_CONTENT)
}

fn park(state: &AppStateInner, user_id: Uuid, confirmation: ClearConfirmation) -> Result<()> {
    let mut pending = state
        .pending_clears
        .lock()
        .map_err(|_| HeartlineError::InvalidState("Confirmation state unavailable.".into()))?;
    if let Some(stale) = pending.insert(user_id, confirmation) {
        warn!("Replacing unconfirmed clear-all with {}", stale.partner());
    }
    Ok(())
}

fn take(state: &AppStateInner, user_id: Uuid) -> Result<ClearConfirmation> {
    state
        .pending_clears
        .lock()
        .map_err(|_| HeartlineError::InvalidState("Confirmation state unavailable.".into()))?
        .remove(&user_id)
        .ok_or_else(|| {
            HeartlineError::InvalidState("There is no clear-all waiting for confirmation.".into())
        })
}
