//! Settlement API
//! Mission: drive a merchant settlement through its state machine.

use crate::api::state::AppState;
use crate::principal::Principal;
use crate::settlement::{Settlement, SettlementError};
use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateSettlementRequest {
    pub merchant: String,
    pub settlement_ref: String,
    pub net_amount: i64,
    pub transaction_date: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

/// POST /v1/settlements
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateSettlementRequest>,
) -> Result<Json<Settlement>, SettlementError> {
    let settlement = state.settlements.create(
        &principal.tenant,
        &body.merchant,
        &body.settlement_ref,
        body.net_amount,
        &body.transaction_date,
        body.max_retries,
    )?;
    Ok(Json(settlement))
}

/// GET /v1/settlements/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Settlement>, SettlementError> {
    let settlement = state.settlements.get(&id)?;
    if settlement.tenant != principal.tenant {
        return Err(SettlementError::NotFound);
    }
    Ok(Json(settlement))
}

fn check_owned(state: &AppState, id: &str, principal: &Principal) -> Result<(), SettlementError> {
    let settlement = state.settlements.get(id)?;
    if settlement.tenant != principal.tenant {
        return Err(SettlementError::NotFound);
    }
    Ok(())
}

/// POST /v1/settlements/:id/reserve
pub async fn reserve(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Settlement>, SettlementError> {
    check_owned(&state, &id, &principal)?;
    Ok(Json(state.settlements.reserve_funds(&id, &principal.actor_id, principal.role)?))
}

/// POST /v1/settlements/:id/send
pub async fn send(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Settlement>, SettlementError> {
    check_owned(&state, &id, &principal)?;
    Ok(Json(state.settlements.send_to_bank(&id, &principal.actor_id, principal.role)?))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub utr: String,
}

/// POST /v1/settlements/:id/confirm
pub async fn confirm(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<Settlement>, SettlementError> {
    check_owned(&state, &id, &principal)?;
    Ok(Json(state.settlements.confirm_by_bank(&id, &body.utr, &principal.actor_id, principal.role)?))
}

/// POST /v1/settlements/:id/settle
pub async fn settle(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Settlement>, SettlementError> {
    check_owned(&state, &id, &principal)?;
    Ok(Json(state.settlements.mark_settled(&id, &principal.actor_id, principal.role)?))
}

/// POST /v1/settlements/:id/fail
pub async fn fail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Settlement>, SettlementError> {
    check_owned(&state, &id, &principal)?;
    Ok(Json(state.settlements.mark_failed(&id, &principal.actor_id, principal.role)?))
}

/// POST /v1/settlements/:id/retry
pub async fn retry(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Settlement>, SettlementError> {
    check_owned(&state, &id, &principal)?;
    Ok(Json(state.settlements.retry(&id, &principal.actor_id, principal.role)?))
}
