//! Payment API
//! Mission: POST /v1/payments, the orchestrator's single entry point.

use crate::api::state::AppState;
use crate::error::CoreError;
use crate::ledger::PostTransactionResult;
use crate::orchestrator::PaymentRequest;
use crate::principal::Principal;
use crate::router::GatewayCandidate;
use axum::extract::{Extension, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    pub source_ref: String,
    pub amount: i64,
    pub currency: String,
    pub platform_fee: i64,
    pub gateway_fee: i64,
    pub transaction_date: String,
    pub candidates: Vec<GatewayCandidate>,
}

/// POST /v1/payments
pub async fn charge(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<ChargeRequest>,
) -> Result<Json<PostTransactionResult>, CoreError> {
    let request = PaymentRequest {
        tenant: principal.tenant,
        source_ref: payload.source_ref,
        amount: payload.amount,
        currency: payload.currency,
        platform_fee: payload.platform_fee,
        gateway_fee: payload.gateway_fee,
        transaction_date: payload.transaction_date,
    };

    let result = state
        .orchestrator
        .process_payment(request, &payload.candidates)
        .await?;

    Ok(Json(result))
}
