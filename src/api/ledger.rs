//! Ledger API
//! Mission: posting, reversal, balance, and lookup surface over the double-entry core.

use crate::api::state::AppState;
use crate::ledger::{EntryInput, Entry, LedgerError, PostTransactionResult, Transaction};
use crate::principal::Principal;
use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct PostTransactionBody {
    pub transaction_ref: String,
    pub idempotency_key: Option<String>,
    pub event_type: String,
    pub source_ref: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub entries: Vec<EntryInput>,
    pub transaction_date: String,
    pub override_requested: bool,
    pub override_justification: Option<String>,
}

/// POST /v1/ledger/transactions
pub async fn post_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<PostTransactionBody>,
) -> Result<Json<PostTransactionResult>, LedgerError> {
    let request = crate::ledger::PostTransactionRequest {
        tenant: principal.tenant,
        transaction_ref: body.transaction_ref,
        idempotency_key: body.idempotency_key,
        event_type: body.event_type,
        source_ref: body.source_ref,
        amount: body.amount,
        currency: body.currency,
        description: body.description,
        entries: body.entries,
        transaction_date: body.transaction_date,
        created_by: principal.actor_id,
        override_requested: body.override_requested,
        override_justification: body.override_justification,
        user_role: Some(principal.role),
    };

    let result = state.ledger.post_transaction(request)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ReverseRequest {
    pub reason: String,
}

/// POST /v1/ledger/transactions/:id/reverse
pub async fn reverse_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<ReverseRequest>,
) -> Result<Json<PostTransactionResult>, LedgerError> {
    let result = state
        .ledger
        .reverse_transaction(&id, &body.reason, &principal.actor_id)?;
    Ok(Json(result))
}

/// GET /v1/ledger/accounts/:code/balance
pub async fn get_account_balance(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(code): Path<String>,
) -> Result<Json<crate::ledger::AccountBalance>, LedgerError> {
    let balance = state.ledger.get_account_balance(&principal.tenant, &code)?;
    Ok(Json(balance))
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub entries: Vec<Entry>,
}

/// GET /v1/ledger/transactions/:id
pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<TransactionView>, LedgerError> {
    let (transaction, entries) = state.ledger.get_transaction(&id)?;
    if transaction.tenant != principal.tenant {
        return Err(LedgerError::TransactionNotFound { id });
    }
    Ok(Json(TransactionView { transaction, entries }))
}
