//! Settlement State Machine
//! Mission: the monotonic lifecycle moving a merchant's earned balance from "owed"
//! to "paid to bank." Forward-only except the single FAILED -> RETRIED -> FUNDS_RESERVED
//! edge. Never touches ledger entries after the initial CREATED posting.

use crate::choreographer::{EventChoreographer, SettlementPostedEvent};
use crate::db::SharedConn;
use crate::ledger::LedgerEngine;
use crate::principal::Role;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementState {
    Created,
    FundsReserved,
    SentToBank,
    BankConfirmed,
    Settled,
    Failed,
    Retried,
}

impl SettlementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Created => "CREATED",
            SettlementState::FundsReserved => "FUNDS_RESERVED",
            SettlementState::SentToBank => "SENT_TO_BANK",
            SettlementState::BankConfirmed => "BANK_CONFIRMED",
            SettlementState::Settled => "SETTLED",
            SettlementState::Failed => "FAILED",
            SettlementState::Retried => "RETRIED",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "FUNDS_RESERVED" => SettlementState::FundsReserved,
            "SENT_TO_BANK" => SettlementState::SentToBank,
            "BANK_CONFIRMED" => SettlementState::BankConfirmed,
            "SETTLED" => SettlementState::Settled,
            "FAILED" => SettlementState::Failed,
            "RETRIED" => SettlementState::Retried,
            _ => SettlementState::Created,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementState::Settled)
    }

    /// Transitions requiring `finance_admin` authority: authorising bank dispatch
    /// and everything that follows it. Marking a settlement FAILED (the failure
    /// report itself) and RETRIED are not gated - any operator may record those.
    fn requires_finance_admin(&self) -> bool {
        matches!(
            self,
            SettlementState::SentToBank | SettlementState::BankConfirmed | SettlementState::Settled
        )
    }
}

#[derive(Debug)]
pub enum SettlementError {
    NotFound,
    InvalidTransition { from: SettlementState, to: SettlementState },
    Terminal,
    MissingUtr,
    DuplicateUtr,
    InsufficientRole,
    RetryExhausted { retry_count: u32, max_retries: u32 },
}

impl fmt::Display for SettlementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementError::NotFound => write!(f, "settlement not found"),
            SettlementError::InvalidTransition { from, to } => {
                write!(f, "invalid transition {} -> {}", from.as_str(), to.as_str())
            }
            SettlementError::Terminal => write!(f, "settlement is SETTLED and terminal"),
            SettlementError::MissingUtr => write!(f, "confirmByBank requires a non-empty utr"),
            SettlementError::DuplicateUtr => write!(f, "utr already used for this tenant"),
            SettlementError::InsufficientRole => write!(f, "finance_admin role required past SENT_TO_BANK"),
            SettlementError::RetryExhausted { retry_count, max_retries } => {
                write!(f, "retry exhausted: {retry_count}/{max_retries}")
            }
        }
    }
}

impl std::error::Error for SettlementError {}

impl IntoResponse for SettlementError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            SettlementError::NotFound => (StatusCode::NOT_FOUND, "settlement_not_found"),
            SettlementError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            SettlementError::Terminal => (StatusCode::CONFLICT, "settlement_terminal"),
            SettlementError::MissingUtr => (StatusCode::BAD_REQUEST, "missing_utr"),
            SettlementError::DuplicateUtr => (StatusCode::CONFLICT, "duplicate_utr"),
            SettlementError::InsufficientRole => (StatusCode::FORBIDDEN, "insufficient_role"),
            SettlementError::RetryExhausted { .. } => (StatusCode::CONFLICT, "retry_exhausted"),
        };
        let body = Json(json!({
            "code": code,
            "message": self.to_string(),
            "retryable": false,
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub id: String,
    pub tenant: String,
    pub merchant: String,
    pub settlement_ref: String,
    pub net_amount: i64,
    pub state: SettlementState,
    pub utr: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<String>,
}

pub struct SettlementEngine {
    conn: SharedConn,
    ledger: LedgerEngine,
    max_backoff_minutes: i64,
}

impl SettlementEngine {
    pub fn new(conn: SharedConn, max_backoff_minutes: i64) -> Self {
        let ledger = LedgerEngine::new(conn.clone());
        Self { conn, ledger, max_backoff_minutes }
    }

    /// CREATED: posts the settlement's one-and-only ledger transaction and
    /// opens the state machine. Currency is assumed INR; a multi-currency
    /// tenant would carry this on the settlement row instead.
    pub fn create(
        &self,
        tenant: &str,
        merchant: &str,
        settlement_ref: &str,
        net_amount: i64,
        transaction_date: &str,
        max_retries: u32,
    ) -> Result<Settlement, SettlementError> {
        self.ledger
            .post_transaction(
                EventChoreographer::settlement(SettlementPostedEvent {
                    tenant: tenant.to_string(),
                    source_ref: settlement_ref.to_string(),
                    net_amount,
                    currency: "INR".to_string(),
                    transaction_date: transaction_date.to_string(),
                })
                .map_err(|_| SettlementError::NotFound)?,
            )
            .map_err(|_| SettlementError::NotFound)?;

        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO settlements (id, tenant, merchant, settlement_ref, net_amount, status, retry_count, max_retries, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'CREATED', 0, ?6, datetime('now'))",
            params![id, tenant, merchant, settlement_ref, net_amount, max_retries],
        )
        .map_err(|_| SettlementError::NotFound)?;

        Self::append_transition(&conn, &id, None, SettlementState::Created, "system", None);

        Ok(Settlement {
            id,
            tenant: tenant.to_string(),
            merchant: merchant.to_string(),
            settlement_ref: settlement_ref.to_string(),
            net_amount,
            state: SettlementState::Created,
            utr: None,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
        })
    }

    pub fn get(&self, id: &str) -> Result<Settlement, SettlementError> {
        let conn = self.conn.lock().unwrap();
        Self::load(&conn, id)
    }

    pub fn reserve_funds(&self, id: &str, actor: &str, role: Role) -> Result<Settlement, SettlementError> {
        self.transition(id, SettlementState::FundsReserved, actor, role, None)
    }

    pub fn send_to_bank(&self, id: &str, actor: &str, role: Role) -> Result<Settlement, SettlementError> {
        self.transition(id, SettlementState::SentToBank, actor, role, None)
    }

    pub fn confirm_by_bank(
        &self,
        id: &str,
        utr: &str,
        actor: &str,
        role: Role,
    ) -> Result<Settlement, SettlementError> {
        if utr.trim().is_empty() {
            return Err(SettlementError::MissingUtr);
        }
        {
            let conn = self.conn.lock().unwrap();
            let current = Self::load(&conn, id)?;
            let conflict: Option<String> = conn
                .query_row(
                    "SELECT id FROM settlements WHERE tenant = ?1 AND utr = ?2 AND id != ?3",
                    params![current.tenant, utr, id],
                    |row| row.get(0),
                )
                .optional()
                .unwrap_or(None);
            if conflict.is_some() {
                return Err(SettlementError::DuplicateUtr);
            }
        }
        self.transition(id, SettlementState::BankConfirmed, actor, role, Some(utr.to_string()))
    }

    pub fn mark_settled(&self, id: &str, actor: &str, role: Role) -> Result<Settlement, SettlementError> {
        self.transition(id, SettlementState::Settled, actor, role, None)
    }

    pub fn mark_failed(&self, id: &str, actor: &str, role: Role) -> Result<Settlement, SettlementError> {
        self.transition(id, SettlementState::Failed, actor, role, None)
    }

    /// FAILED -> RETRIED -> FUNDS_RESERVED. Rejects once `retry_count` reaches
    /// `max_retries`; otherwise applies exponential backoff capped at the
    /// engine's configured ceiling. Not finance_admin gated: any operator may
    /// retry a recovery path already fenced by max_retries.
    pub fn retry(&self, id: &str, actor: &str, _role: Role) -> Result<Settlement, SettlementError> {
        let conn = self.conn.lock().unwrap();
        let current = Self::load(&conn, id)?;
        if current.state != SettlementState::Failed {
            return Err(SettlementError::InvalidTransition { from: current.state, to: SettlementState::Retried });
        }
        if current.retry_count >= current.max_retries {
            return Err(SettlementError::RetryExhausted {
                retry_count: current.retry_count,
                max_retries: current.max_retries,
            });
        }

        let next_retry_count = current.retry_count + 1;
        let backoff_minutes = (30i64 * 2i64.pow(next_retry_count)).min(self.max_backoff_minutes);
        let next_retry_at = (Utc::now() + ChronoDuration::minutes(backoff_minutes)).to_rfc3339();

        conn.execute(
            "UPDATE settlements SET status = 'RETRIED', retry_count = ?1, next_retry_at = ?2 WHERE id = ?3",
            params![next_retry_count, next_retry_at, id],
        )
        .map_err(|_| SettlementError::NotFound)?;
        Self::append_transition(&conn, id, Some(SettlementState::Failed), SettlementState::Retried, actor, None);

        conn.execute(
            "UPDATE settlements SET status = 'FUNDS_RESERVED' WHERE id = ?1",
            params![id],
        )
        .map_err(|_| SettlementError::NotFound)?;
        Self::append_transition(&conn, id, Some(SettlementState::Retried), SettlementState::FundsReserved, actor, None);

        info!(settlement_id = %id, retry_count = next_retry_count, next_retry_at = %next_retry_at, "settlement retry scheduled");
        Self::load(&conn, id)
    }

    fn transition(
        &self,
        id: &str,
        to: SettlementState,
        actor: &str,
        role: Role,
        utr: Option<String>,
    ) -> Result<Settlement, SettlementError> {
        let conn = self.conn.lock().unwrap();
        let current = Self::load(&conn, id)?;

        if current.state.is_terminal() {
            return Err(SettlementError::Terminal);
        }
        if !Self::allowed(current.state, to) {
            return Err(SettlementError::InvalidTransition { from: current.state, to });
        }
        if to.requires_finance_admin() && !role.is_finance_admin() {
            return Err(SettlementError::InsufficientRole);
        }

        if let Some(utr) = &utr {
            conn.execute(
                "UPDATE settlements SET status = ?1, utr = ?2 WHERE id = ?3",
                params![to.as_str(), utr, id],
            )
        } else {
            conn.execute(
                "UPDATE settlements SET status = ?1 WHERE id = ?2",
                params![to.as_str(), id],
            )
        }
        .map_err(|_| SettlementError::NotFound)?;

        Self::append_transition(&conn, id, Some(current.state), to, actor, None);
        info!(settlement_id = %id, from = current.state.as_str(), to = to.as_str(), "settlement transition");
        Self::load(&conn, id)
    }

    fn allowed(from: SettlementState, to: SettlementState) -> bool {
        use SettlementState::*;
        matches!(
            (from, to),
            (Created, FundsReserved)
                | (FundsReserved, SentToBank)
                | (SentToBank, BankConfirmed)
                | (BankConfirmed, Settled)
                | (Created, Failed)
                | (FundsReserved, Failed)
                | (SentToBank, Failed)
                | (BankConfirmed, Failed)
        )
    }

    fn append_transition(
        conn: &rusqlite::Connection,
        settlement_id: &str,
        from: Option<SettlementState>,
        to: SettlementState,
        actor: &str,
        metadata: Option<&str>,
    ) {
        let id = Uuid::new_v4().to_string();
        let from_str = from.map(|s| s.as_str()).unwrap_or("NONE");
        conn.execute(
            "INSERT INTO settlement_transitions (id, settlement_id, from_state, to_state, at, actor, metadata)
             VALUES (?1, ?2, ?3, ?4, datetime('now'), ?5, ?6)",
            params![id, settlement_id, from_str, to.as_str(), actor, metadata],
        )
        .ok();
    }

    fn load(conn: &rusqlite::Connection, id: &str) -> Result<Settlement, SettlementError> {
        conn.query_row(
            "SELECT id, tenant, merchant, settlement_ref, net_amount, status, utr, retry_count, max_retries, next_retry_at
             FROM settlements WHERE id = ?1",
            params![id],
            |row| {
                Ok(Settlement {
                    id: row.get(0)?,
                    tenant: row.get(1)?,
                    merchant: row.get(2)?,
                    settlement_ref: row.get(3)?,
                    net_amount: row.get(4)?,
                    state: SettlementState::from_str(&row.get::<_, String>(5)?),
                    utr: row.get(6)?,
                    retry_count: row.get(7)?,
                    max_retries: row.get(8)?,
                    next_retry_at: row.get(9)?,
                })
            },
        )
        .map_err(|_| SettlementError::NotFound)
    }
}
