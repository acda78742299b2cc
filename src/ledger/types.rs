//! Ledger data model: accounts, transactions, entries, and the derived
//! account-balance projection. Amounts are integer minor units throughout;
//! no floating point or decimal type touches a currency value at any boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    EscrowAsset,
    EscrowLiability,
    MerchantReceivable,
    MerchantPayable,
    GatewayClearing,
    GatewayFee,
    PlatformRevenue,
    Chargeback,
    CustomerClearing,
    GatewayPayable,
    PlatformFeeExpense,
    GatewayFeeExpense,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::EscrowAsset => "escrow_asset",
            AccountType::EscrowLiability => "escrow_liability",
            AccountType::MerchantReceivable => "merchant_receivable",
            AccountType::MerchantPayable => "merchant_payable",
            AccountType::GatewayClearing => "gateway_clearing",
            AccountType::GatewayFee => "gateway_fee",
            AccountType::PlatformRevenue => "platform_revenue",
            AccountType::Chargeback => "chargeback",
            AccountType::CustomerClearing => "customer_clearing",
            AccountType::GatewayPayable => "gateway_payable",
            AccountType::PlatformFeeExpense => "platform_fee_expense",
            AccountType::GatewayFeeExpense => "gateway_fee_expense",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalBalance {
    Debit,
    Credit,
}

impl NormalBalance {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalBalance::Debit => "debit",
            NormalBalance::Credit => "credit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub tenant: String,
    pub code: String,
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
    pub status: AccountStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Posted,
    Reversed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInput {
    pub account_code: String,
    pub side: Side,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub transaction_id: String,
    pub account_id: String,
    pub side: Side,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub tenant: String,
    pub transaction_ref: String,
    pub idempotency_key: Option<String>,
    pub event_type: String,
    pub source_ref: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub transaction_date: String,
    pub created_by: String,
    pub override_used: bool,
    pub period_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostTransactionRequest {
    pub tenant: String,
    pub transaction_ref: String,
    pub idempotency_key: Option<String>,
    pub event_type: String,
    pub source_ref: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub entries: Vec<EntryInput>,
    pub transaction_date: String,
    pub created_by: String,
    pub override_requested: bool,
    pub override_justification: Option<String>,
    pub user_role: Option<crate::principal::Role>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostTransactionResult {
    pub transaction: Transaction,
    pub duplicate: bool,
    pub entries: Vec<Entry>,
    pub balanced: bool,
    pub total_debits: i64,
    pub total_credits: i64,
    pub override_used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountBalance {
    pub balance: i64,
    pub total_debits: i64,
    pub total_credits: i64,
    pub entry_count: i64,
}

/// Minimum length (inclusive) an override justification must reach.
pub const MIN_OVERRIDE_JUSTIFICATION_LEN: usize = 10;

#[derive(Debug)]
pub enum LedgerError {
    UnbalancedTransaction { total_debits: i64, total_credits: i64 },
    AccountInactive { account_code: String },
    AccountNotFound { account_code: String },
    PeriodClosed,
    AdminOverrideRequired,
    InsufficientOverridePrivileges,
    LedgerLocked { reason: String },
    IdempotencyConflict,
    DuplicateTransactionRef { transaction_ref: String },
    TransactionNotFound { id: String },
    AlreadyReversed { id: String },
    /// A storage-layer failure unrelated to any domain rule: a failed transaction
    /// begin/commit, or a write rejected for a reason other than a known conflict.
    Storage { detail: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::UnbalancedTransaction { total_debits, total_credits } => write!(
                f,
                "unbalanced transaction: debits={total_debits} credits={total_credits}"
            ),
            LedgerError::AccountInactive { account_code } => {
                write!(f, "account {account_code} is not active")
            }
            LedgerError::AccountNotFound { account_code } => {
                write!(f, "account {account_code} not found")
            }
            LedgerError::PeriodClosed => write!(f, "period is hard closed"),
            LedgerError::AdminOverrideRequired => write!(f, "override required for soft-closed period"),
            LedgerError::InsufficientOverridePrivileges => {
                write!(f, "principal lacks finance_admin authority for override")
            }
            LedgerError::LedgerLocked { reason } => write!(f, "ledger locked: {reason}"),
            LedgerError::IdempotencyConflict => write!(f, "idempotency key conflict"),
            LedgerError::DuplicateTransactionRef { transaction_ref } => {
                write!(f, "transaction_ref {transaction_ref} already exists")
            }
            LedgerError::TransactionNotFound { id } => write!(f, "transaction {id} not found"),
            LedgerError::AlreadyReversed { id } => write!(f, "transaction {id} already reversed"),
            LedgerError::Storage { detail } => write!(f, "storage error: {detail}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            LedgerError::UnbalancedTransaction { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unbalanced_transaction")
            }
            LedgerError::AccountInactive { .. } => (StatusCode::CONFLICT, "account_inactive"),
            LedgerError::AccountNotFound { .. } => (StatusCode::NOT_FOUND, "account_not_found"),
            LedgerError::PeriodClosed => (StatusCode::CONFLICT, "period_closed"),
            LedgerError::AdminOverrideRequired => {
                (StatusCode::FORBIDDEN, "admin_override_required")
            }
            LedgerError::InsufficientOverridePrivileges => {
                (StatusCode::FORBIDDEN, "insufficient_override_privileges")
            }
            LedgerError::LedgerLocked { .. } => (StatusCode::CONFLICT, "ledger_locked"),
            LedgerError::IdempotencyConflict => (StatusCode::CONFLICT, "idempotency_conflict"),
            LedgerError::DuplicateTransactionRef { .. } => {
                (StatusCode::CONFLICT, "duplicate_transaction_ref")
            }
            LedgerError::TransactionNotFound { .. } => (StatusCode::NOT_FOUND, "transaction_not_found"),
            LedgerError::AlreadyReversed { .. } => (StatusCode::CONFLICT, "already_reversed"),
            LedgerError::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };
        let body = Json(json!({
            "code": code,
            "message": self.to_string(),
            "retryable": false,
        }));
        (status, body).into_response()
    }
}
