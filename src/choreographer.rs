//! Event Choreographer
//! Mission: translate domain events into balanced postings. Each handler owns its
//! event type outright, the only path that may produce entries for it.

use crate::ledger::{EntryInput, LedgerError, PostTransactionRequest, Side};
use crate::principal::Role;

#[derive(Debug, Clone)]
pub struct PaymentSuccessEvent {
    pub tenant: String,
    pub source_ref: String,
    pub amount: i64,
    pub platform_fee: i64,
    pub gateway_fee: i64,
    pub currency: String,
    pub transaction_date: String,
}

#[derive(Debug, Clone)]
pub struct RefundCompletedEvent {
    pub tenant: String,
    pub source_ref: String,
    pub amount: i64,
    pub fee_refund: i64,
    pub currency: String,
    pub transaction_date: String,
}

#[derive(Debug, Clone)]
pub struct SettlementPostedEvent {
    pub tenant: String,
    pub source_ref: String,
    pub net_amount: i64,
    pub currency: String,
    pub transaction_date: String,
}

#[derive(Debug, Clone)]
pub struct ChargebackDebitEvent {
    pub tenant: String,
    pub source_ref: String,
    pub amount: i64,
    pub currency: String,
    pub transaction_date: String,
}

#[derive(Debug, Clone)]
pub struct ManualAdjustmentEvent {
    pub tenant: String,
    pub source_ref: String,
    pub amount: i64,
    pub currency: String,
    pub transaction_date: String,
    pub debit_account: String,
    pub credit_account: String,
    pub actor: String,
    pub justification: Option<String>,
    pub override_threshold: Option<i64>,
}

/// Stable key so at-least-once event delivery never double-posts.
fn idempotency_key(event_type: &str, source_ref: &str) -> String {
    format!("{event_type}:{source_ref}")
}

pub struct EventChoreographer;

impl EventChoreographer {
    /// 8-entry balanced posting splitting the gross amount between the
    /// merchant's net receivable and the platform/gateway fee legs.
    pub fn payment_success(event: PaymentSuccessEvent) -> Result<PostTransactionRequest, LedgerError> {
        let net_to_merchant = event.amount - event.platform_fee - event.gateway_fee;
        if net_to_merchant < 0 {
            return Err(LedgerError::UnbalancedTransaction {
                total_debits: event.amount,
                total_credits: event.platform_fee + event.gateway_fee,
            });
        }

        let entries = vec![
            EntryInput { account_code: "escrow_asset".into(), side: Side::Debit, amount: event.amount, description: None },
            EntryInput { account_code: "merchant_receivable".into(), side: Side::Debit, amount: net_to_merchant, description: None },
            EntryInput { account_code: "platform_fee_expense".into(), side: Side::Debit, amount: event.platform_fee, description: None },
            EntryInput { account_code: "gateway_fee_expense".into(), side: Side::Debit, amount: event.gateway_fee, description: None },
            EntryInput { account_code: "customer_clearing".into(), side: Side::Credit, amount: event.amount, description: None },
            EntryInput { account_code: "escrow_liability".into(), side: Side::Credit, amount: net_to_merchant, description: None },
            EntryInput { account_code: "platform_revenue".into(), side: Side::Credit, amount: event.platform_fee, description: None },
            EntryInput { account_code: "gateway_payable".into(), side: Side::Credit, amount: event.gateway_fee, description: None },
        ];

        Ok(PostTransactionRequest {
            tenant: event.tenant,
            transaction_ref: event.source_ref.clone(),
            idempotency_key: Some(idempotency_key("payment_success", &event.source_ref)),
            event_type: "payment_success".to_string(),
            source_ref: Some(event.source_ref),
            amount: event.amount,
            currency: event.currency,
            description: None,
            entries,
            transaction_date: event.transaction_date,
            created_by: "choreographer".to_string(),
            override_requested: false,
            override_justification: None,
            user_role: None,
        })
    }

    /// Mirror of payment_success; supports partial refunds by taking a
    /// `amount` smaller than the original gross.
    pub fn refund_completed(event: RefundCompletedEvent) -> Result<PostTransactionRequest, LedgerError> {
        let total = event.amount + event.fee_refund;
        let entries = vec![
            EntryInput { account_code: "escrow_liability".into(), side: Side::Debit, amount: event.amount, description: None },
            EntryInput { account_code: "platform_revenue".into(), side: Side::Debit, amount: event.fee_refund, description: None },
            EntryInput { account_code: "escrow_asset".into(), side: Side::Credit, amount: event.amount, description: None },
            EntryInput { account_code: "merchant_receivable".into(), side: Side::Credit, amount: event.fee_refund, description: None },
        ];

        Ok(PostTransactionRequest {
            tenant: event.tenant,
            transaction_ref: event.source_ref.clone(),
            idempotency_key: Some(idempotency_key("refund_completed", &event.source_ref)),
            event_type: "refund_completed".to_string(),
            source_ref: Some(event.source_ref),
            amount: total,
            currency: event.currency,
            description: None,
            entries,
            transaction_date: event.transaction_date,
            created_by: "choreographer".to_string(),
            override_requested: false,
            override_justification: None,
            user_role: None,
        })
    }

    /// Posted exactly once, at CREATED, by the settlement state machine.
    /// No further ledger entries follow a settlement through its lifecycle.
    pub fn settlement(event: SettlementPostedEvent) -> Result<PostTransactionRequest, LedgerError> {
        let entries = vec![
            EntryInput { account_code: "merchant_payable".into(), side: Side::Debit, amount: event.net_amount, description: None },
            EntryInput { account_code: "escrow_asset".into(), side: Side::Credit, amount: event.net_amount, description: None },
        ];

        Ok(PostTransactionRequest {
            tenant: event.tenant,
            transaction_ref: event.source_ref.clone(),
            idempotency_key: Some(idempotency_key("settlement", &event.source_ref)),
            event_type: "settlement".to_string(),
            source_ref: Some(event.source_ref),
            amount: event.net_amount,
            currency: event.currency,
            description: None,
            entries,
            transaction_date: event.transaction_date,
            created_by: "choreographer".to_string(),
            override_requested: false,
            override_justification: None,
            user_role: None,
        })
    }

    /// Reversible via a standard ledger reversal if the dispute is later won.
    pub fn chargeback_debit(event: ChargebackDebitEvent) -> Result<PostTransactionRequest, LedgerError> {
        let entries = vec![
            EntryInput { account_code: "merchant_payable".into(), side: Side::Debit, amount: event.amount, description: None },
            EntryInput { account_code: "escrow_asset".into(), side: Side::Credit, amount: event.amount, description: None },
        ];

        Ok(PostTransactionRequest {
            tenant: event.tenant,
            transaction_ref: event.source_ref.clone(),
            idempotency_key: Some(idempotency_key("chargeback_debit", &event.source_ref)),
            event_type: "chargeback_debit".to_string(),
            source_ref: Some(event.source_ref),
            amount: event.amount,
            currency: event.currency,
            description: None,
            entries,
            transaction_date: event.transaction_date,
            created_by: "choreographer".to_string(),
            override_requested: false,
            override_justification: None,
            user_role: None,
        })
    }

    /// The only event type whose accounts are caller-supplied. Requires override
    /// even on an OPEN period once `amount` exceeds the tenant's configured
    /// threshold (None disables the extra gate).
    pub fn manual_adjustment(
        event: ManualAdjustmentEvent,
        role: Role,
    ) -> Result<PostTransactionRequest, LedgerError> {
        let exceeds_threshold = event
            .override_threshold
            .map(|t| event.amount > t)
            .unwrap_or(false);

        if exceeds_threshold {
            if !role.is_finance_admin() {
                return Err(LedgerError::InsufficientOverridePrivileges);
            }
            let justification_len = event.justification.as_ref().map(|j| j.trim().len()).unwrap_or(0);
            if justification_len < crate::ledger::MIN_OVERRIDE_JUSTIFICATION_LEN {
                return Err(LedgerError::InsufficientOverridePrivileges);
            }
        }

        let entries = vec![
            EntryInput { account_code: event.debit_account.clone(), side: Side::Debit, amount: event.amount, description: event.justification.clone() },
            EntryInput { account_code: event.credit_account.clone(), side: Side::Credit, amount: event.amount, description: event.justification.clone() },
        ];

        Ok(PostTransactionRequest {
            tenant: event.tenant,
            transaction_ref: event.source_ref.clone(),
            idempotency_key: Some(idempotency_key("manual_adjustment", &event.source_ref)),
            event_type: "manual_adjustment".to_string(),
            source_ref: Some(event.source_ref),
            amount: event.amount,
            currency: event.currency,
            description: event.justification.clone(),
            entries,
            transaction_date: event.transaction_date,
            created_by: event.actor,
            override_requested: exceeds_threshold,
            override_justification: event.justification,
            user_role: Some(role),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::ledger::{AccountType, LedgerEngine, NormalBalance};

    fn engine_with_payment_accounts() -> LedgerEngine {
        let conn = db::open(":memory:").unwrap();
        let engine = LedgerEngine::new(conn);
        let accounts = [
            ("escrow_asset", AccountType::EscrowAsset, NormalBalance::Debit),
            ("merchant_receivable", AccountType::MerchantReceivable, NormalBalance::Debit),
            ("platform_fee_expense", AccountType::PlatformFeeExpense, NormalBalance::Debit),
            ("gateway_fee_expense", AccountType::GatewayFeeExpense, NormalBalance::Debit),
            ("customer_clearing", AccountType::CustomerClearing, NormalBalance::Credit),
            ("escrow_liability", AccountType::EscrowLiability, NormalBalance::Credit),
            ("platform_revenue", AccountType::PlatformRevenue, NormalBalance::Credit),
            ("gateway_payable", AccountType::GatewayPayable, NormalBalance::Credit),
        ];
        for (code, account_type, normal_balance) in accounts {
            engine.create_account("t1", code, account_type, normal_balance).unwrap();
        }
        engine
    }

    #[test]
    fn payment_success_produces_eight_balanced_entries() {
        let event = PaymentSuccessEvent {
            tenant: "t1".into(),
            source_ref: "order-1".into(),
            amount: 10_000,
            platform_fee: 200,
            gateway_fee: 100,
            currency: "INR".into(),
            transaction_date: "2024-01-15".into(),
        };
        let request = EventChoreographer::payment_success(event).unwrap();
        assert_eq!(request.entries.len(), 8);

        let engine = engine_with_payment_accounts();
        let result = engine.post_transaction(request).unwrap();
        assert!(result.balanced);
        assert_eq!(result.total_debits, result.total_credits);
        assert_eq!(result.total_debits, 10_000);
    }

    #[test]
    fn replaying_same_source_ref_is_idempotent() {
        let engine = engine_with_payment_accounts();
        let make_event = || PaymentSuccessEvent {
            tenant: "t1".into(),
            source_ref: "order-dup".into(),
            amount: 5_000,
            platform_fee: 50,
            gateway_fee: 25,
            currency: "INR".into(),
            transaction_date: "2024-01-15".into(),
        };
        let first = engine.post_transaction(EventChoreographer::payment_success(make_event()).unwrap()).unwrap();
        let second = engine.post_transaction(EventChoreographer::payment_success(make_event()).unwrap()).unwrap();
        assert_eq!(first.transaction.id, second.transaction.id);
        assert!(second.duplicate);
    }

    #[test]
    fn manual_adjustment_below_threshold_skips_override() {
        let event = ManualAdjustmentEvent {
            tenant: "t1".into(),
            source_ref: "adj-1".into(),
            amount: 100,
            currency: "INR".into(),
            transaction_date: "2024-01-15".into(),
            debit_account: "merchant_receivable".into(),
            credit_account: "escrow_asset".into(),
            actor: "ops1".into(),
            justification: None,
            override_threshold: Some(1_000),
        };
        let request = EventChoreographer::manual_adjustment(event, Role::OpsAdmin).unwrap();
        assert!(!request.override_requested);
    }

    #[test]
    fn manual_adjustment_above_threshold_requires_finance_admin() {
        let event = ManualAdjustmentEvent {
            tenant: "t1".into(),
            source_ref: "adj-2".into(),
            amount: 5_000,
            currency: "INR".into(),
            transaction_date: "2024-01-15".into(),
            debit_account: "merchant_receivable".into(),
            credit_account: "escrow_asset".into(),
            actor: "ops1".into(),
            justification: Some("large correction".into()),
            override_threshold: Some(1_000),
        };
        let result = EventChoreographer::manual_adjustment(event, Role::OpsAdmin);
        assert!(matches!(result, Err(LedgerError::InsufficientOverridePrivileges)));
    }
}
