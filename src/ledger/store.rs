//! Ledger Engine
//! Mission: the sole writer of transactions and entries. Every mutating operation
//! runs inside a single serializable storage transaction; failure anywhere leaves
//! no visible partial state.

use super::types::*;
use crate::db::SharedConn;
use crate::periods::PeriodController;
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use tracing::info;
use uuid::Uuid;

/// Distinguishes the two UNIQUE constraints on `transactions` from any other
/// insert failure, which is reported as a plain storage error.
fn classify_header_insert_error(err: rusqlite::Error, transaction_ref: &str) -> LedgerError {
    if let rusqlite::Error::SqliteFailure(inner, Some(msg)) = &err {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            if msg.contains("idempotency_key") {
                return LedgerError::IdempotencyConflict;
            }
            if msg.contains("transaction_ref") {
                return LedgerError::DuplicateTransactionRef {
                    transaction_ref: transaction_ref.to_string(),
                };
            }
        }
    }
    LedgerError::Storage { detail: err.to_string() }
}

pub struct LedgerEngine {
    conn: SharedConn,
    periods: PeriodController,
}

impl LedgerEngine {
    pub fn new(conn: SharedConn) -> Self {
        let periods = PeriodController::new(conn.clone());
        Self { conn, periods }
    }

    pub fn create_account(
        &self,
        tenant: &str,
        code: &str,
        account_type: AccountType,
        normal_balance: NormalBalance,
    ) -> Result<Account, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO accounts (id, tenant, code, account_type, normal_balance, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active')",
            params![id, tenant, code, account_type.as_str(), normal_balance.as_str()],
        )
        .map_err(|_| LedgerError::AccountNotFound { account_code: code.to_string() })?;

        Ok(Account {
            id,
            tenant: tenant.to_string(),
            code: code.to_string(),
            account_type,
            normal_balance,
            status: AccountStatus::Active,
        })
    }

    fn find_account(
        conn: &rusqlite::Connection,
        tenant: &str,
        code: &str,
    ) -> Result<(String, AccountStatus), LedgerError> {
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, status FROM accounts WHERE tenant = ?1 AND code = ?2",
                params![tenant, code],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .unwrap_or(None);

        match row {
            None => Err(LedgerError::AccountNotFound { account_code: code.to_string() }),
            Some((id, status)) => {
                let status = match status.as_str() {
                    "active" => AccountStatus::Active,
                    "frozen" => AccountStatus::Frozen,
                    _ => AccountStatus::Closed,
                };
                Ok((id, status))
            }
        }
    }

    /// The ledger's single mutating entry point.
    pub fn post_transaction(
        &self,
        request: PostTransactionRequest,
    ) -> Result<PostTransactionResult, LedgerError> {
        // Step 1: idempotency replay. Steps 1-3 take a short-lived lock on the
        // connection; it must be released before Step 4 calls into the period
        // controller, which locks the same shared connection internally.
        let mut account_ids = Vec::with_capacity(request.entries.len());
        {
            let conn = self.conn.lock().unwrap();
            if let Some(key) = &request.idempotency_key {
                let existing_id: Option<String> = conn
                    .query_row(
                        "SELECT id FROM transactions WHERE tenant = ?1 AND idempotency_key = ?2",
                        params![request.tenant, key],
                        |row| row.get(0),
                    )
                    .optional()
                    .unwrap_or(None);

                if let Some(id) = existing_id {
                    let transaction = Self::load_transaction(&conn, &id)?;
                    let entries = Self::load_entries(&conn, &id)?;
                    let (total_debits, total_credits) = Self::sum_sides(&entries);
                    return Ok(PostTransactionResult {
                        transaction,
                        duplicate: true,
                        entries,
                        balanced: true,
                        total_debits,
                        total_credits,
                        override_used: false,
                    });
                }
            }

            // Step 3: resolve accounts.
            for entry in &request.entries {
                let (account_id, status) = Self::find_account(&conn, &request.tenant, &entry.account_code)?;
                if status != AccountStatus::Active {
                    return Err(LedgerError::AccountInactive { account_code: entry.account_code.clone() });
                }
                account_ids.push(account_id);
            }
        }

        // Step 2: balance check.
        let total_debits: i64 = request
            .entries
            .iter()
            .filter(|e| e.side == Side::Debit)
            .map(|e| e.amount)
            .sum();
        let total_credits: i64 = request
            .entries
            .iter()
            .filter(|e| e.side == Side::Credit)
            .map(|e| e.amount)
            .sum();
        if total_debits != total_credits {
            return Err(LedgerError::UnbalancedTransaction { total_debits, total_credits });
        }

        // Step 4 & 5: period and lock gating. No connection lock is held here;
        // check_period_for_posting acquires its own.
        let transaction_date = NaiveDate::parse_from_str(&request.transaction_date, "%Y-%m-%d")
            .map_err(|_| LedgerError::PeriodClosed)?;
        let check = self
            .periods
            .check_period_for_posting(&request.tenant, transaction_date)
            .map_err(|_| LedgerError::PeriodClosed)?;

        if check.period_hard_closed {
            return Err(LedgerError::PeriodClosed);
        }
        if check.locked {
            let reason = check
                .lock_info
                .map(|l| l.reason)
                .unwrap_or_else(|| "active lock".to_string());
            return Err(LedgerError::LedgerLocked { reason });
        }

        let mut override_used = false;
        if check.override_required {
            if !request.override_requested {
                return Err(LedgerError::AdminOverrideRequired);
            }
            let is_finance_admin = request
                .user_role
                .map(|r| r.is_finance_admin())
                .unwrap_or(false);
            if !is_finance_admin {
                return Err(LedgerError::InsufficientOverridePrivileges);
            }
            let justification_len = request
                .override_justification
                .as_ref()
                .map(|j| j.trim().len())
                .unwrap_or(0);
            if justification_len < MIN_OVERRIDE_JUSTIFICATION_LEN {
                return Err(LedgerError::InsufficientOverridePrivileges);
            }
            override_used = true;
        }

        // Step 6: insert header pending, insert entries, flip to posted. Reacquire
        // the connection lock for the single serializable write transaction.
        let txn_id = Uuid::new_v4().to_string();
        let mut conn = self.conn.lock().unwrap();
        let db_txn = conn
            .transaction()
            .map_err(|e| LedgerError::Storage { detail: e.to_string() })?;

        db_txn
            .execute(
                "INSERT INTO transactions (id, tenant, transaction_ref, idempotency_key, event_type, source_ref,
                    amount, currency, status, transaction_date, created_by, override_used, override_justification,
                    period_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10, ?11, ?12, ?13, datetime('now'))",
                params![
                    txn_id,
                    request.tenant,
                    request.transaction_ref,
                    request.idempotency_key,
                    request.event_type,
                    request.source_ref,
                    request.amount,
                    request.currency,
                    request.transaction_date,
                    request.created_by,
                    override_used as i64,
                    request.override_justification,
                    check.period_id,
                ],
            )
            .map_err(|e| classify_header_insert_error(e, &request.transaction_ref))?;

        let mut entries = Vec::with_capacity(request.entries.len());
        for (idx, (entry, account_id)) in request.entries.iter().zip(account_ids.iter()).enumerate() {
            let entry_id = Uuid::new_v4().to_string();
            let side_str = if entry.side == Side::Debit { "debit" } else { "credit" };
            db_txn
                .execute(
                    "INSERT INTO entries (id, transaction_id, account_id, side, amount, description, ordinal)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![entry_id, txn_id, account_id, side_str, entry.amount, entry.description, idx as i64],
                )
                .map_err(|e| LedgerError::Storage { detail: e.to_string() })?;
            entries.push(Entry {
                id: entry_id,
                transaction_id: txn_id.clone(),
                account_id: account_id.clone(),
                side: entry.side,
                amount: entry.amount,
                description: entry.description.clone(),
            });
        }

        db_txn
            .execute("UPDATE transactions SET status = 'posted' WHERE id = ?1", params![txn_id])
            .map_err(|e| LedgerError::Storage { detail: e.to_string() })?;

        // Step 7: override audit log.
        if override_used {
            let override_id = Uuid::new_v4().to_string();
            db_txn
                .execute(
                    "INSERT INTO override_log (id, tenant, transaction_id, actor, role, justification, at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
                    params![
                        override_id,
                        request.tenant,
                        txn_id,
                        request.created_by,
                        request.user_role.map(|r| r.as_str()).unwrap_or("unknown"),
                        request.override_justification,
                    ],
                )
                .ok();
        }

        // Step 8: audit log.
        let audit_id = Uuid::new_v4().to_string();
        db_txn
            .execute(
                "INSERT INTO audit_log (id, tenant, operation, detail, at) VALUES (?1, ?2, 'post_transaction', ?3, datetime('now'))",
                params![audit_id, request.tenant, format!("posted {} with {} entries", txn_id, entries.len())],
            )
            .ok();

        db_txn.commit().map_err(|e| LedgerError::Storage { detail: e.to_string() })?;

        info!(tenant = %request.tenant, transaction_id = %txn_id, "ledger transaction posted");

        let transaction = Transaction {
            id: txn_id,
            tenant: request.tenant,
            transaction_ref: request.transaction_ref,
            idempotency_key: request.idempotency_key,
            event_type: request.event_type,
            source_ref: request.source_ref,
            amount: request.amount,
            currency: request.currency,
            status: TransactionStatus::Posted,
            transaction_date: request.transaction_date,
            created_by: request.created_by,
            override_used,
            period_id: check.period_id,
        };

        Ok(PostTransactionResult {
            transaction,
            duplicate: false,
            entries,
            balanced: true,
            total_debits,
            total_credits,
            override_used,
        })
    }

    /// Creates a new transaction with sides flipped, linking both headers.
    pub fn reverse_transaction(
        &self,
        original_id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<PostTransactionResult, LedgerError> {
        let original;
        let original_entries;
        {
            let conn = self.conn.lock().unwrap();
            original = Self::load_transaction(&conn, original_id)?;
            original_entries = Self::load_entries(&conn, original_id)?;

            let already_reversed: bool = conn
                .query_row(
                    "SELECT reversed_by IS NOT NULL FROM transactions WHERE id = ?1",
                    params![original_id],
                    |row| row.get(0),
                )
                .unwrap_or(false);
            if already_reversed {
                return Err(LedgerError::AlreadyReversed { id: original_id.to_string() });
            }
        }

        let mut flipped_entries = Vec::with_capacity(original_entries.len());
        for entry in &original_entries {
            let account_code = {
                let conn = self.conn.lock().unwrap();
                conn.query_row(
                    "SELECT code FROM accounts WHERE id = ?1",
                    params![entry.account_id],
                    |row| row.get::<_, String>(0),
                )
                .map_err(|_| LedgerError::AccountNotFound { account_code: entry.account_id.clone() })?
            };
            flipped_entries.push(EntryInput {
                account_code,
                side: if entry.side == Side::Debit { Side::Credit } else { Side::Debit },
                amount: entry.amount,
                description: Some(format!("reversal of {original_id}: {reason}")),
            });
        }

        let reversal_request = PostTransactionRequest {
            tenant: original.tenant.clone(),
            transaction_ref: format!("{}-reversal", original.transaction_ref),
            idempotency_key: Some(format!("reversal:{original_id}")),
            event_type: format!("{}_reversal", original.event_type),
            source_ref: original.source_ref.clone(),
            amount: original.amount,
            currency: original.currency.clone(),
            description: Some(reason.to_string()),
            entries: flipped_entries,
            transaction_date: original.transaction_date.clone(),
            created_by: actor.to_string(),
            override_requested: false,
            override_justification: None,
            user_role: None,
        };

        let result = self.post_transaction(reversal_request)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE transactions SET status = 'reversed', reversed_by = ?1 WHERE id = ?2",
            params![result.transaction.id, original_id],
        )
        .ok();
        conn.execute(
            "UPDATE transactions SET reverses = ?1 WHERE id = ?2",
            params![original_id, result.transaction.id],
        )
        .ok();

        Ok(result)
    }

    pub fn get_account_balance(&self, tenant: &str, code: &str) -> Result<AccountBalance, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let (account_id, _status) = Self::find_account(&conn, tenant, code)?;
        let normal_balance: String = conn
            .query_row(
                "SELECT normal_balance FROM accounts WHERE id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .map_err(|_| LedgerError::AccountNotFound { account_code: code.to_string() })?;

        let total_debits: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM entries WHERE account_id = ?1 AND side = 'debit'",
                params![account_id],
                |row| row.get(0),
            )
            .unwrap_or(0);
        let total_credits: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM entries WHERE account_id = ?1 AND side = 'credit'",
                params![account_id],
                |row| row.get(0),
            )
            .unwrap_or(0);
        let entry_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entries WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let balance = if normal_balance == "debit" {
            total_debits - total_credits
        } else {
            total_credits - total_debits
        };

        Ok(AccountBalance { balance, total_debits, total_credits, entry_count })
    }

    pub fn get_transaction(&self, id: &str) -> Result<(Transaction, Vec<Entry>), LedgerError> {
        let conn = self.conn.lock().unwrap();
        let transaction = Self::load_transaction(&conn, id)?;
        let entries = Self::load_entries(&conn, id)?;
        Ok((transaction, entries))
    }

    fn sum_sides(entries: &[Entry]) -> (i64, i64) {
        let debits = entries.iter().filter(|e| e.side == Side::Debit).map(|e| e.amount).sum();
        let credits = entries.iter().filter(|e| e.side == Side::Credit).map(|e| e.amount).sum();
        (debits, credits)
    }

    fn load_transaction(conn: &rusqlite::Connection, id: &str) -> Result<Transaction, LedgerError> {
        conn.query_row(
            "SELECT id, tenant, transaction_ref, idempotency_key, event_type, source_ref, amount, currency,
                    status, transaction_date, created_by, override_used, period_id
             FROM transactions WHERE id = ?1",
            params![id],
            |row| {
                let status_str: String = row.get(8)?;
                let status = match status_str.as_str() {
                    "posted" => TransactionStatus::Posted,
                    "reversed" => TransactionStatus::Reversed,
                    _ => TransactionStatus::Pending,
                };
                Ok(Transaction {
                    id: row.get(0)?,
                    tenant: row.get(1)?,
                    transaction_ref: row.get(2)?,
                    idempotency_key: row.get(3)?,
                    event_type: row.get(4)?,
                    source_ref: row.get(5)?,
                    amount: row.get(6)?,
                    currency: row.get(7)?,
                    status,
                    transaction_date: row.get(9)?,
                    created_by: row.get(10)?,
                    override_used: row.get::<_, i64>(11)? != 0,
                    period_id: row.get(12)?,
                })
            },
        )
        .map_err(|_| LedgerError::TransactionNotFound { id: id.to_string() })
    }

    fn load_entries(conn: &rusqlite::Connection, transaction_id: &str) -> Result<Vec<Entry>, LedgerError> {
        let mut stmt = conn
            .prepare(
                "SELECT id, transaction_id, account_id, side, amount, description
                 FROM entries WHERE transaction_id = ?1 ORDER BY ordinal",
            )
            .map_err(|_| LedgerError::TransactionNotFound { id: transaction_id.to_string() })?;

        let entries = stmt
            .query_map(params![transaction_id], |row| {
                let side_str: String = row.get(3)?;
                Ok(Entry {
                    id: row.get(0)?,
                    transaction_id: row.get(1)?,
                    account_id: row.get(2)?,
                    side: if side_str == "debit" { Side::Debit } else { Side::Credit },
                    amount: row.get(4)?,
                    description: row.get(5)?,
                })
            })
            .map_err(|_| LedgerError::TransactionNotFound { id: transaction_id.to_string() })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| LedgerError::TransactionNotFound { id: transaction_id.to_string() })?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn engine_with_accounts() -> LedgerEngine {
        let conn = db::open(":memory:").unwrap();
        let engine = LedgerEngine::new(conn);
        engine.create_account("t1", "escrow_asset", AccountType::EscrowAsset, NormalBalance::Debit).unwrap();
        engine.create_account("t1", "escrow_liability", AccountType::EscrowLiability, NormalBalance::Credit).unwrap();
        engine
    }

    fn simple_request(idempotency_key: Option<&str>) -> PostTransactionRequest {
        PostTransactionRequest {
            tenant: "t1".to_string(),
            transaction_ref: "ref1".to_string(),
            idempotency_key: idempotency_key.map(|s| s.to_string()),
            event_type: "payment_success".to_string(),
            source_ref: Some("order-1".to_string()),
            amount: 1000,
            currency: "INR".to_string(),
            description: None,
            entries: vec![
                EntryInput { account_code: "escrow_asset".into(), side: Side::Debit, amount: 1000, description: None },
                EntryInput { account_code: "escrow_liability".into(), side: Side::Credit, amount: 1000, description: None },
            ],
            transaction_date: "2024-01-15".to_string(),
            created_by: "system".to_string(),
            override_requested: false,
            override_justification: None,
            user_role: None,
        }
    }

    #[test]
    fn posted_transaction_is_balanced() {
        let engine = engine_with_accounts();
        let result = engine.post_transaction(simple_request(Some("k1"))).unwrap();
        assert_eq!(result.total_debits, result.total_credits);
        assert!(result.balanced);
    }

    #[test]
    fn unbalanced_entries_rejected() {
        let engine = engine_with_accounts();
        let mut req = simple_request(None);
        req.entries[1].amount = 999;
        let result = engine.post_transaction(req);
        assert!(matches!(result, Err(LedgerError::UnbalancedTransaction { .. })));
    }

    #[test]
    fn duplicate_transaction_ref_with_distinct_idempotency_keys_is_reported_distinctly() {
        let engine = engine_with_accounts();
        engine.post_transaction(simple_request(Some("key-a"))).unwrap();
        let result = engine.post_transaction(simple_request(Some("key-b")));
        assert!(matches!(result, Err(LedgerError::DuplicateTransactionRef { .. })));
    }

    // same idempotency key replays the original result instead of double-posting.
    #[test]
    fn idempotency_key_replay_returns_same_transaction() {
        let engine = engine_with_accounts();
        let first = engine.post_transaction(simple_request(Some("dup-key"))).unwrap();
        let second = engine.post_transaction(simple_request(Some("dup-key"))).unwrap();
        assert_eq!(first.transaction.id, second.transaction.id);
        assert!(second.duplicate);

        let balance = engine.get_account_balance("t1", "escrow_asset").unwrap();
        assert_eq!(balance.entry_count, 1);
    }

    #[test]
    fn inactive_account_rejected() {
        let conn = db::open(":memory:").unwrap();
        let engine = LedgerEngine::new(conn.clone());
        engine.create_account("t1", "escrow_asset", AccountType::EscrowAsset, NormalBalance::Debit).unwrap();
        engine.create_account("t1", "escrow_liability", AccountType::EscrowLiability, NormalBalance::Credit).unwrap();
        conn.lock().unwrap().execute(
            "UPDATE accounts SET status = 'frozen' WHERE tenant = 't1' AND code = 'escrow_liability'",
            [],
        ).unwrap();

        let result = engine.post_transaction(simple_request(None));
        assert!(matches!(result, Err(LedgerError::AccountInactive { .. })));
    }

    // reverse(reverse(t)) has the same balance impact as t itself.
    #[test]
    fn reversal_of_reversal_restores_balance() {
        let engine = engine_with_accounts();
        let original = engine.post_transaction(simple_request(Some("orig"))).unwrap();
        let balance_after_post = engine.get_account_balance("t1", "escrow_asset").unwrap().balance;

        let reversal = engine.reverse_transaction(&original.transaction.id, "correction", "actor1").unwrap();
        let balance_after_reversal = engine.get_account_balance("t1", "escrow_asset").unwrap().balance;
        assert_eq!(balance_after_reversal, 0);

        let reversal_of_reversal = engine.reverse_transaction(&reversal.transaction.id, "undo correction", "actor1").unwrap();
        let balance_after_second_reversal = engine.get_account_balance("t1", "escrow_asset").unwrap().balance;
        assert_eq!(balance_after_second_reversal, balance_after_post);
        assert_ne!(reversal_of_reversal.transaction.id, original.transaction.id);
    }

    #[test]
    fn reversing_twice_rejected() {
        let engine = engine_with_accounts();
        let original = engine.post_transaction(simple_request(Some("orig2"))).unwrap();
        engine.reverse_transaction(&original.transaction.id, "first", "actor1").unwrap();
        let result = engine.reverse_transaction(&original.transaction.id, "second", "actor1");
        assert!(matches!(result, Err(LedgerError::AlreadyReversed { .. })));
    }

    #[test]
    fn hard_closed_period_rejects_posting_even_with_override() {
        let engine = engine_with_accounts();
        let period_id = engine
            .periods
            .check_period_for_posting("t1", NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .unwrap()
            .period_id
            .unwrap();
        engine.periods.soft_close("t1", &period_id, crate::principal::Role::FinanceAdmin).unwrap();
        engine
            .periods
            .hard_close("t1", &period_id, "actor1", crate::principal::Role::FinanceAdmin, true)
            .unwrap();

        let mut req = simple_request(None);
        req.override_requested = true;
        req.override_justification = Some("emergency override attempt".to_string());
        req.user_role = Some(crate::principal::Role::FinanceAdmin);

        let result = engine.post_transaction(req);
        assert!(matches!(result, Err(LedgerError::PeriodClosed)));
    }

    #[test]
    fn override_justification_boundary() {
        let engine = engine_with_accounts();
        let period_id = engine
            .periods
            .check_period_for_posting("t1", NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .unwrap()
            .period_id
            .unwrap();
        engine.periods.soft_close("t1", &period_id, crate::principal::Role::FinanceAdmin).unwrap();

        let mut short_req = simple_request(Some("short"));
        short_req.override_requested = true;
        short_req.override_justification = Some("123456789".to_string()); // length 9
        short_req.user_role = Some(crate::principal::Role::FinanceAdmin);
        assert!(engine.post_transaction(short_req).is_err());

        let mut ok_req = simple_request(Some("ok-len"));
        ok_req.override_requested = true;
        ok_req.override_justification = Some("1234567890".to_string()); // length 10
        ok_req.user_role = Some(crate::principal::Role::FinanceAdmin);
        assert!(engine.post_transaction(ok_req).is_ok());
    }
}
