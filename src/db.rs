//! Shared storage handle
//! Mission: one WAL-mode SQLite connection, schema owned here, threaded explicitly
//! into every service that needs durable state, no ambient global connection.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::info;

pub type SharedConn = Arc<Mutex<Connection>>;

pub fn open(db_path: &str) -> Result<SharedConn> {
    let conn = Connection::open(db_path).context("failed to open database")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL mode")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous mode")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;

    init_schema(&conn)?;
    info!(db_path, "storage initialized");
    Ok(Arc::new(Mutex::new(conn)))
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            code TEXT NOT NULL,
            account_type TEXT NOT NULL,
            normal_balance TEXT NOT NULL,
            status TEXT NOT NULL,
            UNIQUE(tenant, code)
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            transaction_ref TEXT NOT NULL,
            idempotency_key TEXT,
            event_type TEXT NOT NULL,
            source_ref TEXT,
            amount INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL,
            transaction_date TEXT NOT NULL,
            created_by TEXT NOT NULL,
            override_used INTEGER NOT NULL DEFAULT 0,
            override_justification TEXT,
            period_id TEXT,
            reversed_by TEXT,
            reverses TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(tenant, idempotency_key),
            UNIQUE(tenant, transaction_ref)
        );

        CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY,
            transaction_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            side TEXT NOT NULL,
            amount INTEGER NOT NULL,
            description TEXT,
            ordinal INTEGER NOT NULL,
            FOREIGN KEY(transaction_id) REFERENCES transactions(id),
            FOREIGN KEY(account_id) REFERENCES accounts(id)
        );

        -- Entries are strictly immutable once written: enforce at the storage
        -- layer so application code alone can never violate it.
        CREATE TRIGGER IF NOT EXISTS entries_no_update
        BEFORE UPDATE ON entries
        BEGIN
            SELECT RAISE(ABORT, 'entries are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS entries_no_delete
        BEFORE DELETE ON entries
        BEGIN
            SELECT RAISE(ABORT, 'entries are immutable');
        END;

        CREATE TABLE IF NOT EXISTS override_log (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            transaction_id TEXT NOT NULL,
            actor TEXT NOT NULL,
            role TEXT NOT NULL,
            justification TEXT NOT NULL,
            at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            operation TEXT NOT NULL,
            detail TEXT NOT NULL,
            at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS periods (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            period_type TEXT NOT NULL,
            start TEXT NOT NULL,
            end TEXT NOT NULL,
            status TEXT NOT NULL,
            closed_by TEXT,
            closure_notes TEXT,
            closed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS locks (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            lock_type TEXT NOT NULL,
            start TEXT NOT NULL,
            end TEXT NOT NULL,
            status TEXT NOT NULL,
            reason TEXT NOT NULL,
            reference TEXT,
            locked_by TEXT NOT NULL,
            released_by TEXT,
            locked_at TEXT NOT NULL,
            released_at TEXT
        );

        CREATE TABLE IF NOT EXISTS settlements (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            merchant TEXT NOT NULL,
            settlement_ref TEXT NOT NULL,
            net_amount INTEGER NOT NULL,
            status TEXT NOT NULL,
            utr TEXT,
            bank_ref TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            next_retry_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(tenant, utr)
        );

        CREATE TABLE IF NOT EXISTS settlement_transitions (
            id TEXT PRIMARY KEY,
            settlement_id TEXT NOT NULL,
            from_state TEXT NOT NULL,
            to_state TEXT NOT NULL,
            at TEXT NOT NULL,
            actor TEXT NOT NULL,
            metadata TEXT,
            FOREIGN KEY(settlement_id) REFERENCES settlements(id)
        );

        CREATE TABLE IF NOT EXISTS reconciliation_batches (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            gateway TEXT NOT NULL,
            period_from TEXT NOT NULL,
            period_to TEXT NOT NULL,
            matched_count INTEGER NOT NULL,
            missing_internal INTEGER NOT NULL,
            missing_external INTEGER NOT NULL,
            amount_mismatch INTEGER NOT NULL,
            difference_amount INTEGER NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reconciliation_items (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            external_ref TEXT,
            internal_ref TEXT,
            outcome TEXT NOT NULL,
            internal_amount INTEGER,
            external_amount INTEGER,
            FOREIGN KEY(batch_id) REFERENCES reconciliation_batches(id)
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            tenant TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        ",
    )
    .context("failed to initialize schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_initializes_and_entries_reject_update() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO accounts (id, tenant, code, account_type, normal_balance, status)
             VALUES ('a1','t1','cash','escrow_asset','debit','active')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO transactions (id, tenant, transaction_ref, event_type, amount, currency, status, transaction_date, created_by, created_at)
             VALUES ('tx1','t1','ref1','payment_success',100,'INR','posted','2024-01-01','tester','2024-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO entries (id, transaction_id, account_id, side, amount, ordinal)
             VALUES ('e1','tx1','a1','debit',100,0)",
            [],
        )
        .unwrap();

        let update_result = conn.execute("UPDATE entries SET amount = 200 WHERE id = 'e1'", []);
        assert!(update_result.is_err());

        let delete_result = conn.execute("DELETE FROM entries WHERE id = 'e1'", []);
        assert!(delete_result.is_err());
    }
}
