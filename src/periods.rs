//! Period & Lock Controller
//! Mission: own the accounting-period and ledger-lock state machines, and answer
//! the single question the ledger needs before it ever writes an entry: is this posting
//! allowed right now?

use crate::db::SharedConn;
use crate::principal::Role;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodType {
    Daily,
    Monthly,
    Yearly,
}

impl PeriodType {
    fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "DAILY",
            PeriodType::Monthly => "MONTHLY",
            PeriodType::Yearly => "YEARLY",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "MONTHLY" => PeriodType::Monthly,
            "YEARLY" => PeriodType::Yearly,
            _ => PeriodType::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodStatus {
    Open,
    SoftClosed,
    HardClosed,
}

impl PeriodStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Open => "OPEN",
            PeriodStatus::SoftClosed => "SOFT_CLOSED",
            PeriodStatus::HardClosed => "HARD_CLOSED",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "SOFT_CLOSED" => PeriodStatus::SoftClosed,
            "HARD_CLOSED" => PeriodStatus::HardClosed,
            _ => PeriodStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Period,
    Audit,
    Reconciliation,
}

impl LockType {
    fn as_str(&self) -> &'static str {
        match self {
            LockType::Period => "PERIOD_LOCK",
            LockType::Audit => "AUDIT_LOCK",
            LockType::Reconciliation => "RECONCILIATION_LOCK",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "AUDIT_LOCK" => LockType::Audit,
            "RECONCILIATION_LOCK" => LockType::Reconciliation,
            _ => LockType::Period,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LockInfo {
    pub id: String,
    #[serde(serialize_with = "serialize_lock_type")]
    pub lock_type: LockType,
    pub reason: String,
}

fn serialize_lock_type<S: serde::Serializer>(lt: &LockType, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(lt.as_str())
}

#[derive(Debug)]
pub enum PeriodError {
    NotFound,
    InvalidTransition(&'static str),
    Forbidden(&'static str),
    LockOverlap(String),
}

impl fmt::Display for PeriodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodError::NotFound => write!(f, "period or lock not found"),
            PeriodError::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            PeriodError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            PeriodError::LockOverlap(msg) => write!(f, "overlapping lock: {msg}"),
        }
    }
}

impl std::error::Error for PeriodError {}

impl IntoResponse for PeriodError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            PeriodError::NotFound => (StatusCode::NOT_FOUND, "period_or_lock_not_found"),
            PeriodError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
            PeriodError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            PeriodError::LockOverlap(_) => (StatusCode::CONFLICT, "lock_overlap"),
        };
        let body = Json(json!({ "code": code, "message": self.to_string(), "retryable": false }));
        (status, body).into_response()
    }
}

/// The combined answer the ledger needs before posting: is it allowed, and if not, why.
#[derive(Debug, Clone, Serialize)]
pub struct PostingCheck {
    pub posting_allowed: bool,
    pub override_required: bool,
    pub locked: bool,
    pub lock_info: Option<LockInfo>,
    pub period_id: Option<String>,
    pub period_hard_closed: bool,
    pub period_soft_closed: bool,
}

pub struct PeriodController {
    conn: SharedConn,
}

impl PeriodController {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Ensures a DAILY period covering `date` exists for `tenant`, creating an OPEN
    /// one if absent. Mirrors the "auto-open on day boundary" rule without requiring
    /// a background scheduler: it is called lazily by whatever posts first.
    pub fn ensure_period(&self, tenant: &str, date: NaiveDate) -> Result<String, PeriodError> {
        let conn = self.conn.lock().unwrap();
        let date_str = date.format("%Y-%m-%d").to_string();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM periods WHERE tenant = ?1 AND period_type = 'DAILY' AND start <= ?2 AND end >= ?2",
                params![tenant, date_str],
                |row| row.get(0),
            )
            .optional()
            .map_err(|_| PeriodError::NotFound)?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO periods (id, tenant, period_type, start, end, status) VALUES (?1, ?2, 'DAILY', ?3, ?3, 'OPEN')",
            params![id, tenant, date_str],
        )
        .map_err(|_| PeriodError::NotFound)?;
        Ok(id)
    }

    pub fn check_period_for_posting(
        &self,
        tenant: &str,
        date: NaiveDate,
    ) -> Result<PostingCheck, PeriodError> {
        let period_id = self.ensure_period(tenant, date)?;
        let conn = self.conn.lock().unwrap();
        let date_str = date.format("%Y-%m-%d").to_string();

        let status_str: String = conn
            .query_row(
                "SELECT status FROM periods WHERE id = ?1",
                params![period_id],
                |row| row.get(0),
            )
            .map_err(|_| PeriodError::NotFound)?;
        let status = PeriodStatus::from_str(&status_str);

        let lock_row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, lock_type, reason FROM locks
                 WHERE tenant = ?1 AND status = 'ACTIVE' AND start <= ?2 AND end >= ?2
                 ORDER BY CASE lock_type
                    WHEN 'PERIOD_LOCK' THEN 0
                    WHEN 'AUDIT_LOCK' THEN 1
                    ELSE 2 END
                 LIMIT 1",
                params![tenant, date_str],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|_| PeriodError::NotFound)?;

        let lock_info = lock_row.map(|(id, lt, reason)| LockInfo {
            id,
            lock_type: LockType::from_str(&lt),
            reason,
        });

        let period_hard_closed = status == PeriodStatus::HardClosed;
        let period_soft_closed = status == PeriodStatus::SoftClosed;
        let locked = lock_info.is_some();

        Ok(PostingCheck {
            posting_allowed: !period_hard_closed && !locked,
            override_required: period_soft_closed,
            locked,
            lock_info,
            period_id: Some(period_id),
            period_hard_closed,
            period_soft_closed,
        })
    }

    pub fn soft_close(&self, tenant: &str, period_id: &str, role: Role) -> Result<(), PeriodError> {
        if !role.is_finance_admin() {
            return Err(PeriodError::Forbidden("soft close requires finance_admin"));
        }
        let conn = self.conn.lock().unwrap();
        let status: String = conn
            .query_row(
                "SELECT status FROM periods WHERE id = ?1 AND tenant = ?2",
                params![period_id, tenant],
                |row| row.get(0),
            )
            .map_err(|_| PeriodError::NotFound)?;
        if PeriodStatus::from_str(&status) != PeriodStatus::Open {
            return Err(PeriodError::InvalidTransition("only OPEN periods may soft close"));
        }
        conn.execute(
            "UPDATE periods SET status = 'SOFT_CLOSED' WHERE id = ?1",
            params![period_id],
        )
        .map_err(|_| PeriodError::NotFound)?;
        Ok(())
    }

    /// Flips SOFT_CLOSED -> HARD_CLOSED and synchronously creates the matching
    /// PERIOD_LOCK, whose release is permanently disallowed.
    pub fn hard_close(
        &self,
        tenant: &str,
        period_id: &str,
        actor: &str,
        role: Role,
        reconciliation_completed: bool,
    ) -> Result<(), PeriodError> {
        if !role.is_finance_admin() {
            return Err(PeriodError::Forbidden("hard close requires finance_admin"));
        }
        if !reconciliation_completed {
            return Err(PeriodError::Forbidden("hard close requires a completed reconciliation"));
        }
        let conn = self.conn.lock().unwrap();
        let (status, start, end): (String, String, String) = conn
            .query_row(
                "SELECT status, start, end FROM periods WHERE id = ?1 AND tenant = ?2",
                params![period_id, tenant],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|_| PeriodError::NotFound)?;
        if PeriodStatus::from_str(&status) != PeriodStatus::SoftClosed {
            return Err(PeriodError::InvalidTransition("only SOFT_CLOSED periods may hard close"));
        }

        conn.execute(
            "UPDATE periods SET status = 'HARD_CLOSED', closed_by = ?1, closed_at = datetime('now') WHERE id = ?2",
            params![actor, period_id],
        )
        .map_err(|_| PeriodError::NotFound)?;

        let lock_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO locks (id, tenant, lock_type, start, end, status, reason, locked_by, locked_at)
             VALUES (?1, ?2, 'PERIOD_LOCK', ?3, ?4, 'ACTIVE', 'period hard close', ?5, datetime('now'))",
            params![lock_id, tenant, start, end, actor],
        )
        .map_err(|_| PeriodError::NotFound)?;

        Ok(())
    }

    pub fn apply_lock(
        &self,
        tenant: &str,
        lock_type: LockType,
        start: NaiveDate,
        end: NaiveDate,
        reason: &str,
        reference: Option<&str>,
        actor: &str,
    ) -> Result<String, PeriodError> {
        let conn = self.conn.lock().unwrap();
        let start_str = start.format("%Y-%m-%d").to_string();
        let end_str = end.format("%Y-%m-%d").to_string();

        let overlap: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM locks WHERE tenant = ?1 AND lock_type = ?2 AND status = 'ACTIVE'
                 AND start <= ?4 AND end >= ?3",
                params![tenant, lock_type.as_str(), start_str, end_str],
                |row| row.get(0),
            )
            .map_err(|_| PeriodError::NotFound)?;
        if overlap > 0 {
            return Err(PeriodError::LockOverlap(format!(
                "an ACTIVE {} already overlaps this range",
                lock_type.as_str()
            )));
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO locks (id, tenant, lock_type, start, end, status, reason, reference, locked_by, locked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'ACTIVE', ?6, ?7, ?8, datetime('now'))",
            params![id, tenant, lock_type.as_str(), start_str, end_str, reason, reference, actor],
        )
        .map_err(|_| PeriodError::NotFound)?;
        Ok(id)
    }

    pub fn release_lock(
        &self,
        lock_id: &str,
        actor: &str,
        role: Role,
    ) -> Result<(), PeriodError> {
        let conn = self.conn.lock().unwrap();
        let lock_type_str: String = conn
            .query_row(
                "SELECT lock_type FROM locks WHERE id = ?1",
                params![lock_id],
                |row| row.get(0),
            )
            .map_err(|_| PeriodError::NotFound)?;
        let lock_type = LockType::from_str(&lock_type_str);

        if lock_type == LockType::Period {
            return Err(PeriodError::Forbidden("PERIOD_LOCK can never be manually released"));
        }
        if !role.is_finance_admin() {
            return Err(PeriodError::Forbidden("releasing a lock requires finance_admin"));
        }

        conn.execute(
            "UPDATE locks SET status = 'RELEASED', released_by = ?1, released_at = datetime('now') WHERE id = ?2",
            params![actor, lock_id],
        )
        .map_err(|_| PeriodError::NotFound)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn controller() -> PeriodController {
        let conn = db::open(":memory:").unwrap();
        PeriodController::new(conn)
    }

    #[test]
    fn posting_allowed_on_freshly_opened_period() {
        let ctrl = controller();
        let check = ctrl
            .check_period_for_posting("t1", NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .unwrap();
        assert!(check.posting_allowed);
        assert!(!check.override_required);
    }

    #[test]
    fn hard_closed_period_blocks_posting() {
        let ctrl = controller();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let period_id = ctrl.check_period_for_posting("t1", date).unwrap().period_id.unwrap();
        ctrl.soft_close("t1", &period_id, Role::FinanceAdmin).unwrap();
        ctrl.hard_close("t1", &period_id, "actor1", Role::FinanceAdmin, true).unwrap();

        let check = ctrl.check_period_for_posting("t1", date).unwrap();
        assert!(!check.posting_allowed);
        assert!(check.period_hard_closed);
    }

    #[test]
    fn period_lock_from_hard_close_cannot_be_released() {
        let ctrl = controller();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let period_id = ctrl.check_period_for_posting("t1", date).unwrap().period_id.unwrap();
        ctrl.soft_close("t1", &period_id, Role::FinanceAdmin).unwrap();
        ctrl.hard_close("t1", &period_id, "actor1", Role::FinanceAdmin, true).unwrap();

        let check = ctrl.check_period_for_posting("t1", date).unwrap();
        let lock_id = check.lock_info.unwrap().id;
        let result = ctrl.release_lock(&lock_id, "actor1", Role::FinanceAdmin);
        assert!(result.is_err());
    }

    #[test]
    fn overlapping_lock_of_same_type_rejected() {
        let ctrl = controller();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        ctrl.apply_lock("t1", LockType::Audit, start, end, "investigation", None, "actor1")
            .unwrap();

        let overlapping_start = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let overlapping_end = NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        let result = ctrl.apply_lock("t1", LockType::Audit, overlapping_start, overlapping_end, "dup", None, "actor1");
        assert!(result.is_err());
    }

    #[test]
    fn non_finance_admin_cannot_soft_close() {
        let ctrl = controller();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let period_id = ctrl.check_period_for_posting("t1", date).unwrap().period_id.unwrap();
        let result = ctrl.soft_close("t1", &period_id, Role::OpsAdmin);
        assert!(result.is_err());
    }
}
