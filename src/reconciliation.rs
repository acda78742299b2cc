//! Reconciliation Engine
//! Mission: three-way match between the internal ledger view, a gateway's
//! settlement report, and (separately) bank statements, closing the loop from
//! escrow_asset to real cash. Exact integer-minor-unit equality, no tolerance band.

use crate::db::SharedConn;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Matched,
    MissingInternal,
    MissingExternal,
    AmountMismatch,
}

impl ReconciliationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Matched => "matched",
            ReconciliationOutcome::MissingInternal => "missing_internal",
            ReconciliationOutcome::MissingExternal => "missing_external",
            ReconciliationOutcome::AmountMismatch => "amount_mismatch",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalRecord {
    pub transaction_ref: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub external_ref: String,
    pub order_id: String,
    pub amount: i64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationItemResult {
    pub external_ref: Option<String>,
    pub internal_ref: Option<String>,
    pub outcome: ReconciliationOutcome,
    pub internal_amount: Option<i64>,
    pub external_amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationBatch {
    pub id: String,
    pub tenant: String,
    pub gateway: String,
    pub period_from: String,
    pub period_to: String,
    pub matched_count: i64,
    pub missing_internal: i64,
    pub missing_external: i64,
    pub amount_mismatch: i64,
    pub difference_amount: i64,
    pub status: String,
    pub items: Vec<ReconciliationItemResult>,
}

pub struct ReconciliationEngine {
    conn: SharedConn,
}

impl ReconciliationEngine {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Matches by `order_id == transaction_ref`. A record present only
    /// internally or only externally surfaces as its own outcome; a shared
    /// key with differing amounts surfaces as `amount_mismatch` rather than a
    /// false match.
    pub fn reconcile(
        &self,
        tenant: &str,
        gateway: &str,
        period_from: &str,
        period_to: &str,
        internal: &[InternalRecord],
        external: &[ExternalRecord],
    ) -> ReconciliationBatch {
        let mut internal_by_ref: HashMap<&str, &InternalRecord> =
            internal.iter().map(|r| (r.transaction_ref.as_str(), r)).collect();
        let mut items = Vec::new();

        for ext in external {
            match internal_by_ref.remove(ext.order_id.as_str()) {
                Some(int_rec) => {
                    let outcome = if int_rec.amount == ext.amount {
                        ReconciliationOutcome::Matched
                    } else {
                        ReconciliationOutcome::AmountMismatch
                    };
                    items.push(ReconciliationItemResult {
                        external_ref: Some(ext.external_ref.clone()),
                        internal_ref: Some(int_rec.transaction_ref.clone()),
                        outcome,
                        internal_amount: Some(int_rec.amount),
                        external_amount: Some(ext.amount),
                    });
                }
                None => {
                    items.push(ReconciliationItemResult {
                        external_ref: Some(ext.external_ref.clone()),
                        internal_ref: None,
                        outcome: ReconciliationOutcome::MissingInternal,
                        internal_amount: None,
                        external_amount: Some(ext.amount),
                    });
                }
            }
        }

        // Whatever wasn't claimed by an external record has no matching gateway report line.
        for (_, int_rec) in internal_by_ref {
            items.push(ReconciliationItemResult {
                external_ref: None,
                internal_ref: Some(int_rec.transaction_ref.clone()),
                outcome: ReconciliationOutcome::MissingExternal,
                internal_amount: Some(int_rec.amount),
                external_amount: None,
            });
        }

        let matched_count = items.iter().filter(|i| i.outcome == ReconciliationOutcome::Matched).count() as i64;
        let missing_internal = items.iter().filter(|i| i.outcome == ReconciliationOutcome::MissingInternal).count() as i64;
        let missing_external = items.iter().filter(|i| i.outcome == ReconciliationOutcome::MissingExternal).count() as i64;
        let amount_mismatch = items.iter().filter(|i| i.outcome == ReconciliationOutcome::AmountMismatch).count() as i64;
        let difference_amount: i64 = items
            .iter()
            .filter(|i| i.outcome != ReconciliationOutcome::Matched)
            .map(|i| (i.internal_amount.unwrap_or(0) - i.external_amount.unwrap_or(0)).abs())
            .sum();

        let status = if missing_internal == 0 && missing_external == 0 && amount_mismatch == 0 {
            "clean"
        } else {
            "discrepancies_found"
        };

        let batch_id = self.persist(
            tenant, gateway, period_from, period_to,
            matched_count, missing_internal, missing_external, amount_mismatch,
            difference_amount, status, &items,
        );

        ReconciliationBatch {
            id: batch_id,
            tenant: tenant.to_string(),
            gateway: gateway.to_string(),
            period_from: period_from.to_string(),
            period_to: period_to.to_string(),
            matched_count,
            missing_internal,
            missing_external,
            amount_mismatch,
            difference_amount,
            status: status.to_string(),
            items,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        tenant: &str,
        gateway: &str,
        period_from: &str,
        period_to: &str,
        matched_count: i64,
        missing_internal: i64,
        missing_external: i64,
        amount_mismatch: i64,
        difference_amount: i64,
        status: &str,
        items: &[ReconciliationItemResult],
    ) -> String {
        let conn = self.conn.lock().unwrap();
        let batch_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO reconciliation_batches
                (id, tenant, gateway, period_from, period_to, matched_count, missing_internal,
                 missing_external, amount_mismatch, difference_amount, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, datetime('now'))",
            params![
                batch_id, tenant, gateway, period_from, period_to,
                matched_count, missing_internal, missing_external, amount_mismatch,
                difference_amount, status,
            ],
        )
        .ok();

        for item in items {
            let item_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO reconciliation_items
                    (id, batch_id, external_ref, internal_ref, outcome, internal_amount, external_amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    item_id, batch_id, item.external_ref, item.internal_ref,
                    item.outcome.as_str(), item.internal_amount, item.external_amount,
                ],
            )
            .ok();
        }

        batch_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    // 4 internal vs 4 external records -> 2 matched, 1 missing_external, 1 missing_internal,
    // 1 amount_mismatch, difference_amount = 50.
    #[test]
    fn three_way_match_literal_scenario() {
        let conn = db::open(":memory:").unwrap();
        let engine = ReconciliationEngine::new(conn);

        let internal = vec![
            InternalRecord { transaction_ref: "order-1".into(), amount: 1000 },
            InternalRecord { transaction_ref: "order-2".into(), amount: 2000 },
            InternalRecord { transaction_ref: "order-3".into(), amount: 3000 }, // mismatch target
            InternalRecord { transaction_ref: "order-4".into(), amount: 4000 }, // missing_external
        ];
        let external = vec![
            ExternalRecord { external_ref: "ext-1".into(), order_id: "order-1".into(), amount: 1000, date: "2024-01-15".into() },
            ExternalRecord { external_ref: "ext-2".into(), order_id: "order-2".into(), amount: 2000, date: "2024-01-15".into() },
            ExternalRecord { external_ref: "ext-3".into(), order_id: "order-3".into(), amount: 3050, date: "2024-01-15".into() },
            ExternalRecord { external_ref: "ext-5".into(), order_id: "order-5".into(), amount: 500, date: "2024-01-15".into() }, // missing_internal
        ];

        let batch = engine.reconcile("t1", "gw1", "2024-01-01", "2024-01-31", &internal, &external);

        assert_eq!(batch.matched_count, 2);
        assert_eq!(batch.missing_internal, 1);
        assert_eq!(batch.missing_external, 1);
        assert_eq!(batch.amount_mismatch, 1);
        assert_eq!(batch.difference_amount, 50);
        assert_eq!(batch.status, "discrepancies_found");
    }

    #[test]
    fn fully_matched_batch_is_clean() {
        let conn = db::open(":memory:").unwrap();
        let engine = ReconciliationEngine::new(conn);
        let internal = vec![InternalRecord { transaction_ref: "order-1".into(), amount: 1000 }];
        let external = vec![ExternalRecord { external_ref: "ext-1".into(), order_id: "order-1".into(), amount: 1000, date: "2024-01-15".into() }];
        let batch = engine.reconcile("t1", "gw1", "2024-01-01", "2024-01-31", &internal, &external);
        assert_eq!(batch.status, "clean");
        assert_eq!(batch.difference_amount, 0);
    }
}
