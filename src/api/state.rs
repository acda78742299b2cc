//! Shared application state handed to every route.

use crate::auth::AuthState;
use crate::ledger::LedgerEngine;
use crate::orchestrator::PaymentOrchestrator;
use crate::periods::PeriodController;
use crate::reconciliation::ReconciliationEngine;
use crate::settlement::SettlementEngine;
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerEngine>,
    pub settlements: Arc<SettlementEngine>,
    pub periods: Arc<PeriodController>,
    pub reconciliation: Arc<ReconciliationEngine>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub auth: AuthState,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> AuthState {
        state.auth.clone()
    }
}
