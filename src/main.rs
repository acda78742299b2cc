//! PayNexus Core server binary.
//! Mission: boot every correctness core on one SQLite-backed connection and
//! serve the HTTP surface over axum.

use anyhow::{Context, Result};
use dotenv::dotenv;
use paynexus_core::api::{self, AppState};
use paynexus_core::auth::{AuthState, JwtHandler, UserStore};
use paynexus_core::circuit_breaker::{BreakerConfig, CircuitBreakerRegistry};
use paynexus_core::config::Config;
use paynexus_core::db;
use paynexus_core::gateway::{GatewayAdapter, MockGatewayAdapter};
use paynexus_core::health::GatewayHealthTracker;
use paynexus_core::ledger::LedgerEngine;
use paynexus_core::orchestrator::PaymentOrchestrator;
use paynexus_core::periods::PeriodController;
use paynexus_core::reconciliation::ReconciliationEngine;
use paynexus_core::retry::RetryPolicy;
use paynexus_core::settlement::SettlementEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("paynexus-core starting");

    let config = Config::from_env().context("failed to load configuration")?;

    let conn = db::open(&config.database_path).context("failed to open ledger database")?;

    let auth_db_path = std::env::var("AUTH_DB_PATH").unwrap_or_else(|_| "./paynexus_auth.db".to_string());
    let user_store = Arc::new(UserStore::new(&auth_db_path)?);
    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone(), config.jwt_expiration_hours));
    let auth_state = AuthState::new(user_store, jwt_handler);

    info!(path = %auth_db_path, "user store initialized");

    let ledger = Arc::new(LedgerEngine::new(conn.clone()));
    let settlements = Arc::new(SettlementEngine::new(conn.clone(), config.settlement_max_backoff_minutes));
    let periods = Arc::new(PeriodController::new(conn.clone()));
    let reconciliation = Arc::new(ReconciliationEngine::new(conn.clone()));

    let gateway_names: Vec<String> = std::env::var("GATEWAY_NAMES")
        .unwrap_or_else(|_| "g1,g2".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let mut adapters: HashMap<String, Arc<dyn GatewayAdapter>> = HashMap::new();
    for name in &gateway_names {
        adapters.insert(name.clone(), Arc::new(MockGatewayAdapter::new(name.clone())));
    }
    info!(gateways = ?gateway_names, "gateway adapters registered");

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        GatewayHealthTracker::new(),
        CircuitBreakerRegistry::new(BreakerConfig::default()),
        adapters,
        LedgerEngine::new(conn.clone()),
        RetryPolicy::default(),
    ));

    let app_state = AppState {
        ledger,
        settlements,
        periods,
        reconciliation,
        orchestrator,
        auth: auth_state,
    };

    let app = api::router(app_state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn load_env() {
    let _ = dotenv();
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paynexus_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
