//! Gateway Adapter Contract
//! Mission: the boundary the orchestrator calls through. Per-provider wire codecs
//! are out of scope for this core; this trait and its mock implementation are the
//! seam a real adapter plugs into.

use crate::error::CoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ChargeEnvelope {
    pub tenant: String,
    pub gateway: String,
    pub idempotency_key: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Succeeded,
    Declined,
}

#[derive(Debug, Clone)]
pub struct ChargeResult {
    pub external_txn_id: String,
    pub status: ChargeStatus,
    pub latency_ms: u64,
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn charge(&self, envelope: ChargeEnvelope) -> Result<ChargeResult, CoreError>;
}

/// Deterministic-enough stand-in for a real provider: idempotent by key,
/// and scriptable per-gateway via `fail_next`/`set_latency` for orchestrator tests.
pub struct MockGatewayAdapter {
    name: String,
    latency_ms: AtomicU64,
    seen: Mutex<HashMap<String, ChargeResult>>,
    should_fail: std::sync::atomic::AtomicBool,
}

impl MockGatewayAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency_ms: AtomicU64::new(20),
            seen: Mutex::new(HashMap::new()),
            should_fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_latency_ms(&self, ms: u64) {
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayAdapter for MockGatewayAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn charge(&self, envelope: ChargeEnvelope) -> Result<ChargeResult, CoreError> {
        let started = Instant::now();
        let mut seen = self.seen.lock().await;
        if let Some(existing) = seen.get(&envelope.idempotency_key) {
            return Ok(existing.clone());
        }

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(CoreError::gateway("mock gateway declined", false));
        }

        let latency_ms = self.latency_ms.load(Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(latency_ms)).await;

        let result = ChargeResult {
            external_txn_id: format!("{}-{}", self.name, envelope.idempotency_key),
            status: ChargeStatus::Succeeded,
            latency_ms: started.elapsed().as_millis() as u64,
        };
        seen.insert(envelope.idempotency_key.clone(), result.clone());
        Ok(result)
    }
}
