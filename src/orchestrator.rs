//! Payment Orchestrator
//! Mission: the only place the four resilience primitives compose. Everything
//! downstream of here sees a single effectful call.

use crate::choreographer::{EventChoreographer, PaymentSuccessEvent};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::error::{CoreError, ErrorCategory};
use crate::gateway::{ChargeEnvelope, ChargeStatus, GatewayAdapter};
use crate::health::GatewayHealthTracker;
use crate::ledger::{LedgerEngine, PostTransactionResult};
use crate::retry::{self, RetryPolicy};
use crate::router::{GatewayCandidate, RoutingStrategy, SmartRouter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct PaymentRequest {
    pub tenant: String,
    pub source_ref: String,
    pub amount: i64,
    pub currency: String,
    pub platform_fee: i64,
    pub gateway_fee: i64,
    pub transaction_date: String,
}

pub struct PaymentOrchestrator {
    health: GatewayHealthTracker,
    breakers: CircuitBreakerRegistry,
    adapters: HashMap<String, Arc<dyn GatewayAdapter>>,
    ledger: LedgerEngine,
    retry_policy: RetryPolicy,
}

impl PaymentOrchestrator {
    pub fn new(
        health: GatewayHealthTracker,
        breakers: CircuitBreakerRegistry,
        adapters: HashMap<String, Arc<dyn GatewayAdapter>>,
        ledger: LedgerEngine,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self { health, breakers, adapters, ledger, retry_policy }
    }

    /// 1. Route. 2. Breaker(Retry(gateway)) per candidate. 3. On success, post
    /// payment_success and return. 4. On exhaustion, advance to the next
    /// candidate; return the last classified error once the plan is spent.
    pub async fn process_payment(
        &self,
        request: PaymentRequest,
        candidates: &[GatewayCandidate],
    ) -> Result<PostTransactionResult, CoreError> {
        let router = SmartRouter::new(&self.health, &self.breakers, Default::default());
        let plan = router.plan(RoutingStrategy::HealthBased, candidates, request.amount, &[], 0);

        if plan.is_empty() {
            return Err(CoreError::new(ErrorCategory::Configuration, "no gateway available for routing"));
        }

        let mut last_err: Option<CoreError> = None;

        for gateway_name in &plan {
            let adapter = match self.adapters.get(gateway_name) {
                Some(adapter) => adapter.clone(),
                None => continue,
            };

            let envelope = ChargeEnvelope {
                tenant: request.tenant.clone(),
                gateway: gateway_name.clone(),
                idempotency_key: request.source_ref.clone(),
                amount: request.amount,
                currency: request.currency.clone(),
            };

            let gateway_for_breaker = gateway_name.clone();
            let (result, _metrics) = retry::execute(&self.retry_policy, |_attempt| {
                let adapter = adapter.clone();
                let envelope = envelope.clone();
                let gateway_for_breaker = gateway_for_breaker.clone();
                async move {
                    let started = Instant::now();
                    let outcome = self
                        .breakers
                        .execute(&gateway_for_breaker, adapter.charge(envelope))
                        .await;
                    let latency_ms = started.elapsed().as_millis() as u64;
                    match &outcome {
                        Ok(_) => self.health.record_success(&gateway_for_breaker, latency_ms),
                        Err(_) => self.health.record_failure(&gateway_for_breaker, latency_ms),
                    }
                    outcome
                }
            })
            .await;

            match result {
                Ok(charge) if charge.status == ChargeStatus::Succeeded => {
                    info!(gateway = %gateway_name, source_ref = %request.source_ref, "payment succeeded");
                    let event = PaymentSuccessEvent {
                        tenant: request.tenant,
                        source_ref: request.source_ref,
                        amount: request.amount,
                        platform_fee: request.platform_fee,
                        gateway_fee: request.gateway_fee,
                        currency: request.currency,
                        transaction_date: request.transaction_date,
                    };
                    let posting = EventChoreographer::payment_success(event)
                        .map_err(|e| CoreError::new(ErrorCategory::Processing, e.to_string()))?;
                    return self
                        .ledger
                        .post_transaction(posting)
                        .map_err(|e| CoreError::new(ErrorCategory::Processing, e.to_string()));
                }
                Ok(_declined) => {
                    let err = CoreError::new(ErrorCategory::Processing, "gateway declined charge");
                    warn!(gateway = %gateway_name, "gateway declined, advancing to next candidate");
                    last_err = Some(err);
                }
                Err(err) => {
                    warn!(gateway = %gateway_name, error = %err, "gateway attempt exhausted, advancing");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| CoreError::new(ErrorCategory::Processing, "all gateways exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerConfig;
    use crate::db;
    use crate::gateway::MockGatewayAdapter;
    use crate::ledger::{AccountType, NormalBalance};
    use crate::router::GatewayCost;
    use std::time::Duration;

    fn ledger_with_payment_accounts() -> LedgerEngine {
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

    fn fast_retry_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5),
            jitter_enabled: false,
            ..RetryPolicy::default()
        }
    }

    fn candidates() -> Vec<GatewayCandidate> {
        vec![
            GatewayCandidate { name: "primary".into(), cost: GatewayCost { fixed_fee: 0, percentage_bps: 100 }, priority: 1 },
            GatewayCandidate { name: "fallback".into(), cost: GatewayCost { fixed_fee: 0, percentage_bps: 100 }, priority: 2 },
        ]
    }

    fn payment_request(source_ref: &str) -> PaymentRequest {
        PaymentRequest {
            tenant: "t1".into(),
            source_ref: source_ref.into(),
            amount: 1000,
            currency: "INR".into(),
            platform_fee: 10,
            gateway_fee: 5,
            transaction_date: "2024-01-15".into(),
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_gateway_on_primary_failure() {
        let health = GatewayHealthTracker::new();
        let breakers = CircuitBreakerRegistry::new(BreakerConfig::default());
        let primary = Arc::new(MockGatewayAdapter::new("primary"));
        primary.set_should_fail(true);
        let fallback = Arc::new(MockGatewayAdapter::new("fallback"));

        let mut adapters: HashMap<String, Arc<dyn GatewayAdapter>> = HashMap::new();
        adapters.insert("primary".into(), primary);
        adapters.insert("fallback".into(), fallback);

        let orchestrator = PaymentOrchestrator::new(
            health,
            breakers,
            adapters,
            ledger_with_payment_accounts(),
            fast_retry_policy(),
        );

        let result = orchestrator.process_payment(payment_request("order-fallback"), &candidates()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn successful_primary_posts_ledger_transaction() {
        let health = GatewayHealthTracker::new();
        let breakers = CircuitBreakerRegistry::new(BreakerConfig::default());
        let primary = Arc::new(MockGatewayAdapter::new("primary"));
        let mut adapters: HashMap<String, Arc<dyn GatewayAdapter>> = HashMap::new();
        adapters.insert("primary".into(), primary);

        let orchestrator = PaymentOrchestrator::new(
            health,
            breakers,
            adapters,
            ledger_with_payment_accounts(),
            fast_retry_policy(),
        );

        let result = orchestrator.process_payment(payment_request("order-ok"), &candidates()).await.unwrap();
        assert_eq!(result.total_debits, 1000);
        assert_eq!(result.total_debits, result.total_credits);
    }

    #[tokio::test]
    async fn all_gateways_exhausted_returns_classified_error() {
        let health = GatewayHealthTracker::new();
        let breakers = CircuitBreakerRegistry::new(BreakerConfig::default());
        let primary = Arc::new(MockGatewayAdapter::new("primary"));
        primary.set_should_fail(true);
        let fallback = Arc::new(MockGatewayAdapter::new("fallback"));
        fallback.set_should_fail(true);

        let mut adapters: HashMap<String, Arc<dyn GatewayAdapter>> = HashMap::new();
        adapters.insert("primary".into(), primary);
        adapters.insert("fallback".into(), fallback);

        let orchestrator = PaymentOrchestrator::new(
            health,
            breakers,
            adapters,
            ledger_with_payment_accounts(),
            fast_retry_policy(),
        );

        let result = orchestrator.process_payment(payment_request("order-fail"), &candidates()).await;
        assert!(result.is_err());
    }
}
