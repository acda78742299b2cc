//! Smart Router
//! Mission: select a gateway and an ordered fallback list per request using health,
//! cost, and policy. Never throws; an empty pool yields an empty plan.

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use crate::health::{GatewayHealthTracker, HealthStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    HealthBased,
    LatencyBased,
    CostOptimized,
    Priority,
    RoundRobin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCost {
    pub fixed_fee: i64,
    pub percentage_bps: i64, // basis points, e.g. 150 = 1.50%
}

impl GatewayCost {
    pub fn effective_cost(&self, amount_minor_units: i64) -> i64 {
        self.fixed_fee + (amount_minor_units * self.percentage_bps) / 10_000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCandidate {
    pub name: String,
    pub cost: GatewayCost,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    pub health_threshold: f64,
    pub max_fallback_attempts: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            health_threshold: 50.0,
            max_fallback_attempts: 2,
        }
    }
}

pub struct SmartRouter<'a> {
    health: &'a GatewayHealthTracker,
    breakers: &'a CircuitBreakerRegistry,
    config: RouterConfig,
}

impl<'a> SmartRouter<'a> {
    pub fn new(
        health: &'a GatewayHealthTracker,
        breakers: &'a CircuitBreakerRegistry,
        config: RouterConfig,
    ) -> Self {
        Self {
            health,
            breakers,
            config,
        }
    }

    /// Builds the ordered plan `[primary, fallback_1, ..., fallback_k]` for a request.
    pub fn plan(
        &self,
        strategy: RoutingStrategy,
        candidates: &[GatewayCandidate],
        amount_minor_units: i64,
        excluded: &[String],
        round_robin_cursor: usize,
    ) -> Vec<String> {
        let mut pool: Vec<GatewayCandidate> = candidates
            .iter()
            .filter(|c| !excluded.contains(&c.name))
            .filter(|c| self.breakers.state(&c.name) != CircuitState::Open)
            .filter(|c| {
                let status = self.health.snapshot(&c.name).status;
                status != HealthStatus::Unhealthy
            })
            .cloned()
            .collect();

        match strategy {
            RoutingStrategy::HealthBased => {
                pool.sort_by(|a, b| {
                    let sa = self.health.snapshot(&a.name).health_score;
                    let sb = self.health.snapshot(&b.name).health_score;
                    sb.partial_cmp(&sa)
                        .unwrap()
                        .then_with(|| {
                            a.cost
                                .effective_cost(amount_minor_units)
                                .cmp(&b.cost.effective_cost(amount_minor_units))
                        })
                });
            }
            RoutingStrategy::LatencyBased => {
                pool.sort_by(|a, b| {
                    let la = self.health.snapshot(&a.name).avg_response_time_ms;
                    let lb = self.health.snapshot(&b.name).avg_response_time_ms;
                    la.partial_cmp(&lb).unwrap()
                });
            }
            RoutingStrategy::CostOptimized => {
                pool.sort_by_key(|c| c.cost.effective_cost(amount_minor_units));
            }
            RoutingStrategy::Priority => {
                pool.retain(|c| {
                    self.health.snapshot(&c.name).health_score >= self.config.health_threshold
                });
                pool.sort_by_key(|c| c.priority);
            }
            RoutingStrategy::RoundRobin => {
                if !pool.is_empty() {
                    let start = round_robin_cursor % pool.len();
                    pool.rotate_left(start);
                }
            }
        }

        pool.into_iter()
            .take(1 + self.config.max_fallback_attempts)
            .map(|c| c.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<GatewayCandidate> {
        vec![
            GatewayCandidate {
                name: "g1".into(),
                cost: GatewayCost { fixed_fee: 100, percentage_bps: 150 },
                priority: 1,
            },
            GatewayCandidate {
                name: "g2".into(),
                cost: GatewayCost { fixed_fee: 50, percentage_bps: 100 },
                priority: 2,
            },
        ]
    }

    #[test]
    fn health_based_prefers_healthier_gateway() {
        let health = GatewayHealthTracker::new();
        for _ in 0..10 {
            health.record_success("g1", 50);
        }
        for _ in 0..10 {
            health.record_failure("g2", 50);
        }
        let breakers = CircuitBreakerRegistry::new(Default::default());
        let router = SmartRouter::new(&health, &breakers, RouterConfig::default());

        let plan = router.plan(RoutingStrategy::HealthBased, &candidates(), 10000, &[], 0);
        assert_eq!(plan.first().map(|s| s.as_str()), Some("g1"));
    }

    #[test]
    fn open_breaker_excludes_gateway() {
        let health = GatewayHealthTracker::new();
        for _ in 0..10 {
            health.record_success("g1", 50);
            health.record_success("g2", 50);
        }
        let breakers = CircuitBreakerRegistry::new(Default::default());
        for _ in 0..10 {
            breakers.record_failure("g1");
        }
        let router = SmartRouter::new(&health, &breakers, RouterConfig::default());

        let plan = router.plan(RoutingStrategy::HealthBased, &candidates(), 10000, &[], 0);
        assert!(!plan.contains(&"g1".to_string()));
        assert_eq!(plan, vec!["g2".to_string()]);
    }

    #[test]
    fn empty_pool_returns_empty_plan_without_panicking() {
        let health = GatewayHealthTracker::new();
        let breakers = CircuitBreakerRegistry::new(Default::default());
        let router = SmartRouter::new(&health, &breakers, RouterConfig::default());

        let plan = router.plan(RoutingStrategy::HealthBased, &[], 10000, &[], 0);
        assert!(plan.is_empty());
    }

    #[test]
    fn cost_optimized_prefers_cheaper_gateway() {
        let health = GatewayHealthTracker::new();
        for _ in 0..10 {
            health.record_success("g1", 50);
            health.record_success("g2", 50);
        }
        let breakers = CircuitBreakerRegistry::new(Default::default());
        let router = SmartRouter::new(&health, &breakers, RouterConfig::default());

        let plan = router.plan(RoutingStrategy::CostOptimized, &candidates(), 10000, &[], 0);
        assert_eq!(plan.first().map(|s| s.as_str()), Some("g2"));
    }

    #[test]
    fn fallback_depth_capped_by_max_fallback_attempts() {
        let health = GatewayHealthTracker::new();
        let breakers = CircuitBreakerRegistry::new(Default::default());
        let mut many = candidates();
        for i in 2..10 {
            many.push(GatewayCandidate {
                name: format!("g{i}"),
                cost: GatewayCost { fixed_fee: 10, percentage_bps: 10 },
                priority: i as u32,
            });
        }
        for c in &many {
            for _ in 0..10 {
                health.record_success(&c.name, 50);
            }
        }
        let router = SmartRouter::new(&health, &breakers, RouterConfig { health_threshold: 50.0, max_fallback_attempts: 2 });
        let plan = router.plan(RoutingStrategy::HealthBased, &many, 10000, &[], 0);
        assert_eq!(plan.len(), 3); // primary + 2 fallbacks
    }
}
