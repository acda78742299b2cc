//! Circuit Breaker
//! Mission: per-gateway CLOSED/OPEN/HALF_OPEN state guarding against hammering an
//! unhealthy dependency. Modeled on the same per-key RwLock<HashMap<..>> shape used
//! elsewhere in this codebase for per-resource mutable state.

use crate::error::{CoreError, ErrorCategory};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_window: Duration,
    pub volume_threshold: u32,
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    pub success_threshold: u32,
    pub request_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_window: Duration::from_secs(60),
            volume_threshold: 10,
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 2,
            request_timeout: Duration::from_secs(10),
        }
    }
}

struct Attempt {
    at: Instant,
    ok: bool,
}

struct Breaker {
    config: BreakerConfig,
    state: CircuitState,
    recent_attempts: VecDeque<Attempt>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            recent_attempts: VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.recent_attempts.front() {
            if now.duration_since(front.at) > self.config.failure_window {
                self.recent_attempts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Lazily transitions OPEN -> HALF_OPEN if the timeout elapsed, triggered by the
    /// next call rather than any background scheduler.
    fn poll_state(&mut self, now: Instant) -> CircuitState {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if now.duration_since(opened_at) >= self.config.open_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.consecutive_successes = 0;
                }
            }
        }
        self.state
    }

    fn record_success(&mut self, now: Instant) {
        self.prune(now);
        self.recent_attempts.push_back(Attempt { at: now, ok: true });
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;

        if self.state == CircuitState::HalfOpen
            && self.consecutive_successes >= self.config.success_threshold
        {
            self.state = CircuitState::Closed;
            self.opened_at = None;
        }
    }

    fn record_failure(&mut self, now: Instant) {
        self.prune(now);
        self.recent_attempts.push_back(Attempt { at: now, ok: false });
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;

        if self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
            return;
        }

        let total: u32 = self.recent_attempts.len() as u32;
        let failures = self.recent_attempts.iter().filter(|a| !a.ok).count() as u32;

        if total >= self.config.volume_threshold && failures >= self.config.failure_threshold {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.recent_attempts.clear();
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.opened_at = None;
    }
}

/// Error returned when a call is rejected without being attempted because the
/// breaker is open. Non-retryable from the caller's perspective: the router must
/// pick a different gateway rather than retry the same one.
pub struct CircuitOpenError(pub String);

impl From<CircuitOpenError> for CoreError {
    fn from(err: CircuitOpenError) -> Self {
        CoreError::new(ErrorCategory::Gateway, format!("circuit open for {}", err.0))
            .with_metadata("permanent_for_gateway", "true")
    }
}

pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Breaker>>,
    config: BreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn state(&self, gateway: &str) -> CircuitState {
        let mut breakers = self.breakers.write();
        let breaker = breakers
            .entry(gateway.to_string())
            .or_insert_with(|| Breaker::new(self.config));
        breaker.poll_state(Instant::now())
    }

    pub fn record_success(&self, gateway: &str) {
        let mut breakers = self.breakers.write();
        let breaker = breakers
            .entry(gateway.to_string())
            .or_insert_with(|| Breaker::new(self.config));
        breaker.record_success(Instant::now());
    }

    pub fn record_failure(&self, gateway: &str) {
        let mut breakers = self.breakers.write();
        let breaker = breakers
            .entry(gateway.to_string())
            .or_insert_with(|| Breaker::new(self.config));
        breaker.record_failure(Instant::now());
    }

    pub fn reset(&self, gateway: &str) {
        let mut breakers = self.breakers.write();
        if let Some(breaker) = breakers.get_mut(gateway) {
            breaker.reset();
        }
    }

    /// Runs `fut` guarded by this gateway's breaker and request timeout. Returns the
    /// inner result, a `CircuitOpenError` if the breaker is open, or a timeout error.
    pub async fn execute<F, T>(&self, gateway: &str, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        if self.state(gateway) == CircuitState::Open {
            return Err(CircuitOpenError(gateway.to_string()).into());
        }

        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(Ok(value)) => {
                self.record_success(gateway);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure(gateway);
                Err(err)
            }
            Err(_) => {
                self.record_failure(gateway);
                Err(CoreError::new(ErrorCategory::Timeout, "gateway call timed out")
                    .with_metadata("gateway", gateway))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_window: Duration::from_secs(60),
            volume_threshold: 10,
            failure_threshold: 5,
            open_timeout: Duration::from_millis(20),
            success_threshold: 2,
            request_timeout: Duration::from_secs(1),
        }
    }

    // 4 failures in 4 attempts stays CLOSED: volume threshold not met yet.
    #[test]
    fn stays_closed_under_volume_threshold() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for _ in 0..4 {
            registry.record_failure("g1");
        }
        assert_eq!(registry.state("g1"), CircuitState::Closed);
    }

    // 10 attempts, 5 failures -> OPEN exactly once.
    #[test]
    fn opens_exactly_once_when_thresholds_met() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for i in 0..10 {
            if i % 2 == 0 {
                registry.record_failure("g1");
            } else {
                registry.record_success("g1");
            }
        }
        assert_eq!(registry.state("g1"), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for _ in 0..10 {
            registry.record_failure("g1");
        }
        assert_eq!(registry.state("g1"), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(registry.state("g1"), CircuitState::HalfOpen);

        registry.record_success("g1");
        registry.record_success("g1");
        assert_eq!(registry.state("g1"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_reopens_on_single_failure() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for _ in 0..10 {
            registry.record_failure("g1");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(registry.state("g1"), CircuitState::HalfOpen);

        registry.record_failure("g1");
        assert_eq!(registry.state("g1"), CircuitState::Open);
    }

    #[tokio::test]
    async fn execute_rejects_when_open() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for _ in 0..10 {
            registry.record_failure("g1");
        }
        let result: Result<(), CoreError> = registry
            .execute("g1", async { Ok(()) })
            .await;
        assert!(result.is_err());
    }
}
