//! Gateway Health Tracker
//! Mission: maintain a per-gateway windowed success rate, latency profile, and
//! derived health score; readers always get a consistent snapshot.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW_SAMPLES: usize = 100;
const DEFAULT_WINDOW_SECS: u64 = 300;
const RECENCY_WINDOW_SECS: u64 = 30;
const LATENCY_NORMALIZER_MS: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone)]
struct Sample {
    ok: bool,
    latency_ms: u64,
    at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub health_score: f64,
    pub status: HealthStatus,
    pub sample_count: usize,
}

struct GatewayWindow {
    samples: VecDeque<Sample>,
}

impl GatewayWindow {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
        }
    }

    fn push(&mut self, sample: Sample) {
        let at = sample.at;
        self.samples.push_back(sample);
        self.prune(at);
    }

    fn prune(&mut self, now: Instant) {
        while self.samples.len() > DEFAULT_WINDOW_SAMPLES {
            self.samples.pop_front();
        }
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > Duration::from_secs(DEFAULT_WINDOW_SECS) {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn snapshot(&self, now: Instant) -> HealthSnapshot {
        let total = self.samples.len();
        if total == 0 {
            return HealthSnapshot {
                success_rate: 0.0,
                avg_response_time_ms: 0.0,
                health_score: 0.0,
                status: HealthStatus::Unknown,
                sample_count: 0,
            };
        }

        let successes = self.samples.iter().filter(|s| s.ok).count();
        let success_rate = successes as f64 / total as f64;
        let avg_response_time_ms =
            self.samples.iter().map(|s| s.latency_ms as f64).sum::<f64>() / total as f64;

        let latency_score = (1.0 - avg_response_time_ms / LATENCY_NORMALIZER_MS).max(0.0);
        let has_recent = self
            .samples
            .back()
            .map(|s| now.duration_since(s.at) <= Duration::from_secs(RECENCY_WINDOW_SECS))
            .unwrap_or(false);
        let recency_score = if has_recent { 1.0 } else { 0.0 };

        let raw_score = 100.0 * (0.6 * success_rate + 0.3 * latency_score + 0.1 * recency_score);
        let health_score = raw_score.clamp(0.0, 100.0);

        let last_five_failed = total >= 5
            && self
                .samples
                .iter()
                .rev()
                .take(5)
                .all(|s| !s.ok);

        let status = if health_score >= 80.0 {
            HealthStatus::Healthy
        } else if health_score >= 50.0 && !last_five_failed {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthSnapshot {
            success_rate,
            avg_response_time_ms,
            health_score,
            status,
            sample_count: total,
        }
    }
}

/// Tracks health windows for every gateway known to a tenant's routing pool.
pub struct GatewayHealthTracker {
    windows: RwLock<HashMap<String, GatewayWindow>>,
}

impl GatewayHealthTracker {
    pub fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, gateway: &str, latency_ms: u64) {
        self.record(gateway, true, latency_ms);
    }

    pub fn record_failure(&self, gateway: &str, latency_ms: u64) {
        self.record(gateway, false, latency_ms);
    }

    fn record(&self, gateway: &str, ok: bool, latency_ms: u64) {
        let mut windows = self.windows.write();
        let window = windows
            .entry(gateway.to_string())
            .or_insert_with(GatewayWindow::new);
        window.push(Sample {
            ok,
            latency_ms,
            at: Instant::now(),
        });
    }

    pub fn snapshot(&self, gateway: &str) -> HealthSnapshot {
        let windows = self.windows.read();
        match windows.get(gateway) {
            Some(window) => window.snapshot(Instant::now()),
            None => HealthSnapshot {
                success_rate: 0.0,
                avg_response_time_ms: 0.0,
                health_score: 0.0,
                status: HealthStatus::Unknown,
                sample_count: 0,
            },
        }
    }
}

impl Default for GatewayHealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_is_unknown() {
        let tracker = GatewayHealthTracker::new();
        let snap = tracker.snapshot("g1");
        assert_eq!(snap.status, HealthStatus::Unknown);
        assert_eq!(snap.sample_count, 0);
    }

    #[test]
    fn all_successes_yield_healthy_status() {
        let tracker = GatewayHealthTracker::new();
        for _ in 0..10 {
            tracker.record_success("g1", 50);
        }
        let snap = tracker.snapshot("g1");
        assert_eq!(snap.status, HealthStatus::Healthy);
        assert!(snap.health_score >= 80.0);
    }

    #[test]
    fn consecutive_failures_drive_unhealthy() {
        let tracker = GatewayHealthTracker::new();
        for _ in 0..5 {
            tracker.record_failure("g1", 50);
        }
        let snap = tracker.snapshot("g1");
        assert_eq!(snap.status, HealthStatus::Unhealthy);
    }

    // health score after success-then-failure is never lower than failure-alone.
    #[test]
    fn success_then_failure_is_monotone_over_failure_alone() {
        let tracker_a = GatewayHealthTracker::new();
        tracker_a.record_failure("g1", 100);
        let failure_alone = tracker_a.snapshot("g1").health_score;

        let tracker_b = GatewayHealthTracker::new();
        tracker_b.record_success("g1", 100);
        tracker_b.record_failure("g1", 100);
        let success_then_failure = tracker_b.snapshot("g1").health_score;

        assert!(success_then_failure >= failure_alone);
    }
}
