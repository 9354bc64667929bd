//! Per-backend mutable state: health machine, latency window, token bucket.
//!
//! All of this lives in one small record behind a single `parking_lot::Mutex`
//! per backend, so unrelated backends never contend. The health machine:
//!
//! ```text
//! Healthy   --consecutive_failures >= F-->   Unhealthy
//! Unhealthy --probe success-->               Healthy
//! Healthy   --window p99 > L-->              Degraded   (selectable, deprioritized)
//! Degraded  --window p99 <= L-->             Healthy
//! Unhealthy --consecutive_failures >= 2F-->  Banned(now + Tban)
//! Banned    --Tban elapsed AND probe ok-->   Healthy
//! ```

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Health state of a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Passing traffic normally.
    Healthy,
    /// Sustained p99 latency above the configured threshold. Still
    /// selectable, but policies deprioritize it.
    Degraded,
    /// Hit the consecutive-failure threshold; only a successful probe
    /// recovers it.
    Unhealthy,
    /// Evicted until the given instant; recovery additionally requires a
    /// successful probe after expiry.
    Banned { until: Instant },
}

impl HealthState {
    /// Selectable states receive dispatch traffic.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Static label for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Banned { .. } => "banned",
        }
    }
}

/// Rolling window of recent dispatch latencies, in milliseconds.
///
/// Fixed-capacity ring; percentile queries sort a copy, which is fine at this
/// size and off the per-dispatch fast path (only consulted on state checks).
#[derive(Debug)]
pub struct LatencyWindow {
    samples: Vec<u64>,
    next: usize,
    capacity: usize,
}

impl LatencyWindow {
    const DEFAULT_CAPACITY: usize = 128;

    /// Minimum samples before percentile answers are considered meaningful.
    pub const MIN_SAMPLES: usize = 10;

    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { samples: Vec::with_capacity(capacity), next: 0, capacity }
    }

    pub fn record(&mut self, latency_ms: u64) {
        if self.samples.len() < self.capacity {
            self.samples.push(latency_ms);
        } else {
            self.samples[self.next] = latency_ms;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the given percentile (0–100), or `None` below
    /// [`Self::MIN_SAMPLES`].
    #[must_use]
    pub fn percentile(&self, p: u8) -> Option<u64> {
        if self.samples.len() < Self::MIN_SAMPLES {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let rank = (usize::from(p) * (sorted.len() - 1)).div_ceil(100);
        Some(sorted[rank.min(sorted.len() - 1)])
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Token bucket guarding a backend's request rate.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(rate_per_sec: u32, capacity: u32) -> Self {
        Self {
            tokens: f64::from(capacity),
            capacity: f64::from(capacity),
            refill_per_sec: f64::from(rate_per_sec),
            last_refill: Instant::now(),
        }
    }

    /// Atomically takes `n` tokens, or none at all. A batch of N sub-requests
    /// needs N tokens up front.
    #[must_use]
    pub fn try_take(&mut self, n: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }

        let needed = f64::from(n);
        if self.tokens >= needed {
            self.tokens -= needed;
            true
        } else {
            false
        }
    }
}

/// Per-method dispatch counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct MethodCounters {
    pub calls: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
}

/// The mutable record for one backend, guarded by its own mutex.
#[derive(Debug)]
pub struct BackendStats {
    state: HealthState,
    consecutive_failures: u32,
    latency: LatencyWindow,
    bucket: TokenBucket,
    method_counters: HashMap<String, MethodCounters>,
    failure_threshold: u32,
    degraded_latency_ms: u64,
    ban_duration: Duration,
}

impl BackendStats {
    #[must_use]
    pub fn new(
        max_rps: u32,
        failure_threshold: u32,
        degraded_latency_ms: u64,
        ban_duration: Duration,
    ) -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            latency: LatencyWindow::new(),
            bucket: TokenBucket::new(max_rps, max_rps),
            method_counters: HashMap::new(),
            failure_threshold,
            degraded_latency_ms,
            ban_duration,
        }
    }

    #[must_use]
    pub fn state(&self) -> HealthState {
        self.state
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[must_use]
    pub fn method_counters(&self, method: &str) -> Option<MethodCounters> {
        self.method_counters.get(method).copied()
    }

    #[must_use]
    pub fn try_take_tokens(&mut self, n: u32) -> bool {
        self.bucket.try_take(n)
    }

    /// Records a successful dispatch, with the per-method latency share.
    ///
    /// Resets the failure tally and re-evaluates the Degraded threshold
    /// against the rolling window. Success does not lift Unhealthy or Banned;
    /// those recover only through the probe path.
    pub fn record_success(&mut self, methods: &[&str], latency_ms: u64) {
        self.consecutive_failures = 0;
        self.latency.record(latency_ms);
        for method in methods {
            let counters = self.method_counters.entry((*method).to_string()).or_default();
            counters.calls += 1;
            counters.total_latency_ms += latency_ms;
        }

        match self.state {
            HealthState::Healthy => {
                if self.latency.percentile(99).is_some_and(|p99| p99 > self.degraded_latency_ms) {
                    self.state = HealthState::Degraded;
                }
            }
            HealthState::Degraded => {
                if self.latency.percentile(99).is_some_and(|p99| p99 <= self.degraded_latency_ms) {
                    self.state = HealthState::Healthy;
                }
            }
            HealthState::Unhealthy | HealthState::Banned { .. } => {}
        }
    }

    /// Records a failed dispatch.
    ///
    /// Reaching the failure threshold moves the backend to Unhealthy; failures
    /// sustained to twice the threshold trigger the ban policy.
    pub fn record_failure(&mut self, methods: &[&str]) {
        self.consecutive_failures += 1;
        for method in methods {
            let counters = self.method_counters.entry((*method).to_string()).or_default();
            counters.calls += 1;
            counters.errors += 1;
        }

        match self.state {
            HealthState::Banned { .. } => {}
            _ if self.consecutive_failures >= self.failure_threshold.saturating_mul(2) => {
                self.state = HealthState::Banned { until: Instant::now() + self.ban_duration };
            }
            _ if self.consecutive_failures >= self.failure_threshold => {
                self.state = HealthState::Unhealthy;
            }
            _ => {}
        }
    }

    /// Applies a probe outcome.
    ///
    /// A successful probe recovers Unhealthy immediately and Banned only once
    /// the ban has lapsed. Probe failures count toward the failure tally like
    /// dispatch failures but charge no method counters.
    pub fn record_probe(&mut self, success: bool) {
        if success {
            match self.state {
                HealthState::Unhealthy => {
                    self.state = HealthState::Healthy;
                    self.consecutive_failures = 0;
                }
                HealthState::Banned { until } if Instant::now() >= until => {
                    self.state = HealthState::Healthy;
                    self.consecutive_failures = 0;
                }
                HealthState::Banned { .. } => {}
                HealthState::Healthy | HealthState::Degraded => {
                    self.consecutive_failures = 0;
                }
            }
        } else {
            self.record_failure(&[]);
        }
    }
}
