//! Client-facing rate limiting.
//!
//! The core only depends on the [`RateLimit`] contract: an atomic
//! take-or-reject of `n` tokens for a [`RateLimitKey`]. The shipped engine is
//! an in-memory token-bucket store; a Redis-backed store plugs in behind the
//! same trait without touching the frontend.

use dashmap::DashMap;
use std::time::Instant;

/// What a request is charged against: the caller plus a coarse method class,
/// so writes can be limited independently of reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Remote IP or `Authorization` subject, per config.
    pub subject: String,
    pub class: MethodClass,
}

impl RateLimitKey {
    #[must_use]
    pub fn new(subject: impl Into<String>, class: MethodClass) -> Self {
        Self { subject: subject.into(), class }
    }
}

/// Coarse method classification for rate-limit bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodClass {
    /// State-changing submissions (`eth_sendRawTransaction` and friends).
    Write,
    /// Everything else.
    Read,
}

impl MethodClass {
    /// Classifies a JSON-RPC method name.
    #[must_use]
    pub fn of(method: &str) -> Self {
        if method.starts_with("eth_send") {
            Self::Write
        } else {
            Self::Read
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Atomic take-or-reject contract. `n` is the batch size: a 10-element batch
/// takes 10 tokens or none.
pub trait RateLimit: Send + Sync {
    fn check(&self, key: &RateLimitKey, n: u32) -> Decision;
}

/// Pass-through limiter used when rate limiting is disabled.
#[derive(Debug, Default)]
pub struct AllowAll;

impl RateLimit for AllowAll {
    fn check(&self, _key: &RateLimitKey, _n: u32) -> Decision {
        Decision::Allowed
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// In-memory token-bucket engine.
///
/// Tracked keys are bounded to keep spoofed subjects from growing the map
/// without limit; once at capacity, unseen keys are denied outright.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    buckets: DashMap<RateLimitKey, Bucket>,
    capacity: f64,
    refill_per_sec: f64,
    max_keys: usize,
}

impl TokenBucketLimiter {
    const DEFAULT_MAX_KEYS: usize = 100_000;

    #[must_use]
    pub fn new(max_rps: u32, burst: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: f64::from(burst.max(1)),
            refill_per_sec: f64::from(max_rps),
            max_keys: Self::DEFAULT_MAX_KEYS,
        }
    }

    #[must_use]
    pub fn with_max_keys(max_rps: u32, burst: u32, max_keys: usize) -> Self {
        Self { max_keys, ..Self::new(max_rps, burst) }
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.buckets.len()
    }

    fn take(&self, bucket: &mut Bucket, n: u32) -> Decision {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }

        let needed = f64::from(n);
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            Decision::Allowed
        } else {
            Decision::Denied
        }
    }
}

impl RateLimit for TokenBucketLimiter {
    fn check(&self, key: &RateLimitKey, n: u32) -> Decision {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return self.take(&mut bucket, n);
        }

        if self.buckets.len() >= self.max_keys {
            tracing::warn!(subject = %key.subject, "rate limiter at key capacity, denying");
            return Decision::Denied;
        }

        let mut bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| Bucket { tokens: self.capacity, last_refill: Instant::now() });
        self.take(&mut bucket, n)
    }
}
