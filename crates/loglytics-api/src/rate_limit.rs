//! Per-tenant ingest admission control (C4).
//!
//! A token bucket per tenant: `rate_limit_per_minute` records per
//! `rate_limit_window`, plus `burst_allowance` extra capacity for bursts.
//! Shape follows the teacher's `RateLimiter` (`DashMap<String, Bucket>`,
//! lazy refill on access, periodic stale-bucket eviction) in
//! `rate_limiting.rs`, generalized from a per-request to a per-record cost
//! and keyed by tenant instead of by IP/API-key.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::IngestConfig;

/// Once the bucket map exceeds this many entries, a cleanup pass evicts
/// buckets untouched for `STALE_BUCKET_TTL`.
const MAX_TRACKED_TENANTS: usize = 10_000;
const STALE_BUCKET_TTL: Duration = Duration::from_secs(600);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_accessed: Instant,
}

/// Token-bucket admission control, one bucket per tenant.
pub struct TenantRateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl TenantRateLimiter {
    pub fn new(config: &IngestConfig) -> Self {
        let window_secs = config.rate_limit_window.as_secs_f64().max(1.0);
        Self {
            buckets: DashMap::new(),
            capacity: (config.rate_limit_per_minute + config.burst_allowance) as f64,
            refill_per_sec: config.rate_limit_per_minute as f64 / window_secs,
        }
    }

    /// Attempt to admit `cost` records for `tenant_id`. On success, the
    /// tokens are consumed immediately. On failure, returns the number of
    /// whole seconds the caller should wait before retrying.
    pub fn check(&self, tenant_id: &str, cost: u32) -> Result<(), u64> {
        let now = Instant::now();
        self.maybe_evict_stale(now);

        let mut bucket = self.buckets.entry(tenant_id.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
            last_accessed: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
        bucket.last_accessed = now;

        let cost = cost as f64;
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            Ok(())
        } else {
            let deficit = cost - bucket.tokens;
            let wait_secs = (deficit / self.refill_per_sec).ceil() as u64;
            Err(wait_secs.max(1))
        }
    }

    fn maybe_evict_stale(&self, now: Instant) {
        if self.buckets.len() <= MAX_TRACKED_TENANTS / 2 {
            return;
        }
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_accessed) < STALE_BUCKET_TTL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: u32, burst: u32) -> IngestConfig {
        IngestConfig {
            rate_limit_per_minute: rate,
            burst_allowance: burst,
            rate_limit_window: Duration::from_secs(60),
            ..IngestConfig::default()
        }
    }

    #[test]
    fn admits_within_burst_capacity() {
        let limiter = TenantRateLimiter::new(&config(60, 10));
        assert!(limiter.check("t1", 50).is_ok());
        assert!(limiter.check("t1", 20).is_ok());
    }

    #[test]
    fn rejects_once_capacity_exhausted() {
        let limiter = TenantRateLimiter::new(&config(60, 0));
        assert!(limiter.check("t1", 60).is_ok());
        let result = limiter.check("t1", 1);
        assert!(result.is_err());
        assert!(result.unwrap_err() >= 1);
    }

    #[test]
    fn tenants_are_independently_tracked() {
        let limiter = TenantRateLimiter::new(&config(10, 0));
        assert!(limiter.check("a", 10).is_ok());
        assert!(limiter.check("b", 10).is_ok());
    }
}
