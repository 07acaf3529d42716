use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Buckets that refilled completely are indistinguishable from fresh ones,
/// so they are dropped once the table grows past this size.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RateKey(pub String);

/// Per-client admission check.
pub trait RateLimit: Send + Sync {
    /// Take one token for `key`; `false` means the client is over its limit.
    fn try_acquire(&self, key: &RateKey) -> bool;

    /// Suggested wait for a rejected client.
    fn retry_after(&self) -> Duration;
}

#[derive(Clone, Copy, Debug)]
struct BucketCfg {
    qps: f64,
    burst: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Instant,
}

impl BucketState {
    fn new(cfg: BucketCfg, now: Instant) -> Self {
        Self {
            tokens: cfg.burst,
            last: now,
        }
    }

    fn refill(&mut self, cfg: BucketCfg, now: Instant) {
        let dt = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + dt * cfg.qps).min(cfg.burst);
    }

    fn take(&mut self, cfg: BucketCfg, now: Instant) -> bool {
        self.refill(cfg, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_full(&self, cfg: BucketCfg, now: Instant) -> bool {
        let dt = now.duration_since(self.last).as_secs_f64();
        self.tokens + dt * cfg.qps >= cfg.burst
    }
}

/// Token buckets keyed by client, refilled at a steady per-minute rate.
pub struct TokenBuckets {
    cfg: BucketCfg,
    requests_per_minute: u32,
    buckets: DashMap<RateKey, BucketState>,
}

impl TokenBuckets {
    /// A zero rate never refills; clients get `burst` requests in total.
    pub fn per_minute(requests_per_minute: u32, burst: u32) -> Self {
        Self {
            cfg: BucketCfg {
                qps: f64::from(requests_per_minute) / 60.0,
                burst: f64::from(burst.max(1)),
            },
            requests_per_minute,
            buckets: DashMap::new(),
        }
    }

    fn acquire_at(&self, key: &RateKey, now: Instant) -> bool {
        if self.buckets.len() > PRUNE_THRESHOLD {
            let cfg = self.cfg;
            self.buckets.retain(|_, b| !b.is_full(cfg, now));
        }
        let mut bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| BucketState::new(self.cfg, now));
        bucket.take(self.cfg, now)
    }
}

impl RateLimit for TokenBuckets {
    fn try_acquire(&self, key: &RateKey) -> bool {
        self.acquire_at(key, Instant::now())
    }

    fn retry_after(&self) -> Duration {
        match self.requests_per_minute {
            0 => Duration::from_secs(60),
            n => (Duration::from_secs(60) / n).max(Duration::from_secs(1)),
        }
    }
}
