//! Per-key token bucket
//!
//! Buckets are refilled lazily: each call credits the key with
//! `refill_rate` tokens for every whole `refill_every` interval elapsed since
//! its last refill, so no background task is needed. A bucket that has
//! refilled to the maximum is indistinguishable from an unseen key, so such
//! buckets are dropped whenever the map doubles past [`SWEEP_THRESHOLD`].

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Bucket count below which no sweep runs
pub const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

#[derive(Debug)]
struct Buckets {
    map: HashMap<String, Bucket>,
    next_sweep: usize,
}

/// Token bucket rate limiter keyed by caller identity
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    max_tokens: u32,
    refill_rate: u32,
    refill_every: Duration,
}

impl RateLimiter {
    /// `max_tokens` per key, topped up by `refill_rate` every `refill_every`
    pub fn new(max_tokens: u32, refill_rate: u32, refill_every: Duration) -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                map: HashMap::new(),
                next_sweep: SWEEP_THRESHOLD,
            }),
            max_tokens,
            refill_rate,
            refill_every,
        }
    }

    /// `max` requests per minute, refilled in full every minute
    pub fn per_minute(max: u32) -> Self {
        Self::new(max, max, Duration::from_secs(60))
    }

    /// Consume one token for `key`; false when the bucket is empty
    pub async fn allow(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        if buckets.map.len() >= buckets.next_sweep && !buckets.map.contains_key(key) {
            self.sweep(&mut buckets.map, now);
            buckets.next_sweep = SWEEP_THRESHOLD.max(buckets.map.len() * 2);
        }

        let bucket = buckets.map.entry(key.to_string()).or_insert(Bucket {
            tokens: self.max_tokens,
            last_refill: now,
        });
        self.refill(bucket, now);

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens left for `key`; unknown keys report the maximum
    pub async fn remaining(&self, key: &str) -> u32 {
        let mut buckets = self.buckets.lock().await;
        match buckets.map.get_mut(key) {
            Some(bucket) => {
                self.refill(bucket, Instant::now());
                bucket.tokens
            }
            None => self.max_tokens,
        }
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Number of keys currently holding a bucket
    pub async fn len(&self) -> usize {
        self.buckets.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every bucket that has refilled to the maximum; returns how many
    pub async fn purge_idle(&self) -> usize {
        let mut buckets = self.buckets.lock().await;
        let removed = self.sweep(&mut buckets.map, Instant::now());
        buckets.next_sweep = SWEEP_THRESHOLD.max(buckets.map.len() * 2);
        removed
    }

    fn sweep(&self, map: &mut HashMap<String, Bucket>, now: Instant) -> usize {
        let before = map.len();
        map.retain(|_, bucket| {
            self.refill(bucket, now);
            bucket.tokens < self.max_tokens
        });
        before - map.len()
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        if self.refill_every.is_zero() {
            bucket.tokens = self.max_tokens;
            bucket.last_refill = now;
            return;
        }

        let elapsed = now.duration_since(bucket.last_refill);
        let intervals = (elapsed.as_nanos() / self.refill_every.as_nanos()) as u64;
        if intervals == 0 {
            return;
        }

        let credit = intervals.saturating_mul(self.refill_rate as u64);
        bucket.tokens = (bucket.tokens as u64)
            .saturating_add(credit)
            .min(self.max_tokens as u64) as u32;
        if bucket.tokens == self.max_tokens {
            bucket.last_refill = now;
        } else {
            // keep the partial interval so refills stay aligned
            bucket.last_refill += self.refill_every * intervals as u32;
        }
    }
}
