//! Per-caller token-bucket rate limiting.
//!
//! One bucket per caller key. Tokens refill continuously at the sustained
//! rate and the balance is capped at the burst capacity, so an idle caller
//! earns at most one full burst. Refill is computed lazily from the elapsed
//! time at admission, so idle buckets cost nothing.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::auth::identity::ANONYMOUS_SUBJECT;
use crate::config::RateLimitConfig;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The request may proceed
    Admitted,
    /// The bucket is exhausted
    Throttled {
        /// Time until one full token has accrued
        retry_after: Duration,
    },
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter keyed by caller credential digest.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    refill_per_second: f64,
    enabled: bool,
}

impl RateLimiter {
    /// Create a limiter with the configured capacity and refill rate.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: f64::from(config.burst_size),
            refill_per_second: config.requests_per_second,
            enabled: config.enabled,
        }
    }

    /// Admit or throttle one request for `key`.
    #[must_use]
    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    /// Admission check against an explicit clock reading.
    ///
    /// `now` earlier than the bucket's last refill counts as zero elapsed
    /// time rather than going backwards.
    #[must_use]
    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        if !self.enabled {
            return Admission::Admitted;
        }

        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens < 1.0 {
            let retry_after =
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_second);
            debug!(key = %key, retry_after_ms = retry_after.as_millis() as u64, "request throttled");
            return Admission::Throttled { retry_after };
        }

        bucket.tokens -= 1.0;
        Admission::Admitted
    }

    /// Number of live buckets, for the health summary.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Caller key for a request: digest of the raw credential, or the anonymous
/// sentinel when none was presented.
///
/// Hashing before use as a map key keeps bearer tokens out of memory dumps
/// of the bucket table and out of log fields.
#[must_use]
pub fn bucket_key(credential: Option<&str>) -> String {
    match credential {
        Some(raw) => {
            let mut hasher = Sha256::new();
            hasher.update(raw.as_bytes());
            hasher
                .finalize()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect()
        }
        None => ANONYMOUS_SUBJECT.to_string(),
    }
}
