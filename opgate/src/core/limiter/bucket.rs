//! Token bucket state and refill arithmetic
//!
//! A bucket is persisted as a single cache value, `"<tokens>:<last_refill>"`,
//! where `last_refill` is a Unix timestamp in seconds. This module owns the
//! encoding and the pure refill computation; the cache round trips live in
//! [`TokenBucketLimiter`](super::TokenBucketLimiter).

/// Namespace for bucket keys in the shared cache
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit:";

/// Cache key holding the bucket of `identifier`
pub fn bucket_key(identifier: &str) -> String {
    format!("{RATE_LIMIT_KEY_PREFIX}{identifier}")
}

/// Seconds between two single-token refills for a per-minute rate
///
/// Never less than one second; rates above 60 per minute therefore refill one
/// token per second.
///
/// ```
/// use opgate::core::limiter::refill_interval_secs;
///
/// assert_eq!(refill_interval_secs(60), 1);
/// assert_eq!(refill_interval_secs(10), 6);
/// assert_eq!(refill_interval_secs(600), 1);
/// ```
pub fn refill_interval_secs(requests_per_minute: u32) -> i64 {
    (60 / i64::from(requests_per_minute.max(1))).max(1)
}

/// Persisted state of one token bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Tokens currently available
    pub tokens: i64,
    /// Unix seconds of the last refill
    pub last_refill: i64,
}

impl BucketState {
    /// A bucket filled to `capacity` as of `now`
    pub fn full(capacity: i64, now: i64) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Decode a stored value, `None` when it is corrupted
    ///
    /// ```
    /// use opgate::core::limiter::BucketState;
    ///
    /// let state = BucketState::decode(b"5:1700000000").unwrap();
    /// assert_eq!(state.tokens, 5);
    /// assert_eq!(state.last_refill, 1_700_000_000);
    ///
    /// assert!(BucketState::decode(b"5").is_none());
    /// assert!(BucketState::decode(b"five:1700000000").is_none());
    /// assert!(BucketState::decode(b"1:2:3").is_none());
    /// ```
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?;
        let (tokens, last_refill) = text.trim().split_once(':')?;
        let tokens: i64 = tokens.parse().ok()?;
        let last_refill: i64 = last_refill.parse().ok()?;

        if tokens < 0 || last_refill < 0 {
            return None;
        }

        Some(Self {
            tokens,
            last_refill,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.tokens, self.last_refill)
    }

    /// Cap the token count at `capacity`
    ///
    /// A stored count can exceed the capacity when the capacity was lowered
    /// while buckets were still live.
    pub fn clamp(self, capacity: i64) -> Self {
        Self {
            tokens: self.tokens.min(capacity),
            ..self
        }
    }

    /// Apply the tokens earned between `last_refill` and `now`
    ///
    /// Whole intervals only; a partial interval leaves both fields untouched
    /// so the remainder still counts towards the next refill. A `now` at or
    /// before `last_refill` (same-second burst, clock skew) refills nothing.
    ///
    /// ```
    /// use opgate::core::limiter::BucketState;
    ///
    /// let empty = BucketState { tokens: 0, last_refill: 100 };
    /// let refilled = empty.refill(110, 1, 5);
    /// assert_eq!(refilled, BucketState { tokens: 5, last_refill: 110 });
    ///
    /// // Less than one interval elapsed
    /// assert_eq!(empty.refill(105, 6, 5), empty);
    /// ```
    pub fn refill(self, now: i64, interval_secs: i64, capacity: i64) -> Self {
        let elapsed = now - self.last_refill;
        if elapsed <= 0 {
            return self;
        }

        let earned = elapsed / interval_secs.max(1);
        if earned > 0 {
            Self {
                tokens: capacity.min(self.tokens.saturating_add(earned)),
                last_refill: now,
            }
        } else {
            self
        }
    }
}
