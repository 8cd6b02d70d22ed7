//! A token bucket that lets its balance go negative.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A token bucket holding up to one second's worth of tokens.
///
/// The bucket starts full, and refills continuously at `rate` tokens per
/// second up to its capacity of `rate` tokens.  Taking more tokens than are
/// available leaves a deficit, which the taker pays off by waiting.
#[derive(Debug)]
pub(crate) struct Bucket {
    /// Tokens added per second; also the capacity.  Always finite and positive.
    rate: f64,
    /// Current balance.
    state: Mutex<BucketState>,
}

/// Mutable part of a [`Bucket`].
#[derive(Debug)]
struct BucketState {
    /// Tokens available as of `last`.  Never above the capacity; may be negative.
    tokens: f64,
    /// When we last brought `tokens` up to date.
    last: Instant,
}

impl Bucket {
    /// Make a new full bucket for `rate`, as of `now`.
    ///
    /// `rate` must be finite and positive.
    pub(crate) fn new(rate: f64, now: Instant) -> Self {
        debug_assert!(rate.is_finite() && rate > 0.0);
        Bucket {
            rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last: now,
            }),
        }
    }

    /// Take `n` tokens as of `now`, and return how long the caller must wait
    /// before the balance is non-negative again.
    ///
    /// The tokens are taken even when the caller has to wait for them.
    pub(crate) fn take(&self, now: Instant, n: u64) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }
        let mut state = self.state.lock().expect("poisoned lock");
        state.refill(now, self.rate);
        state.tokens -= n as f64;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-state.tokens / self.rate).unwrap_or(Duration::MAX)
        }
    }

    /// Return the number of tokens available as of `now`.
    #[cfg(test)]
    pub(crate) fn available(&self, now: Instant) -> f64 {
        let mut state = self.state.lock().expect("poisoned lock");
        state.refill(now, self.rate);
        state.tokens
    }
}

impl BucketState {
    /// Add the tokens earned between `last` and `now`.
    ///
    /// If `now` is earlier than `last`, nothing is earned.
    fn refill(&mut self, now: Instant, rate: f64) {
        let earned = now.saturating_duration_since(self.last).as_secs_f64() * rate;
        self.tokens = (self.tokens + earned).min(rate);
        self.last = self.last.max(now);
    }
}
