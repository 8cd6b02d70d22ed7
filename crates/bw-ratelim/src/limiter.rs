//! The shared, reconfigurable [`Limiter`].

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, trace};

use crate::bucket::Bucket;
use crate::clock::{AsyncClock, Clock, SystemClock};
use crate::{LimitedAsyncRead, LimitedAsyncWrite, LimitedReader, LimitedWriter};

/// A bandwidth limiter, shared by any number of streams.
///
/// Each unit of data (normally a byte) that passes through a stream using
/// this limiter costs one token.  Tokens come from a bucket that holds one
/// second's worth of the configured rate and refills continuously, so the
/// largest burst admitted without delay is one second of traffic.
///
/// A rate of zero, a negative rate, or a rate that is not a finite number
/// means "unlimited".
///
/// All the streams that share a `Limiter` share a single budget.  No
/// fairness is promised between them: under contention, whoever takes
/// tokens first gets them.
#[derive(Debug)]
pub struct Limiter<C = SystemClock> {
    /// The current rate and bucket.
    ///
    /// Taking tokens uses the read side of this lock; changing the rate
    /// replaces the whole value under the write side.
    inner: RwLock<LimiterInner>,
    /// Where we get the time from, and how we sleep.
    clock: C,
}

/// The replaceable state of a [`Limiter`].
#[derive(Debug)]
struct LimiterInner {
    /// Configured rate in tokens per second, or 0.0 if unlimited.
    rate: f64,
    /// Bucket to take tokens from, or `None` if unlimited.
    bucket: Option<Bucket>,
}

impl LimiterInner {
    /// Build the state for `rate`, with a full bucket as of `clock`'s now.
    fn new<C: Clock>(rate: f64, clock: &C) -> Self {
        if rate.is_finite() && rate > 0.0 {
            LimiterInner {
                rate,
                bucket: Some(Bucket::new(rate, clock.now())),
            }
        } else {
            LimiterInner {
                rate: 0.0,
                bucket: None,
            }
        }
    }
}

impl Limiter<SystemClock> {
    /// Make a new limiter that admits `rate` tokens per second, using the system clock.
    pub fn new(rate: f64) -> Arc<Self> {
        Self::with_clock(rate, SystemClock)
    }
}

impl<C: Clock> Limiter<C> {
    /// Make a new limiter that admits `rate` tokens per second, using `clock`.
    pub fn with_clock(rate: f64, clock: C) -> Arc<Self> {
        Arc::new(Limiter {
            inner: RwLock::new(LimiterInner::new(rate, &clock)),
            clock,
        })
    }

    /// Take `n` tokens without blocking.
    ///
    /// Returns how long the caller should wait before going ahead, so that
    /// the configured rate is respected.  The tokens are taken whether or
    /// not the caller actually waits.
    ///
    /// Returns zero if the limiter is unlimited, if `n` is zero, or if
    /// there were enough tokens.
    pub fn take(&self, n: u64) -> Duration {
        let inner = self.inner.read().expect("poisoned lock");
        match &inner.bucket {
            Some(bucket) => bucket.take(self.clock.now(), n),
            None => Duration::ZERO,
        }
    }

    /// Take `n` tokens, blocking the calling thread until they are paid for.
    ///
    /// The sleep happens with no lock held: a rate change while we sleep
    /// does not shorten or lengthen it.
    pub fn wait(&self, n: u64) {
        let delay = self.take(n);
        if !delay.is_zero() {
            trace!("Bandwidth limit reached: sleeping {:?} for {} bytes", delay, n);
            self.clock.sleep(delay);
        }
    }

    /// Return the configured rate, in tokens per second.
    ///
    /// An unlimited limiter reports 0.0.
    pub fn rate(&self) -> f64 {
        self.inner.read().expect("poisoned lock").rate
    }

    /// Return true if this limiter currently lets everything through.
    pub fn is_unlimited(&self) -> bool {
        self.inner.read().expect("poisoned lock").bucket.is_none()
    }

    /// Change the rate to `rate` tokens per second.
    ///
    /// The new rate takes effect for the next [`take`](Limiter::take), with a
    /// full bucket: any deficit owed under the old rate is forgiven.  Callers
    /// that are already sleeping are not affected.
    pub fn set_rate(&self, rate: f64) {
        let fresh = LimiterInner::new(rate, &self.clock);
        let new_rate = fresh.rate;
        let old_rate = {
            let mut inner = self.inner.write().expect("poisoned lock");
            std::mem::replace(&mut *inner, fresh).rate
        };
        debug!("Bandwidth rate changed from {} to {}", old_rate, new_rate);
    }

    /// Return the clock this limiter uses.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Wrap `reader` so that everything read from it is charged to this limiter.
    pub fn limit_read<R>(self: &Arc<Self>, reader: R) -> LimitedReader<R, C> {
        LimitedReader::new(reader, Arc::clone(self))
    }

    /// Wrap `writer` so that everything written to it is charged to this limiter.
    pub fn limit_write<W>(self: &Arc<Self>, writer: W) -> LimitedWriter<W, C> {
        LimitedWriter::new(writer, Arc::clone(self))
    }
}

impl<C: AsyncClock> Limiter<C> {
    /// Take `n` tokens, waiting asynchronously until they are paid for.
    pub async fn wait_async(&self, n: u64) {
        let delay = self.take(n);
        if !delay.is_zero() {
            trace!("Bandwidth limit reached: delaying {:?} for {} bytes", delay, n);
            self.clock.delay(delay).await;
        }
    }

    /// Wrap the async reader `io` so that everything read from it is charged to this limiter.
    pub fn limit_async_read<T>(self: &Arc<Self>, io: T) -> LimitedAsyncRead<T, C> {
        LimitedAsyncRead::new(io, Arc::clone(self))
    }

    /// Wrap the async writer `io` so that everything written to it is charged to this limiter.
    pub fn limit_async_write<T>(self: &Arc<Self>, io: T) -> LimitedAsyncWrite<T, C> {
        LimitedAsyncWrite::new(io, Arc::clone(self))
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]

    use super::*;
    use crate::MockClock;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::thread;
    use tracing_test::traced_test;

    fn mock_limiter(rate: f64) -> (Arc<Limiter<MockClock>>, MockClock) {
        let clock = MockClock::new();
        (Limiter::with_clock(rate, clock.clone()), clock)
    }

    #[test]
    fn starts_full() {
        let (lim, _clock) = mock_limiter(100.0);
        assert_eq!(lim.take(100), Duration::ZERO);
        assert_eq!(lim.take(100), Duration::from_secs(1));
    }

    #[test]
    fn scenario() {
        let (lim, _clock) = mock_limiter(100.0);
        assert_eq!(lim.rate(), 100.0);
        assert_eq!(lim.take(100), Duration::ZERO);
        assert_eq!(lim.take(50), Duration::from_millis(500));
        lim.set_rate(0.0);
        assert!(lim.is_unlimited());
        assert_eq!(lim.take(1_000_000), Duration::ZERO);
    }

    #[test]
    fn unlimited() {
        for rate in [0.0, -1.0, -1e9, f64::NAN, f64::INFINITY] {
            let (lim, _clock) = mock_limiter(rate);
            assert!(lim.is_unlimited());
            assert_eq!(lim.rate(), 0.0);
            assert_eq!(lim.take(0), Duration::ZERO);
            assert_eq!(lim.take(u64::MAX), Duration::ZERO);
            assert_eq!(lim.take(u64::MAX), Duration::ZERO);
        }
    }

    #[test]
    fn zero_take_is_free() {
        let (lim, _clock) = mock_limiter(10.0);
        assert_eq!(lim.take(10), Duration::ZERO);
        assert_eq!(lim.take(0), Duration::ZERO);
        assert_eq!(lim.take(0), Duration::ZERO);
        assert_eq!(lim.take(10), Duration::from_secs(1));
    }

    #[test]
    fn refills_over_time() {
        let (lim, clock) = mock_limiter(100.0);
        assert_eq!(lim.take(100), Duration::ZERO);
        clock.advance(Duration::from_millis(500));
        assert_eq!(lim.take(50), Duration::ZERO);
        assert_eq!(lim.take(50), Duration::from_millis(500));

        // A long idle period only buys one second's worth of burst.
        clock.advance(Duration::from_secs(30));
        assert_eq!(lim.take(100), Duration::ZERO);
        assert_eq!(lim.take(1), Duration::from_millis(10));
    }

    #[test]
    fn set_rate_forgives_debt() {
        let (lim, _clock) = mock_limiter(100.0);
        assert_eq!(lim.take(1000), Duration::from_secs(9));
        lim.set_rate(200.0);
        assert_eq!(lim.rate(), 200.0);
        assert_eq!(lim.take(200), Duration::ZERO);
        assert_eq!(lim.take(100), Duration::from_millis(500));

        // Going through "unlimited" and back also starts afresh.
        lim.set_rate(-5.0);
        assert_eq!(lim.rate(), 0.0);
        lim.set_rate(10.0);
        assert!(!lim.is_unlimited());
        assert_eq!(lim.take(10), Duration::ZERO);
    }

    #[test]
    #[traced_test]
    fn set_rate_logs() {
        let (lim, _clock) = mock_limiter(100.0);
        lim.set_rate(2048.0);
        assert!(logs_contain("Bandwidth rate changed from 100 to 2048"));
    }

    #[test]
    fn wait_sleeps_on_clock() {
        let (lim, clock) = mock_limiter(100.0);
        // Within the burst: no sleeping at all.
        lim.wait(100);
        assert_eq!(clock.sleepers(), 0);

        let lim2 = Arc::clone(&lim);
        let handle = thread::spawn(move || lim2.wait(50));
        clock.wait_for_sleepers(1);

        clock.advance(Duration::from_millis(499));
        assert!(!handle.is_finished());
        clock.advance(Duration::from_millis(1));
        handle.join().unwrap();
    }

    #[test]
    fn sleepers_unaffected_by_rate_change() {
        let (lim, clock) = mock_limiter(10.0);
        assert_eq!(lim.take(10), Duration::ZERO);

        let lim2 = Arc::clone(&lim);
        let handle = thread::spawn(move || lim2.wait(20));
        clock.wait_for_sleepers(1);

        // Neither a rate change nor token accounting is blocked by the sleeper.
        lim.set_rate(0.0);
        assert_eq!(lim.take(1_000_000), Duration::ZERO);
        lim.set_rate(10.0);
        assert_eq!(lim.take(10), Duration::ZERO);

        clock.advance(Duration::from_secs(1));
        assert!(!handle.is_finished());
        clock.advance(Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn wait_async_uses_delay() {
        let (lim, clock) = mock_limiter(10.0);
        futures::executor::block_on(lim.wait_async(10));

        let lim2 = Arc::clone(&lim);
        let handle = thread::spawn(move || futures::executor::block_on(lim2.wait_async(5)));
        clock.wait_for_sleepers(1);
        clock.advance(Duration::from_millis(400));
        assert!(!handle.is_finished());
        clock.advance(Duration::from_millis(100));
        handle.join().unwrap();
    }

    #[test]
    fn concurrent_waiters_respect_rate() {
        const RATE: f64 = 1000.0;
        const CHUNK: u64 = 64;
        const N_THREADS: usize = 8;
        const WINDOW: Duration = Duration::from_secs(5);
        const STEP: Duration = Duration::from_millis(10);

        let (lim, clock) = mock_limiter(RATE);
        let t0 = clock.now();
        let admitted = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..N_THREADS)
            .map(|_| {
                let lim = Arc::clone(&lim);
                let clock = clock.clone();
                let admitted = Arc::clone(&admitted);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        lim.wait(CHUNK);
                        if clock.now() - t0 <= WINDOW {
                            admitted.fetch_add(CHUNK, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        while clock.elapsed() < WINDOW {
            // Let every thread run until it is blocked on its debt.
            clock.wait_for_sleepers(N_THREADS);
            clock.advance(STEP);
        }
        clock.wait_for_sleepers(N_THREADS);
        let total = admitted.load(Ordering::SeqCst);

        // Release everybody.
        stop.store(true, Ordering::SeqCst);
        while !handles.iter().all(|h| h.is_finished()) {
            clock.advance(Duration::from_secs(1));
            thread::yield_now();
        }
        for h in handles {
            h.join().unwrap();
        }

        let bound = RATE * WINDOW.as_secs_f64() + RATE;
        assert!(total as f64 <= bound, "{} > {}", total, bound);
        // And the limiter is not absurdly stingy, either.
        assert!(total as f64 >= RATE * WINDOW.as_secs_f64() * 0.9);
    }
}
