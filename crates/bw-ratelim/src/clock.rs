//! Sources of time (and of sleeping) for a [`Limiter`](crate::Limiter).

use std::future::Future;
use std::time::{Duration, Instant};

use tor_rtcompat::SleepProvider;

/// A source of the current time, which can also put the calling thread to sleep.
///
/// Implementations must be cheap to query: the limiter calls
/// [`now`](Clock::now) every time it hands out tokens.
pub trait Clock: Send + Sync + 'static {
    /// Return the current time.
    fn now(&self) -> Instant;

    /// Block the calling thread for at least `duration`.
    ///
    /// Only the calling thread is affected.  A zero `duration` returns at once.
    fn sleep(&self, duration: Duration);
}

/// A [`Clock`] that can also wait asynchronously.
///
/// This is what the `futures::io` decorators use to serve their delays.
pub trait AsyncClock: Clock {
    /// The future returned by [`delay`](AsyncClock::delay).
    type Delay: Future<Output = ()> + Send + 'static;

    /// Return a future that becomes ready once `duration` has elapsed on this clock.
    fn delay(&self, duration: Duration) -> Self::Delay;
}

/// The real system clock.
///
/// Sleeping blocks the calling OS thread.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// A [`Clock`] backed by an async runtime's [`SleepProvider`].
///
/// The current time, asynchronous delays, and blocking sleeps all come from
/// the runtime, so a limiter built on a `RuntimeClock` agrees with the
/// runtime's idea of time (including a mocked one).
///
/// The blocking [`sleep`](Clock::sleep) parks the calling thread until one of
/// the runtime's sleep futures completes.  Do not call
/// [`Limiter::wait`](crate::Limiter::wait) from a runtime worker thread: use
/// [`Limiter::wait_async`](crate::Limiter::wait_async) or the async
/// decorators instead.
#[derive(Clone, Debug)]
pub struct RuntimeClock<R> {
    /// The runtime we take our time from.
    runtime: R,
}

impl<R: SleepProvider> RuntimeClock<R> {
    /// Wrap `runtime` as a clock.
    pub fn new(runtime: R) -> Self {
        RuntimeClock { runtime }
    }

    /// Return the runtime behind this clock.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }
}

impl<R: SleepProvider> Clock for RuntimeClock<R> {
    fn now(&self) -> Instant {
        self.runtime.now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            futures::executor::block_on(self.runtime.sleep(duration));
        }
    }
}

impl<R: SleepProvider> AsyncClock for RuntimeClock<R> {
    type Delay = R::SleepFuture;

    fn delay(&self, duration: Duration) -> Self::Delay {
        self.runtime.sleep(duration)
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
    use crate::Limiter;
    use futures::FutureExt as _;
    use std::sync::Arc;
    use std::thread;
    use std::time::SystemTime;
    use tor_rtmock::simple_time::SimpleMockTimeProvider;

    #[test]
    fn system_clock_sleeps() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::ZERO);
        clock.sleep(Duration::from_millis(5));
        assert!(clock.now() - start >= Duration::from_millis(5));
    }

    #[test]
    fn runtime_clock_follows_runtime() {
        let rt = SimpleMockTimeProvider::from_wallclock(SystemTime::now());
        let clock = RuntimeClock::new(rt.clone());

        let start = clock.now();
        rt.advance(Duration::from_secs(3));
        assert_eq!(clock.now() - start, Duration::from_secs(3));

        let mut delay = Box::pin(clock.delay(Duration::from_secs(2)));
        assert!(delay.as_mut().now_or_never().is_none());
        rt.advance(Duration::from_secs(1));
        assert!(delay.as_mut().now_or_never().is_none());
        rt.advance(Duration::from_secs(1));
        assert!(delay.as_mut().now_or_never().is_some());
    }

    #[test]
    fn runtime_clock_sleeps_on_runtime_time() {
        let rt = SimpleMockTimeProvider::from_wallclock(SystemTime::now());
        let lim = Limiter::with_clock(10.0, RuntimeClock::new(rt.clone()));
        let start = lim.clock().now();
        assert_eq!(lim.take(10), Duration::ZERO);

        // Owes an hour of mocked time, which is never spent on the wall clock.
        let lim2 = Arc::clone(&lim);
        let handle = thread::spawn(move || lim2.wait(36_000));
        while !handle.is_finished() {
            rt.advance(Duration::from_secs(60));
            thread::yield_now();
        }
        handle.join().unwrap();
        assert!(lim.clock().now() - start >= Duration::from_secs(3600));
    }
}
