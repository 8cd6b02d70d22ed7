//! A virtual clock, for testing code that uses a [`Limiter`](crate::Limiter).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use event_listener::{Event, EventListener, Listener as _};

use crate::clock::{AsyncClock, Clock};

/// A clock whose time only moves when [`advance`](MockClock::advance) is called.
///
/// Threads that [`sleep`](Clock::sleep) on a `MockClock` block until some
/// other thread has advanced it far enough; futures returned by
/// [`delay`](AsyncClock::delay) likewise stay pending until then.
///
/// Clones share the same virtual time.
#[derive(Clone)]
pub struct MockClock {
    /// Shared state.
    inner: Arc<Inner>,
}

/// Shared state of a [`MockClock`].
struct Inner {
    /// Current virtual time, and bookkeeping.
    state: Mutex<State>,
    /// Notified whenever the virtual time moves.
    advanced: Event,
}

/// Mutable part of a [`MockClock`].
struct State {
    /// The real instant that virtual time started at.
    start: Instant,
    /// How far virtual time has moved since `start`.
    elapsed: Duration,
    /// Deadlines (as elapsed virtual time) of every thread and future that
    /// is currently waiting on this clock.
    sleeping: Vec<Duration>,
}

impl MockClock {
    /// Make a new clock, starting at the current instant.
    pub fn new() -> Self {
        MockClock {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    start: Instant::now(),
                    elapsed: Duration::ZERO,
                    sleeping: Vec::new(),
                }),
                advanced: Event::new(),
            }),
        }
    }

    /// Move time forward by `dur`, waking anybody whose sleep is over.
    pub fn advance(&self, dur: Duration) {
        {
            let mut state = self.inner.state.lock().expect("poisoned lock");
            state.elapsed += dur;
        }
        self.inner.advanced.notify(usize::MAX);
    }

    /// Return how much virtual time has passed since this clock was created.
    pub fn elapsed(&self) -> Duration {
        self.inner.state.lock().expect("poisoned lock").elapsed
    }

    /// Return the number of threads and futures that are waiting on this
    /// clock and whose deadline has not yet been reached.
    ///
    /// A sleeper whose deadline has passed, but which has not yet noticed,
    /// is not counted.
    pub fn sleepers(&self) -> usize {
        let state = self.inner.state.lock().expect("poisoned lock");
        state
            .sleeping
            .iter()
            .filter(|deadline| **deadline > state.elapsed)
            .count()
    }

    /// Block the current thread until at least `n` sleepers are blocked on
    /// this clock.
    ///
    /// Useful for making sure that the threads under test have all reached
    /// their sleep before the clock is advanced again.
    pub fn wait_for_sleepers(&self, n: usize) {
        while self.sleepers() < n {
            std::thread::yield_now();
        }
    }

    /// Return the virtual elapsed time at which a sleep of `dur` starting now ends.
    fn deadline(&self, dur: Duration) -> Duration {
        self.elapsed().saturating_add(dur)
    }

    /// Register a sleeper until `deadline`, returning a guard that
    /// unregisters it on drop.
    fn register_sleeper(&self, deadline: Duration) -> SleeperGuard {
        self.inner
            .state
            .lock()
            .expect("poisoned lock")
            .sleeping
            .push(deadline);
        SleeperGuard {
            inner: Arc::clone(&self.inner),
            deadline,
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().expect("poisoned lock");
        f.debug_struct("MockClock")
            .field("elapsed", &state.elapsed)
            .field("sleeping", &state.sleeping.len())
            .finish_non_exhaustive()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let state = self.inner.state.lock().expect("poisoned lock");
        state.start + state.elapsed
    }

    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let deadline = self.deadline(duration);
        let _guard = self.register_sleeper(deadline);
        loop {
            // Listen before checking, so that we can't miss an advance.
            let listener = self.inner.advanced.listen();
            if self.elapsed() >= deadline {
                return;
            }
            listener.wait();
        }
    }
}

impl AsyncClock for MockClock {
    type Delay = MockDelay;

    fn delay(&self, duration: Duration) -> MockDelay {
        MockDelay {
            deadline: self.deadline(duration),
            clock: self.clone(),
            listener: None,
            guard: None,
        }
    }
}

/// Unregisters a sleeper from a [`MockClock`] when dropped.
struct SleeperGuard {
    /// The clock we registered with.
    inner: Arc<Inner>,
    /// The deadline we registered.
    deadline: Duration,
}

impl Drop for SleeperGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("poisoned lock");
        if let Some(pos) = state.sleeping.iter().position(|d| *d == self.deadline) {
            state.sleeping.swap_remove(pos);
        }
    }
}

/// Future returned by [`MockClock`]'s [`delay`](AsyncClock::delay).
pub struct MockDelay {
    /// The clock we're waiting on.
    clock: MockClock,
    /// Virtual elapsed time at which we become ready.
    deadline: Duration,
    /// Listener for the next advance, if we have registered one.
    listener: Option<EventListener>,
    /// Keeps us counted as a sleeper while we are pending.
    guard: Option<SleeperGuard>,
}

impl fmt::Debug for MockDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDelay")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Future for MockDelay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        loop {
            if this.clock.elapsed() >= this.deadline {
                this.listener = None;
                this.guard = None;
                return Poll::Ready(());
            }
            if this.guard.is_none() {
                this.guard = Some(this.clock.register_sleeper(this.deadline));
            }
            match this.listener.as_mut() {
                // Register, then loop around to check the time again.
                None => this.listener = Some(this.clock.inner.advanced.listen()),
                Some(listener) => {
                    futures::ready!(Pin::new(listener).poll(cx));
                    this.listener = None;
                }
            }
        }
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
    use std::thread;

    #[test]
    fn now_follows_advance() {
        let clock = MockClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now() - t0, Duration::from_secs(3));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn sleep_blocks_until_advanced() {
        let clock = MockClock::new();
        // Zero sleeps never block.
        clock.sleep(Duration::ZERO);

        let c2 = clock.clone();
        let handle = thread::spawn(move || c2.sleep(Duration::from_secs(2)));
        clock.wait_for_sleepers(1);

        clock.advance(Duration::from_secs(1));
        assert!(!handle.is_finished());
        assert_eq!(clock.sleepers(), 1);

        clock.advance(Duration::from_secs(1));
        handle.join().unwrap();
        assert_eq!(clock.sleepers(), 0);
    }

    #[test]
    fn delay_completes_after_advance() {
        let clock = MockClock::new();
        futures::executor::block_on(clock.delay(Duration::ZERO));

        let delay = clock.delay(Duration::from_millis(500));
        let handle = thread::spawn(move || futures::executor::block_on(delay));
        clock.wait_for_sleepers(1);
        clock.advance(Duration::from_millis(499));
        assert!(!handle.is_finished());
        clock.advance(Duration::from_millis(1));
        handle.join().unwrap();
        assert_eq!(clock.sleepers(), 0);
    }
}
