#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
#![doc = include_str!("../README.md")]

/// Implementation notes
///
/// The [`Limiter`] keeps its bucket behind a read/write lock.  Taking tokens
/// only needs the shared side, since the bucket has its own small mutex for
/// its balance; replacing the rate takes the exclusive side and swaps in a
/// whole new bucket, so nobody ever sees a half-updated one.
///
/// Nothing ever sleeps while holding either lock.  A caller first *takes*
/// its tokens, which may leave the balance negative and tells the caller how
/// long it owes, and then sleeps with no lock held.  That way a slow caller
/// never holds up token accounting for other streams, or a rate change.
mod implementation_notes {}

mod async_io;
mod bucket;
mod clock;
mod io;
mod limiter;
#[cfg(any(test, feature = "testing"))]
mod mock;

pub use async_io::{LimitedAsyncRead, LimitedAsyncWrite};
pub use clock::{AsyncClock, Clock, RuntimeClock, SystemClock};
pub use io::{Close, LimitedReader, LimitedWriter};
pub use limiter::Limiter;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub use mock::{MockClock, MockDelay};
