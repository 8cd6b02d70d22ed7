//! `futures::io` streams that are throttled by a [`Limiter`].

use futures::io::{AsyncRead, AsyncWrite};
use futures::{ready, Future};
use pin_project::pin_project;
use std::io::Result as IoResult;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tracing::trace;

use crate::clock::AsyncClock;
use crate::limiter::Limiter;

/// Charge `n` bytes to `limiter`, and start a delay on `waiting_for` if we now owe time.
fn charge<C: AsyncClock>(
    limiter: &Limiter<C>,
    mut waiting_for: Pin<&mut Option<C::Delay>>,
    n: usize,
) {
    if n == 0 {
        return;
    }
    let delay = limiter.take(n as u64);
    if delay > Duration::ZERO {
        trace!("Bandwidth limit reached: owing {:?} for {} bytes", delay, n);
        waiting_for.set(Some(limiter.clock().delay(delay)));
    }
}

/// Wait for any delay we still owe.
fn poll_owed<C: AsyncClock>(
    mut waiting_for: Pin<&mut Option<C::Delay>>,
    cx: &mut Context<'_>,
) -> Poll<()> {
    if let Some(delay) = waiting_for.as_mut().as_pin_mut() {
        ready!(delay.poll(cx));
        // no longer waiting for anybody!
        waiting_for.set(None);
    }
    Poll::Ready(())
}

/// An [`AsyncRead`] whose throughput is bounded by a [`Limiter`].
///
/// The limiter is charged as soon as bytes arrive from the underlying
/// reader.  If that leaves us owing time, the bytes are kept here and only
/// handed to the caller once the wait is over.
///
/// Reads that return zero bytes or an error are never charged, and never
/// delayed.
#[pin_project]
pub struct LimitedAsyncRead<T, C: AsyncClock> {
    /// The limiter we charge.
    limiter: Arc<Limiter<C>>,

    /// The delay we owe for `held`, if any.
    #[pin]
    waiting_for: Option<C::Delay>,

    /// Bytes we have read, but not yet returned.
    held: Vec<u8>,

    /// The underlying reader.
    #[pin]
    inner: T,
}

impl<T: AsyncRead, C: AsyncClock> AsyncRead for LimitedAsyncRead<T, C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        let mut this = self.project();

        if !this.held.is_empty() {
            ready!(poll_owed::<C>(this.waiting_for.as_mut(), cx));
            let n = std::cmp::min(buf.len(), this.held.len());
            buf[..n].copy_from_slice(&this.held[..n]);
            this.held.drain(..n);
            return Poll::Ready(Ok(n));
        }

        let n = ready!(this.inner.poll_read(cx, buf))?;
        charge(this.limiter, this.waiting_for.as_mut(), n);
        if poll_owed::<C>(this.waiting_for, cx).is_pending() {
            // The caller may hand us a different buffer next time.
            this.held.extend_from_slice(&buf[..n]);
            return Poll::Pending;
        }
        Poll::Ready(Ok(n))
    }
}

impl<T, C: AsyncClock> LimitedAsyncRead<T, C> {
    /// Wrap `inner`, charging everything read to `limiter`.
    pub fn new(inner: T, limiter: Arc<Limiter<C>>) -> Self {
        Self {
            limiter,
            waiting_for: None,
            held: Vec::new(),
            inner,
        }
    }

    /// Return a pinned reference to the underlying reader.
    pub fn inner_pinned<'a>(self: Pin<&'a mut Self>) -> Pin<&'a mut T> {
        self.project().inner
    }

    /// Return a reference to the underlying reader.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Return the limiter this reader charges.
    pub fn limiter(&self) -> &Arc<Limiter<C>> {
        &self.limiter
    }

    /// Unwrap this reader.
    ///
    /// Any bytes that were read but are still waiting to be paid for are lost.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// An [`AsyncWrite`] whose throughput is bounded by a [`Limiter`].
///
/// Each write goes straight to the underlying writer, and is then charged.
/// If that leaves us owing time, the write reports its length only once the
/// wait is over.  As with any `AsyncWrite`, a caller that sees
/// `Poll::Pending` must poll again with the same buffer.
///
/// Writes that fail or write nothing are never charged.  Flushing and
/// closing are never delayed.
#[pin_project]
pub struct LimitedAsyncWrite<T, C: AsyncClock> {
    /// The limiter we charge.
    limiter: Arc<Limiter<C>>,

    /// The delay we owe for the last write, if any.
    #[pin]
    waiting_for: Option<C::Delay>,

    /// Length of a write that the underlying writer accepted, but which we
    /// have not reported yet.
    owed: Option<usize>,

    /// The underlying writer.
    #[pin]
    inner: T,
}

impl<T: AsyncWrite, C: AsyncClock> AsyncWrite for LimitedAsyncWrite<T, C> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<IoResult<usize>> {
        let mut this = self.project();

        if let Some(n) = *this.owed {
            ready!(poll_owed::<C>(this.waiting_for.as_mut(), cx));
            *this.owed = None;
            return Poll::Ready(Ok(n));
        }

        let n = ready!(this.inner.poll_write(cx, buf))?;
        charge(this.limiter, this.waiting_for.as_mut(), n);
        if poll_owed::<C>(this.waiting_for, cx).is_pending() {
            *this.owed = Some(n);
            return Poll::Pending;
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T, C: AsyncClock> LimitedAsyncWrite<T, C> {
    /// Wrap `inner`, charging everything written to `limiter`.
    pub fn new(inner: T, limiter: Arc<Limiter<C>>) -> Self {
        Self {
            limiter,
            waiting_for: None,
            owed: None,
            inner,
        }
    }

    /// Return a pinned reference to the underlying writer.
    pub fn inner_pinned<'a>(self: Pin<&'a mut Self>) -> Pin<&'a mut T> {
        self.project().inner
    }

    /// Return a reference to the underlying writer.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Return the limiter this writer charges.
    pub fn limiter(&self) -> &Arc<Limiter<C>> {
        &self.limiter
    }

    /// Unwrap this writer, forgetting about any delay still owed.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
