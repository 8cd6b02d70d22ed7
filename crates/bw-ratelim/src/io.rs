//! Blocking `std::io` streams that are throttled by a [`Limiter`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::limiter::Limiter;

/// A stream endpoint that can be explicitly closed.
///
/// Types that have nothing to do on close (in-memory buffers, files, which
/// close when dropped) use the provided no-op implementation, so wrapping
/// them and calling [`close`](Close::close) never fails.
pub trait Close {
    /// Close this endpoint.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Close for &[u8] {}
impl<T> Close for io::Cursor<T> {}
impl Close for Vec<u8> {}
impl Close for io::Empty {}
impl Close for io::Sink {}
impl Close for std::fs::File {}

impl Close for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl<T: Close + ?Sized> Close for &mut T {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T: Close + ?Sized> Close for Box<T> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// A reader whose throughput is bounded by a [`Limiter`].
///
/// Every successful read of `n > 0` bytes waits for `n` tokens *after* the
/// bytes have been read, before returning them.  End-of-stream and errors
/// are returned straight away, without touching the limiter.
#[derive(Debug)]
pub struct LimitedReader<R, C = SystemClock> {
    /// The limiter we charge.
    limiter: Arc<Limiter<C>>,
    /// The underlying reader.
    inner: R,
}

impl<R, C> LimitedReader<R, C> {
    /// Wrap `inner`, charging everything read to `limiter`.
    pub fn new(inner: R, limiter: Arc<Limiter<C>>) -> Self {
        LimitedReader { limiter, inner }
    }

    /// Return a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Return a mutable reference to the underlying reader.
    ///
    /// Bytes read directly from it are not charged.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Return the limiter this reader charges.
    pub fn limiter(&self) -> &Arc<Limiter<C>> {
        &self.limiter
    }

    /// Unwrap this reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read, C: Clock> Read for LimitedReader<R, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.limiter.wait(n as u64);
        }
        Ok(n)
    }
}

impl<R: Close, C> Close for LimitedReader<R, C> {
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

/// A writer whose throughput is bounded by a [`Limiter`].
///
/// Every successful write of `n > 0` bytes waits for `n` tokens after the
/// write, before returning.  Errors are returned straight away; flushing is
/// never throttled.
#[derive(Debug)]
pub struct LimitedWriter<W, C = SystemClock> {
    /// The limiter we charge.
    limiter: Arc<Limiter<C>>,
    /// The underlying writer.
    inner: W,
}

impl<W, C> LimitedWriter<W, C> {
    /// Wrap `inner`, charging everything written to `limiter`.
    pub fn new(inner: W, limiter: Arc<Limiter<C>>) -> Self {
        LimitedWriter { limiter, inner }
    }

    /// Return a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Return a mutable reference to the underlying writer.
    ///
    /// Bytes written directly to it are not charged.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Return the limiter this writer charges.
    pub fn limiter(&self) -> &Arc<Limiter<C>> {
        &self.limiter
    }

    /// Unwrap this writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write, C: Clock> Write for LimitedWriter<W, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.limiter.wait(n as u64);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Close, C> Close for LimitedWriter<W, C> {
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}
