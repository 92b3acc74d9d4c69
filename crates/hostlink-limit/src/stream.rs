//! Throttled wrapper around an async byte stream

use crate::bucket::TokenBucket;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Sleep};

/// Smallest grant worth waking up for once the bucket has drained; avoids
/// a storm of tiny transfers at the steady-state rate.
const MIN_GRANT: usize = 256;

struct Limiter {
    bucket: TokenBucket,
    // Separate pending delays per direction so a read wakeup cannot
    // clobber a parked write, and vice versa. Both draw from one bucket.
    read_delay: Option<Pin<Box<Sleep>>>,
    write_delay: Option<Pin<Box<Sleep>>>,
}

impl Limiter {
    fn new(rate_limit_kbps: u32) -> Self {
        Self {
            bucket: TokenBucket::from_kbps(rate_limit_kbps),
            read_delay: None,
            write_delay: None,
        }
    }
}

/// A connection whose reads and writes draw from a shared per-connection
/// byte budget.
///
/// Both directions are metered identically against the same token bucket,
/// allocated once per wrapped connection. Throttle delays are ordinary
/// timer sleeps owned by the stream, so dropping the stream (peer closed,
/// request timed out) cancels any pending backpressure wait.
///
/// A zero `rate_limit_kbps` disables metering entirely; the wrapper then
/// forwards every call straight to the inner stream.
pub struct ThrottledStream<S> {
    inner: S,
    limiter: Option<Limiter>,
}

impl<S> ThrottledStream<S> {
    /// Wrap `inner`, throttling both directions to `rate_limit_kbps` KB/s.
    pub fn new(inner: S, rate_limit_kbps: u32) -> Self {
        Self {
            inner,
            limiter: (rate_limit_kbps > 0).then(|| Limiter::new(rate_limit_kbps)),
        }
    }

    /// Whether this stream meters traffic at all.
    pub fn is_throttled(&self) -> bool {
        self.limiter.is_some()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ThrottledStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(limiter) = this.limiter.as_mut() else {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        };

        loop {
            if let Some(delay) = limiter.read_delay.as_mut() {
                ready!(delay.as_mut().poll(cx));
                limiter.read_delay = None;
            }

            let wanted = buf.remaining();
            if wanted == 0 {
                return Poll::Ready(Ok(()));
            }

            let grant = limiter.bucket.available().min(wanted);
            if grant == 0 {
                let delay = limiter.bucket.delay_for(wanted.min(MIN_GRANT));
                limiter.read_delay = Some(Box::pin(sleep(delay)));
                continue;
            }

            let mut limited = buf.take(grant);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
            let filled = limited.filled().len();
            let initialized = limited.initialized().len();
            drop(limited);
            // Safety: the inner read initialized this many bytes of the
            // unfilled region `limited` borrowed from `buf`.
            unsafe { buf.assume_init(initialized) };
            buf.advance(filled);
            limiter.bucket.consume(filled);
            return Poll::Ready(Ok(()));
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ThrottledStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(limiter) = this.limiter.as_mut() else {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        };

        if buf.is_empty() {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        }

        loop {
            if let Some(delay) = limiter.write_delay.as_mut() {
                ready!(delay.as_mut().poll(cx));
                limiter.write_delay = None;
            }

            let grant = limiter.bucket.available().min(buf.len());
            if grant == 0 {
                let delay = limiter.bucket.delay_for(buf.len().min(MIN_GRANT));
                limiter.write_delay = Some(Box::pin(sleep(delay)));
                continue;
            }

            let written = ready!(Pin::new(&mut this.inner).poll_write(cx, &buf[..grant]))?;
            limiter.bucket.consume(written);
            return Poll::Ready(Ok(written));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
