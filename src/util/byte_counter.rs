// Transparent byte-counting stream wrapper

use std::{
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Wraps an async byte stream and atomically counts the bytes that flow
/// through each half, independently of how many times the stream is cloned
/// or split.
pub struct ByteCounter<T> {
    inner: T,
    bytes_read: Arc<AtomicU64>,
    bytes_written: Arc<AtomicU64>,
}

impl<T> ByteCounter<T> {
    /// Wraps a stream, starting both counters at zero
    pub fn new(inner: T) -> Self {
        ByteCounter {
            inner,
            bytes_read: Arc::new(AtomicU64::new(0)),
            bytes_written: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Total bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// A cheaply cloneable handle that can report the counters from outside
    /// the stream (e.g. after it has been moved into a reader task)
    pub fn counters(&self) -> ByteCounterHandle {
        ByteCounterHandle {
            bytes_read: self.bytes_read.clone(),
            bytes_written: self.bytes_written.clone(),
        }
    }

    /// Unwraps back to the underlying stream
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// A handle to read the counters of a [`ByteCounter`] without holding the stream
#[derive(Clone)]
pub struct ByteCounterHandle {
    bytes_read: Arc<AtomicU64>,
    bytes_written: Arc<AtomicU64>,
}

impl ByteCounterHandle {
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for ByteCounter<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = (buf.filled().len() - before) as u64;
            this.bytes_read.fetch_add(read, Ordering::Relaxed);
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ByteCounter<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.bytes_written.fetch_add(*n as u64, Ordering::Relaxed);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_counts_reads_and_writes() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut counted = ByteCounter::new(a);

        b.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        counted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(counted.bytes_read(), 5);

        counted.write_all(b"world!").await.unwrap();
        counted.flush().await.unwrap();
        let mut rbuf = [0u8; 6];
        b.read_exact(&mut rbuf).await.unwrap();
        assert_eq!(&rbuf, b"world!");
        assert_eq!(counted.bytes_written(), 6);
    }
}
