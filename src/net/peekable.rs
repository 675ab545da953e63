//! Replay buffer for protocol detection.
//!
//! The demultiplexer reads the first bytes of a connection to classify it.
//! Those bytes are handed over together with the socket and returned first
//! by subsequent reads, so every handler sees the stream from its start.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tonic::transport::server::Connected;

/// A stream wrapper that replays already-consumed prefix bytes.
pub struct PeekableStream<S> {
    inner: S,
    prefix: Bytes,
}

impl<S> PeekableStream<S> {
    /// Wrap `inner`, replaying `prefix` before any further inner bytes.
    pub fn new(inner: S, prefix: impl Into<Bytes>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Prefix bytes not yet returned to a reader.
    #[cfg(test)]
    fn buffered(&self) -> &[u8] {
        &self.prefix
    }
}

impl<S: Connected> Connected for PeekableStream<S> {
    type ConnectInfo = S::ConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.inner.connect_info()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // Drain replayed bytes first; one read never mixes them with fresh ones.
        if self.prefix.has_remaining() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn prefix_is_replayed_before_inner_bytes() {
        let (client, server) = tokio::io::duplex(64);
        let mut client = client;
        client.write_all(b"world").await.unwrap();
        drop(client);

        let mut stream = PeekableStream::new(server, &b"hello "[..]);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn first_read_returns_only_the_prefix() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"+tail").await.unwrap();

        let mut stream = PeekableStream::new(server, &b"*1\r\n"[..]);
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"*1\r\n");
        assert!(stream.buffered().is_empty());
    }

    #[tokio::test]
    async fn small_reads_drain_prefix_in_pieces() {
        let (_client, server) = tokio::io::duplex(64);
        let mut stream = PeekableStream::new(server, &b"abcdef"[..]);
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(stream.buffered(), b"ef");
    }

    #[tokio::test]
    async fn writes_go_to_inner_stream() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = PeekableStream::new(server, Bytes::new());
        stream.write_all(b"+pong\r\n").await.unwrap();
        let mut buf = [0u8; 7];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"+pong\r\n");
    }
}
