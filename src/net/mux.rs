//! Connection demultiplexer.
//!
//! Owns the single listening socket. Every accepted connection is sniffed in
//! its own task and handed to the [`MuxListener`] registered for its class.
//! Sub-listeners behave like ordinary listeners: `accept` yields only
//! connections of their class, with the sniffed bytes replayed.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use log::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::server::{Connected, TcpConnectInfo};

use crate::api::metrics::{ActiveGuard, METRICS};
use crate::config::Limits;

use super::peekable::PeekableStream;
use super::sniff::{classify, ProtocolClass, Verdict};

const SNIFF_READ_CHUNK: usize = 1024;

/// A classified connection.
pub struct Conn {
    pub stream: PeekableStream<TcpStream>,
    pub peer: SocketAddr,
    pub class: ProtocolClass,
    /// Keeps the connection counted as active while it is owned.
    pub guard: ActiveGuard,
}

impl AsyncRead for Conn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl Connected for Conn {
    type ConnectInfo = TcpConnectInfo;

    fn connect_info(&self) -> TcpConnectInfo {
        self.stream.connect_info()
    }
}

/// Listener yielding only connections of one protocol class.
pub struct MuxListener {
    class: ProtocolClass,
    rx: mpsc::Receiver<Conn>,
}

impl MuxListener {
    /// Wait for the next connection of this class. Returns `None` once the
    /// demultiplexer has stopped and every queued connection was taken.
    pub async fn accept(&mut self) -> Option<Conn> {
        self.rx.recv().await
    }

    pub fn class(&self) -> ProtocolClass {
        self.class
    }
}

impl Stream for MuxListener {
    type Item = Conn;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Conn>> {
        self.rx.poll_recv(cx)
    }
}

/// The demultiplexer.
pub struct Mux {
    listener: TcpListener,
    limits: Limits,
    routes: HashMap<ProtocolClass, mpsc::Sender<Conn>>,
}

impl Mux {
    pub fn new(listener: TcpListener, limits: &Limits) -> Self {
        Self {
            listener,
            limits: limits.clone(),
            routes: HashMap::new(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Register the sub-listener for `class`, replacing any earlier one.
    pub fn listener(&mut self, class: ProtocolClass) -> MuxListener {
        let (tx, rx) = mpsc::channel(self.limits.handoff_capacity);
        self.routes.insert(class, tx);
        MuxListener { class, rx }
    }

    /// Accept and dispatch until `shutdown` fires.
    ///
    /// Returns after the listening socket is closed and every in-progress
    /// classification has finished; sub-listeners then drain and end.
    pub async fn serve(self, shutdown: CancellationToken) {
        let Mux {
            listener,
            limits,
            routes,
        } = self;
        let routes = Arc::new(routes);
        let limits = Arc::new(limits);
        let sniffers = TaskTracker::new();

        match listener.local_addr() {
            Ok(addr) => info!("demultiplexing on {}", addr),
            Err(e) => warn!("listener has no local address: {}", e),
        }

        loop {
            let (socket, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                res = listener.accept() => match res {
                    Ok(v) => v,
                    Err(e) => {
                        METRICS.inc_accept_errors();
                        error!("accept: {}", e);
                        continue;
                    }
                },
            };
            METRICS.inc_accepted();

            let routes = routes.clone();
            let limits = limits.clone();
            let shutdown = shutdown.clone();
            sniffers.spawn(async move {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("{}: dropped during shutdown", peer);
                    }
                    _ = dispatch(socket, peer, &routes, &limits) => {}
                }
            });
        }

        drop(listener);
        sniffers.close();
        sniffers.wait().await;
        info!("demultiplexer stopped");
    }
}

/// Classify one connection and hand it to its sub-listener.
async fn dispatch(
    mut socket: TcpStream,
    peer: SocketAddr,
    routes: &HashMap<ProtocolClass, mpsc::Sender<Conn>>,
    limits: &Limits,
) {
    let mut prefix = BytesMut::new();
    let deadline = Duration::from_millis(limits.sniff_timeout_ms);

    let verdict = match timeout(
        deadline,
        sniff(&mut socket, &mut prefix, limits.sniff_max_bytes),
    )
    .await
    {
        Ok(v) => v,
        Err(_) => {
            METRICS.inc_sniff_timeouts();
            debug!("{}: sniff deadline after {} bytes", peer, prefix.len());
            classify(&prefix, true)
        }
    };

    let class = match verdict {
        Verdict::Matched(class) => class,
        Verdict::Unmatched | Verdict::Pending => {
            METRICS.inc_unmatched();
            debug!("{}: no protocol matched {} bytes; closing", peer, prefix.len());
            return;
        }
    };

    let Some(tx) = routes.get(&class) else {
        METRICS.inc_unmatched();
        debug!("{}: no listener for {}; closing", peer, class);
        return;
    };

    METRICS.inc_dispatched(class);
    debug!("{}: classified as {}", peer, class);

    let conn = Conn {
        stream: PeekableStream::new(socket, prefix.freeze()),
        peer,
        class,
        guard: ActiveGuard::new(),
    };
    // Blocks while the sub-listener's queue is full.
    if tx.send(conn).await.is_err() {
        debug!("{}: {} listener closed; dropping", peer, class);
    }
}

/// Read until the matchers decide, the stream ends, or `max` bytes are held.
async fn sniff(socket: &mut TcpStream, prefix: &mut BytesMut, max: usize) -> Verdict {
    loop {
        match classify(prefix, prefix.len() >= max) {
            Verdict::Pending => {}
            verdict => return verdict,
        }
        prefix.reserve(SNIFF_READ_CHUNK.min(max.saturating_sub(prefix.len()).max(1)));
        match socket.read_buf(prefix).await {
            Ok(0) => return classify(prefix, true),
            Ok(_) => {}
            Err(e) => {
                trace!("sniff read: {}", e);
                return classify(prefix, true);
            }
        }
    }
}
