//! Text-protocol server.
//!
//! An accept loop pulls connections from the text sub-listener and pushes
//! them into a bounded hand-off queue; a dispatch loop pops them and spawns a
//! handler per connection. A full queue blocks the accept loop. On shutdown
//! both loops stop, and connections still queued are closed unanswered.

use std::sync::Arc;

use log::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::metrics::METRICS;
use crate::config::Limits;
use crate::idgen::IdSource;

use super::handler::handle_text;
use super::mux::{Conn, MuxListener};

pub struct TextServer {
    listener: MuxListener,
    source: Arc<dyn IdSource>,
    limits: Arc<Limits>,
}

impl TextServer {
    pub fn new(listener: MuxListener, source: Arc<dyn IdSource>, limits: &Limits) -> Self {
        Self {
            listener,
            source,
            limits: Arc::new(limits.clone()),
        }
    }

    /// Run until `shutdown` fires or the sub-listener ends.
    ///
    /// Returns once both loops have stopped and every spawned handler has
    /// finished.
    pub async fn serve(self, shutdown: CancellationToken) {
        let TextServer {
            mut listener,
            source,
            limits,
        } = self;
        let (tx, mut rx) = mpsc::channel::<Conn>(limits.handoff_capacity);
        let handlers = TaskTracker::new();

        let accept_shutdown = shutdown.clone();
        let accept = tokio::spawn(async move {
            loop {
                let conn = tokio::select! {
                    biased;
                    _ = accept_shutdown.cancelled() => break,
                    conn = listener.accept() => match conn {
                        Some(c) => c,
                        None => break,
                    },
                };
                tokio::select! {
                    biased;
                    _ = accept_shutdown.cancelled() => {
                        METRICS.add_text_dropped_on_close(1);
                        break;
                    }
                    res = tx.send(conn) => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("text accept loop stopped");
        });

        loop {
            let conn = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                conn = rx.recv() => match conn {
                    Some(c) => c,
                    None => break,
                },
            };
            let source = source.clone();
            let limits = limits.clone();
            handlers.spawn(async move {
                let Conn {
                    stream,
                    peer,
                    guard: _guard,
                    ..
                } = conn;
                if let Err(e) = handle_text(stream, peer, source.as_ref(), &limits).await {
                    debug!("text connection {} ended: {}", peer, e);
                }
            });
        }

        // Close queued connections without answering them.
        rx.close();
        let mut dropped = 0u64;
        while let Some(conn) = rx.recv().await {
            trace!("{}: closed unanswered", conn.peer);
            dropped += 1;
        }
        if dropped > 0 {
            METRICS.add_text_dropped_on_close(dropped);
            debug!("closed {} queued text connections", dropped);
        }

        if let Err(e) = accept.await {
            error!("text accept loop failed: {}", e);
        }
        handlers.close();
        handlers.wait().await;
        info!("text server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idgen::SnowflakeSource;
    use crate::net::mux::Mux;
    use crate::net::sniff::ProtocolClass;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    async fn request(addr: std::net::SocketAddr, req: &[u8]) -> Vec<u8> {
        let mut c = TcpStream::connect(addr).await.unwrap();
        c.write_all(req).await.unwrap();
        let mut out = Vec::new();
        timeout(Duration::from_secs(5), c.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        out
    }

    #[tokio::test]
    async fn serves_through_the_mux_and_stops() {
        let limits = Limits::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut mux = Mux::new(listener, &limits);
        let addr = mux.local_addr().unwrap();
        let text = TextServer::new(
            mux.listener(ProtocolClass::Text),
            Arc::new(SnowflakeSource::new(1_288_834_974_657)),
            &limits,
        );

        let shutdown = CancellationToken::new();
        let mux_task = tokio::spawn(mux.serve(shutdown.clone()));
        let text_task = tokio::spawn(text.serve(shutdown.clone()));

        assert_eq!(request(addr, b"*1\r\n$4\r\nping\r\n").await, b"+pong\r\n");
        let a = request(addr, b"*2\r\n$4\r\nsfid\r\n$1\r\n3\r\n").await;
        let b = request(addr, b"*2\r\n$4\r\nsfid\r\n$1\r\n3\r\n").await;
        assert!(a.starts_with(b"+{\"id\":\""));
        assert_ne!(a, b);

        shutdown.cancel();
        timeout(Duration::from_secs(5), async {
            mux_task.await.unwrap();
            text_task.await.unwrap();
        })
        .await
        .unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn pending_connections_are_closed_unanswered_on_shutdown() {
        let limits = Limits::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut mux = Mux::new(listener, &limits);
        let addr = mux.local_addr().unwrap();
        let text = TextServer::new(
            mux.listener(ProtocolClass::Text),
            Arc::new(SnowflakeSource::new(1_288_834_974_657)),
            &limits,
        );
        let mux_shutdown = CancellationToken::new();
        let mux_task = tokio::spawn(mux.serve(mux_shutdown.clone()));

        let mut clients = Vec::new();
        for _ in 0..3 {
            let mut c = TcpStream::connect(addr).await.unwrap();
            c.write_all(b"*1\r\n$4\r\nping\r\n").await.unwrap();
            clients.push(c);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        timeout(Duration::from_secs(5), text.serve(shutdown))
            .await
            .unwrap();

        for mut c in clients {
            let mut out = Vec::new();
            let _ = timeout(Duration::from_secs(5), c.read_to_end(&mut out))
                .await
                .unwrap();
            assert!(out.is_empty());
        }

        mux_shutdown.cancel();
        mux_task.await.unwrap();
    }
}
