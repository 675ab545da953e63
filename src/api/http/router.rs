//! HTTP router and server loop.
//!
//! HTTP/1.1 only; HTTP/2 traffic on the shared port is gRPC and never
//! reaches this server.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use log::*;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::metrics::METRICS;
use crate::idgen::IdSource;
use crate::net::mux::{Conn, MuxListener};

use super::handlers::{handle_generate, handle_metrics};

/// Route HTTP requests to appropriate handlers.
///
/// `/metrics` is reserved for the counters; every other path generates an
/// identifier.
async fn router<B>(
    source: Arc<dyn IdSource>,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    METRICS.inc_http_requests();
    let resp = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => handle_metrics(),
        _ => handle_generate(source.as_ref(), &req),
    };
    Ok(resp)
}

/// HTTP/1.1 server fed by the HTTP sub-listener.
pub struct HttpServer {
    listener: MuxListener,
    source: Arc<dyn IdSource>,
}

impl HttpServer {
    pub fn new(listener: MuxListener, source: Arc<dyn IdSource>) -> Self {
        Self { listener, source }
    }

    /// Serve until `shutdown` fires; open connections are then aborted.
    pub async fn serve(self, shutdown: CancellationToken) {
        let HttpServer {
            mut listener,
            source,
        } = self;
        let mut conns = JoinSet::new();

        loop {
            let conn = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(_) = conns.join_next(), if !conns.is_empty() => continue,
                conn = listener.accept() => match conn {
                    Some(c) => c,
                    None => break,
                },
            };
            let Conn {
                stream,
                peer,
                guard,
                ..
            } = conn;

            let source = source.clone();
            conns.spawn(async move {
                let _guard = guard;
                let svc = service_fn(move |req| router(source.clone(), req));
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await
                {
                    debug!("http connection error from {}: {}", peer, e);
                }
            });
        }
        drop(listener);

        if !conns.is_empty() {
            debug!("aborting {} open http connections", conns.len());
        }
        conns.shutdown().await;
        info!("http server stopped");
    }
}
