//! Service lifecycle.
//!
//! Binds the shared socket, wires the three protocol servers to the
//! demultiplexer and coordinates their shutdown through one cancellation
//! token.

use std::net::SocketAddr;
use std::sync::Arc;

use log::*;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::api::{GrpcServer, HttpServer};
use crate::common::error::ServeError;
use crate::config::Config;
use crate::idgen::IdSource;
use crate::net::{Mux, ProtocolClass, TextServer};

/// A bound, not yet running service.
pub struct Service {
    mux: Mux,
    grpc: GrpcServer,
    http: HttpServer,
    text: TextServer,
    shutdown: CancellationToken,
}

impl Service {
    /// Acquire the listening socket and wire a server to each protocol class.
    pub async fn bind(cfg: Arc<Config>, source: Arc<dyn IdSource>) -> Result<Self, ServeError> {
        let listener = TcpListener::bind(&cfg.server.listen)
            .await
            .map_err(|source| ServeError::Bind {
                addr: cfg.server.listen.clone(),
                source,
            })?;
        let mut mux = Mux::new(listener, &cfg.limits);

        // Registration order is matcher priority order.
        let grpc = GrpcServer::new(
            mux.listener(ProtocolClass::Grpc),
            source.clone(),
            &cfg.limits,
        )?;
        let http = HttpServer::new(mux.listener(ProtocolClass::Http1), source.clone());
        let text = TextServer::new(mux.listener(ProtocolClass::Text), source, &cfg.limits);

        Ok(Self {
            mux,
            grpc,
            http,
            text,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServeError> {
        Ok(self.mux.local_addr()?)
    }

    /// Token that stops the service when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run every protocol server until the shutdown token fires.
    ///
    /// Returns once the socket is closed and all sub-servers have stopped.
    pub async fn serve(self) {
        let Service {
            mux,
            grpc,
            http,
            text,
            shutdown,
        } = self;

        let mut servers = JoinSet::new();
        servers.spawn(grpc.serve(shutdown.clone()));
        servers.spawn(http.serve(shutdown.clone()));
        servers.spawn(text.serve(shutdown.clone()));

        mux.serve(shutdown).await;

        while let Some(res) = servers.join_next().await {
            if let Err(e) = res {
                error!("protocol server failed: {}", e);
            }
        }
        info!("service stopped");
    }

    /// Spawn [`Service::serve`] onto the runtime.
    pub fn start(self) -> RunningService {
        let shutdown = self.shutdown.clone();
        RunningService {
            shutdown,
            handle: tokio::spawn(self.serve()),
        }
    }
}

/// Handle to a service started with [`Service::start`].
pub struct RunningService {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningService {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting, shut every protocol server down and wait for them.
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            error!("service task failed: {}", e);
        }
    }
}
