//! gRPC adapter.
//!
//! Serves `serve.GenerateService` and server reflection with tonic over the
//! connections the demultiplexer classified as gRPC.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::*;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::api::metrics::METRICS;
use crate::common::error::ServeError;
use crate::config::Limits;
use crate::idgen::{generate_id, IdSource};
use crate::net::mux::MuxListener;
use crate::protocol::grpc::{
    GenerateRequest, GenerateResponse, GenerateService, GenerateServiceServer, FILE_DESCRIPTOR_SET,
};

/// Handler for `serve.GenerateService`.
pub struct Generator {
    source: Arc<dyn IdSource>,
}

impl Generator {
    pub fn new(source: Arc<dyn IdSource>) -> Self {
        Self { source }
    }
}

#[tonic::async_trait]
impl GenerateService for Generator {
    async fn generator(
        &self,
        request: Request<GenerateRequest>,
    ) -> Result<Response<GenerateResponse>, Status> {
        METRICS.inc_grpc_calls();
        if let Some(peer) = request.remote_addr() {
            trace!("grpc: generator call from {}", peer);
        }

        let node_id = request.into_inner().node_id;
        let id = generate_id(self.source.as_ref(), node_id)
            .map_err(|e| Status::unknown(e.to_string()))?;

        Ok(Response::new(GenerateResponse {
            id: id.to_string(),
            base32: id.base32(),
            base58: id.base58(),
        }))
    }
}

/// Generator plus v1 reflection over the compiled descriptor set.
fn routes(source: Arc<dyn IdSource>) -> Result<Routes, ServeError> {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;
    Ok(Routes::new(GenerateServiceServer::new(Generator::new(source))).add_service(reflection))
}

/// tonic server fed by the gRPC sub-listener.
pub struct GrpcServer {
    listener: MuxListener,
    routes: Routes,
    grace: Duration,
}

impl GrpcServer {
    pub fn new(
        listener: MuxListener,
        source: Arc<dyn IdSource>,
        limits: &Limits,
    ) -> Result<Self, ServeError> {
        Ok(Self {
            listener,
            routes: routes(source)?,
            grace: Duration::from_millis(limits.http_shutdown_grace_ms),
        })
    }

    /// Serve until `shutdown` fires, then send GOAWAY and wait for in-flight
    /// calls, up to the grace period.
    pub async fn serve(self, shutdown: CancellationToken) {
        let GrpcServer {
            listener,
            routes,
            grace,
        } = self;

        let incoming = listener.map(Ok::<_, io::Error>);
        let serving = Server::builder()
            .add_routes(routes)
            .serve_with_incoming_shutdown(incoming, shutdown.clone().cancelled_owned());
        let expired = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            res = serving => {
                if let Err(e) = res {
                    error!("grpc server failed: {}", e);
                }
            }
            _ = expired => warn!("grpc calls still running after {:?}; abandoning them", grace),
        }
        info!("grpc server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::IdError;
    use crate::idgen::{SnowflakeId, SnowflakeSource};
    use crate::net::mux::Mux;
    use crate::net::sniff::ProtocolClass;
    use tokio::net::TcpListener;
    use tonic::Code;

    struct Broken;

    impl IdSource for Broken {
        fn generate(&self, _node: i64) -> Result<SnowflakeId, IdError> {
            Err(IdError::ClockBeforeEpoch)
        }
    }

    #[tokio::test]
    async fn generator_clamps_node_and_renders_id() {
        let generator = Generator::new(Arc::new(SnowflakeSource::new(1_288_834_974_657)));
        let resp = generator
            .generator(Request::new(GenerateRequest { node_id: 0 }))
            .await
            .unwrap()
            .into_inner();

        let id = SnowflakeId::from_raw(resp.id.parse().unwrap());
        assert_eq!(id.node(), 1);
        assert_eq!(resp.base32, id.base32());
        assert_eq!(resp.base58, id.base58());
    }

    #[tokio::test]
    async fn source_failure_is_unknown() {
        let generator = Generator::new(Arc::new(Broken));
        let status = generator
            .generator(Request::new(GenerateRequest { node_id: 3 }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), "clock is earlier than the id epoch");
    }

    #[tokio::test]
    async fn stops_once_shutdown_fires() {
        let limits = Limits::default();
        let mut mux = Mux::new(TcpListener::bind("127.0.0.1:0").await.unwrap(), &limits);
        let server = GrpcServer::new(
            mux.listener(ProtocolClass::Grpc),
            Arc::new(SnowflakeSource::new(1_288_834_974_657)),
            &limits,
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), server.serve(shutdown))
            .await
            .unwrap();
    }
}
