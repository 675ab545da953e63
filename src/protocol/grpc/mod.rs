//! gRPC contract for the identifier service, generated from `proto/serve.proto`.

#[allow(clippy::all)]
pub mod serve {
    tonic::include_proto!("serve");
}

pub use serve::generate_service_client::GenerateServiceClient;
pub use serve::generate_service_server::{GenerateService, GenerateServiceServer};
pub use serve::{Request as GenerateRequest, Response as GenerateResponse};

/// Encoded descriptor set served through reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("serve_descriptor");

/// Fully qualified name of the generator service.
pub const SERVICE_NAME: &str = "serve.GenerateService";
