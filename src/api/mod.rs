//! API module.
//!
//! This module provides external interfaces:
//! - `grpc` - gRPC generator service and reflection
//! - `http` - HTTP API server
//! - `metrics` - Prometheus metrics collection

pub mod grpc;
pub mod http;
pub mod metrics;

pub use grpc::GrpcServer;
pub use http::HttpServer;
pub use metrics::METRICS;
