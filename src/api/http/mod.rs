//! HTTP API server module.
//!
//! Provides:
//! - Identifier generation on any path, driven by the `node_id` query parameter
//! - Prometheus metrics at `/metrics`

mod handlers;
mod router;

pub use router::HttpServer;
