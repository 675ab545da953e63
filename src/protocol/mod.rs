//! Wire protocols served on the shared port.
//!
//! - `text` - RESP-style line protocol tokenizer and reply framing
//! - `grpc` - generated gRPC service and messages

pub mod grpc;
pub mod text;
