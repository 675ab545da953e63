//! Network layer.
//!
//! This module contains:
//! - `sniff`: protocol matchers over a connection's first bytes
//! - `peekable`: stream wrapper replaying the sniffed bytes
//! - `mux`: single-socket demultiplexer and per-protocol sub-listeners
//! - `handler`: text-protocol connection handler
//! - `server`: text-protocol accept and dispatch loops

pub mod handler;
pub mod mux;
pub mod peekable;
pub mod server;
pub mod sniff;

pub use mux::{Conn, Mux, MuxListener};
pub use server::TextServer;
pub use sniff::ProtocolClass;
