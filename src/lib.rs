#![deny(clippy::all)]

pub mod api;
pub mod common;
pub mod config;
pub mod idgen;
pub mod net;
pub mod protocol;
pub mod service;

pub use service::{RunningService, Service};
