//! Common utilities shared across the codebase.
//!
//! - Error types for unified error handling
//! - Time utilities for timestamp operations

pub mod error;
pub mod time;

pub use error::{IdError, ServeError, TextError};
pub use time::now_ts_ms;
