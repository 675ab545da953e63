//! Configuration module for snowflake-mux.
//!
//! - `Config` - Root configuration container
//! - `Server` - Listening socket
//! - `Limits` - Sniffing, hand-off and text-protocol limits
//! - `Snowflake` - Identifier generation settings

mod parser;
mod types;

pub use parser::{load_config, parse_config};
pub use types::*;
