//! Configuration type definitions.

/// Listening socket configuration.
#[derive(Clone, Debug)]
pub struct Server {
    pub listen: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: "localhost:8199".into(),
        }
    }
}

/// Connection and resource limits.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Deadline for classifying a fresh connection (ms).
    pub sniff_timeout_ms: u64,
    /// Bytes buffered at most while classifying.
    pub sniff_max_bytes: usize,
    /// Capacity of every hand-off queue between accept and dispatch.
    pub handoff_capacity: usize,
    /// Size of the single read performed by the text handler.
    pub text_read_buffer: usize,
    /// Deadline for that read (ms); 0 waits forever.
    pub text_read_timeout_ms: u64,
    /// How long closing waits for in-flight gRPC calls (ms).
    pub http_shutdown_grace_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            sniff_timeout_ms: 3000,
            sniff_max_bytes: 4096,
            handoff_capacity: 16,
            text_read_buffer: 1024,
            text_read_timeout_ms: 15000,
            http_shutdown_grace_ms: 5000,
        }
    }
}

/// Identifier generation settings.
#[derive(Clone, Debug)]
pub struct Snowflake {
    /// Unix time in milliseconds that identifier timestamps count from.
    pub epoch_ms: i64,
}

impl Default for Snowflake {
    fn default() -> Self {
        Self {
            epoch_ms: 1_288_834_974_657,
        }
    }
}

/// Root configuration container.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub server: Server,
    pub limits: Limits,
    pub snowflake: Snowflake,
}
