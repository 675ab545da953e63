//! Global metrics collection using atomic counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::net::sniff::ProtocolClass;

/// Global metrics structure.
#[derive(Default)]
pub struct Metrics {
    // Demultiplexer
    pub accepted: AtomicU64,
    pub accept_errors: AtomicU64,
    pub sniff_timeouts: AtomicU64,
    pub unmatched: AtomicU64,
    pub grpc_conns: AtomicU64,
    pub http_conns: AtomicU64,
    pub text_conns: AtomicU64,
    pub active_connections: AtomicU64,

    // Protocol traffic
    pub text_requests: AtomicU64,
    pub text_errors: AtomicU64,
    pub text_read_timeouts: AtomicU64,
    pub text_dropped_on_close: AtomicU64,
    pub http_requests: AtomicU64,
    pub grpc_calls: AtomicU64,

    // Identifier source
    pub ids_generated: AtomicU64,
    pub id_errors: AtomicU64,
}

/// Global metrics singleton.
pub static METRICS: once_cell::sync::Lazy<&'static Metrics> =
    once_cell::sync::Lazy::new(|| Box::leak(Box::new(Metrics::default())));

impl Metrics {
    pub fn inc_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_accept_errors(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sniff_timeouts(&self) {
        self.sniff_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unmatched(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection routed to `class`.
    pub fn inc_dispatched(&self, class: ProtocolClass) {
        let counter = match class {
            ProtocolClass::Grpc => &self.grpc_conns,
            ProtocolClass::Http1 => &self.http_conns,
            ProtocolClass::Text => &self.text_conns,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_text_requests(&self) {
        self.text_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_text_errors(&self) {
        self.text_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_text_read_timeouts(&self) {
        self.text_read_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_text_dropped_on_close(&self, n: u64) {
        self.text_dropped_on_close.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_http_requests(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_grpc_calls(&self) {
        self.grpc_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ids_generated(&self) {
        self.ids_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_id_errors(&self) {
        self.id_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Render all counters in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let metric = |name: &str, kind: &str, help: &str, val: &AtomicU64| -> String {
            format!(
                "# HELP {0} {1}\n# TYPE {0} {2}\n{0} {3}\n",
                name,
                help,
                kind,
                val.load(Ordering::Relaxed)
            )
        };
        let counter = |name: &str, help: &str, val: &AtomicU64| metric(name, "counter", help, val);

        let mut s = String::with_capacity(2048);
        s.push_str(&counter("snowflake_accepted_total", "Raw connections accepted", &self.accepted));
        s.push_str(&counter("snowflake_accept_errors_total", "Failed accept calls", &self.accept_errors));
        s.push_str(&counter("snowflake_sniff_timeouts_total", "Connections not classified before the deadline", &self.sniff_timeouts));
        s.push_str(&counter("snowflake_unmatched_total", "Connections matching no protocol", &self.unmatched));
        s.push_str(&counter("snowflake_grpc_connections_total", "Connections routed to gRPC", &self.grpc_conns));
        s.push_str(&counter("snowflake_http_connections_total", "Connections routed to HTTP", &self.http_conns));
        s.push_str(&counter("snowflake_text_connections_total", "Connections routed to the text protocol", &self.text_conns));
        s.push_str(&metric("snowflake_active_connections", "gauge", "Connections currently owned by a handler", &self.active_connections));
        s.push_str(&counter("snowflake_text_requests_total", "Text-protocol requests answered", &self.text_requests));
        s.push_str(&counter("snowflake_text_errors_total", "Text-protocol error replies", &self.text_errors));
        s.push_str(&counter("snowflake_text_read_timeouts_total", "Text-protocol reads that timed out", &self.text_read_timeouts));
        s.push_str(&counter("snowflake_text_dropped_on_close_total", "Queued text connections closed during shutdown", &self.text_dropped_on_close));
        s.push_str(&counter("snowflake_http_requests_total", "HTTP requests served", &self.http_requests));
        s.push_str(&counter("snowflake_grpc_calls_total", "gRPC calls served", &self.grpc_calls));
        s.push_str(&counter("snowflake_ids_generated_total", "Identifiers generated", &self.ids_generated));
        s.push_str(&counter("snowflake_id_errors_total", "Identifier generation failures", &self.id_errors));
        s
    }
}

/// RAII guard counting a connection as active until dropped.
pub struct ActiveGuard(());

impl ActiveGuard {
    pub fn new() -> Self {
        METRICS.active_connections.fetch_add(1, Ordering::Relaxed);
        Self(())
    }
}

impl Default for ActiveGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        METRICS.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_output_lists_every_counter() {
        let m = Metrics::default();
        m.inc_dispatched(ProtocolClass::Text);
        m.inc_dispatched(ProtocolClass::Text);
        let out = m.render_prometheus();
        assert!(out.contains("snowflake_text_connections_total 2\n"));
        assert!(out.contains("# TYPE snowflake_active_connections gauge\n"));
        assert_eq!(out.matches("# TYPE").count(), 16);
    }
}
