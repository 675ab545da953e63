//! Identifier source used by every protocol adapter.
//!
//! Adapters never call an [`IdSource`] directly; they go through
//! [`generate_id`], which clamps the requested node into `[1, 255]` first.

mod encoding;
mod snowflake;

use log::*;
use serde::Serialize;

use crate::api::metrics::METRICS;
use crate::common::error::IdError;

pub use snowflake::{SnowflakeId, SnowflakeSource};

/// Smallest node number handed to a source.
pub const MIN_NODE: i64 = 1;
/// Largest node number handed to a source.
pub const MAX_NODE: i64 = 255;

/// Something that produces unique identifiers for a node.
pub trait IdSource: Send + Sync {
    fn generate(&self, node: i64) -> Result<SnowflakeId, IdError>;
}

/// Clamp a requested node number into `[MIN_NODE, MAX_NODE]`.
#[inline]
pub fn clamp_node(node: i64) -> i64 {
    node.clamp(MIN_NODE, MAX_NODE)
}

/// Clamp `node` and ask `source` for an identifier.
pub fn generate_id(source: &dyn IdSource, node: i64) -> Result<SnowflakeId, IdError> {
    let node = clamp_node(node);
    match source.generate(node) {
        Ok(id) => {
            METRICS.inc_ids_generated();
            Ok(id)
        }
        Err(e) => {
            METRICS.inc_id_errors();
            warn!("id generation for node {} failed: {}", node, e);
            Err(e)
        }
    }
}

/// JSON shape shared by the text protocol and the HTTP API.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IdRendering {
    pub id: String,
    pub base32: String,
    pub base58: String,
}

impl From<SnowflakeId> for IdRendering {
    fn from(id: SnowflakeId) -> Self {
        Self {
            id: id.to_string(),
            base32: id.base32(),
            base58: id.base58(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records the node numbers it was asked for.
    struct Recorder(Mutex<Vec<i64>>);

    impl IdSource for Recorder {
        fn generate(&self, node: i64) -> Result<SnowflakeId, IdError> {
            self.0.lock().push(node);
            Ok(SnowflakeId::from_raw(node))
        }
    }

    #[test]
    fn clamp_boundaries() {
        assert_eq!(clamp_node(i64::MIN), 1);
        assert_eq!(clamp_node(-5), 1);
        assert_eq!(clamp_node(0), 1);
        assert_eq!(clamp_node(1), 1);
        assert_eq!(clamp_node(128), 128);
        assert_eq!(clamp_node(255), 255);
        assert_eq!(clamp_node(256), 255);
        assert_eq!(clamp_node(i64::MAX), 255);
    }

    #[test]
    fn clamped_value_always_in_range() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let n: i64 = rng.gen();
            let c = clamp_node(n);
            assert!((MIN_NODE..=MAX_NODE).contains(&c));
            if (MIN_NODE..=MAX_NODE).contains(&n) {
                assert_eq!(c, n);
            }
        }
    }

    #[test]
    fn generate_id_clamps_before_calling_source() {
        let rec = Recorder(Mutex::new(Vec::new()));
        generate_id(&rec, 0).unwrap();
        generate_id(&rec, 18).unwrap();
        generate_id(&rec, 9000).unwrap();
        assert_eq!(*rec.0.lock(), vec![1, 18, 255]);
    }

    #[test]
    fn rendering_serializes_in_field_order() {
        let json = serde_json::to_string(&IdRendering::from(SnowflakeId::from_raw(58))).unwrap();
        assert_eq!(json, r#"{"id":"58","base32":"b4","base58":"21"}"#);
    }
}
