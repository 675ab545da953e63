//! Time-ordered, node-scoped 63-bit identifiers.
//!
//! Generation uses ferroid's Twitter layout (most significant first):
//! - 1 reserved bit, always zero
//! - 41 bits: milliseconds since the configured epoch
//! - 10 bits: node number
//! - 12 bits: per-millisecond sequence

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ferroid::generator::{BasicSnowflakeGenerator, Poll};
use ferroid::id::SnowflakeTwitterId;
use ferroid::time::{MonotonicClock, TimeSource};
use parking_lot::Mutex;

use super::encoding;
use super::IdSource;
use crate::common::error::IdError;
use crate::common::now_ts_ms;

type Generator<T> = BasicSnowflakeGenerator<SnowflakeTwitterId, T>;

/// A generated identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnowflakeId(SnowflakeTwitterId);

impl SnowflakeId {
    pub fn from_raw(raw: i64) -> Self {
        Self(SnowflakeTwitterId::from_raw(raw as u64))
    }

    pub fn as_i64(self) -> i64 {
        self.0.to_raw() as i64
    }

    /// Milliseconds since the generator's epoch.
    pub fn time_ms(self) -> i64 {
        self.0.timestamp() as i64
    }

    pub fn node(self) -> i64 {
        self.0.machine_id() as i64
    }

    pub fn step(self) -> i64 {
        self.0.sequence() as i64
    }

    pub fn base32(self) -> String {
        encoding::base32(self.0.to_raw())
    }

    pub fn base58(self) -> String {
        encoding::base58(self.0.to_raw())
    }
}

impl fmt::Display for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Process-wide source keeping one generator per node number, so repeated
/// requests for the same node never collide.
pub struct SnowflakeSource<T: TimeSource<u64> = MonotonicClock> {
    epoch_ms: i64,
    clock: T,
    nodes: Mutex<HashMap<i64, Arc<Mutex<Generator<T>>>>>,
}

impl SnowflakeSource {
    /// Generators on the shared monotonic clock, counting from `epoch_ms`.
    pub fn new(epoch_ms: i64) -> Self {
        let epoch = Duration::from_millis(u64::try_from(epoch_ms).unwrap_or(0));
        Self::with_clock(epoch_ms, MonotonicClock::with_epoch(epoch))
    }
}

impl<T: TimeSource<u64> + Clone> SnowflakeSource<T> {
    /// Generators on `clock`, which must count milliseconds from `epoch_ms`.
    pub fn with_clock(epoch_ms: i64, clock: T) -> Self {
        Self {
            epoch_ms,
            clock,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    fn check_clock(&self) -> Result<(), IdError> {
        match now_ts_ms().checked_sub(self.epoch_ms) {
            None => return Err(IdError::TimeOverflow),
            Some(elapsed) if elapsed < 0 => return Err(IdError::ClockBeforeEpoch),
            Some(_) => {}
        }
        let now = <T as TimeSource<u64>>::current_millis(&self.clock);
        if now > SnowflakeTwitterId::max_timestamp() {
            return Err(IdError::TimeOverflow);
        }
        Ok(())
    }

    fn generator(&self, node: i64) -> Arc<Mutex<Generator<T>>> {
        self.nodes
            .lock()
            .entry(node)
            .or_insert_with(|| {
                let generator = Generator::<T>::new(node as u64, self.clock.clone());
                Arc::new(Mutex::new(generator))
            })
            .clone()
    }
}

impl<T> IdSource for SnowflakeSource<T>
where
    T: TimeSource<u64> + Clone + Send + Sync + 'static,
{
    fn generate(&self, node: i64) -> Result<SnowflakeId, IdError> {
        if !(0..=SnowflakeTwitterId::max_machine_id() as i64).contains(&node) {
            return Err(IdError::InvalidNode(node));
        }
        self.check_clock()?;

        let generator = self.generator(node);
        loop {
            // The node's lock is only held while polling; waiting happens
            // without it, and other nodes never contend for it.
            let poll = generator.lock().poll_id();
            match poll {
                Poll::Ready { id } => return Ok(SnowflakeId(id)),
                // Sequence exhausted or clock behind the last id: wait for a
                // later millisecond.
                Poll::Pending { .. } => std::thread::yield_now(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::mpsc;

    const EPOCH: i64 = 1_288_834_974_657;

    /// Clock the test moves by hand.
    #[derive(Clone)]
    struct ManualClock(Arc<AtomicU64>);

    impl ManualClock {
        fn at(ms: u64) -> Self {
            Self(Arc::new(AtomicU64::new(ms)))
        }

        fn set(&self, ms: u64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl TimeSource<u64> for ManualClock {
        fn current_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn fields_round_trip_through_layout() {
        let source = SnowflakeSource::new(EPOCH);
        let id = source.generate(42).unwrap();
        assert_eq!(id.node(), 42);
        assert!(id.time_ms() > 0);
        assert!(id.as_i64() > 0);
    }

    #[test]
    fn ids_for_one_node_are_strictly_increasing() {
        let source = SnowflakeSource::new(EPOCH);
        let mut prev = source.generate(7).unwrap();
        for _ in 0..20_000 {
            let next = source.generate(7).unwrap();
            assert!(next > prev, "{next} <= {prev}");
            prev = next;
        }
    }

    #[test]
    fn concurrent_generation_never_collides() {
        let source = Arc::new(SnowflakeSource::new(EPOCH));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let source = source.clone();
                std::thread::spawn(move || {
                    (0..5_000)
                        .map(|_| source.generate(1).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 20_000);
    }

    #[test]
    fn node_out_of_range_rejected() {
        let source = SnowflakeSource::new(EPOCH);
        assert_eq!(source.generate(-1), Err(IdError::InvalidNode(-1)));
        assert_eq!(source.generate(1024), Err(IdError::InvalidNode(1024)));
        assert!(source.generate(1023).is_ok());
    }

    #[test]
    fn epoch_in_the_future_fails() {
        let source = SnowflakeSource::new(i64::MAX);
        assert_eq!(source.generate(1), Err(IdError::ClockBeforeEpoch));
    }

    #[test]
    fn extreme_negative_epoch_is_an_error() {
        let source = SnowflakeSource::new(i64::MIN);
        assert_eq!(source.generate(1), Err(IdError::TimeOverflow));
    }

    #[test]
    fn clock_past_the_time_field_is_an_error() {
        let clock = ManualClock::at(SnowflakeTwitterId::max_timestamp() + 1);
        let source = SnowflakeSource::with_clock(0, clock);
        assert_eq!(source.generate(1), Err(IdError::TimeOverflow));
    }

    #[test]
    fn exhausted_sequence_waits_for_the_next_millisecond() {
        let clock = ManualClock::at(100);
        let source = Arc::new(SnowflakeSource::with_clock(0, clock.clone()));
        for step in 0..4096 {
            let id = source.generate(3).unwrap();
            assert_eq!((id.time_ms(), id.step()), (100, step));
        }

        let (tx, rx) = mpsc::channel();
        let waiting = {
            let source = source.clone();
            std::thread::spawn(move || tx.send(source.generate(3).unwrap()).unwrap())
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        clock.set(101);
        let id = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((id.time_ms(), id.node(), id.step()), (101, 3, 0));
        waiting.join().unwrap();
    }

    #[test]
    fn stalled_node_does_not_block_other_nodes() {
        let clock = ManualClock::at(100);
        let source = Arc::new(SnowflakeSource::with_clock(0, clock.clone()));
        let first = source.generate(1).unwrap();

        // Clock steps back behind node 1's last id.
        clock.set(50);
        let (tx, rx) = mpsc::channel();
        let waiting = {
            let source = source.clone();
            std::thread::spawn(move || tx.send(source.generate(1).unwrap()).unwrap())
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let other = source.generate(2).unwrap();
        assert_eq!((other.time_ms(), other.node()), (50, 2));

        clock.set(101);
        let next = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(next > first);
        waiting.join().unwrap();
    }

    #[test]
    fn renderings_match_raw_value() {
        let id = SnowflakeId::from_raw(32);
        assert_eq!(id.to_string(), "32");
        assert_eq!(id.base32(), "by");
        assert_eq!(id.base58(), "y");
    }
}
