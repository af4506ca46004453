//! Replay configuration.

use crate::error::{CoreError, CoreResult};
use crate::types::{EntityId, SequenceNumber, Timestamp};
use std::collections::BTreeSet;

/// Default number of replay worker threads.
pub const DEFAULT_WORKER_COUNT: usize = 50;

/// Default capacity of each worker queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Configuration for one replay run.
///
/// Immutable for the duration of the run. Sequence and time bounds are
/// inclusive; timestamps are milliseconds since the Unix epoch and are
/// compared against commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// First segment sequence to replay.
    pub from_sequence: SequenceNumber,

    /// Last segment sequence to replay.
    pub to_sequence: SequenceNumber,

    /// Earliest commit time to replay.
    pub from_time: Timestamp,

    /// Latest commit time to replay.
    pub to_time: Timestamp,

    /// Entities to replay; `None` replays every entity.
    pub entity_filter: Option<BTreeSet<EntityId>>,

    /// Replays the single filtered entity into this entity instead.
    pub entity_remap: Option<EntityId>,

    /// Number of worker threads.
    pub worker_count: usize,

    /// Capacity of each worker queue.
    pub queue_capacity: usize,

    /// Whether to abort on the first recoverable error.
    pub stop_on_error: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            from_sequence: SequenceNumber::new(0),
            to_sequence: SequenceNumber::new(u64::MAX),
            from_time: Timestamp::MIN,
            to_time: Timestamp::MAX,
            entity_filter: None,
            entity_remap: None,
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stop_on_error: false,
        }
    }
}

impl ReplayConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the inclusive segment sequence range.
    #[must_use]
    pub fn sequence_range(mut self, from: u64, to: u64) -> Self {
        self.from_sequence = SequenceNumber::new(from);
        self.to_sequence = SequenceNumber::new(to);
        self
    }

    /// Sets the inclusive commit time range.
    #[must_use]
    pub fn time_range(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.from_time = from;
        self.to_time = to;
        self
    }

    /// Restricts replay to the given entities.
    #[must_use]
    pub fn entities<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = EntityId>,
    {
        self.entity_filter = Some(ids.into_iter().collect());
        self
    }

    /// Replays the single filtered entity into `target`.
    #[must_use]
    pub fn entity_remap(mut self, target: EntityId) -> Self {
        self.entity_remap = Some(target);
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the capacity of each worker queue.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets whether to abort on the first recoverable error.
    #[must_use]
    pub fn stop_on_error(mut self, value: bool) -> Self {
        self.stop_on_error = value;
        self
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a range is inverted, a pool dimension is
    /// zero, or a remap target is set without exactly one filtered entity.
    pub fn validate(&self) -> CoreResult<()> {
        if self.from_sequence > self.to_sequence {
            return Err(CoreError::invalid_config(format!(
                "from sequence {} is greater than to sequence {}",
                self.from_sequence.as_u64(),
                self.to_sequence.as_u64()
            )));
        }
        if self.from_time > self.to_time {
            return Err(CoreError::invalid_config(format!(
                "from time {} is later than to time {}",
                self.from_time, self.to_time
            )));
        }
        if self.worker_count == 0 {
            return Err(CoreError::invalid_config("worker count must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(CoreError::invalid_config(
                "queue capacity must be at least 1",
            ));
        }
        if self.entity_remap.is_some() && self.single_entity().is_none() {
            return Err(CoreError::invalid_config(
                "entity remap requires exactly one filtered entity",
            ));
        }
        Ok(())
    }

    /// Returns the entity of a single-entity run.
    #[must_use]
    pub fn single_entity(&self) -> Option<EntityId> {
        match &self.entity_filter {
            Some(ids) if ids.len() == 1 => ids.iter().next().copied(),
            _ => None,
        }
    }

    /// Returns true if replay runs entirely on the calling thread.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        self.worker_count == 1 || self.single_entity().is_some()
    }

    /// Returns true if `sequence` lies in the configured range.
    #[must_use]
    pub fn contains_sequence(&self, sequence: SequenceNumber) -> bool {
        self.from_sequence <= sequence && sequence <= self.to_sequence
    }
}

/// Configuration for crash recovery of uncommitted transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Commits at or after this time are treated as not yet committed.
    ///
    /// `Timestamp::MAX` honours every commit.
    pub ignore_commits_at_or_after: Timestamp,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            ignore_commits_at_or_after: Timestamp::MAX,
        }
    }
}

impl RecoveryConfig {
    /// Creates a recovery configuration that honours every commit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Treats commits within `lookback_ms` of `last_op_time` as uncommitted.
    #[must_use]
    pub const fn lookback(mut self, last_op_time: Timestamp, lookback_ms: i64) -> Self {
        if lookback_ms > 0 {
            self.ignore_commits_at_or_after = last_op_time.saturating_sub(lookback_ms);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ReplayConfig::default();
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(!config.stop_on_error);
        assert!(config.entity_filter.is_none());
        assert!(config.validate().is_ok());
        assert!(!config.is_sequential());
    }

    #[test]
    fn builder_pattern() {
        let config = ReplayConfig::new()
            .sequence_range(3, 9)
            .time_range(100, 200)
            .worker_count(4)
            .queue_capacity(10)
            .stop_on_error(true);

        assert_eq!(config.from_sequence, SequenceNumber::new(3));
        assert_eq!(config.to_sequence, SequenceNumber::new(9));
        assert_eq!(config.from_time, 100);
        assert_eq!(config.to_time, 200);
        assert_eq!(config.worker_count, 4);
        assert!(config.stop_on_error);
        assert!(config.contains_sequence(SequenceNumber::new(9)));
        assert!(!config.contains_sequence(SequenceNumber::new(10)));
    }

    #[test]
    fn rejects_inverted_ranges() {
        assert!(ReplayConfig::new().sequence_range(5, 4).validate().is_err());
        assert!(ReplayConfig::new().time_range(10, 9).validate().is_err());
    }

    #[test]
    fn rejects_empty_pool() {
        assert!(ReplayConfig::new().worker_count(0).validate().is_err());
        assert!(ReplayConfig::new().queue_capacity(0).validate().is_err());
    }

    #[test]
    fn remap_needs_single_entity() {
        let config = ReplayConfig::new().entity_remap(EntityId::new(2));
        assert!(config.validate().is_err());

        let config = ReplayConfig::new()
            .entities([EntityId::new(1), EntityId::new(3)])
            .entity_remap(EntityId::new(2));
        assert!(config.validate().is_err());

        let config = ReplayConfig::new()
            .entities([EntityId::new(1)])
            .entity_remap(EntityId::new(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sequential_modes() {
        assert!(ReplayConfig::new().worker_count(1).is_sequential());
        assert!(ReplayConfig::new()
            .entities([EntityId::new(42)])
            .is_sequential());
        assert!(!ReplayConfig::new()
            .entities([EntityId::new(1), EntityId::new(2)])
            .is_sequential());
    }

    #[test]
    fn recovery_lookback() {
        assert_eq!(
            RecoveryConfig::new().ignore_commits_at_or_after,
            Timestamp::MAX
        );
        let config = RecoveryConfig::new().lookback(10_000, 3_000);
        assert_eq!(config.ignore_commits_at_or_after, 7_000);
        let config = RecoveryConfig::new().lookback(10_000, 0);
        assert_eq!(config.ignore_commits_at_or_after, Timestamp::MAX);
    }
}
