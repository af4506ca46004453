//! Range filtering of decoded units.
//!
//! Filters only remove units; they never reorder them. Errors from the
//! decoder pass through untouched so the controller sees them in place.

use crate::config::ReplayConfig;
use crate::error::CoreResult;
use crate::types::{EntityId, Timestamp};
use crate::unit::{ReplayUnit, Scope};
use std::collections::BTreeSet;

/// The time and entity predicate of a replay run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePredicate {
    from_time: Timestamp,
    to_time: Timestamp,
    entities: Option<BTreeSet<EntityId>>,
}

impl RangePredicate {
    /// Creates a predicate over an inclusive commit time range.
    #[must_use]
    pub fn new(from_time: Timestamp, to_time: Timestamp, entities: Option<BTreeSet<EntityId>>) -> Self {
        Self {
            from_time,
            to_time,
            entities,
        }
    }

    /// Builds the predicate configured for a run.
    #[must_use]
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self::new(config.from_time, config.to_time, config.entity_filter.clone())
    }

    /// Returns true if `unit` should be replayed.
    ///
    /// Global units pass any entity filter.
    #[must_use]
    pub fn matches(&self, unit: &ReplayUnit) -> bool {
        if unit.timestamp < self.from_time || unit.timestamp > self.to_time {
            return false;
        }
        match (&self.entities, unit.scope) {
            (None, _) | (_, Scope::Global) => true,
            (Some(ids), Scope::Entity(id)) => ids.contains(&id),
        }
    }
}

/// Iterator adapter dropping units outside a [`RangePredicate`].
pub struct RangeFilter<I> {
    inner: I,
    predicate: RangePredicate,
    filtered: u64,
}

impl<I> RangeFilter<I>
where
    I: Iterator<Item = CoreResult<ReplayUnit>>,
{
    /// Wraps `inner`.
    pub fn new(inner: I, predicate: RangePredicate) -> Self {
        Self {
            inner,
            predicate,
            filtered: 0,
        }
    }

    /// Returns the number of units dropped so far.
    pub fn filtered(&self) -> u64 {
        self.filtered
    }

    /// Returns the wrapped iterator.
    pub fn get_ref(&self) -> &I {
        &self.inner
    }
}

impl<I> Iterator for RangeFilter<I>
where
    I: Iterator<Item = CoreResult<ReplayUnit>>,
{
    type Item = CoreResult<ReplayUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(unit) if !self.predicate.matches(&unit) => self.filtered += 1,
                item => return Some(item),
            }
        }
    }
}

/// Iterator adapter replaying entity-scoped units into another entity.
///
/// Global units are passed through unchanged, as is everything when no
/// target is set.
pub struct EntityRemap<I> {
    inner: I,
    target: Option<EntityId>,
}

impl<I> EntityRemap<I>
where
    I: Iterator<Item = CoreResult<ReplayUnit>>,
{
    /// Wraps `inner`, rewriting entities to `target` if set.
    pub fn new(inner: I, target: Option<EntityId>) -> Self {
        Self { inner, target }
    }

    /// Returns the wrapped iterator.
    pub fn get_ref(&self) -> &I {
        &self.inner
    }
}

impl<I> Iterator for EntityRemap<I>
where
    I: Iterator<Item = CoreResult<ReplayUnit>>,
{
    type Item = CoreResult<ReplayUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        let Some(target) = self.target else {
            return Some(item);
        };
        Some(item.map(|mut unit| {
            if let Scope::Entity(_) = unit.scope {
                unit.scope = Scope::Entity(target);
            }
            unit
        }))
    }
}
