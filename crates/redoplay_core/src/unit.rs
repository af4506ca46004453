//! Committed operations handed to the dispatcher.

use crate::types::{EntityId, SequenceNumber, Timestamp, TransactionId};
use std::fmt;

/// Where a unit is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Cross-entity operation, applied inline on the dispatch thread.
    Global,
    /// Operation on one entity, applied by the worker owning it.
    Entity(EntityId),
}

impl Scope {
    /// Returns the entity, or `None` for global scope.
    #[must_use]
    pub const fn entity(self) -> Option<EntityId> {
        match self {
            Self::Global => None,
            Self::Entity(id) => Some(id),
        }
    }

    /// Returns true for global scope.
    #[must_use]
    pub const fn is_global(self) -> bool {
        matches!(self, Self::Global)
    }
}

impl From<Option<EntityId>> for Scope {
    fn from(entity: Option<EntityId>) -> Self {
        entity.map_or(Self::Global, Self::Entity)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Entity(id) => write!(f, "{id}"),
        }
    }
}

/// A committed operation, resolved from its `Start` and `Commit` records.
///
/// `timestamp` is the commit time; it orders and filters units everywhere
/// downstream of the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayUnit {
    /// Transaction that produced the operation.
    pub txid: TransactionId,
    /// Target of the operation.
    pub scope: Scope,
    /// Commit time.
    pub timestamp: Timestamp,
    /// Opaque serialized operation.
    pub payload: Vec<u8>,
    /// Segment the operation was read from.
    pub segment: SequenceNumber,
}

impl ReplayUnit {
    /// Returns the target entity, or `None` for a global unit.
    #[must_use]
    pub const fn entity(&self) -> Option<EntityId> {
        self.scope.entity()
    }

    /// Returns true for a global unit.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        self.scope.is_global()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_from_option() {
        assert_eq!(Scope::from(None), Scope::Global);
        assert_eq!(
            Scope::from(Some(EntityId::new(4))),
            Scope::Entity(EntityId::new(4))
        );
        assert_eq!(Scope::Entity(EntityId::new(4)).entity(), Some(EntityId::new(4)));
        assert_eq!(Scope::Global.to_string(), "global");
        assert_eq!(Scope::Entity(EntityId::new(4)).to_string(), "entity:4");
    }
}
