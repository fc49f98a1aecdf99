//! Strongly-typed identifiers and the identity source.

use core::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an aggregate root (128-bit, minted once at creation).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Create a new random identifier (UUIDv4).
    ///
    /// Aggregates should mint identities through an [`IdGenerator`] instead,
    /// so tests can stay deterministic.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for AggregateId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<AggregateId> for Uuid {
    fn from(value: AggregateId) -> Self {
        value.0
    }
}

impl FromStr for AggregateId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("AggregateId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Source of fresh aggregate identities.
///
/// Passed into command handling rather than read from ambient process state.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> AggregateId;
}

/// Random UUIDv4 identities.
#[derive(Debug, Default, Copy, Clone)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> AggregateId {
        AggregateId::new()
    }
}

/// Deterministic identities: `00000000-0000-0000-0000-000000000001`, `...2`, ...
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the sequence after `start` (the first id handed out is `start + 1`).
    pub fn starting_after(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> AggregateId {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        AggregateId::from_uuid(Uuid::from_u128(u128::from(n)))
    }
}
