//! Aggregate root traits for event-sourced domain models.

use crate::error::{DomainError, DomainResult};
use crate::id::IdGenerator;

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier, or `None` before the first event.
    fn id(&self) -> Option<&Self::Id>;

    /// Number of events applied to this state.
    ///
    /// Starts at 0 and is the stream length the event log must report for an
    /// append against this state to succeed.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, imports).
    Any,
    /// Require the stream to be at an exact length.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd, ids)` returns at most one event.
/// - **State evolution**: `apply(&self, event)` returns the next state.
///
/// `Default` is the absent state: nothing has been applied yet.
///
/// Aggregates must not perform IO, read the clock, or draw randomness other
/// than through the injected [`IdGenerator`]. `apply` must be total: anything
/// invalid is rejected by `handle`, never discovered during replay.
pub trait Aggregate: AggregateRoot + Default + Clone {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Stable stream type name (e.g. "shipping.shipment").
    const AGGREGATE_TYPE: &'static str;

    /// Evolve state by one event. Must bump `version()` by exactly one.
    fn apply(&self, event: &Self::Event) -> Self;

    /// Decide which event the command produces given the current state.
    fn handle(
        &self,
        command: &Self::Command,
        ids: &dyn IdGenerator,
    ) -> Result<Self::Event, Self::Error>;

    /// Fold a history into state, starting from the absent state.
    fn replay<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a Self::Event>,
        Self::Event: 'a,
    {
        events
            .into_iter()
            .fold(Self::default(), |state, event| state.apply(event))
    }
}
