use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use shipping_core::{AggregateId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: produced by an aggregate's `handle()`
/// 2. **UncommittedEvent**: serialized and wrapped with stream metadata
/// 3. **StoredEvent**: persisted with its sequence number and `recorded_at`
/// 4. **EventEnvelope**: handed to downstream consumers
///
/// Use [`UncommittedEvent::from_typed`] to build one from a typed domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream.
///
/// ## Sequence Numbers
///
/// Assigned by the store during append:
/// - **1-based and gapless**: the n-th event of a stream has sequence number n,
///   so the last sequence number is also the stream version
/// - **Stream-scoped**: numbering restarts for every aggregate
/// - **Immutable**: once assigned, never changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Position in the aggregate stream (1-based).
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    /// When the log accepted the event (store time, not business time).
    pub recorded_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an envelope for downstream consumers.
    pub fn to_envelope(&self) -> shipping_events::EventEnvelope<JsonValue> {
        shipping_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event log operation error.
///
/// These are **infrastructure errors** as opposed to domain errors (validation,
/// lifecycle). `Concurrency` is the only one a caller is expected to recover
/// from, by reloading state and re-running the command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: expected {expected:?}, stream is at {actual}")]
    Concurrency {
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error("event log unavailable: {0}")]
    Unavailable(String),
}

/// Append-only event log, one stream per aggregate identity.
///
/// ## Append Semantics
///
/// `append()`:
/// - Validates that every event in the batch targets the same stream
/// - Checks optimistic concurrency (stream length must match `expected_version`)
/// - Assigns sequence numbers starting at `current_version + 1`
/// - Persists the batch atomically (all or nothing)
///
/// ## Load Semantics
///
/// `load_stream()` returns the events of one stream in append order, or an
/// empty vector if the identity is unknown.
///
/// Both calls are the only points where command handling may block.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }
}

impl UncommittedEvent {
    /// Build an uncommitted event from a typed domain event.
    ///
    /// Keeps infra decoupled from business types while capturing the metadata
    /// needed to deserialize the payload again during replay.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: shipping_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            payload,
        })
    }
}
