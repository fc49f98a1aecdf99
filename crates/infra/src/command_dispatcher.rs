//! Command execution pipeline (application-level orchestration).
//!
//! The `CommandDispatcher` implements this pipeline for any event-sourced aggregate:
//!
//! ```text
//! Command
//!   ↓
//! 1. Lock the target stream (one writer per identity in this process)
//!   ↓
//! 2. Load the stream and rehydrate state (replay)
//!   ↓
//! 3. Handle the command (pure decision, at most one event)
//!   ↓
//! 4. Apply the event to get the next state
//!   ↓
//! 5. Append with ExpectedVersion::Exact(loaded version)
//!   ↓
//! 6. On a concurrency conflict: reload and go back to 3
//! ```
//!
//! Commands for different identities take different locks and run in parallel.
//! Conflicts can still happen when another process writes the same stream; the
//! optimistic check in the event log catches those.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use shipping_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, IdGenerator};
use shipping_events::{Command, Event, Executed, execute};

use crate::config::DispatcherConfig;
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed or missing command data.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The command targets an identity with no history.
    #[error("not found")]
    NotFound,
    /// The command is not allowed in the aggregate's lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The stream moved on while the command was being decided, and retries ran out.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),
    /// The event log failed or returned an unusable stream.
    #[error("event log failure: {0}")]
    Io(EventStoreError),
    /// A stored payload no longer deserializes into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        if matches!(value, EventStoreError::Concurrency { .. }) {
            DispatchError::ConcurrencyConflict(value.to_string())
        } else {
            DispatchError::Io(value)
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidState(msg) => DispatchError::InvalidState(msg),
            DomainError::Conflict(msg) => DispatchError::ConcurrencyConflict(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Outcome of an accepted command: the committed event and the state after it.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    pub aggregate_id: AggregateId,
    pub state: A,
    pub event: StoredEvent,
}

/// Per-identity mutual exclusion for load → handle → append.
#[derive(Debug, Default)]
struct StreamLocks {
    streams: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl StreamLocks {
    fn acquire(&self, aggregate_id: AggregateId) -> Arc<Mutex<()>> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.entry(aggregate_id).or_default().clone()
    }

    /// Drop the map entry once nobody else holds or waits on it.
    fn release(&self, aggregate_id: AggregateId, lock: Arc<Mutex<()>>) {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            streams.remove(&aggregate_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// ## Execution Guarantees
///
/// - **Serialized per identity**: at most one command per stream is between
///   load and append inside this dispatcher
/// - **Optimistic**: every append carries the version the decision was based on
/// - **No partial state**: callers only ever see the state returned with a
///   committed event, or an error
///
/// ## Error Semantics
///
/// - Domain rejections map to `Validation` / `NotFound` / `InvalidState` and are never retried
/// - Version mismatches are retried from the load step, up to
///   `DispatcherConfig::max_conflict_retries`, then surface as `ConcurrencyConflict`
/// - Event log failures surface as `Io` without retry
pub struct CommandDispatcher<S> {
    store: S,
    ids: Arc<dyn IdGenerator>,
    config: DispatcherConfig,
    locks: StreamLocks,
}

impl<S> CommandDispatcher<S> {
    pub fn new(store: S, ids: impl IdGenerator + 'static) -> Self {
        Self {
            store,
            ids: Arc::new(ids),
            config: DispatcherConfig::default(),
            locks: StreamLocks::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

impl<S> CommandDispatcher<S>
where
    S: EventStore,
{
    /// Load the current state of one aggregate (replay driver).
    ///
    /// An unknown identity yields the absent state (version 0).
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE))]
    pub fn load<A>(&self, aggregate_id: AggregateId) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        rehydrate::<A>(aggregate_id, &history)
    }

    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// Creation commands carry no target: the aggregate mints the identity and
    /// the event is appended to a fresh stream with `ExpectedVersion::Exact(0)`.
    #[instrument(skip_all, fields(aggregate_type = A::AGGREGATE_TYPE))]
    pub fn dispatch<A>(&self, command: A::Command) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let target = command.target_aggregate_id();
        let lock = target.map(|id| self.locks.acquire(id));

        let result = {
            let _guard = lock
                .as_ref()
                .map(|l| l.lock().unwrap_or_else(PoisonError::into_inner));
            self.dispatch_with_retry::<A>(target, &command)
        };

        if let (Some(id), Some(lock)) = (target, lock) {
            self.locks.release(id, lock);
        }

        result
    }

    fn dispatch_with_retry<A>(
        &self,
        target: Option<AggregateId>,
        command: &A::Command,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 0u32;
        loop {
            match self.dispatch_once::<A>(target, command) {
                Err(DispatchError::ConcurrencyConflict(msg))
                    if attempt < self.config.max_conflict_retries =>
                {
                    attempt += 1;
                    warn!(
                        attempt,
                        max = self.config.max_conflict_retries,
                        error = %msg,
                        "concurrency conflict; reloading and re-validating command"
                    );
                }
                other => return other,
            }
        }
    }

    fn dispatch_once<A>(
        &self,
        target: Option<AggregateId>,
        command: &A::Command,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let current = match target {
            Some(id) => self.load::<A>(id)?,
            None => A::default(),
        };
        let expected = ExpectedVersion::Exact(current.version());

        let Executed { event, state } = execute(&current, command, self.ids.as_ref())?;

        let aggregate_id = event.aggregate_id();
        let uncommitted =
            UncommittedEvent::from_typed(aggregate_id, A::AGGREGATE_TYPE, Uuid::new_v4(), &event)?;

        let event = self
            .store
            .append(vec![uncommitted], expected)?
            .pop()
            .ok_or_else(|| {
                DispatchError::Io(EventStoreError::InvalidAppend(
                    "append acknowledged without returning the stored event".to_string(),
                ))
            })?;

        debug!(
            %aggregate_id,
            event_type = %event.event_type,
            version = event.sequence_number,
            "command accepted"
        );

        Ok(Dispatched {
            aggregate_id,
            state,
            event,
        })
    }
}

/// Rebuild aggregate state from a loaded stream.
///
/// The stream must belong to `aggregate_id`, carry `A::AGGREGATE_TYPE` and be
/// numbered 1, 2, 3, ... without gaps; anything else is reported as a corrupt
/// stream rather than silently reordered.
pub fn rehydrate<A>(aggregate_id: AggregateId, history: &[StoredEvent]) -> Result<A, DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    validate_loaded_stream(aggregate_id, A::AGGREGATE_TYPE, history)?;

    let events = history
        .iter()
        .map(|stored| {
            serde_json::from_value::<A::Event>(stored.payload.clone()).map_err(|e| {
                DispatchError::Deserialize(format!(
                    "{} at sequence {}: {e}",
                    stored.event_type, stored.sequence_number
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(A::replay(&events))
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(corrupt(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.aggregate_type != aggregate_type {
            return Err(DispatchError::Io(EventStoreError::AggregateTypeMismatch(
                format!(
                    "stream holds '{}', expected '{aggregate_type}'",
                    e.aggregate_type
                ),
            )));
        }
        let expected_seq = idx as u64 + 1;
        if e.sequence_number != expected_seq {
            return Err(corrupt(format!(
                "expected sequence_number {expected_seq}, found {}",
                e.sequence_number
            )));
        }
    }
    Ok(())
}

fn corrupt(msg: String) -> DispatchError {
    DispatchError::Io(EventStoreError::CorruptStream(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use shipping_core::{AggregateRoot, SequentialIdGenerator};
    use shipping_shipment::{
        Address, CancelShipment, ProductId, Shipment, ShipmentCanceled, ShipmentCommand,
        ShipmentCreated, ShipmentEvent, ShipmentId,
    };

    use crate::event_store::InMemoryEventStore;

    fn stored(
        aggregate_id: AggregateId,
        sequence_number: u64,
        event: &ShipmentEvent,
    ) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            aggregate_id,
            aggregate_type: Shipment::AGGREGATE_TYPE.to_string(),
            sequence_number,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            recorded_at: Utc::now(),
            payload: serde_json::to_value(event).unwrap(),
        }
    }

    fn history(aggregate_id: AggregateId) -> Vec<ShipmentEvent> {
        let shipment_id = ShipmentId::new(aggregate_id);
        vec![
            ShipmentEvent::ShipmentCreated(ShipmentCreated {
                shipment_id,
                delivery_address: Address::new("1234AB", 3),
                delivery_moment: Utc::now(),
                recipient_name: "John Diamond".to_string(),
                product_ids: vec![ProductId::new(AggregateId::new())],
            }),
            ShipmentEvent::ShipmentCanceled(ShipmentCanceled { shipment_id }),
        ]
    }

    #[test]
    fn rehydrate_folds_history() {
        let id = AggregateId::new();
        let events = history(id);
        let stream: Vec<_> = events
            .iter()
            .enumerate()
            .map(|(i, e)| stored(id, i as u64 + 1, e))
            .collect();

        let shipment: Shipment = rehydrate(id, &stream).unwrap();
        assert_eq!(shipment, Shipment::replay(&events));
        assert_eq!(shipment.version(), 2);
        assert!(shipment.is_canceled());
    }

    #[test]
    fn rehydrate_rejects_gaps() {
        let id = AggregateId::new();
        let events = history(id);
        let stream = vec![stored(id, 1, &events[0]), stored(id, 3, &events[1])];

        let err = rehydrate::<Shipment>(id, &stream).unwrap_err();
        assert!(matches!(err, DispatchError::Io(EventStoreError::CorruptStream(_))));
    }

    #[test]
    fn rehydrate_rejects_foreign_events() {
        let id = AggregateId::new();
        let other = AggregateId::new();
        let events = history(id);
        let stream = vec![stored(id, 1, &events[0]), stored(other, 2, &events[1])];

        let err = rehydrate::<Shipment>(id, &stream).unwrap_err();
        assert!(matches!(err, DispatchError::Io(EventStoreError::CorruptStream(_))));
    }

    #[test]
    fn rehydrate_reports_undecodable_payloads() {
        let id = AggregateId::new();
        let mut bad = stored(id, 1, &history(id)[0]);
        bad.payload = json!({ "Unknown": {} });

        let err = rehydrate::<Shipment>(id, &[bad]).unwrap_err();
        assert!(matches!(err, DispatchError::Deserialize(msg) if msg.contains("sequence 1")));
    }

    #[test]
    fn domain_errors_map_onto_dispatch_errors() {
        assert!(matches!(
            DispatchError::from(DomainError::NotFound),
            DispatchError::NotFound
        ));
        assert!(matches!(
            DispatchError::from(DomainError::invalid_state("x")),
            DispatchError::InvalidState(_)
        ));
        assert!(matches!(
            DispatchError::from(EventStoreError::Concurrency {
                expected: ExpectedVersion::Exact(1),
                actual: 2,
            }),
            DispatchError::ConcurrencyConflict(_)
        ));
        assert!(matches!(
            DispatchError::from(EventStoreError::Unavailable("down".into())),
            DispatchError::Io(_)
        ));
    }

    #[test]
    fn stream_locks_are_released_after_dispatch() {
        let dispatcher =
            CommandDispatcher::new(InMemoryEventStore::new(), SequentialIdGenerator::new());

        let err = dispatcher
            .dispatch::<Shipment>(ShipmentCommand::CancelShipment(CancelShipment {
                shipment_id: ShipmentId::new(AggregateId::new()),
            }))
            .unwrap_err();

        assert!(matches!(err, DispatchError::NotFound));
        assert_eq!(dispatcher.locks.len(), 0);
    }
}
