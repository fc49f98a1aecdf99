//! Infrastructure layer: event log, replay, command dispatch, configuration.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched, rehydrate};
pub use config::DispatcherConfig;
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
