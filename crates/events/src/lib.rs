//! Commands, events and the pure execution step shared by aggregates.

pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;

pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::{Executed, execute};
