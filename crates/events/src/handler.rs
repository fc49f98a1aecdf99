use shipping_core::{Aggregate, IdGenerator};

/// Result of a successful [`execute`]: the emitted event and the state after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed<S, E> {
    pub event: E,
    pub state: S,
}

/// Execute an aggregate command deterministically (no IO, no async).
///
/// 1. **Decide**: `aggregate.handle(command, ids)` yields one event or an error.
/// 2. **Evolve**: the event is applied to produce the next state.
///
/// The input state is never touched, so a rejected command leaves the caller's
/// state exactly as it was. For persistence and optimistic concurrency use the
/// infrastructure dispatcher, which wraps this step.
pub fn execute<A>(
    aggregate: &A,
    command: &A::Command,
    ids: &dyn IdGenerator,
) -> Result<Executed<A, A::Event>, A::Error>
where
    A: Aggregate,
{
    let event = aggregate.handle(command, ids)?;
    let state = aggregate.apply(&event);
    Ok(Executed { event, state })
}
