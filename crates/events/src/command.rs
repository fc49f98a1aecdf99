use shipping_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** and may be rejected. Accepted commands turn
/// into events, which are the only thing persisted.
///
/// ## Aggregate Targeting
///
/// `target_aggregate_id()` lets infrastructure route the command to the stream
/// it acts on. Creation commands return `None`: the aggregate mints its own
/// identity while handling them, so there is no stream to load yet.
///
/// Commands must be cloneable and `Send + Sync + 'static` so they can be
/// retried after a concurrency conflict and moved across threads.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> Option<AggregateId>;
}
