use shipping_core::AggregateId;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
///
/// Events carry no wall-clock time; the event log stamps `recorded_at` when it
/// persists them, which keeps `apply` replay-safe.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "shipping.shipment.created").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// The stream this event belongs to.
    fn aggregate_id(&self) -> AggregateId;
}
