//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two addresses
/// with the same zip code and house number are the same address. To "modify"
/// one, build a new one.
///
/// Implementors validate their required fields through [`ValueObject::validate`];
/// command handlers call it before accepting a value into an event.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {
    fn validate(&self) -> crate::DomainResult<()> {
        Ok(())
    }
}
