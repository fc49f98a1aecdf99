//! Shipments domain module (event-sourced).
//!
//! This crate contains business rules for shipments, implemented purely as
//! deterministic domain logic (no IO, no clock, no storage).

pub mod address;
pub mod shipment;

pub use address::Address;
pub use shipment::{
    CancelShipment, CreateShipment, DeliveryMomentUpdated, ProductId, Shipment, ShipmentCanceled,
    ShipmentCommand, ShipmentCreated, ShipmentDetails, ShipmentEvent, ShipmentId, ShipmentStatus,
    UpdateDeliveryMoment,
};
