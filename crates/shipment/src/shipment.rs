use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shipping_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, IdGenerator, ValueObject,
};
use shipping_events::{Command, Event};

use crate::address::Address;

/// Shipment identifier, minted once when the shipment is created.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(pub AggregateId);

impl ShipmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a product carried by a shipment (owned by the catalog, not here).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Shipment lifecycle.
///
/// `Absent --create--> Active --cancel--> Canceled`. Delivery moment updates
/// keep an active shipment active; nothing leaves `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipmentStatus {
    Absent,
    Active,
    Canceled,
}

/// Populated shipment state (everything a `ShipmentCreated` event establishes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDetails {
    pub id: ShipmentId,
    pub delivery_address: Address,
    pub recipient_name: String,
    pub product_ids: Vec<ProductId>,
    pub delivery_moment: DateTime<Utc>,
    pub canceled: bool,
}

/// Aggregate root: Shipment.
///
/// `Shipment::default()` is the absent state; `details` is populated by the
/// first `ShipmentCreated` event and never cleared afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shipment {
    details: Option<ShipmentDetails>,
    version: u64,
}

impl Shipment {
    /// The not-yet-created state every stream is replayed from.
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn details(&self) -> Option<&ShipmentDetails> {
        self.details.as_ref()
    }

    pub fn id_typed(&self) -> Option<ShipmentId> {
        self.details.as_ref().map(|d| d.id)
    }

    pub fn status(&self) -> ShipmentStatus {
        match &self.details {
            None => ShipmentStatus::Absent,
            Some(d) if d.canceled => ShipmentStatus::Canceled,
            Some(_) => ShipmentStatus::Active,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.details.as_ref().is_some_and(|d| d.canceled)
    }

    pub fn delivery_address(&self) -> Option<&Address> {
        self.details.as_ref().map(|d| &d.delivery_address)
    }

    pub fn recipient_name(&self) -> Option<&str> {
        self.details.as_ref().map(|d| d.recipient_name.as_str())
    }

    pub fn product_ids(&self) -> &[ProductId] {
        self.details
            .as_ref()
            .map(|d| d.product_ids.as_slice())
            .unwrap_or_default()
    }

    pub fn delivery_moment(&self) -> Option<DateTime<Utc>> {
        self.details.as_ref().map(|d| d.delivery_moment)
    }
}

impl AggregateRoot for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> Option<&Self::Id> {
        self.details.as_ref().map(|d| &d.id)
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateShipment.
///
/// Carries no identity; one is minted while handling it. `delivery_moment` is
/// optional on the wire so a missing value surfaces as a validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShipment {
    pub delivery_address: Address,
    pub recipient_name: String,
    pub delivery_moment: Option<DateTime<Utc>>,
    pub product_ids: Vec<ProductId>,
}

/// Command: UpdateDeliveryMoment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDeliveryMoment {
    pub shipment_id: ShipmentId,
    pub delivery_moment: Option<DateTime<Utc>>,
}

/// Command: CancelShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelShipment {
    pub shipment_id: ShipmentId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentCommand {
    CreateShipment(CreateShipment),
    UpdateDeliveryMoment(UpdateDeliveryMoment),
    CancelShipment(CancelShipment),
}

impl Command for ShipmentCommand {
    fn target_aggregate_id(&self) -> Option<AggregateId> {
        match self {
            ShipmentCommand::CreateShipment(_) => None,
            ShipmentCommand::UpdateDeliveryMoment(c) => Some(c.shipment_id.0),
            ShipmentCommand::CancelShipment(c) => Some(c.shipment_id.0),
        }
    }
}

/// Event: ShipmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCreated {
    pub shipment_id: ShipmentId,
    pub delivery_address: Address,
    pub delivery_moment: DateTime<Utc>,
    pub recipient_name: String,
    pub product_ids: Vec<ProductId>,
}

/// Event: DeliveryMomentUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMomentUpdated {
    pub shipment_id: ShipmentId,
    pub delivery_moment: DateTime<Utc>,
}

/// Event: ShipmentCanceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCanceled {
    pub shipment_id: ShipmentId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentEvent {
    ShipmentCreated(ShipmentCreated),
    DeliveryMomentUpdated(DeliveryMomentUpdated),
    ShipmentCanceled(ShipmentCanceled),
}

impl ShipmentEvent {
    pub fn shipment_id(&self) -> ShipmentId {
        match self {
            ShipmentEvent::ShipmentCreated(e) => e.shipment_id,
            ShipmentEvent::DeliveryMomentUpdated(e) => e.shipment_id,
            ShipmentEvent::ShipmentCanceled(e) => e.shipment_id,
        }
    }
}

impl Event for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::ShipmentCreated(_) => "shipping.shipment.created",
            ShipmentEvent::DeliveryMomentUpdated(_) => "shipping.shipment.delivery_moment_updated",
            ShipmentEvent::ShipmentCanceled(_) => "shipping.shipment.canceled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn aggregate_id(&self) -> AggregateId {
        self.shipment_id().0
    }
}

impl Aggregate for Shipment {
    type Command = ShipmentCommand;
    type Event = ShipmentEvent;
    type Error = DomainError;

    const AGGREGATE_TYPE: &'static str = "shipping.shipment";

    fn apply(&self, event: &Self::Event) -> Self {
        match event {
            ShipmentEvent::ShipmentCreated(e) => self.apply_created(e),
            ShipmentEvent::DeliveryMomentUpdated(e) => self.apply_delivery_moment_updated(e),
            ShipmentEvent::ShipmentCanceled(e) => self.apply_canceled(e),
        }
    }

    fn handle(
        &self,
        command: &Self::Command,
        ids: &dyn IdGenerator,
    ) -> Result<Self::Event, Self::Error> {
        match command {
            ShipmentCommand::CreateShipment(cmd) => self.handle_create(cmd, ids),
            ShipmentCommand::UpdateDeliveryMoment(cmd) => {
                self.handle_update_delivery_moment(cmd)
            }
            ShipmentCommand::CancelShipment(cmd) => self.handle_cancel(cmd),
        }
    }
}

// Apply functions never fail. Events that only make sense on a created
// shipment leave absent state as-is apart from the version count.
impl Shipment {
    fn apply_created(&self, e: &ShipmentCreated) -> Self {
        Self {
            details: Some(ShipmentDetails {
                id: e.shipment_id,
                delivery_address: e.delivery_address.clone(),
                recipient_name: e.recipient_name.clone(),
                product_ids: e.product_ids.clone(),
                delivery_moment: e.delivery_moment,
                // Cancellation is monotone, even across a repeated creation event.
                canceled: self.is_canceled(),
            }),
            version: self.version + 1,
        }
    }

    fn apply_delivery_moment_updated(&self, e: &DeliveryMomentUpdated) -> Self {
        let mut next = self.clone();
        if let Some(details) = next.details.as_mut() {
            details.delivery_moment = e.delivery_moment;
        }
        next.version += 1;
        next
    }

    fn apply_canceled(&self, _e: &ShipmentCanceled) -> Self {
        let mut next = self.clone();
        if let Some(details) = next.details.as_mut() {
            details.canceled = true;
        }
        next.version += 1;
        next
    }
}

impl Shipment {
    fn ensure_target(&self, shipment_id: ShipmentId) -> Result<&ShipmentDetails, DomainError> {
        let details = self.details.as_ref().ok_or_else(DomainError::not_found)?;
        if details.id != shipment_id {
            return Err(DomainError::validation(
                "shipment_id does not match the loaded shipment",
            ));
        }
        Ok(details)
    }

    fn handle_create(
        &self,
        cmd: &CreateShipment,
        ids: &dyn IdGenerator,
    ) -> Result<ShipmentEvent, DomainError> {
        if self.details.is_some() {
            return Err(DomainError::invalid_state("shipment already exists"));
        }

        cmd.delivery_address.validate()?;

        if cmd.recipient_name.trim().is_empty() {
            return Err(DomainError::validation("recipient_name must not be empty"));
        }

        let Some(delivery_moment) = cmd.delivery_moment else {
            return Err(DomainError::validation("delivery_moment is required"));
        };

        if cmd.product_ids.is_empty() {
            return Err(DomainError::validation("product_ids must not be empty"));
        }

        // Minted last so a rejected command never consumes an identity.
        let shipment_id = ShipmentId::new(ids.next_id());

        Ok(ShipmentEvent::ShipmentCreated(ShipmentCreated {
            shipment_id,
            delivery_address: cmd.delivery_address.clone(),
            delivery_moment,
            recipient_name: cmd.recipient_name.clone(),
            product_ids: cmd.product_ids.clone(),
        }))
    }

    fn handle_update_delivery_moment(
        &self,
        cmd: &UpdateDeliveryMoment,
    ) -> Result<ShipmentEvent, DomainError> {
        let details = self.ensure_target(cmd.shipment_id)?;

        if details.canceled {
            return Err(DomainError::invalid_state(
                "cannot update the delivery moment of a canceled shipment",
            ));
        }

        let Some(delivery_moment) = cmd.delivery_moment else {
            return Err(DomainError::validation("delivery_moment is required"));
        };

        Ok(ShipmentEvent::DeliveryMomentUpdated(DeliveryMomentUpdated {
            shipment_id: cmd.shipment_id,
            delivery_moment,
        }))
    }

    fn handle_cancel(&self, cmd: &CancelShipment) -> Result<ShipmentEvent, DomainError> {
        let details = self.ensure_target(cmd.shipment_id)?;

        if details.canceled {
            return Err(DomainError::invalid_state("shipment is already canceled"));
        }

        Ok(ShipmentEvent::ShipmentCanceled(ShipmentCanceled {
            shipment_id: cmd.shipment_id,
        }))
    }
}
