//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → CommandDispatcher → EventStore → replay
//!
//! Verifies:
//! - Accepted commands append exactly one event and return the new state
//! - Rejected commands leave the log untouched
//! - Optimistic concurrency conflicts are retried against fresh state

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    use shipping_core::{AggregateId, AggregateRoot, ExpectedVersion, SequentialIdGenerator};
    use shipping_shipment::{
        Address, CancelShipment, CreateShipment, DeliveryMomentUpdated, ProductId, Shipment,
        ShipmentCanceled, ShipmentCommand, ShipmentEvent, ShipmentId, ShipmentStatus,
        UpdateDeliveryMoment,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::config::DispatcherConfig;
    use crate::event_store::{
        EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent,
    };

    fn moment(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 10, 0, 0).unwrap()
    }

    fn setup() -> CommandDispatcher<InMemoryEventStore> {
        shipping_observability::init_for_tests();
        CommandDispatcher::new(InMemoryEventStore::new(), SequentialIdGenerator::new())
    }

    fn create_command() -> ShipmentCommand {
        ShipmentCommand::CreateShipment(CreateShipment {
            delivery_address: Address::new("1234AB", 3).with_addition("A"),
            recipient_name: "John Diamond".to_string(),
            delivery_moment: Some(moment(1)),
            product_ids: vec![ProductId::new(AggregateId::new())],
        })
    }

    fn update_command(shipment_id: ShipmentId, day: u32) -> ShipmentCommand {
        ShipmentCommand::UpdateDeliveryMoment(UpdateDeliveryMoment {
            shipment_id,
            delivery_moment: Some(moment(day)),
        })
    }

    fn cancel_command(shipment_id: ShipmentId) -> ShipmentCommand {
        ShipmentCommand::CancelShipment(CancelShipment { shipment_id })
    }

    fn create<S: EventStore>(dispatcher: &CommandDispatcher<S>) -> ShipmentId {
        let created = dispatcher.dispatch::<Shipment>(create_command()).unwrap();
        ShipmentId::new(created.aggregate_id)
    }

    #[test]
    fn create_then_load_round_trips_state() {
        let dispatcher = setup();

        let created = dispatcher.dispatch::<Shipment>(create_command()).unwrap();
        assert_eq!(created.state.version(), 1);
        assert_eq!(created.event.sequence_number, 1);
        assert_eq!(created.event.event_type, "shipping.shipment.created");
        assert_eq!(
            created.aggregate_id.to_string(),
            "00000000-0000-0000-0000-000000000001"
        );

        let loaded: Shipment = dispatcher.load(created.aggregate_id).unwrap();
        assert_eq!(loaded, created.state);
        assert_eq!(loaded.recipient_name(), Some("John Diamond"));
        assert_eq!(loaded.delivery_moment(), Some(moment(1)));
    }

    #[test]
    fn full_lifecycle_is_recorded_in_order() {
        let dispatcher = setup();
        let id = create(&dispatcher);

        let updated = dispatcher.dispatch::<Shipment>(update_command(id, 2)).unwrap();
        assert_eq!(updated.state.delivery_moment(), Some(moment(2)));
        assert_eq!(updated.state.version(), 2);

        let canceled = dispatcher.dispatch::<Shipment>(cancel_command(id)).unwrap();
        assert_eq!(canceled.state.status(), ShipmentStatus::Canceled);
        assert_eq!(canceled.state.version(), 3);

        let err = dispatcher
            .dispatch::<Shipment>(update_command(id, 3))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState(_)));

        let stream = dispatcher.store().load_stream(id.0).unwrap();
        assert_eq!(
            stream.iter().map(|e| e.sequence_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(
            stream.iter().map(|e| e.event_type.as_str()).collect::<Vec<_>>(),
            vec![
                "shipping.shipment.created",
                "shipping.shipment.delivery_moment_updated",
                "shipping.shipment.canceled",
            ]
        );

        let reloaded: Shipment = dispatcher.load(id.0).unwrap();
        assert_eq!(reloaded, canceled.state);
        assert_eq!(reloaded.delivery_moment(), Some(moment(2)));
    }

    #[test]
    fn unknown_shipment_is_not_found() {
        let dispatcher = setup();
        let unknown = ShipmentId::new(AggregateId::new());

        let err = dispatcher
            .dispatch::<Shipment>(update_command(unknown, 2))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));

        let err = dispatcher
            .dispatch::<Shipment>(cancel_command(unknown))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));

        assert!(dispatcher.store().load_stream(unknown.0).unwrap().is_empty());
    }

    #[test]
    fn rejected_commands_append_nothing() {
        let dispatcher = setup();
        let id = create(&dispatcher);

        let err = dispatcher
            .dispatch::<Shipment>(ShipmentCommand::UpdateDeliveryMoment(UpdateDeliveryMoment {
                shipment_id: id,
                delivery_moment: None,
            }))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let err = dispatcher
            .dispatch::<Shipment>(ShipmentCommand::CreateShipment(CreateShipment {
                delivery_address: Address::new("1234AB", 3),
                recipient_name: "   ".to_string(),
                delivery_moment: Some(moment(1)),
                product_ids: vec![ProductId::new(AggregateId::new())],
            }))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        assert_eq!(dispatcher.store().load_stream(id.0).unwrap().len(), 1);

        // The rejected create did not consume an identity.
        let next = create(&dispatcher);
        assert_eq!(next.to_string(), "00000000-0000-0000-0000-000000000002");
    }

    #[test]
    fn concurrent_updates_to_one_shipment_all_commit() {
        const WRITERS: u32 = 8;

        let dispatcher = Arc::new(setup());
        let id = create(&dispatcher);

        let handles: Vec<_> = (0..WRITERS)
            .map(|n| {
                let dispatcher = dispatcher.clone();
                thread::spawn(move || {
                    dispatcher
                        .dispatch::<Shipment>(update_command(id, 2 + n))
                        .map(|d| d.event.sequence_number)
                })
            })
            .collect();

        let mut versions: Vec<u64> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        versions.sort_unstable();
        assert_eq!(versions, (2..=u64::from(WRITERS) + 1).collect::<Vec<_>>());

        let loaded: Shipment = dispatcher.load(id.0).unwrap();
        assert_eq!(loaded.version(), u64::from(WRITERS) + 1);
    }

    #[test]
    fn commands_for_different_shipments_do_not_interfere() {
        let dispatcher = Arc::new(setup());
        let ids: Vec<_> = (0..4).map(|_| create(&dispatcher)).collect();

        let handles: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let dispatcher = dispatcher.clone();
                thread::spawn(move || dispatcher.dispatch::<Shipment>(cancel_command(id)))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }

        for id in ids {
            let loaded: Shipment = dispatcher.load(id.0).unwrap();
            assert!(loaded.is_canceled());
            assert_eq!(loaded.version(), 2);
        }
    }

    /// Store wrapper that sneaks one foreign event into the stream right
    /// before the next append, simulating a writer in another process.
    struct InterleavingStore {
        inner: InMemoryEventStore,
        interloper: Mutex<Option<ShipmentEvent>>,
    }

    impl InterleavingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryEventStore::new(),
                interloper: Mutex::new(None),
            }
        }

        fn interleave(&self, event: ShipmentEvent) {
            *self.interloper.lock().unwrap() = Some(event);
        }
    }

    impl EventStore for InterleavingStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            let interloper = self.interloper.lock().unwrap().take();
            if let Some(event) = interloper {
                let sneaked = UncommittedEvent::from_typed(
                    event.shipment_id().0,
                    <Shipment as shipping_core::Aggregate>::AGGREGATE_TYPE,
                    Uuid::new_v4(),
                    &event,
                )?;
                self.inner.append(vec![sneaked], ExpectedVersion::Any)?;
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(
            &self,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }
    }

    fn interleaving_setup(config: DispatcherConfig) -> CommandDispatcher<InterleavingStore> {
        shipping_observability::init_for_tests();
        CommandDispatcher::new(InterleavingStore::new(), SequentialIdGenerator::new())
            .with_config(config)
    }

    #[test]
    fn conflict_is_retried_against_reloaded_state() {
        let dispatcher = interleaving_setup(DispatcherConfig::default());
        let id = create(&dispatcher);

        dispatcher
            .store()
            .interleave(ShipmentEvent::DeliveryMomentUpdated(DeliveryMomentUpdated {
                shipment_id: id,
                delivery_moment: moment(5),
            }));

        let updated = dispatcher.dispatch::<Shipment>(update_command(id, 9)).unwrap();
        assert_eq!(updated.event.sequence_number, 3);
        assert_eq!(updated.state.version(), 3);
        assert_eq!(updated.state.delivery_moment(), Some(moment(9)));

        let loaded: Shipment = dispatcher.load(id.0).unwrap();
        assert_eq!(loaded, updated.state);
    }

    #[test]
    fn conflict_surfaces_when_retries_are_exhausted() {
        let dispatcher =
            interleaving_setup(DispatcherConfig::default().with_max_conflict_retries(0));
        let id = create(&dispatcher);

        dispatcher
            .store()
            .interleave(ShipmentEvent::DeliveryMomentUpdated(DeliveryMomentUpdated {
                shipment_id: id,
                delivery_moment: moment(5),
            }));

        let err = dispatcher
            .dispatch::<Shipment>(update_command(id, 9))
            .unwrap_err();
        assert!(matches!(err, DispatchError::ConcurrencyConflict(_)));

        // Only the interloper landed.
        let loaded: Shipment = dispatcher.load(id.0).unwrap();
        assert_eq!(loaded.version(), 2);
        assert_eq!(loaded.delivery_moment(), Some(moment(5)));
    }

    #[test]
    fn retry_revalidates_against_a_concurrent_cancel() {
        let dispatcher = interleaving_setup(DispatcherConfig::default());
        let id = create(&dispatcher);

        dispatcher
            .store()
            .interleave(ShipmentEvent::ShipmentCanceled(ShipmentCanceled {
                shipment_id: id,
            }));

        let err = dispatcher
            .dispatch::<Shipment>(update_command(id, 9))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState(_)));

        let loaded: Shipment = dispatcher.load(id.0).unwrap();
        assert!(loaded.is_canceled());
        assert_eq!(loaded.delivery_moment(), Some(moment(1)));
        assert_eq!(loaded.version(), 2);
    }

    #[test]
    fn stored_events_carry_recording_time_not_business_time() {
        let dispatcher = setup();
        let before = Utc::now();
        let created = dispatcher.dispatch::<Shipment>(create_command()).unwrap();

        assert!(created.event.recorded_at >= before);
        assert!(created.event.recorded_at - before < Duration::minutes(1));
        assert!(created.event.payload.get("ShipmentCreated").is_some());
    }
}
