use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use repairdesk_core::{Aggregate, AggregateId, ExpectedVersion, TenantId, UserId};
use repairdesk_events::{EventBus, EventEnvelope};
use repairdesk_parties::PartyKind;
use repairdesk_repairs::{
    Booking, BookingCommand, BookingId, CancelBooking, ChangeRepairStatus, ConfirmBooking,
    ConversionOverrides, DeleteBooking, Repair, RepairCommand, RepairId, RepairSummary,
    RescheduleBooking, ScheduleBooking, plan_conversion,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, UnitOfWork};
use crate::event_store::EventStore;

use super::id_in_use;
use super::parties::require_party;

/// Bookings and the repairs they turn into.
#[derive(Debug)]
pub struct BookingDesk<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> Clone for BookingDesk<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<S, B> BookingDesk<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, booking_id = %cmd.booking_id))]
    pub fn schedule(&self, cmd: ScheduleBooking) -> Result<Booking, DispatchError> {
        if let Some(customer_id) = cmd.customer.registered_id() {
            require_party(&self.dispatcher, cmd.tenant_id, customer_id, PartyKind::Customer)?;
        }
        let (tenant_id, booking_id) = (cmd.tenant_id, cmd.booking_id);
        let booking = self
            .run(tenant_id, booking_id, BookingCommand::ScheduleBooking(cmd))
            .map_err(id_in_use)?;
        info!(code = booking.code(), "booking scheduled");
        Ok(booking)
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, booking_id = %cmd.booking_id))]
    pub fn reschedule(&self, cmd: RescheduleBooking) -> Result<Booking, DispatchError> {
        let (tenant_id, booking_id) = (cmd.tenant_id, cmd.booking_id);
        self.run(tenant_id, booking_id, BookingCommand::RescheduleBooking(cmd))
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, booking_id = %cmd.booking_id))]
    pub fn confirm(&self, cmd: ConfirmBooking) -> Result<Booking, DispatchError> {
        let (tenant_id, booking_id) = (cmd.tenant_id, cmd.booking_id);
        self.run(tenant_id, booking_id, BookingCommand::ConfirmBooking(cmd))
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, booking_id = %cmd.booking_id))]
    pub fn cancel(&self, cmd: CancelBooking) -> Result<Booking, DispatchError> {
        let (tenant_id, booking_id) = (cmd.tenant_id, cmd.booking_id);
        let booking = self.run(tenant_id, booking_id, BookingCommand::CancelBooking(cmd))?;
        info!("booking cancelled");
        Ok(booking)
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, booking_id = %cmd.booking_id))]
    pub fn delete(&self, cmd: DeleteBooking) -> Result<(), DispatchError> {
        let (tenant_id, booking_id) = (cmd.tenant_id, cmd.booking_id);
        self.run(tenant_id, booking_id, BookingCommand::DeleteBooking(cmd))?;
        Ok(())
    }

    /// Active booking, or `NotFound`.
    pub fn get(&self, tenant_id: TenantId, booking_id: BookingId) -> Result<Booking, DispatchError> {
        let loaded = self
            .dispatcher
            .load(tenant_id, booking_id.0, Booking::AGGREGATE_TYPE, |id| Booking::empty(BookingId::new(id)))?;
        if !loaded.aggregate.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(loaded.aggregate)
    }

    /// Turn a booking into a repair ticket, exactly once.
    ///
    /// The new repair stream (expected version 0) and the booking's conversion
    /// marker (expected loaded version) are appended as one unit of work. A
    /// concurrent conversion loses the race on the booking stream and, after a
    /// fresh read, is answered with `AlreadyConverted`.
    #[instrument(skip(self, overrides), fields(tenant_id = %tenant_id, booking_id = %booking_id))]
    pub fn convert_booking(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
        overrides: &ConversionOverrides,
        actor: UserId,
    ) -> Result<RepairSummary, DispatchError> {
        let summary = self.dispatcher.with_retry(Booking::AGGREGATE_TYPE, || {
            let loaded = self
                .dispatcher
                .load(tenant_id, booking_id.0, Booking::AGGREGATE_TYPE, |id| Booking::empty(BookingId::new(id)))?;
            let booking = loaded.aggregate;

            let repair_id = RepairId::new(AggregateId::new());
            let plan = plan_conversion(&booking, tenant_id, booking_id, repair_id, overrides, actor, Utc::now())?;
            if let Some(customer_id) = plan.open_repair.customer.registered_id() {
                require_party(&self.dispatcher, tenant_id, customer_id, PartyKind::Customer)?;
            }

            let mut repair = Repair::empty(repair_id);
            let repair_events = repair.handle(&RepairCommand::OpenRepair(plan.open_repair))?;
            let booking_events = booking.handle(&BookingCommand::MarkBookingConverted(plan.mark_converted))?;

            let mut uow = UnitOfWork::new();
            uow.push(tenant_id, repair_id.0, Repair::AGGREGATE_TYPE, ExpectedVersion::Exact(0), &repair_events)?;
            uow.push(tenant_id, booking_id.0, Booking::AGGREGATE_TYPE, loaded.expected, &booking_events)?;
            self.dispatcher.commit(uow)?;

            for ev in &repair_events {
                repair.apply(ev);
            }
            RepairSummary::of(&repair, booking_id)
                .ok_or_else(|| DispatchError::Invariant("opened repair has no intake".to_string()))
        })?;

        info!(repair_id = %summary.repair_id, repair_code = %summary.repair_code, "booking converted");
        Ok(summary)
    }

    pub fn get_repair(&self, tenant_id: TenantId, repair_id: RepairId) -> Result<Repair, DispatchError> {
        let loaded = self
            .dispatcher
            .load(tenant_id, repair_id.0, Repair::AGGREGATE_TYPE, |id| Repair::empty(RepairId::new(id)))?;
        if !loaded.aggregate.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(loaded.aggregate)
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, repair_id = %cmd.repair_id))]
    pub fn change_repair_status(&self, cmd: ChangeRepairStatus) -> Result<Repair, DispatchError> {
        let (tenant_id, repair_id) = (cmd.tenant_id, cmd.repair_id);
        let committed = self.dispatcher.dispatch(
            tenant_id,
            repair_id.0,
            Repair::AGGREGATE_TYPE,
            &RepairCommand::ChangeRepairStatus(cmd),
            |id| Repair::empty(RepairId::new(id)),
        )?;
        info!(status = %committed.aggregate.status(), "repair status changed");
        Ok(committed.aggregate)
    }

    fn run(&self, tenant_id: TenantId, booking_id: BookingId, cmd: BookingCommand) -> Result<Booking, DispatchError> {
        let committed = self.dispatcher.dispatch(
            tenant_id,
            booking_id.0,
            Booking::AGGREGATE_TYPE,
            &cmd,
            |id| Booking::empty(BookingId::new(id)),
        )?;
        Ok(committed.aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use repairdesk_core::Money;
    use repairdesk_events::InMemoryEventBus;
    use repairdesk_inventory::DeviceType;
    use repairdesk_parties::{DeleteParty, PartyId, RegisterParty};
    use repairdesk_repairs::{BookingStatus, CustomerRef, DeviceDescription, RepairStatus};
    use rust_decimal::Decimal;

    use crate::event_store::InMemoryEventStore;
    use crate::services::PartyDirectory;

    type Desk = BookingDesk<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    type Parties = PartyDirectory<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn desk() -> Desk {
        desk_with_parties().0
    }

    fn desk_with_parties() -> (Desk, Parties) {
        let dispatcher = Arc::new(CommandDispatcher::new(
            InMemoryEventStore::new(),
            Arc::new(InMemoryEventBus::new()),
        ));
        (BookingDesk::new(dispatcher.clone()), PartyDirectory::new(dispatcher))
    }

    fn customer(parties: &Parties, tenant_id: TenantId) -> PartyId {
        let party_id = PartyId::new(AggregateId::new());
        parties
            .register(RegisterParty {
                tenant_id,
                party_id,
                kind: PartyKind::Customer,
                name: "Paolo Neri".to_string(),
                contact: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap();
        party_id
    }

    fn schedule_cmd(tenant_id: TenantId, customer: CustomerRef) -> ScheduleBooking {
        ScheduleBooking {
            tenant_id,
            booking_id: BookingId::new(AggregateId::new()),
            code: "B-0042".to_string(),
            customer,
            device: DeviceDescription {
                device_type: DeviceType::Smartphone,
                brand: "Samsung".to_string(),
                model: "Galaxy S21".to_string(),
                imei: None,
                serial_number: None,
                color: None,
            },
            scheduled_at: Utc::now() + Duration::days(2),
            technician: Some("Marco".to_string()),
            problem_description: "cracked screen".to_string(),
            estimated_price: Some(Money::new(Decimal::new(15000, 2))),
            notes: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        }
    }

    fn walk_in() -> CustomerRef {
        CustomerRef::WalkIn {
            name: "Anna Rossi".to_string(),
            phone: Some("+39 333 0000000".to_string()),
            email: None,
        }
    }

    #[test]
    fn registered_customer_must_exist() {
        let desk = desk();
        let tenant_id = TenantId::new();
        let customer = CustomerRef::Registered {
            customer_id: PartyId::new(AggregateId::new()),
        };
        assert!(matches!(
            desk.schedule(schedule_cmd(tenant_id, customer)),
            Err(DispatchError::NotFound)
        ));
    }

    #[test]
    fn conversion_opens_a_received_repair() {
        let desk = desk();
        let tenant_id = TenantId::new();
        let booking = desk.schedule(schedule_cmd(tenant_id, walk_in())).unwrap();
        let booking_id = booking.id_typed();

        let summary = desk
            .convert_booking(tenant_id, booking_id, &ConversionOverrides::default(), UserId::new())
            .unwrap();
        assert_eq!(summary.status, RepairStatus::Received);
        assert_eq!(summary.estimated_price, Some(Money::new(Decimal::new(15000, 2))));
        assert_eq!(summary.brand, "Samsung");

        let booking = desk.get(tenant_id, booking_id).unwrap();
        assert!(booking.is_converted());
        assert_eq!(booking.conversion().map(|c| c.repair_id), Some(summary.repair_id));

        let repair = desk.get_repair(tenant_id, summary.repair_id).unwrap();
        assert_eq!(repair.intake().and_then(|i| i.source_booking), Some(booking_id));
    }

    #[test]
    fn cancelled_booking_does_not_convert() {
        let desk = desk();
        let tenant_id = TenantId::new();
        let booking_id = desk.schedule(schedule_cmd(tenant_id, walk_in())).unwrap().id_typed();
        let cancelled = desk
            .cancel(CancelBooking {
                tenant_id,
                booking_id,
                reason: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(cancelled.status(), BookingStatus::Cancelled);

        let err = desk
            .convert_booking(tenant_id, booking_id, &ConversionOverrides::default(), UserId::new())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidStateTransition { .. }));
    }

    #[test]
    fn repair_status_follows_the_workflow() {
        let desk = desk();
        let tenant_id = TenantId::new();
        let booking_id = desk.schedule(schedule_cmd(tenant_id, walk_in())).unwrap().id_typed();
        let summary = desk
            .convert_booking(tenant_id, booking_id, &ConversionOverrides::default(), UserId::new())
            .unwrap();

        let change = |target| ChangeRepairStatus {
            tenant_id,
            repair_id: summary.repair_id,
            target,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        };
        assert!(matches!(
            desk.change_repair_status(change(RepairStatus::Delivered)),
            Err(DispatchError::InvalidStateTransition { .. })
        ));
        let repair = desk.change_repair_status(change(RepairStatus::InProgress)).unwrap();
        assert_eq!(repair.status(), RepairStatus::InProgress);
    }

    #[test]
    fn customer_deleted_after_scheduling_blocks_conversion() {
        let (desk, parties) = desk_with_parties();
        let tenant_id = TenantId::new();
        let customer_id = customer(&parties, tenant_id);
        let booking_id = desk
            .schedule(schedule_cmd(tenant_id, CustomerRef::Registered { customer_id }))
            .unwrap()
            .id_typed();

        parties
            .delete(DeleteParty {
                tenant_id,
                party_id: customer_id,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap();

        assert!(matches!(
            desk.convert_booking(tenant_id, booking_id, &ConversionOverrides::default(), UserId::new()),
            Err(DispatchError::NotFound)
        ));
        assert!(!desk.get(tenant_id, booking_id).unwrap().is_converted());
    }

    #[test]
    fn ids_of_other_record_types_do_not_resolve() {
        let (desk, parties) = desk_with_parties();
        let tenant_id = TenantId::new();
        let party_id = customer(&parties, tenant_id);

        assert!(matches!(desk.get(tenant_id, BookingId::new(party_id.0)), Err(DispatchError::NotFound)));
        assert!(matches!(desk.get_repair(tenant_id, RepairId::new(party_id.0)), Err(DispatchError::NotFound)));
        assert!(matches!(
            desk.convert_booking(tenant_id, BookingId::new(party_id.0), &ConversionOverrides::default(), UserId::new()),
            Err(DispatchError::NotFound)
        ));

        let mut taken = schedule_cmd(tenant_id, walk_in());
        taken.booking_id = BookingId::new(party_id.0);
        assert!(matches!(desk.schedule(taken), Err(DispatchError::Conflict(_))));
    }
}
