use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use repairdesk_core::{Aggregate, TenantId};
use repairdesk_events::{EventBus, EventEnvelope};
use repairdesk_inventory::{
    ChangeDeviceStatus, ClaimImei, DeleteDevice, DeviceCommand, DeviceEvent, DeviceUnit,
    DeviceUnitId, DeviceView, ImeiClaim, InventoryMovement, LoanDevice, RegisterDevice,
    ReturnDevice, SellDevice, TransferDevice, UpdateDeviceDetails,
};
use repairdesk_parties::PartyKind;

use crate::command_dispatcher::{
    CommandDispatcher, Committed, DispatchError, Loaded, UnitOfWork, decode, ensure_stream_type,
};
use crate::event_store::{EventStore, StoredEvent};

use super::id_in_use;
use super::parties::require_party;

/// Result of a status-changing ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub unit: DeviceView,
    pub movement: InventoryMovement,
}

/// Device inventory ledger: every status change of a unit goes through here.
///
/// Each mutating operation appends exactly one device event, which is also the
/// unit's movement record. Registration additionally claims the IMEI in the
/// same unit of work. The ledger stamps every command with the current time,
/// so timestamp order and sequence order of a unit's movements agree.
#[derive(Debug)]
pub struct InventoryLedger<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> Clone for InventoryLedger<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<S, B> InventoryLedger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    /// Register a new unit and claim its IMEI for the tenant, atomically.
    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, unit_id = %cmd.unit_id))]
    pub fn register(&self, mut cmd: RegisterDevice) -> Result<MovementRecorded, DispatchError> {
        cmd.occurred_at = Utc::now();
        let tenant_id = cmd.tenant_id;
        let unit_id = cmd.unit_id;
        let claim_id = cmd.imei.claim_id(tenant_id);

        let recorded = self.dispatcher.with_retry(DeviceUnit::AGGREGATE_TYPE, || {
            if let Some(supplier_id) = cmd.details.supplier_id {
                require_party(&self.dispatcher, tenant_id, supplier_id, PartyKind::Supplier)?;
            }

            let claim = self
                .dispatcher
                .load(tenant_id, claim_id, ImeiClaim::AGGREGATE_TYPE, ImeiClaim::empty)?;
            let claim_events = claim.aggregate.handle(&ClaimImei {
                tenant_id,
                imei: cmd.imei.clone(),
                unit_id,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            })?;

            let unit = self.load_unit(tenant_id, unit_id).map_err(id_in_use)?;
            let mut aggregate = unit.aggregate;
            let events = aggregate.handle(&DeviceCommand::RegisterDevice(cmd.clone()))?;

            let mut uow = UnitOfWork::new();
            uow.push(tenant_id, unit_id.0, DeviceUnit::AGGREGATE_TYPE, unit.expected, &events)?;
            uow.push(tenant_id, claim_id, ImeiClaim::AGGREGATE_TYPE, claim.expected, &claim_events)?;
            let stored = self.dispatcher.commit(uow)?;

            for ev in &events {
                aggregate.apply(ev);
            }
            movement_recorded(Committed {
                aggregate,
                events,
                stored,
            })
        })?;

        info!(imei = %cmd.imei, status = %recorded.unit.status, "device registered");
        Ok(recorded)
    }

    /// Update descriptive fields. The IMEI can be restated but never changed.
    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, unit_id = %cmd.unit_id))]
    pub fn update(&self, mut cmd: UpdateDeviceDetails) -> Result<DeviceView, DispatchError> {
        cmd.occurred_at = Utc::now();
        if let Some(supplier_id) = cmd.details.supplier_id {
            require_party(&self.dispatcher, cmd.tenant_id, supplier_id, PartyKind::Supplier)?;
        }
        let (tenant_id, unit_id) = (cmd.tenant_id, cmd.unit_id);
        let committed = self.run(tenant_id, unit_id, DeviceCommand::UpdateDeviceDetails(cmd))?;
        view_of(&committed.aggregate)
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, unit_id = %cmd.unit_id))]
    pub fn loan(&self, mut cmd: LoanDevice) -> Result<MovementRecorded, DispatchError> {
        cmd.occurred_at = Utc::now();
        require_party(&self.dispatcher, cmd.tenant_id, cmd.customer_id, PartyKind::Customer)?;
        let (tenant_id, unit_id) = (cmd.tenant_id, cmd.unit_id);
        self.movement(tenant_id, unit_id, DeviceCommand::LoanDevice(cmd))
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, unit_id = %cmd.unit_id))]
    pub fn return_device(&self, mut cmd: ReturnDevice) -> Result<MovementRecorded, DispatchError> {
        cmd.occurred_at = Utc::now();
        let (tenant_id, unit_id) = (cmd.tenant_id, cmd.unit_id);
        self.movement(tenant_id, unit_id, DeviceCommand::ReturnDevice(cmd))
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, unit_id = %cmd.unit_id))]
    pub fn sell(&self, mut cmd: SellDevice) -> Result<MovementRecorded, DispatchError> {
        cmd.occurred_at = Utc::now();
        if let Some(customer_id) = cmd.customer_id {
            require_party(&self.dispatcher, cmd.tenant_id, customer_id, PartyKind::Customer)?;
        }
        let (tenant_id, unit_id) = (cmd.tenant_id, cmd.unit_id);
        self.movement(tenant_id, unit_id, DeviceCommand::SellDevice(cmd))
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, unit_id = %cmd.unit_id))]
    pub fn change_status(&self, mut cmd: ChangeDeviceStatus) -> Result<MovementRecorded, DispatchError> {
        cmd.occurred_at = Utc::now();
        let (tenant_id, unit_id) = (cmd.tenant_id, cmd.unit_id);
        self.movement(tenant_id, unit_id, DeviceCommand::ChangeDeviceStatus(cmd))
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, unit_id = %cmd.unit_id))]
    pub fn transfer(&self, mut cmd: TransferDevice) -> Result<MovementRecorded, DispatchError> {
        cmd.occurred_at = Utc::now();
        let (tenant_id, unit_id) = (cmd.tenant_id, cmd.unit_id);
        self.movement(tenant_id, unit_id, DeviceCommand::TransferDevice(cmd))
    }

    /// Soft delete. Loaned units must come back first.
    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, unit_id = %cmd.unit_id))]
    pub fn delete(&self, mut cmd: DeleteDevice) -> Result<(), DispatchError> {
        cmd.occurred_at = Utc::now();
        let (tenant_id, unit_id) = (cmd.tenant_id, cmd.unit_id);
        self.run(tenant_id, unit_id, DeviceCommand::DeleteDevice(cmd))?;
        info!("device deleted");
        Ok(())
    }

    /// Current state of an active unit.
    pub fn get_device(&self, tenant_id: TenantId, unit_id: DeviceUnitId) -> Result<DeviceView, DispatchError> {
        let loaded = self.load_unit(tenant_id, unit_id)?;
        if !loaded.aggregate.exists() {
            return Err(DispatchError::NotFound);
        }
        view_of(&loaded.aggregate)
    }

    /// Movement ledger of a unit, oldest first. Soft-deleted units keep their history.
    pub fn movement_history(
        &self,
        tenant_id: TenantId,
        unit_id: DeviceUnitId,
    ) -> Result<Vec<InventoryMovement>, DispatchError> {
        let stream = self.dispatcher.store().load_stream(tenant_id, unit_id.0)?;
        if stream.is_empty() {
            return Err(DispatchError::NotFound);
        }
        ensure_stream_type(unit_id.0, DeviceUnit::AGGREGATE_TYPE, &stream)?;
        let mut movements = Vec::new();
        for stored in &stream {
            let ev: DeviceEvent = decode(stored)?;
            movements.extend(movement_of(stored, &ev));
        }
        Ok(movements)
    }

    fn load_unit(
        &self,
        tenant_id: TenantId,
        unit_id: DeviceUnitId,
    ) -> Result<Loaded<DeviceUnit>, DispatchError> {
        self.dispatcher
            .load(tenant_id, unit_id.0, DeviceUnit::AGGREGATE_TYPE, |id| {
                DeviceUnit::empty(DeviceUnitId::new(id))
            })
    }

    fn run(
        &self,
        tenant_id: TenantId,
        unit_id: DeviceUnitId,
        cmd: DeviceCommand,
    ) -> Result<Committed<DeviceUnit>, DispatchError> {
        self.dispatcher.dispatch(
            tenant_id,
            unit_id.0,
            DeviceUnit::AGGREGATE_TYPE,
            &cmd,
            |id| DeviceUnit::empty(DeviceUnitId::new(id)),
        )
    }

    fn movement(
        &self,
        tenant_id: TenantId,
        unit_id: DeviceUnitId,
        cmd: DeviceCommand,
    ) -> Result<MovementRecorded, DispatchError> {
        let recorded = movement_recorded(self.run(tenant_id, unit_id, cmd)?)?;
        info!(
            movement = recorded.movement.movement_type.as_str(),
            from = ?recorded.movement.from_status,
            to = %recorded.movement.to_status,
            "device moved"
        );
        Ok(recorded)
    }
}

fn view_of(unit: &DeviceUnit) -> Result<DeviceView, DispatchError> {
    unit.view()
        .ok_or_else(|| DispatchError::Invariant("device stream has no registration".to_string()))
}

fn movement_of(stored: &StoredEvent, ev: &DeviceEvent) -> Option<InventoryMovement> {
    InventoryMovement::from_event(stored.event_id, stored.sequence_number, ev)
}

/// Pair the updated unit with the movement its (single) committed event records.
fn movement_recorded(committed: Committed<DeviceUnit>) -> Result<MovementRecorded, DispatchError> {
    let unit_id = committed.aggregate.id_typed();
    let movement = committed
        .stored
        .iter()
        .filter(|s| s.aggregate_id == unit_id.0)
        .zip(&committed.events)
        .find_map(|(stored, ev)| movement_of(stored, ev))
        .ok_or_else(|| DispatchError::Invariant("operation recorded no movement".to_string()))?;

    Ok(MovementRecorded {
        unit: view_of(&committed.aggregate)?,
        movement,
    })
}
