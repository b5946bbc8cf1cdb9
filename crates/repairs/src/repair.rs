use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use repairdesk_core::error::{ensure_max_len, ensure_present};
use repairdesk_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Money, TenantId, UserId,
};
use repairdesk_events::Event;

use crate::booking::BookingId;
use crate::intake::{CustomerRef, DeviceDescription};

const CODE_MAX: usize = 32;
pub(crate) const TEXT_MAX: usize = 1000;
const SHORT_MAX: usize = 64;
/// Room for the booking notes plus one line added at conversion.
const NOTES_MAX: usize = 2 * TEXT_MAX + 1;

/// Repair identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepairId(pub AggregateId);

impl RepairId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RepairId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Received,
    InProgress,
    Completed,
    Delivered,
    Cancelled,
}

impl RepairStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairStatus::Received => "received",
            RepairStatus::InProgress => "in_progress",
            RepairStatus::Completed => "completed",
            RepairStatus::Delivered => "delivered",
            RepairStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_become(self, next: RepairStatus) -> bool {
        use RepairStatus::*;
        match self {
            Received => matches!(next, InProgress | Cancelled),
            InProgress => matches!(next, Completed | Cancelled),
            Completed => matches!(next, Delivered),
            Delivered | Cancelled => false,
        }
    }
}

impl core::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: a repair ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    id: RepairId,
    tenant_id: Option<TenantId>,
    opened: Option<RepairOpened>,
    status: RepairStatus,
    version: u64,
}

impl Repair {
    pub const AGGREGATE_TYPE: &'static str = "repairs.repair";

    pub fn empty(id: RepairId) -> Self {
        Self {
            id,
            tenant_id: None,
            opened: None,
            status: RepairStatus::Received,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> RepairId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn exists(&self) -> bool {
        self.opened.is_some()
    }

    /// Intake data as recorded when the ticket was opened.
    pub fn intake(&self) -> Option<&RepairOpened> {
        self.opened.as_ref()
    }

    pub fn status(&self) -> RepairStatus {
        self.status
    }
}

impl AggregateRoot for Repair {
    type Id = RepairId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenRepair. Opened either at the counter or from a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRepair {
    pub tenant_id: TenantId,
    pub repair_id: RepairId,
    pub code: String,
    pub source_booking: Option<BookingId>,
    pub customer: CustomerRef,
    pub device: DeviceDescription,
    pub fault_description: String,
    pub estimated_price: Option<Money>,
    pub technician: Option<String>,
    pub notes: Option<String>,
    pub unlock_code: Option<String>,
    pub courtesy_phone: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeRepairStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRepairStatus {
    pub tenant_id: TenantId,
    pub repair_id: RepairId,
    pub target: RepairStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairCommand {
    OpenRepair(OpenRepair),
    ChangeRepairStatus(ChangeRepairStatus),
}

/// Event: RepairOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOpened {
    pub tenant_id: TenantId,
    pub repair_id: RepairId,
    pub code: String,
    pub source_booking: Option<BookingId>,
    pub customer: CustomerRef,
    pub device: DeviceDescription,
    pub fault_description: String,
    pub estimated_price: Option<Money>,
    pub technician: Option<String>,
    pub notes: Option<String>,
    pub unlock_code: Option<String>,
    pub courtesy_phone: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RepairStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairStatusChanged {
    pub tenant_id: TenantId,
    pub repair_id: RepairId,
    pub from: RepairStatus,
    pub to: RepairStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairEvent {
    RepairOpened(RepairOpened),
    RepairStatusChanged(RepairStatusChanged),
}

impl RepairEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            RepairEvent::RepairOpened(e) => e.tenant_id,
            RepairEvent::RepairStatusChanged(e) => e.tenant_id,
        }
    }
}

impl Event for RepairEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RepairEvent::RepairOpened(_) => "repairs.repair.opened",
            RepairEvent::RepairStatusChanged(_) => "repairs.repair.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RepairEvent::RepairOpened(e) => e.occurred_at,
            RepairEvent::RepairStatusChanged(e) => e.occurred_at,
        }
    }

    fn actor(&self) -> UserId {
        match self {
            RepairEvent::RepairOpened(e) => e.actor,
            RepairEvent::RepairStatusChanged(e) => e.actor,
        }
    }
}

impl Aggregate for Repair {
    type Command = RepairCommand;
    type Event = RepairEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RepairEvent::RepairOpened(e) => {
                self.id = e.repair_id;
                self.tenant_id = Some(e.tenant_id);
                self.status = RepairStatus::Received;
                self.opened = Some(e.clone());
            }
            RepairEvent::RepairStatusChanged(e) => self.status = e.to,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RepairCommand::OpenRepair(cmd) => self.handle_open(cmd),
            RepairCommand::ChangeRepairStatus(cmd) => {
                if !self.exists() {
                    return Err(DomainError::not_found());
                }
                if self.tenant_id != Some(cmd.tenant_id) {
                    return Err(DomainError::invariant("tenant mismatch"));
                }
                if !self.status.can_become(cmd.target) {
                    return Err(DomainError::invalid_transition(
                        self.status.as_str(),
                        cmd.target.as_str(),
                    ));
                }
                Ok(vec![RepairEvent::RepairStatusChanged(RepairStatusChanged {
                    tenant_id: cmd.tenant_id,
                    repair_id: cmd.repair_id,
                    from: self.status,
                    to: cmd.target,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Repair {
    fn handle_open(&self, cmd: &OpenRepair) -> DomainResult<Vec<RepairEvent>> {
        if self.exists() {
            return Err(DomainError::conflict("repair already exists"));
        }
        ensure_present("code", &cmd.code, CODE_MAX)?;
        cmd.customer.validate()?;
        cmd.device.validate()?;
        ensure_present("fault_description", &cmd.fault_description, TEXT_MAX)?;
        if let Some(price) = cmd.estimated_price {
            Money::price(price.amount())?;
        }
        if let Some(notes) = &cmd.notes {
            ensure_max_len("notes", notes, NOTES_MAX)?;
        }
        for (field, value) in [
            ("technician", &cmd.technician),
            ("unlock_code", &cmd.unlock_code),
            ("courtesy_phone", &cmd.courtesy_phone),
        ] {
            if let Some(v) = value {
                ensure_max_len(field, v, SHORT_MAX)?;
            }
        }

        Ok(vec![RepairEvent::RepairOpened(RepairOpened {
            tenant_id: cmd.tenant_id,
            repair_id: cmd.repair_id,
            code: cmd.code.clone(),
            source_booking: cmd.source_booking,
            customer: cmd.customer.clone(),
            device: cmd.device.clone(),
            fault_description: cmd.fault_description.clone(),
            estimated_price: cmd.estimated_price,
            technician: cmd.technician.clone(),
            notes: cmd.notes.clone(),
            unlock_code: cmd.unlock_code.clone(),
            courtesy_phone: cmd.courtesy_phone.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_status_graph() {
        use RepairStatus::*;
        assert!(Received.can_become(InProgress));
        assert!(InProgress.can_become(Completed));
        assert!(Completed.can_become(Delivered));
        assert!(!Received.can_become(Delivered));
        assert!(!Delivered.can_become(Cancelled));
        assert!(!Cancelled.can_become(Received));
    }

    #[test]
    fn status_change_on_missing_repair_is_not_found() {
        let repair = Repair::empty(RepairId::new(AggregateId::new()));
        let cmd = RepairCommand::ChangeRepairStatus(ChangeRepairStatus {
            tenant_id: TenantId::new(),
            repair_id: repair.id_typed(),
            target: RepairStatus::InProgress,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        assert_eq!(repair.handle(&cmd), Err(DomainError::NotFound));
    }
}
