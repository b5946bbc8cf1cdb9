use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use repairdesk_core::error::{ensure_max_len, ensure_present};
use repairdesk_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Lifecycle, Money, TenantId,
    UserId,
};
use repairdesk_events::Event;

use crate::intake::{CustomerRef, DeviceDescription};
use crate::repair::RepairId;

const CODE_MAX: usize = 32;
const TECHNICIAN_MAX: usize = 100;
const TEXT_MAX: usize = 1000;

/// Booking identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub AggregateId);

impl BookingId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BookingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Booking status. The shop UI shows the Italian label and stores the numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn code(self) -> u8 {
        match self {
            BookingStatus::Pending => 0,
            BookingStatus::Confirmed => 1,
            BookingStatus::Cancelled => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BookingStatus::Pending => "Da confermare",
            BookingStatus::Confirmed => "Confermata",
            BookingStatus::Cancelled => "Annullata",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_code(code: u8) -> DomainResult<Self> {
        match code {
            0 => Ok(BookingStatus::Pending),
            1 => Ok(BookingStatus::Confirmed),
            2 => Ok(BookingStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown booking status code {other}"
            ))),
        }
    }
}

/// Conversion pointer: both halves are set together or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub repair_id: RepairId,
    pub converted_at: DateTime<Utc>,
}

/// Aggregate root: a scheduled repair intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    id: BookingId,
    tenant_id: Option<TenantId>,
    code: String,
    customer: Option<CustomerRef>,
    device: Option<DeviceDescription>,
    scheduled_at: Option<DateTime<Utc>>,
    technician: Option<String>,
    problem_description: String,
    estimated_price: Option<Money>,
    notes: Option<String>,
    status: BookingStatus,
    conversion: Option<Conversion>,
    lifecycle: Lifecycle,
    version: u64,
}

impl Booking {
    pub const AGGREGATE_TYPE: &'static str = "repairs.booking";

    /// Create an empty, not-yet-scheduled aggregate instance for rehydration.
    pub fn empty(id: BookingId) -> Self {
        Self {
            id,
            tenant_id: None,
            code: String::new(),
            customer: None,
            device: None,
            scheduled_at: None,
            technician: None,
            problem_description: String::new(),
            estimated_price: None,
            notes: None,
            status: BookingStatus::Pending,
            conversion: None,
            lifecycle: Lifecycle::Active,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> BookingId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn customer(&self) -> Option<&CustomerRef> {
        self.customer.as_ref()
    }

    pub fn device(&self) -> Option<&DeviceDescription> {
        self.device.as_ref()
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn technician(&self) -> Option<&str> {
        self.technician.as_deref()
    }

    pub fn problem_description(&self) -> &str {
        &self.problem_description
    }

    pub fn estimated_price(&self) -> Option<Money> {
        self.estimated_price
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn conversion(&self) -> Option<Conversion> {
        self.conversion
    }

    pub fn is_converted(&self) -> bool {
        self.conversion.is_some()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn exists(&self) -> bool {
        self.tenant_id.is_some() && self.lifecycle.is_active()
    }
}

impl AggregateRoot for Booking {
    type Id = BookingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ScheduleBooking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleBooking {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub code: String,
    pub customer: CustomerRef,
    pub device: DeviceDescription,
    pub scheduled_at: DateTime<Utc>,
    pub technician: Option<String>,
    pub problem_description: String,
    pub estimated_price: Option<Money>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RescheduleBooking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleBooking {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub scheduled_at: DateTime<Utc>,
    /// `None` keeps the current technician.
    pub technician: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmBooking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmBooking {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelBooking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBooking {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkBookingConverted. Issued only by the conversion unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkBookingConverted {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub repair_id: RepairId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteBooking (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBooking {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingCommand {
    ScheduleBooking(ScheduleBooking),
    RescheduleBooking(RescheduleBooking),
    ConfirmBooking(ConfirmBooking),
    CancelBooking(CancelBooking),
    MarkBookingConverted(MarkBookingConverted),
    DeleteBooking(DeleteBooking),
}

/// Event: BookingScheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingScheduled {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub code: String,
    pub customer: CustomerRef,
    pub device: DeviceDescription,
    pub scheduled_at: DateTime<Utc>,
    pub technician: Option<String>,
    pub problem_description: String,
    pub estimated_price: Option<Money>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingRescheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRescheduled {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub scheduled_at: DateTime<Utc>,
    pub technician: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmed {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCancelled {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingConverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConverted {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub repair_id: RepairId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDeleted {
    pub tenant_id: TenantId,
    pub booking_id: BookingId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    BookingScheduled(BookingScheduled),
    BookingRescheduled(BookingRescheduled),
    BookingConfirmed(BookingConfirmed),
    BookingCancelled(BookingCancelled),
    BookingConverted(BookingConverted),
    BookingDeleted(BookingDeleted),
}

impl BookingEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            BookingEvent::BookingScheduled(e) => e.tenant_id,
            BookingEvent::BookingRescheduled(e) => e.tenant_id,
            BookingEvent::BookingConfirmed(e) => e.tenant_id,
            BookingEvent::BookingCancelled(e) => e.tenant_id,
            BookingEvent::BookingConverted(e) => e.tenant_id,
            BookingEvent::BookingDeleted(e) => e.tenant_id,
        }
    }
}

impl Event for BookingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::BookingScheduled(_) => "repairs.booking.scheduled",
            BookingEvent::BookingRescheduled(_) => "repairs.booking.rescheduled",
            BookingEvent::BookingConfirmed(_) => "repairs.booking.confirmed",
            BookingEvent::BookingCancelled(_) => "repairs.booking.cancelled",
            BookingEvent::BookingConverted(_) => "repairs.booking.converted",
            BookingEvent::BookingDeleted(_) => "repairs.booking.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BookingEvent::BookingScheduled(e) => e.occurred_at,
            BookingEvent::BookingRescheduled(e) => e.occurred_at,
            BookingEvent::BookingConfirmed(e) => e.occurred_at,
            BookingEvent::BookingCancelled(e) => e.occurred_at,
            BookingEvent::BookingConverted(e) => e.occurred_at,
            BookingEvent::BookingDeleted(e) => e.occurred_at,
        }
    }

    fn actor(&self) -> UserId {
        match self {
            BookingEvent::BookingScheduled(e) => e.actor,
            BookingEvent::BookingRescheduled(e) => e.actor,
            BookingEvent::BookingConfirmed(e) => e.actor,
            BookingEvent::BookingCancelled(e) => e.actor,
            BookingEvent::BookingConverted(e) => e.actor,
            BookingEvent::BookingDeleted(e) => e.actor,
        }
    }
}

impl Aggregate for Booking {
    type Command = BookingCommand;
    type Event = BookingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BookingEvent::BookingScheduled(e) => {
                self.id = e.booking_id;
                self.tenant_id = Some(e.tenant_id);
                self.code = e.code.clone();
                self.customer = Some(e.customer.clone());
                self.device = Some(e.device.clone());
                self.scheduled_at = Some(e.scheduled_at);
                self.technician = e.technician.clone();
                self.problem_description = e.problem_description.clone();
                self.estimated_price = e.estimated_price;
                self.notes = e.notes.clone();
                self.status = BookingStatus::Pending;
                self.lifecycle = Lifecycle::Active;
            }
            BookingEvent::BookingRescheduled(e) => {
                self.scheduled_at = Some(e.scheduled_at);
                if e.technician.is_some() {
                    self.technician = e.technician.clone();
                }
            }
            BookingEvent::BookingConfirmed(_) => self.status = BookingStatus::Confirmed,
            BookingEvent::BookingCancelled(_) => self.status = BookingStatus::Cancelled,
            BookingEvent::BookingConverted(e) => {
                self.conversion = Some(Conversion {
                    repair_id: e.repair_id,
                    converted_at: e.occurred_at,
                });
            }
            BookingEvent::BookingDeleted(_) => self.lifecycle = Lifecycle::Deleted,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BookingCommand::ScheduleBooking(cmd) => self.handle_schedule(cmd),
            BookingCommand::RescheduleBooking(cmd) => {
                self.ensure_open(cmd.tenant_id, cmd.booking_id, "rescheduled")?;
                if let Some(t) = &cmd.technician {
                    ensure_present("technician", t, TECHNICIAN_MAX)?;
                }
                Ok(vec![BookingEvent::BookingRescheduled(BookingRescheduled {
                    tenant_id: cmd.tenant_id,
                    booking_id: cmd.booking_id,
                    scheduled_at: cmd.scheduled_at,
                    technician: cmd.technician.as_ref().map(|t| t.trim().to_string()),
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
            BookingCommand::ConfirmBooking(cmd) => {
                self.ensure_open(cmd.tenant_id, cmd.booking_id, BookingStatus::Confirmed.as_str())?;
                if self.status != BookingStatus::Pending {
                    return Err(DomainError::invalid_transition(
                        self.status.as_str(),
                        BookingStatus::Confirmed.as_str(),
                    ));
                }
                Ok(vec![BookingEvent::BookingConfirmed(BookingConfirmed {
                    tenant_id: cmd.tenant_id,
                    booking_id: cmd.booking_id,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
            BookingCommand::CancelBooking(cmd) => {
                self.ensure_open(cmd.tenant_id, cmd.booking_id, BookingStatus::Cancelled.as_str())?;
                if let Some(reason) = &cmd.reason {
                    ensure_max_len("reason", reason, TEXT_MAX)?;
                }
                Ok(vec![BookingEvent::BookingCancelled(BookingCancelled {
                    tenant_id: cmd.tenant_id,
                    booking_id: cmd.booking_id,
                    reason: cmd.reason.clone(),
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
            BookingCommand::MarkBookingConverted(cmd) => {
                self.ensure_open(cmd.tenant_id, cmd.booking_id, "converted")?;
                Ok(vec![BookingEvent::BookingConverted(BookingConverted {
                    tenant_id: cmd.tenant_id,
                    booking_id: cmd.booking_id,
                    repair_id: cmd.repair_id,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
            BookingCommand::DeleteBooking(cmd) => {
                self.ensure_live(cmd.tenant_id, cmd.booking_id)?;
                Ok(vec![BookingEvent::BookingDeleted(BookingDeleted {
                    tenant_id: cmd.tenant_id,
                    booking_id: cmd.booking_id,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Booking {
    pub(crate) fn ensure_live(&self, tenant_id: TenantId, booking_id: BookingId) -> DomainResult<()> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != booking_id {
            return Err(DomainError::invariant("booking_id mismatch"));
        }
        Ok(())
    }

    /// Live, not yet converted and not cancelled.
    pub(crate) fn ensure_open(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
        requested: &str,
    ) -> DomainResult<()> {
        self.ensure_live(tenant_id, booking_id)?;
        if let Some(conversion) = self.conversion {
            return Err(DomainError::already_converted(conversion.repair_id.0));
        }
        if self.status == BookingStatus::Cancelled {
            return Err(DomainError::invalid_transition(self.status.as_str(), requested));
        }
        Ok(())
    }

    fn handle_schedule(&self, cmd: &ScheduleBooking) -> DomainResult<Vec<BookingEvent>> {
        if self.tenant_id.is_some() {
            return Err(DomainError::conflict("booking already exists"));
        }
        ensure_present("code", &cmd.code, CODE_MAX)?;
        cmd.customer.validate()?;
        cmd.device.validate()?;
        ensure_present("problem_description", &cmd.problem_description, TEXT_MAX)?;
        if let Some(t) = &cmd.technician {
            ensure_present("technician", t, TECHNICIAN_MAX)?;
        }
        if let Some(price) = cmd.estimated_price {
            Money::price(price.amount())?;
        }
        if let Some(notes) = &cmd.notes {
            ensure_max_len("notes", notes, TEXT_MAX)?;
        }

        Ok(vec![BookingEvent::BookingScheduled(BookingScheduled {
            tenant_id: cmd.tenant_id,
            booking_id: cmd.booking_id,
            code: cmd.code.trim().to_string(),
            customer: cmd.customer.clone(),
            device: cmd.device.clone(),
            scheduled_at: cmd.scheduled_at,
            technician: cmd.technician.as_ref().map(|t| t.trim().to_string()),
            problem_description: cmd.problem_description.clone(),
            estimated_price: cmd.estimated_price,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}
