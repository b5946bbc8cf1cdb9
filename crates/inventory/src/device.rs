use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use repairdesk_core::error::{ensure_max_len, ensure_present};
use repairdesk_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Lifecycle, Money, TenantId,
    UserId,
};
use repairdesk_events::Event;
use repairdesk_parties::PartyId;

use crate::imei::Imei;
use crate::movement::MovementType;

const CODE_MAX: usize = 32;
const LABEL_MAX: usize = 64;
const TEXT_MAX: usize = 1000;

/// Device unit identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceUnitId(pub AggregateId);

impl DeviceUnitId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DeviceUnitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

macro_rules! closed_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(DomainError::validation(format!(
                        concat!("unknown ", $what, " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

closed_enum!(DeviceType, "device type", {
    Smartphone => "smartphone",
    Tablet => "tablet",
});

closed_enum!(DeviceCondition, "device condition", {
    New => "new",
    Used => "used",
    Refurbished => "refurbished",
});

closed_enum!(DeviceStatus, "device status", {
    Available => "available",
    Loaned => "loaned",
    Sold => "sold",
    Unavailable => "unavailable",
});

/// A status-changing (or location-changing) operation on a unit.
///
/// Each variant hard-codes its allowed source states in [`Transition::target_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Loan,
    Return { to: DeviceStatus },
    Sell,
    Manual { to: DeviceStatus },
    Transfer,
}

impl Transition {
    pub fn movement_type(self) -> MovementType {
        match self {
            Transition::Loan => MovementType::Loan,
            Transition::Return { .. } => MovementType::Return,
            Transition::Sell => MovementType::Sale,
            Transition::Manual { .. } => MovementType::StatusChange,
            Transition::Transfer => MovementType::Transfer,
        }
    }

    fn requested(self) -> &'static str {
        match self {
            Transition::Loan => DeviceStatus::Loaned.as_str(),
            Transition::Return { to } | Transition::Manual { to } => to.as_str(),
            Transition::Sell => DeviceStatus::Sold.as_str(),
            Transition::Transfer => MovementType::Transfer.as_str(),
        }
    }

    /// Resolve the target status from `current`, or reject the transition.
    pub fn target_from(self, current: DeviceStatus) -> DomainResult<DeviceStatus> {
        use DeviceStatus::*;

        let rejected = || DomainError::invalid_transition(current.as_str(), self.requested());

        match self {
            Transition::Loan => match current {
                Available => Ok(Loaned),
                Loaned | Sold | Unavailable => Err(rejected()),
            },
            Transition::Return { to } => {
                if !matches!(to, Available | Unavailable) {
                    return Err(DomainError::validation(format!(
                        "return status must be 'available' or 'unavailable' (got '{to}')"
                    )));
                }
                match current {
                    Loaned => Ok(to),
                    Available | Sold | Unavailable => Err(rejected()),
                }
            }
            Transition::Sell => match current {
                Available => Ok(Sold),
                Loaned | Sold | Unavailable => Err(rejected()),
            },
            Transition::Manual { to } => {
                if to == current {
                    return Err(DomainError::validation(format!(
                        "device is already '{current}'"
                    )));
                }
                Ok(to)
            }
            Transition::Transfer => match current {
                Available | Unavailable => Ok(current),
                Loaned | Sold => Err(rejected()),
            },
        }
    }
}

/// Descriptive, editable attributes of a unit. IMEI, status and location are
/// not part of this: they change only through dedicated operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDetails {
    pub code: String,
    pub device_type: DeviceType,
    pub brand: String,
    pub model: String,
    pub esn: Option<String>,
    pub serial_number: Option<String>,
    pub color: Option<String>,
    pub condition: DeviceCondition,
    pub is_courtesy_device: bool,
    pub supplier_id: Option<PartyId>,
    pub purchase_price: Option<Money>,
    pub selling_price: Option<Money>,
    pub notes: Option<String>,
}

impl DeviceDetails {
    pub fn validate(&self) -> DomainResult<()> {
        ensure_present("code", &self.code, CODE_MAX)?;
        ensure_present("brand", &self.brand, LABEL_MAX)?;
        ensure_present("model", &self.model, LABEL_MAX)?;
        for (field, value) in [
            ("esn", &self.esn),
            ("serial_number", &self.serial_number),
            ("color", &self.color),
        ] {
            if let Some(v) = value {
                ensure_max_len(field, v, LABEL_MAX)?;
            }
        }
        if let Some(notes) = &self.notes {
            ensure_max_len("notes", notes, TEXT_MAX)?;
        }
        if let Some(p) = self.purchase_price {
            Money::price(p.amount())?;
        }
        if let Some(p) = self.selling_price {
            Money::price(p.amount())?;
        }
        Ok(())
    }
}

/// Current-state projection of a unit, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceView {
    pub unit_id: DeviceUnitId,
    pub imei: Imei,
    pub details: DeviceDetails,
    pub status: DeviceStatus,
    pub location: Option<String>,
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: UserId,
    pub version: u64,
}

impl DeviceView {
    /// Selling minus purchase price, when both are known.
    pub fn margin(&self) -> Option<Money> {
        match (self.details.selling_price, self.details.purchase_price) {
            (Some(sell), Some(buy)) => Some(sell - buy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Registration {
    tenant_id: TenantId,
    imei: Imei,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

/// Aggregate root: one physical device unit in stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUnit {
    id: DeviceUnitId,
    registration: Option<Registration>,
    details: Option<DeviceDetails>,
    status: DeviceStatus,
    location: Option<String>,
    lifecycle: Lifecycle,
    updated_at: Option<DateTime<Utc>>,
    updated_by: Option<UserId>,
    version: u64,
}

impl DeviceUnit {
    pub const AGGREGATE_TYPE: &'static str = "inventory.device";

    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: DeviceUnitId) -> Self {
        Self {
            id,
            registration: None,
            details: None,
            status: DeviceStatus::Available,
            location: None,
            lifecycle: Lifecycle::Active,
            updated_at: None,
            updated_by: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> DeviceUnitId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.registration.as_ref().map(|r| r.tenant_id)
    }

    pub fn imei(&self) -> Option<&Imei> {
        self.registration.as_ref().map(|r| &r.imei)
    }

    pub fn details(&self) -> Option<&DeviceDetails> {
        self.details.as_ref()
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Registered and not soft-deleted.
    pub fn exists(&self) -> bool {
        self.is_registered() && self.lifecycle.is_active()
    }

    /// Current-state projection; `None` until registered.
    pub fn view(&self) -> Option<DeviceView> {
        let reg = self.registration.as_ref()?;
        let details = self.details.clone()?;
        Some(DeviceView {
            unit_id: self.id,
            imei: reg.imei.clone(),
            details,
            status: self.status,
            location: self.location.clone(),
            lifecycle: self.lifecycle,
            created_at: reg.created_at,
            created_by: reg.created_by,
            updated_at: self.updated_at.unwrap_or(reg.created_at),
            updated_by: self.updated_by.unwrap_or(reg.created_by),
            version: self.version,
        })
    }
}

impl AggregateRoot for DeviceUnit {
    type Id = DeviceUnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterDevice (purchase into stock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDevice {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub imei: Imei,
    pub details: DeviceDetails,
    /// Defaults to `available`.
    pub initial_status: Option<DeviceStatus>,
    pub location: Option<String>,
    pub reference: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateDeviceDetails (full replacement of the editable attributes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDeviceDetails {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    /// When supplied it must equal the registered IMEI.
    pub imei: Option<String>,
    pub details: DeviceDetails,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LoanDevice (courtesy loan to a customer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDevice {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub customer_id: PartyId,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnDevice (end of a loan).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnDevice {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub return_status: DeviceStatus,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SellDevice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellDevice {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub customer_id: Option<PartyId>,
    /// Final price; replaces the listed selling price when present.
    pub sale_price: Option<Money>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeDeviceStatus (manual override).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDeviceStatus {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub target: DeviceStatus,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransferDevice (move between storage locations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDevice {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub to_location: String,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteDevice (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDevice {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCommand {
    RegisterDevice(RegisterDevice),
    UpdateDeviceDetails(UpdateDeviceDetails),
    LoanDevice(LoanDevice),
    ReturnDevice(ReturnDevice),
    SellDevice(SellDevice),
    ChangeDeviceStatus(ChangeDeviceStatus),
    TransferDevice(TransferDevice),
    DeleteDevice(DeleteDevice),
}

/// Event: DeviceRegistered (carries the opening `purchase` movement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistered {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub imei: Imei,
    pub details: DeviceDetails,
    pub initial_status: DeviceStatus,
    pub location: Option<String>,
    pub reference: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeviceDetailsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDetailsUpdated {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub details: DeviceDetails,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeviceMoved. One accepted transition, i.e. one ledger movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMoved {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub movement_type: MovementType,
    pub from_status: DeviceStatus,
    pub to_status: DeviceStatus,
    pub customer_id: Option<PartyId>,
    pub sale_price: Option<Money>,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeviceDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDeleted {
    pub tenant_id: TenantId,
    pub unit_id: DeviceUnitId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    DeviceRegistered(DeviceRegistered),
    DeviceDetailsUpdated(DeviceDetailsUpdated),
    DeviceMoved(DeviceMoved),
    DeviceDeleted(DeviceDeleted),
}

impl DeviceEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            DeviceEvent::DeviceRegistered(e) => e.tenant_id,
            DeviceEvent::DeviceDetailsUpdated(e) => e.tenant_id,
            DeviceEvent::DeviceMoved(e) => e.tenant_id,
            DeviceEvent::DeviceDeleted(e) => e.tenant_id,
        }
    }

    pub fn unit_id(&self) -> DeviceUnitId {
        match self {
            DeviceEvent::DeviceRegistered(e) => e.unit_id,
            DeviceEvent::DeviceDetailsUpdated(e) => e.unit_id,
            DeviceEvent::DeviceMoved(e) => e.unit_id,
            DeviceEvent::DeviceDeleted(e) => e.unit_id,
        }
    }
}

impl Event for DeviceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeviceEvent::DeviceRegistered(_) => "inventory.device.registered",
            DeviceEvent::DeviceDetailsUpdated(_) => "inventory.device.details_updated",
            DeviceEvent::DeviceMoved(_) => "inventory.device.moved",
            DeviceEvent::DeviceDeleted(_) => "inventory.device.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DeviceEvent::DeviceRegistered(e) => e.occurred_at,
            DeviceEvent::DeviceDetailsUpdated(e) => e.occurred_at,
            DeviceEvent::DeviceMoved(e) => e.occurred_at,
            DeviceEvent::DeviceDeleted(e) => e.occurred_at,
        }
    }

    fn actor(&self) -> UserId {
        match self {
            DeviceEvent::DeviceRegistered(e) => e.actor,
            DeviceEvent::DeviceDetailsUpdated(e) => e.actor,
            DeviceEvent::DeviceMoved(e) => e.actor,
            DeviceEvent::DeviceDeleted(e) => e.actor,
        }
    }
}

impl Aggregate for DeviceUnit {
    type Command = DeviceCommand;
    type Event = DeviceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DeviceEvent::DeviceRegistered(e) => {
                self.id = e.unit_id;
                self.registration = Some(Registration {
                    tenant_id: e.tenant_id,
                    imei: e.imei.clone(),
                    created_at: e.occurred_at,
                    created_by: e.actor,
                });
                self.details = Some(e.details.clone());
                self.status = e.initial_status;
                self.location = e.location.clone();
                self.lifecycle = Lifecycle::Active;
            }
            DeviceEvent::DeviceDetailsUpdated(e) => {
                self.details = Some(e.details.clone());
            }
            DeviceEvent::DeviceMoved(e) => {
                self.status = e.to_status;
                if e.to_location.is_some() {
                    self.location = e.to_location.clone();
                }
                if let (Some(price), Some(details)) = (e.sale_price, self.details.as_mut()) {
                    details.selling_price = Some(price);
                }
            }
            DeviceEvent::DeviceDeleted(_) => {
                self.lifecycle = Lifecycle::Deleted;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.updated_by = Some(event.actor());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DeviceCommand::RegisterDevice(cmd) => self.handle_register(cmd),
            DeviceCommand::UpdateDeviceDetails(cmd) => self.handle_update(cmd),
            DeviceCommand::LoanDevice(cmd) => {
                self.ensure_live(cmd.tenant_id, cmd.unit_id)?;
                self.move_event(
                    Transition::Loan,
                    MoveContext {
                        tenant_id: cmd.tenant_id,
                        customer_id: Some(cmd.customer_id),
                        reference: cmd.reference.clone(),
                        notes: cmd.notes.clone(),
                        actor: cmd.actor,
                        occurred_at: cmd.occurred_at,
                        ..MoveContext::default()
                    },
                )
            }
            DeviceCommand::ReturnDevice(cmd) => {
                self.ensure_live(cmd.tenant_id, cmd.unit_id)?;
                self.move_event(
                    Transition::Return {
                        to: cmd.return_status,
                    },
                    MoveContext {
                        tenant_id: cmd.tenant_id,
                        reference: cmd.reference.clone(),
                        notes: cmd.notes.clone(),
                        actor: cmd.actor,
                        occurred_at: cmd.occurred_at,
                        ..MoveContext::default()
                    },
                )
            }
            DeviceCommand::SellDevice(cmd) => {
                self.ensure_live(cmd.tenant_id, cmd.unit_id)?;
                if let Some(price) = cmd.sale_price {
                    Money::price(price.amount())?;
                }
                self.move_event(
                    Transition::Sell,
                    MoveContext {
                        tenant_id: cmd.tenant_id,
                        customer_id: cmd.customer_id,
                        sale_price: cmd.sale_price,
                        reference: cmd.reference.clone(),
                        notes: cmd.notes.clone(),
                        actor: cmd.actor,
                        occurred_at: cmd.occurred_at,
                        ..MoveContext::default()
                    },
                )
            }
            DeviceCommand::ChangeDeviceStatus(cmd) => {
                self.ensure_live(cmd.tenant_id, cmd.unit_id)?;
                self.move_event(
                    Transition::Manual { to: cmd.target },
                    MoveContext {
                        tenant_id: cmd.tenant_id,
                        notes: cmd.notes.clone(),
                        actor: cmd.actor,
                        occurred_at: cmd.occurred_at,
                        ..MoveContext::default()
                    },
                )
            }
            DeviceCommand::TransferDevice(cmd) => {
                self.ensure_live(cmd.tenant_id, cmd.unit_id)?;
                ensure_present("to_location", &cmd.to_location, LABEL_MAX)?;
                let to_location = cmd.to_location.trim().to_string();
                if self.location.as_deref() == Some(to_location.as_str()) {
                    return Err(DomainError::validation(format!(
                        "device is already at '{to_location}'"
                    )));
                }
                self.move_event(
                    Transition::Transfer,
                    MoveContext {
                        tenant_id: cmd.tenant_id,
                        to_location: Some(to_location),
                        reference: cmd.reference.clone(),
                        notes: cmd.notes.clone(),
                        actor: cmd.actor,
                        occurred_at: cmd.occurred_at,
                        ..MoveContext::default()
                    },
                )
            }
            DeviceCommand::DeleteDevice(cmd) => self.handle_delete(cmd),
        }
    }
}

/// Payload shared by every movement-producing command.
#[derive(Debug, Clone, Default)]
struct MoveContext {
    tenant_id: TenantId,
    customer_id: Option<PartyId>,
    sale_price: Option<Money>,
    to_location: Option<String>,
    reference: Option<String>,
    notes: Option<String>,
    actor: UserId,
    occurred_at: DateTime<Utc>,
}

fn validate_free_text(reference: &Option<String>, notes: &Option<String>) -> DomainResult<()> {
    if let Some(r) = reference {
        ensure_max_len("reference", r, TEXT_MAX)?;
    }
    if let Some(n) = notes {
        ensure_max_len("notes", n, TEXT_MAX)?;
    }
    Ok(())
}

impl DeviceUnit {
    fn ensure_live(&self, tenant_id: TenantId, unit_id: DeviceUnitId) -> DomainResult<()> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id() != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != unit_id {
            return Err(DomainError::invariant("unit_id mismatch"));
        }
        Ok(())
    }

    fn move_event(&self, transition: Transition, ctx: MoveContext) -> DomainResult<Vec<DeviceEvent>> {
        validate_free_text(&ctx.reference, &ctx.notes)?;
        if let Some(last) = self.updated_at {
            if ctx.occurred_at < last {
                return Err(DomainError::validation(format!(
                    "occurred_at {} precedes the unit's last change at {last}",
                    ctx.occurred_at
                )));
            }
        }
        let to_status = transition.target_from(self.status)?;
        let from_location = ctx.to_location.as_ref().and(self.location.clone());

        Ok(vec![DeviceEvent::DeviceMoved(DeviceMoved {
            tenant_id: ctx.tenant_id,
            unit_id: self.id,
            movement_type: transition.movement_type(),
            from_status: self.status,
            to_status,
            customer_id: ctx.customer_id,
            sale_price: ctx.sale_price,
            from_location,
            to_location: ctx.to_location,
            reference: ctx.reference,
            notes: ctx.notes,
            actor: ctx.actor,
            occurred_at: ctx.occurred_at,
        })])
    }

    fn handle_register(&self, cmd: &RegisterDevice) -> DomainResult<Vec<DeviceEvent>> {
        if self.is_registered() {
            return Err(DomainError::conflict("device unit already exists"));
        }
        cmd.details.validate()?;
        validate_free_text(&cmd.reference, &None)?;
        if let Some(location) = &cmd.location {
            ensure_present("location", location, LABEL_MAX)?;
        }

        Ok(vec![DeviceEvent::DeviceRegistered(DeviceRegistered {
            tenant_id: cmd.tenant_id,
            unit_id: cmd.unit_id,
            imei: cmd.imei.clone(),
            details: cmd.details.clone(),
            initial_status: cmd.initial_status.unwrap_or(DeviceStatus::Available),
            location: cmd.location.as_ref().map(|l| l.trim().to_string()),
            reference: cmd.reference.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateDeviceDetails) -> DomainResult<Vec<DeviceEvent>> {
        self.ensure_live(cmd.tenant_id, cmd.unit_id)?;
        if let Some(raw) = &cmd.imei {
            let requested = Imei::parse(raw)?;
            if Some(&requested) != self.imei() {
                return Err(DomainError::validation("imei cannot be changed after registration"));
            }
        }
        cmd.details.validate()?;
        if self.details.as_ref() == Some(&cmd.details) {
            return Ok(vec![]);
        }

        Ok(vec![DeviceEvent::DeviceDetailsUpdated(DeviceDetailsUpdated {
            tenant_id: cmd.tenant_id,
            unit_id: cmd.unit_id,
            details: cmd.details.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteDevice) -> DomainResult<Vec<DeviceEvent>> {
        self.ensure_live(cmd.tenant_id, cmd.unit_id)?;
        if self.status == DeviceStatus::Loaned {
            // a loaned unit is still out with a customer
            return Err(DomainError::invalid_transition(self.status.as_str(), "deleted"));
        }

        Ok(vec![DeviceEvent::DeviceDeleted(DeviceDeleted {
            tenant_id: cmd.tenant_id,
            unit_id: cmd.unit_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn details(code: &str) -> DeviceDetails {
        DeviceDetails {
            code: code.to_string(),
            device_type: DeviceType::Smartphone,
            brand: "Apple".to_string(),
            model: "iPhone 12".to_string(),
            esn: None,
            serial_number: None,
            color: Some("black".to_string()),
            condition: DeviceCondition::Used,
            is_courtesy_device: true,
            supplier_id: None,
            purchase_price: Some(Money::new(Decimal::new(30000, 2))),
            selling_price: Some(Money::new(Decimal::new(45000, 2))),
            notes: None,
        }
    }

    fn registered(tenant_id: TenantId) -> DeviceUnit {
        let unit_id = DeviceUnitId::new(AggregateId::new());
        let mut unit = DeviceUnit::empty(unit_id);
        let events = unit
            .handle(&DeviceCommand::RegisterDevice(RegisterDevice {
                tenant_id,
                unit_id,
                imei: Imei::parse("123456789012345").unwrap(),
                details: details("DEV-001"),
                initial_status: None,
                location: Some("shelf A".to_string()),
                reference: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            unit.apply(e);
        }
        unit
    }

    fn run(unit: &mut DeviceUnit, cmd: DeviceCommand) -> DomainResult<Vec<DeviceEvent>> {
        let events = unit.handle(&cmd)?;
        for e in &events {
            unit.apply(e);
        }
        Ok(events)
    }

    fn loan(unit: &DeviceUnit, tenant_id: TenantId) -> DeviceCommand {
        DeviceCommand::LoanDevice(LoanDevice {
            tenant_id,
            unit_id: unit.id_typed(),
            customer_id: PartyId(AggregateId::new()),
            reference: Some("REP-1".to_string()),
            notes: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn manual(unit: &DeviceUnit, tenant_id: TenantId, target: DeviceStatus) -> DeviceCommand {
        DeviceCommand::ChangeDeviceStatus(ChangeDeviceStatus {
            tenant_id,
            unit_id: unit.id_typed(),
            target,
            notes: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn register_defaults_to_available() {
        let unit = registered(TenantId::new());
        assert_eq!(unit.status(), DeviceStatus::Available);
        assert_eq!(unit.version(), 1);
        assert_eq!(unit.location(), Some("shelf A"));
    }

    #[test]
    fn loan_from_available_emits_one_movement() {
        let tenant_id = TenantId::new();
        let mut unit = registered(tenant_id);
        let cmd = loan(&unit, tenant_id);

        let events = run(&mut unit, cmd).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            DeviceEvent::DeviceMoved(m) => {
                assert_eq!(m.movement_type, MovementType::Loan);
                assert_eq!(m.from_status, DeviceStatus::Available);
                assert_eq!(m.to_status, DeviceStatus::Loaned);
                assert!(m.customer_id.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(unit.status(), DeviceStatus::Loaned);
    }

    #[test]
    fn loan_from_every_other_status_is_rejected() {
        let tenant_id = TenantId::new();
        for status in [DeviceStatus::Loaned, DeviceStatus::Sold, DeviceStatus::Unavailable] {
            let mut unit = registered(tenant_id);
            let cmd = manual(&unit, tenant_id, status);
            run(&mut unit, cmd).unwrap();
            let before = unit.version();

            let err = unit.handle(&loan(&unit, tenant_id)).unwrap_err();
            assert_eq!(
                err,
                DomainError::invalid_transition(status.as_str(), "loaned")
            );
            assert_eq!(unit.version(), before);
        }
    }

    #[test]
    fn return_accepts_only_available_or_unavailable() {
        let tenant_id = TenantId::new();
        let mut unit = registered(tenant_id);
        let cmd = loan(&unit, tenant_id);
        run(&mut unit, cmd).unwrap();

        let back = |to| {
            DeviceCommand::ReturnDevice(ReturnDevice {
                tenant_id,
                unit_id: unit.id_typed(),
                return_status: to,
                reference: None,
                notes: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            })
        };
        assert!(matches!(
            unit.handle(&back(DeviceStatus::Sold)),
            Err(DomainError::Validation(_))
        ));
        let cmd = back(DeviceStatus::Unavailable);
        run(&mut unit, cmd).unwrap();
        assert_eq!(unit.status(), DeviceStatus::Unavailable);
    }

    #[test]
    fn manual_change_to_same_status_is_a_validation_error() {
        let tenant_id = TenantId::new();
        let unit = registered(tenant_id);
        assert!(matches!(
            unit.handle(&manual(&unit, tenant_id, DeviceStatus::Available)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn sale_price_replaces_listed_price() {
        let tenant_id = TenantId::new();
        let mut unit = registered(tenant_id);
        let cmd = DeviceCommand::SellDevice(SellDevice {
            tenant_id,
            unit_id: unit.id_typed(),
            customer_id: None,
            sale_price: Some(Money::new(Decimal::new(39999, 2))),
            reference: None,
            notes: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        run(&mut unit, cmd).unwrap();

        let view = unit.view().unwrap();
        assert_eq!(view.status, DeviceStatus::Sold);
        assert_eq!(view.details.selling_price, Some(Money::new(Decimal::new(39999, 2))));
        assert_eq!(view.margin(), Some(Money::new(Decimal::new(9999, 2))));
    }

    #[test]
    fn sell_rejects_non_positive_price() {
        let tenant_id = TenantId::new();
        let unit = registered(tenant_id);
        let cmd = DeviceCommand::SellDevice(SellDevice {
            tenant_id,
            unit_id: unit.id_typed(),
            customer_id: None,
            sale_price: Some(Money::ZERO),
            reference: None,
            notes: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(unit.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn transfer_keeps_status_and_records_locations() {
        let tenant_id = TenantId::new();
        let mut unit = registered(tenant_id);
        let cmd = DeviceCommand::TransferDevice(TransferDevice {
            tenant_id,
            unit_id: unit.id_typed(),
            to_location: "back office".to_string(),
            reference: None,
            notes: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        let events = run(&mut unit, cmd).unwrap();
        match &events[0] {
            DeviceEvent::DeviceMoved(m) => {
                assert_eq!(m.from_status, m.to_status);
                assert_eq!(m.from_location.as_deref(), Some("shelf A"));
                assert_eq!(m.to_location.as_deref(), Some("back office"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(unit.location(), Some("back office"));
    }

    #[test]
    fn update_rejects_a_different_imei() {
        let tenant_id = TenantId::new();
        let unit = registered(tenant_id);
        let cmd = DeviceCommand::UpdateDeviceDetails(UpdateDeviceDetails {
            tenant_id,
            unit_id: unit.id_typed(),
            imei: Some("999999999999999".to_string()),
            details: details("DEV-001"),
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(unit.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn deleted_unit_rejects_mutations_with_not_found() {
        let tenant_id = TenantId::new();
        let mut unit = registered(tenant_id);
        let delete = DeviceCommand::DeleteDevice(DeleteDevice {
            tenant_id,
            unit_id: unit.id_typed(),
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        run(&mut unit, delete).unwrap();

        assert_eq!(unit.lifecycle(), Lifecycle::Deleted);
        assert_eq!(
            unit.handle(&loan(&unit, tenant_id)),
            Err(DomainError::NotFound)
        );
    }

    #[test]
    fn loaned_unit_cannot_be_deleted() {
        let tenant_id = TenantId::new();
        let mut unit = registered(tenant_id);
        let cmd = loan(&unit, tenant_id);
        run(&mut unit, cmd).unwrap();
        let delete = DeviceCommand::DeleteDevice(DeleteDevice {
            tenant_id,
            unit_id: unit.id_typed(),
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(
            unit.handle(&delete),
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn cross_tenant_command_is_rejected() {
        let unit = registered(TenantId::new());
        assert!(matches!(
            unit.handle(&loan(&unit, TenantId::new())),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn movement_dated_before_the_last_change_is_rejected() {
        let tenant_id = TenantId::new();
        let unit = registered(tenant_id);
        let backdated = DeviceCommand::LoanDevice(LoanDevice {
            tenant_id,
            unit_id: unit.id_typed(),
            customer_id: PartyId(AggregateId::new()),
            reference: None,
            notes: None,
            actor: UserId::new(),
            occurred_at: Utc::now() - chrono::Duration::days(30),
        });

        assert!(matches!(unit.handle(&backdated), Err(DomainError::Validation(_))));
        assert_eq!(unit.status(), DeviceStatus::Available);
    }

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!("Tablet".parse::<DeviceType>().unwrap(), DeviceType::Tablet);
        assert_eq!(" SOLD ".parse::<DeviceStatus>().unwrap(), DeviceStatus::Sold);
        assert!("broken".parse::<DeviceCondition>().is_err());
    }
}
