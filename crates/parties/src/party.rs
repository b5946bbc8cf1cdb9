use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use repairdesk_core::error::{ensure_max_len, ensure_present};
use repairdesk_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Lifecycle, TenantId, UserId,
};
use repairdesk_events::Event;

/// Party identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub AggregateId);

impl PartyId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PartyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Party kind: customer or supplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyKind {
    Customer,
    Supplier,
}

impl PartyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PartyKind::Customer => "customer",
            PartyKind::Supplier => "supplier",
        }
    }
}

/// Contact information for a party.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Tax code / VAT number as printed on receipts.
    pub tax_code: Option<String>,
}

impl ContactInfo {
    fn validate(&self) -> DomainResult<()> {
        if let Some(email) = &self.email {
            ensure_max_len("email", email, 254)?;
            if !email.contains('@') {
                return Err(DomainError::validation("email must contain '@'"));
            }
        }
        if let Some(phone) = &self.phone {
            ensure_max_len("phone", phone, 32)?;
        }
        if let Some(address) = &self.address {
            ensure_max_len("address", address, 500)?;
        }
        if let Some(tax_code) = &self.tax_code {
            ensure_max_len("tax_code", tax_code, 32)?;
        }
        Ok(())
    }
}

const NAME_MAX: usize = 200;

/// Aggregate root: Party (customer or supplier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    id: PartyId,
    tenant_id: Option<TenantId>,
    kind: PartyKind,
    name: String,
    contact: ContactInfo,
    lifecycle: Lifecycle,
    version: u64,
    created: bool,
}

impl Party {
    pub const AGGREGATE_TYPE: &'static str = "parties.party";

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PartyId) -> Self {
        Self {
            id,
            tenant_id: None,
            kind: PartyKind::Customer,
            name: String::new(),
            contact: ContactInfo::default(),
            lifecycle: Lifecycle::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PartyId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn kind(&self) -> PartyKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn exists(&self) -> bool {
        self.created && self.lifecycle.is_active()
    }

    /// A reference to this party resolves only if it exists, is active and is of `kind`.
    pub fn ensure_reference(&self, kind: PartyKind) -> DomainResult<()> {
        if !self.exists() || self.kind != kind {
            return Err(DomainError::not_found());
        }
        Ok(())
    }
}

impl AggregateRoot for Party {
    type Id = PartyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterParty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterParty {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub name: String,
    pub contact: Option<ContactInfo>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateParty (fields left `None` keep their value).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateParty {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub name: Option<String>,
    pub contact: Option<ContactInfo>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteParty (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteParty {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyCommand {
    RegisterParty(RegisterParty),
    UpdateParty(UpdateParty),
    DeleteParty(DeleteParty),
}

/// Event: PartyRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRegistered {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub name: String,
    pub contact: ContactInfo,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PartyUpdated (full replacement of the editable fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyUpdated {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub name: String,
    pub contact: ContactInfo,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PartyDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyDeleted {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyEvent {
    PartyRegistered(PartyRegistered),
    PartyUpdated(PartyUpdated),
    PartyDeleted(PartyDeleted),
}

impl PartyEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            PartyEvent::PartyRegistered(e) => e.tenant_id,
            PartyEvent::PartyUpdated(e) => e.tenant_id,
            PartyEvent::PartyDeleted(e) => e.tenant_id,
        }
    }
}

impl Event for PartyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PartyEvent::PartyRegistered(_) => "parties.party.registered",
            PartyEvent::PartyUpdated(_) => "parties.party.updated",
            PartyEvent::PartyDeleted(_) => "parties.party.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PartyEvent::PartyRegistered(e) => e.occurred_at,
            PartyEvent::PartyUpdated(e) => e.occurred_at,
            PartyEvent::PartyDeleted(e) => e.occurred_at,
        }
    }

    fn actor(&self) -> UserId {
        match self {
            PartyEvent::PartyRegistered(e) => e.actor,
            PartyEvent::PartyUpdated(e) => e.actor,
            PartyEvent::PartyDeleted(e) => e.actor,
        }
    }
}

impl Aggregate for Party {
    type Command = PartyCommand;
    type Event = PartyEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PartyEvent::PartyRegistered(e) => {
                self.id = e.party_id;
                self.tenant_id = Some(e.tenant_id);
                self.kind = e.kind;
                self.name = e.name.clone();
                self.contact = e.contact.clone();
                self.lifecycle = Lifecycle::Active;
                self.created = true;
            }
            PartyEvent::PartyUpdated(e) => {
                self.name = e.name.clone();
                self.contact = e.contact.clone();
            }
            PartyEvent::PartyDeleted(_) => {
                self.lifecycle = Lifecycle::Deleted;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PartyCommand::RegisterParty(cmd) => self.handle_register(cmd),
            PartyCommand::UpdateParty(cmd) => self.handle_update(cmd),
            PartyCommand::DeleteParty(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Party {
    fn ensure_live(&self, tenant_id: TenantId, party_id: PartyId) -> DomainResult<()> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != party_id {
            return Err(DomainError::invariant("party_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterParty) -> DomainResult<Vec<PartyEvent>> {
        if self.created {
            return Err(DomainError::conflict("party already exists"));
        }
        ensure_present("name", &cmd.name, NAME_MAX)?;
        let contact = cmd.contact.clone().unwrap_or_default();
        contact.validate()?;

        Ok(vec![PartyEvent::PartyRegistered(PartyRegistered {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            kind: cmd.kind,
            name: cmd.name.trim().to_string(),
            contact,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateParty) -> DomainResult<Vec<PartyEvent>> {
        self.ensure_live(cmd.tenant_id, cmd.party_id)?;

        let name = match &cmd.name {
            Some(name) => {
                ensure_present("name", name, NAME_MAX)?;
                name.trim().to_string()
            }
            None => self.name.clone(),
        };
        let contact = cmd.contact.clone().unwrap_or_else(|| self.contact.clone());
        contact.validate()?;

        if name == self.name && contact == self.contact {
            return Ok(vec![]);
        }

        Ok(vec![PartyEvent::PartyUpdated(PartyUpdated {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            name,
            contact,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteParty) -> DomainResult<Vec<PartyEvent>> {
        self.ensure_live(cmd.tenant_id, cmd.party_id)?;

        Ok(vec![PartyEvent::PartyDeleted(PartyDeleted {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repairdesk_core::AggregateId;

    fn register(kind: PartyKind) -> (Party, TenantId, PartyId) {
        let tenant_id = TenantId::new();
        let party_id = PartyId::new(AggregateId::new());
        let mut party = Party::empty(party_id);
        let events = party
            .handle(&PartyCommand::RegisterParty(RegisterParty {
                tenant_id,
                party_id,
                kind,
                name: "  Mario Rossi ".to_string(),
                contact: Some(ContactInfo {
                    phone: Some("+39 333 1234567".to_string()),
                    ..ContactInfo::default()
                }),
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        party.apply(&events[0]);
        (party, tenant_id, party_id)
    }

    #[test]
    fn register_trims_name_and_resolves_as_customer() {
        let (party, _, _) = register(PartyKind::Customer);
        assert_eq!(party.name(), "Mario Rossi");
        assert_eq!(party.version(), 1);
        assert!(party.ensure_reference(PartyKind::Customer).is_ok());
        assert_eq!(
            party.ensure_reference(PartyKind::Supplier),
            Err(DomainError::NotFound)
        );
    }

    #[test]
    fn register_rejects_blank_name_and_bad_email() {
        let party = Party::empty(PartyId::new(AggregateId::new()));
        let mut cmd = RegisterParty {
            tenant_id: TenantId::new(),
            party_id: party.id_typed(),
            kind: PartyKind::Supplier,
            name: "   ".to_string(),
            contact: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        };
        assert!(matches!(
            party.handle(&PartyCommand::RegisterParty(cmd.clone())),
            Err(DomainError::Validation(_))
        ));

        cmd.name = "Ricambi Srl".to_string();
        cmd.contact = Some(ContactInfo {
            email: Some("no-at-sign".to_string()),
            ..ContactInfo::default()
        });
        assert!(matches!(
            party.handle(&PartyCommand::RegisterParty(cmd)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn deleted_party_no_longer_resolves() {
        let (mut party, tenant_id, party_id) = register(PartyKind::Customer);
        let events = party
            .handle(&PartyCommand::DeleteParty(DeleteParty {
                tenant_id,
                party_id,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        party.apply(&events[0]);

        assert_eq!(party.lifecycle(), Lifecycle::Deleted);
        assert_eq!(
            party.ensure_reference(PartyKind::Customer),
            Err(DomainError::NotFound)
        );

        let err = party
            .handle(&PartyCommand::UpdateParty(UpdateParty {
                tenant_id,
                party_id,
                name: Some("New".to_string()),
                contact: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn update_without_changes_emits_nothing() {
        let (party, tenant_id, party_id) = register(PartyKind::Customer);
        let events = party
            .handle(&PartyCommand::UpdateParty(UpdateParty {
                tenant_id,
                party_id,
                name: Some("Mario Rossi".to_string()),
                contact: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn update_from_other_tenant_is_rejected() {
        let (party, _, party_id) = register(PartyKind::Customer);
        let err = party
            .handle(&PartyCommand::UpdateParty(UpdateParty {
                tenant_id: TenantId::new(),
                party_id,
                name: Some("Someone".to_string()),
                contact: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
