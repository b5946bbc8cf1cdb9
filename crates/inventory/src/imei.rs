//! IMEI value object and the per-tenant uniqueness claim.
//!
//! Uniqueness is enforced through a dedicated claim stream whose id is derived
//! from `(tenant, imei)`. The registration appends to the unit stream and the
//! claim stream in one unit of work; a second registration of the same IMEI
//! finds the claim stream already at version 1.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use repairdesk_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, TenantId, UserId,
    ValueObject,
};
use repairdesk_events::Event;

use crate::device::DeviceUnitId;

/// A 15-digit IMEI, stored without separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Imei(String);

impl Imei {
    /// Parse user input; spaces and dashes are ignored.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let digits: String = raw.chars().filter(|c| *c != ' ' && *c != '-').collect();
        if digits.len() != 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "imei must be 15 digits (got '{raw}')"
            )));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stream id of the uniqueness claim for this IMEI within `tenant_id`.
    pub fn claim_id(&self, tenant_id: TenantId) -> AggregateId {
        AggregateId::derived(tenant_id, ImeiClaim::AGGREGATE_TYPE, &self.0)
    }
}

impl ValueObject for Imei {}

impl core::fmt::Display for Imei {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregate root: the claim of one IMEI by one device unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImeiClaim {
    id: AggregateId,
    holder: Option<DeviceUnitId>,
    version: u64,
}

impl ImeiClaim {
    pub const AGGREGATE_TYPE: &'static str = "inventory.imei_claim";

    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            holder: None,
            version: 0,
        }
    }

    pub fn holder(&self) -> Option<DeviceUnitId> {
        self.holder
    }
}

impl AggregateRoot for ImeiClaim {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ClaimImei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimImei {
    pub tenant_id: TenantId,
    pub imei: Imei,
    pub unit_id: DeviceUnitId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ImeiClaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImeiClaimed {
    pub tenant_id: TenantId,
    pub imei: Imei,
    pub unit_id: DeviceUnitId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImeiClaimEvent {
    ImeiClaimed(ImeiClaimed),
}

impl Event for ImeiClaimEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ImeiClaimEvent::ImeiClaimed(_) => "inventory.imei.claimed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ImeiClaimEvent::ImeiClaimed(e) => e.occurred_at,
        }
    }

    fn actor(&self) -> UserId {
        match self {
            ImeiClaimEvent::ImeiClaimed(e) => e.actor,
        }
    }
}

impl Aggregate for ImeiClaim {
    type Command = ClaimImei;
    type Event = ImeiClaimEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ImeiClaimEvent::ImeiClaimed(e) => self.holder = Some(e.unit_id),
        }
        self.version += 1;
    }

    fn handle(&self, cmd: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let Some(holder) = self.holder {
            return Err(DomainError::validation(format!(
                "imei {} is already registered to unit {holder}",
                cmd.imei
            )));
        }
        Ok(vec![ImeiClaimEvent::ImeiClaimed(ImeiClaimed {
            tenant_id: cmd.tenant_id,
            imei: cmd.imei.clone(),
            unit_id: cmd.unit_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}
