//! Movement ledger: the immutable history of status-changing events on a unit.
//!
//! Movements are not stored separately. Each one is read off a persisted
//! `DeviceRegistered` or `DeviceMoved` event, so the ledger is exactly as
//! append-only as the event stream it comes from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use repairdesk_core::{DomainError, DomainResult, Entity, Money, UserId};
use repairdesk_parties::PartyId;

use crate::device::{DeviceEvent, DeviceStatus, DeviceUnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Purchase,
    Loan,
    Return,
    Sale,
    Transfer,
    StatusChange,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Purchase => "purchase",
            MovementType::Loan => "loan",
            MovementType::Return => "return",
            MovementType::Sale => "sale",
            MovementType::Transfer => "transfer",
            MovementType::StatusChange => "status_change",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    /// Id of the event this movement was read from.
    pub movement_id: Uuid,
    pub unit_id: DeviceUnitId,
    /// Position of the source event in the unit's stream.
    pub sequence: u64,
    pub movement_type: MovementType,
    /// `None` only for the opening `purchase`.
    pub from_status: Option<DeviceStatus>,
    pub to_status: DeviceStatus,
    pub customer_id: Option<PartyId>,
    pub sale_price: Option<Money>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub actor: UserId,
}

impl InventoryMovement {
    /// Read the movement carried by `event`, if it carries one.
    pub fn from_event(event_id: Uuid, sequence: u64, event: &DeviceEvent) -> Option<Self> {
        match event {
            DeviceEvent::DeviceRegistered(e) => Some(Self {
                movement_id: event_id,
                unit_id: e.unit_id,
                sequence,
                movement_type: MovementType::Purchase,
                from_status: None,
                to_status: e.initial_status,
                customer_id: None,
                sale_price: None,
                reference: e.reference.clone(),
                notes: None,
                from_location: None,
                to_location: e.location.clone(),
                occurred_at: e.occurred_at,
                actor: e.actor,
            }),
            DeviceEvent::DeviceMoved(e) => Some(Self {
                movement_id: event_id,
                unit_id: e.unit_id,
                sequence,
                movement_type: e.movement_type,
                from_status: Some(e.from_status),
                to_status: e.to_status,
                customer_id: e.customer_id,
                sale_price: e.sale_price,
                reference: e.reference.clone(),
                notes: e.notes.clone(),
                from_location: e.from_location.clone(),
                to_location: e.to_location.clone(),
                occurred_at: e.occurred_at,
                actor: e.actor,
            }),
            DeviceEvent::DeviceDetailsUpdated(_) | DeviceEvent::DeviceDeleted(_) => None,
        }
    }
}

impl Entity for InventoryMovement {
    type Id = Uuid;

    fn id(&self) -> &Self::Id {
        &self.movement_id
    }
}

/// Fold movements in order starting from "no status".
///
/// Every movement's `from_status` must equal the status left by the previous
/// one; a broken chain is an invariant violation.
pub fn replay_status<'a, I>(movements: I) -> DomainResult<Option<DeviceStatus>>
where
    I: IntoIterator<Item = &'a InventoryMovement>,
{
    movements
        .into_iter()
        .try_fold(None, |current, movement| {
            if movement.from_status != current {
                return Err(DomainError::invariant(format!(
                    "movement {} starts from {:?} but unit was {:?}",
                    movement.sequence, movement.from_status, current
                )));
            }
            Ok(Some(movement.to_status))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceMoved, Transition};
    use proptest::prelude::*;
    use repairdesk_core::{AggregateId, TenantId};

    fn purchase(unit_id: DeviceUnitId, to: DeviceStatus) -> InventoryMovement {
        InventoryMovement {
            movement_id: Uuid::now_v7(),
            unit_id,
            sequence: 1,
            movement_type: MovementType::Purchase,
            from_status: None,
            to_status: to,
            customer_id: None,
            sale_price: None,
            reference: None,
            notes: None,
            from_location: None,
            to_location: None,
            occurred_at: Utc::now(),
            actor: UserId::new(),
        }
    }

    fn moved(unit_id: DeviceUnitId, transition: Transition, from: DeviceStatus) -> Option<DeviceEvent> {
        let to = transition.target_from(from).ok()?;
        Some(DeviceEvent::DeviceMoved(DeviceMoved {
            tenant_id: TenantId::new(),
            unit_id,
            movement_type: transition.movement_type(),
            from_status: from,
            to_status: to,
            customer_id: None,
            sale_price: None,
            from_location: None,
            to_location: None,
            reference: None,
            notes: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        }))
    }

    #[test]
    fn broken_chain_is_detected() {
        let unit_id = DeviceUnitId::new(AggregateId::new());
        let first = purchase(unit_id, DeviceStatus::Available);
        let mut second = purchase(unit_id, DeviceStatus::Sold);
        second.sequence = 2;
        second.movement_type = MovementType::Sale;
        second.from_status = Some(DeviceStatus::Loaned);

        assert!(matches!(
            replay_status(&[first, second]),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn empty_ledger_has_no_status() {
        assert_eq!(replay_status(&[]).unwrap(), None);
    }

    fn status_strategy() -> impl Strategy<Value = DeviceStatus> {
        prop::sample::select(DeviceStatus::ALL.to_vec())
    }

    fn transition_strategy() -> impl Strategy<Value = Transition> {
        prop_oneof![
            Just(Transition::Loan),
            Just(Transition::Sell),
            Just(Transition::Transfer),
            status_strategy().prop_map(|to| Transition::Return { to }),
            status_strategy().prop_map(|to| Transition::Manual { to }),
        ]
    }

    proptest! {
        /// Whatever sequence of operations is attempted, the accepted ones
        /// form a ledger whose fold lands on the last accepted status.
        #[test]
        fn fold_reproduces_status(
            initial in status_strategy(),
            attempts in prop::collection::vec(transition_strategy(), 0..40),
        ) {
            let unit_id = DeviceUnitId::new(AggregateId::new());
            let mut ledger = vec![purchase(unit_id, initial)];
            let mut status = initial;

            for transition in attempts {
                if let Some(event) = moved(unit_id, transition, status) {
                    let seq = ledger.len() as u64 + 1;
                    let movement = InventoryMovement::from_event(Uuid::now_v7(), seq, &event).unwrap();
                    status = movement.to_status;
                    ledger.push(movement);
                }
            }

            prop_assert_eq!(replay_status(&ledger).unwrap(), Some(status));
        }
    }
}
