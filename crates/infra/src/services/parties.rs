use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use repairdesk_core::TenantId;
use repairdesk_events::{EventBus, EventEnvelope};
use repairdesk_parties::{
    DeleteParty, Party, PartyCommand, PartyId, PartyKind, RegisterParty, UpdateParty,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

use super::id_in_use;

/// Customers and suppliers.
#[derive(Debug)]
pub struct PartyDirectory<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> Clone for PartyDirectory<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<S, B> PartyDirectory<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, party_id = %cmd.party_id.0))]
    pub fn register(&self, cmd: RegisterParty) -> Result<Party, DispatchError> {
        let (tenant_id, party_id) = (cmd.tenant_id, cmd.party_id);
        let party = self
            .run(tenant_id, party_id, PartyCommand::RegisterParty(cmd))
            .map_err(id_in_use)?;
        info!(kind = party.kind().as_str(), "party registered");
        Ok(party)
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, party_id = %cmd.party_id.0))]
    pub fn update(&self, cmd: UpdateParty) -> Result<Party, DispatchError> {
        let (tenant_id, party_id) = (cmd.tenant_id, cmd.party_id);
        self.run(tenant_id, party_id, PartyCommand::UpdateParty(cmd))
    }

    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, party_id = %cmd.party_id.0))]
    pub fn delete(&self, cmd: DeleteParty) -> Result<(), DispatchError> {
        let (tenant_id, party_id) = (cmd.tenant_id, cmd.party_id);
        self.run(tenant_id, party_id, PartyCommand::DeleteParty(cmd))?;
        info!("party deleted");
        Ok(())
    }

    /// Active party, or `NotFound`.
    pub fn get(&self, tenant_id: TenantId, party_id: PartyId) -> Result<Party, DispatchError> {
        let loaded = self
            .dispatcher
            .load(tenant_id, party_id.0, Party::AGGREGATE_TYPE, |id| Party::empty(PartyId::new(id)))?;
        if !loaded.aggregate.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(loaded.aggregate)
    }

    fn run(&self, tenant_id: TenantId, party_id: PartyId, cmd: PartyCommand) -> Result<Party, DispatchError> {
        let committed = self.dispatcher.dispatch(
            tenant_id,
            party_id.0,
            Party::AGGREGATE_TYPE,
            &cmd,
            |id| Party::empty(PartyId::new(id)),
        )?;
        Ok(committed.aggregate)
    }
}

/// Resolve a party reference against the party's stream: it must exist, be
/// active and be of `kind`.
pub(crate) fn require_party<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    party_id: PartyId,
    kind: PartyKind,
) -> Result<(), DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let loaded = dispatcher.load(tenant_id, party_id.0, Party::AGGREGATE_TYPE, |id| {
        Party::empty(PartyId::new(id))
    })?;
    loaded.aggregate.ensure_reference(kind)?;
    Ok(())
}
