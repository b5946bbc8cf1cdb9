use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use repairdesk_core::{AggregateId, TenantId};

/// Identity of one event stream: the aggregate instance within its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
}

impl StreamKey {
    pub fn new(tenant_id: TenantId, aggregate_id: AggregateId, aggregate_type: impl Into<String>) -> Self {
        Self {
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
        }
    }
}

/// A committed event as published to the bus.
///
/// `sequence_number` is the event's position in its stream, starting at 1 and
/// increasing by exactly 1. `event_type` is readable without decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    stream: StreamKey,
    sequence_number: u64,
    event_type: String,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        stream: StreamKey,
        sequence_number: u64,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream,
            sequence_number,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream(&self) -> &StreamKey {
        &self.stream
    }

    pub fn tenant_id(&self) -> TenantId {
        self.stream.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.stream.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.stream.aggregate_type
    }

    /// True when the envelope belongs to a stream of `aggregate_type`.
    pub fn is_from(&self, aggregate_type: &str) -> bool {
        self.stream.aggregate_type == aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    /// Decode the payload, keeping the stream metadata.
    pub fn try_map<F, Err>(self, decode: impl FnOnce(E) -> Result<F, Err>) -> Result<EventEnvelope<F>, Err> {
        Ok(EventEnvelope {
            event_id: self.event_id,
            stream: self.stream,
            sequence_number: self.sequence_number,
            event_type: self.event_type,
            occurred_at: self.occurred_at,
            payload: decode(self.payload)?,
        })
    }
}
