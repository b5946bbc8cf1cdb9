use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use repairdesk_core::{AggregateId, ExpectedVersion, TenantId, UserId};
use repairdesk_events::{EventEnvelope, StreamKey};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: returned by an aggregate's `handle()`
/// 2. **UncommittedEvent**: serialized and wrapped with stream metadata
/// 3. **StoredEvent**: persisted with an assigned `sequence_number`
/// 4. **EventEnvelope**: published to the bus for projections
///
/// Build one with [`UncommittedEvent::from_typed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub actor: UserId,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are stream-scoped, start at 1, have no gaps and never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub actor: UserId,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into a tenant-scoped event envelope for publication.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            StreamKey::new(self.tenant_id, self.aggregate_id, self.aggregate_type.clone()),
            self.sequence_number,
            self.event_type.clone(),
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Events for one stream plus the version that stream must currently be at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub events: Vec<UncommittedEvent>,
    pub expected_version: ExpectedVersion,
}

impl StreamAppend {
    pub fn new(events: Vec<UncommittedEvent>, expected_version: ExpectedVersion) -> Self {
        Self {
            events,
            expected_version,
        }
    }

    /// `(tenant, aggregate, aggregate_type)` of the batch after checking every event agrees.
    pub fn stream(&self) -> Result<Option<(TenantId, AggregateId, &str)>, EventStoreError> {
        let Some(first) = self.events.first() else {
            return Ok(None);
        };
        for (idx, e) in self.events.iter().enumerate() {
            if e.tenant_id != first.tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id != first.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != first.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }
        Ok(Some((
            first.tenant_id,
            first.aggregate_id,
            first.aggregate_type.as_str(),
        )))
    }
}

/// Check a unit of work before touching storage: one tenant, each stream at most once.
pub(crate) fn validate_unit_of_work(batches: &[StreamAppend]) -> Result<(), EventStoreError> {
    let mut seen: Vec<(TenantId, AggregateId)> = Vec::with_capacity(batches.len());
    for batch in batches {
        let Some((tenant_id, aggregate_id, _)) = batch.stream()? else {
            continue;
        };
        if let Some((first_tenant, _)) = seen.first() {
            if *first_tenant != tenant_id {
                return Err(EventStoreError::TenantIsolation(
                    "unit of work spans multiple tenants".to_string(),
                ));
            }
        }
        if seen.contains(&(tenant_id, aggregate_id)) {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream {aggregate_id} appears twice in one unit of work"
            )));
        }
        seen.push((tenant_id, aggregate_id));
    }
    Ok(())
}

/// Event store operation error.
///
/// Infrastructure errors (storage, concurrency, isolation) as opposed to
/// domain errors (validation, invariants, transitions).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Append-only, tenant-scoped event store.
///
/// Streams are keyed by `(tenant_id, aggregate_id)`. Within a stream events have
/// sequence numbers 1, 2, 3, ...
///
/// ## Append Semantics
///
/// `append_all()` takes one [`StreamAppend`] per stream and is atomic across
/// all of them: every stream's `expected_version` must match and every event is
/// persisted, or nothing is. `append()` is the single-stream case.
///
/// ## Load Semantics
///
/// `load_stream()` returns the stream in sequence order, or an empty vector if
/// it does not exist. A stream of another tenant is indistinguishable from a
/// missing one.
pub trait EventStore: Send + Sync {
    /// Append to several streams as one unit of work.
    fn append_all(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append events to a single aggregate stream.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.append_all(vec![StreamAppend::new(events, expected_version)])
    }

    /// Load the full stream for a tenant + aggregate.
    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load every stream of `aggregate_type` for a tenant (used to rebuild projections).
    ///
    /// Events of one stream keep their sequence order; streams are not interleaved.
    fn load_by_type(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append_all(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_all(batches)
    }

    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(tenant_id, aggregate_id)
    }

    fn load_by_type(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_by_type(tenant_id, aggregate_type)
    }
}

impl UncommittedEvent {
    /// Build from a typed domain event, capturing the metadata needed to read it back.
    pub fn from_typed<E>(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: repairdesk_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            actor: event.actor(),
            payload,
        })
    }
}
