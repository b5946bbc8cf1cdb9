//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded version), one unit of work
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! A storage concurrency failure in step 4 restarts the whole pipeline from a
//! fresh read, up to `max_conflict_retries` times, and then surfaces as
//! [`DispatchError::Conflict`]. Domain rejections are never retried.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use repairdesk_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use repairdesk_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Unit, booking or referenced party does not resolve (or is soft-deleted).
    #[error("not found")]
    NotFound,

    #[error("invalid state transition: current '{current}', requested '{requested}'")]
    InvalidStateTransition { current: String, requested: String },

    #[error("booking already converted into repair {repair_id}")]
    AlreadyConverted { repair_id: AggregateId },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Concurrent writers kept winning (or the aggregate already exists).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append (events are durable).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    fn is_store_conflict(&self) -> bool {
        matches!(self, DispatchError::Store(EventStoreError::Concurrency(_)))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                DispatchError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => DispatchError::Invariant(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidStateTransition { current, requested } => {
                DispatchError::InvalidStateTransition { current, requested }
            }
            DomainError::AlreadyConverted { repair_id } => {
                DispatchError::AlreadyConverted { repair_id }
            }
        }
    }
}

/// An aggregate rehydrated from its stream, with the version to expect on append.
#[derive(Debug, Clone)]
pub struct Loaded<A> {
    pub aggregate: A,
    pub aggregate_id: AggregateId,
    pub expected: ExpectedVersion,
}

/// Result of a successful dispatch: the state after the new events plus the
/// committed events, both typed and as stored.
#[derive(Debug, Clone)]
pub struct Committed<A: Aggregate> {
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub stored: Vec<StoredEvent>,
}

/// Streams to append together. Built inside a unit-of-work closure.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    batches: Vec<StreamAppend>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `events` for one stream, serialized with fresh event ids.
    pub fn push<E>(
        &mut self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: ExpectedVersion,
        events: &[E],
    ) -> Result<(), DispatchError>
    where
        E: repairdesk_events::Event + Serialize,
    {
        if events.is_empty() {
            return Ok(());
        }
        let uncommitted = events
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.batches.push(StreamAppend::new(uncommitted, expected));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// ## Execution Guarantees
///
/// - **Atomicity**: a unit of work is appended all-or-nothing, then published
/// - **Consistency**: tenant isolation and optimistic concurrency are enforced
/// - **At-least-once**: if publication fails the events are already durable and
///   the error is returned as [`DispatchError::Publish`]
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    max_conflict_retries: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            max_conflict_retries: 1,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate one aggregate.
    ///
    /// A stream that belongs to another aggregate type does not resolve to an
    /// `aggregate_type` record, so it is reported as [`DispatchError::NotFound`].
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Loaded<A>, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        ensure_stream_type(aggregate_id, aggregate_type, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;

        Ok(Loaded {
            aggregate,
            aggregate_id,
            expected: ExpectedVersion::Exact(stream_version(&history)),
        })
    }

    /// Dispatch one command against one aggregate (load, decide, append, publish).
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Committed<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: repairdesk_events::Event + Serialize + DeserializeOwned,
    {
        self.with_retry(aggregate_type, || {
            let loaded = self.load(tenant_id, aggregate_id, aggregate_type, &make_aggregate)?;
            let mut aggregate = loaded.aggregate;

            let events = aggregate.handle(command)?;
            if events.is_empty() {
                return Ok(Committed {
                    aggregate,
                    events,
                    stored: vec![],
                });
            }

            let mut uow = UnitOfWork::new();
            uow.push(tenant_id, aggregate_id, aggregate_type, loaded.expected, &events)?;
            let stored = self.commit(uow)?;

            for ev in &events {
                aggregate.apply(ev);
            }
            Ok(Committed {
                aggregate,
                events,
                stored,
            })
        })
    }

    /// Append a unit of work atomically, then publish every committed event.
    pub fn commit(&self, uow: UnitOfWork) -> Result<Vec<StoredEvent>, DispatchError> {
        if uow.is_empty() {
            return Ok(vec![]);
        }
        let committed = self.store.append_all(uow.batches)?;

        self.bus
            .publish_all(committed.iter().map(StoredEvent::to_envelope))
            .map_err(|(sent, e)| {
                warn!(sent, total = committed.len(), error = ?e, "publication stopped after append");
                DispatchError::Publish(format!("{e:?}"))
            })?;
        Ok(committed)
    }

    /// Run `attempt` (which must re-read everything it decides on), retrying on
    /// storage concurrency failures.
    pub fn with_retry<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut() -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let mut tries = 0u32;
        loop {
            match attempt() {
                Err(err) if err.is_store_conflict() => {
                    if tries >= self.max_conflict_retries {
                        warn!(operation, attempts = tries + 1, error = %err, "giving up after concurrent writes");
                        return Err(DispatchError::Conflict(err.to_string()));
                    }
                    tries += 1;
                    debug!(operation, attempt = tries, "concurrent write detected, retrying with fresh read");
                }
                other => return other,
            }
        }
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::Backend(format!(
                "non-contiguous sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

/// `NotFound` when the stream exists but was written by another aggregate type.
pub fn ensure_stream_type(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    match stream.first() {
        Some(first) if first.aggregate_type != aggregate_type => {
            debug!(
                %aggregate_id,
                expected = aggregate_type,
                found = %first.aggregate_type,
                "id resolves to a stream of another type"
            );
            Err(DispatchError::NotFound)
        }
        _ => Ok(()),
    }
}

/// Decode a stored payload into a typed domain event.
pub fn decode<E: DeserializeOwned>(stored: &StoredEvent) -> Result<E, DispatchError> {
    serde_json::from_value(stored.payload.clone()).map_err(|e| {
        DispatchError::Deserialize(format!(
            "{} #{} ({}): {e}",
            stored.aggregate_id, stored.sequence_number, stored.event_type
        ))
    })
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = decode(stored)?;
        aggregate.apply(&ev);
    }
    Ok(())
}
