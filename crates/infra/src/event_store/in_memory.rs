use std::collections::HashMap;
use std::sync::RwLock;

use repairdesk_core::{AggregateId, TenantId};

use super::r#trait::{
    EventStore, EventStoreError, StoredEvent, StreamAppend, validate_unit_of_work,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. A unit of work holds the single write lock for
/// its whole duration, so checks and appends across streams are atomic.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append_all(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        validate_unit_of_work(&batches)?;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        // Phase 1: every check passes before anything is written.
        let mut planned = Vec::with_capacity(batches.len());
        for batch in &batches {
            let Some((tenant_id, aggregate_id, aggregate_type)) = batch.stream()? else {
                continue;
            };
            let key = StreamKey {
                tenant_id,
                aggregate_id,
            };
            let existing = streams.get(&key).map(Vec::as_slice).unwrap_or_default();
            let current = Self::current_version(existing);

            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {aggregate_id}: expected {:?}, found {current}",
                    batch.expected_version
                )));
            }
            if let Some(first) = existing.first() {
                if first.aggregate_type != aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        first.aggregate_type, aggregate_type
                    )));
                }
            }
            planned.push((key, current));
        }

        // Phase 2: assign sequence numbers and append.
        let mut committed = Vec::new();
        let non_empty = batches.into_iter().filter(|b| !b.events.is_empty());
        for ((key, current), batch) in planned.into_iter().zip(non_empty) {
            let stream = streams.entry(key).or_default();
            for (offset, e) in batch.events.into_iter().enumerate() {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    tenant_id: e.tenant_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: current + 1 + offset as u64,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    actor: e.actor,
                    payload: e.payload,
                };
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }

    fn load_by_type(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        Ok(streams
            .iter()
            .filter(|(key, stream)| {
                key.tenant_id == tenant_id
                    && stream.first().is_some_and(|e| e.aggregate_type == aggregate_type)
            })
            .flat_map(|(_, stream)| stream.iter().cloned())
            .collect())
    }
}
