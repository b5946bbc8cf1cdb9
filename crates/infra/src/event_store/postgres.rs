//! Postgres-backed event store implementation.
//!
//! Tenant isolation, optimistic concurrency and append-only semantics are
//! enforced at the database level (see `migrations/0001_events.sql`).
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Concurrent append won the race for a sequence number |
//! | Database (check constraint violation) | `23514` | `InvalidAppend` | Invalid data (e.g. sequence_number <= 0) |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / other | N/A | `Backend` | Connection failures |
//!
//! ## Thread Safety
//!
//! `PostgresEventStore` is `Send + Sync`; the SQLx pool handles connection sharing.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::sync::Arc;
use tracing::{Span, instrument};

use repairdesk_core::{AggregateId, TenantId, UserId};

use super::r#trait::{
    EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent,
    validate_unit_of_work,
};

/// Postgres-backed append-only event store.
///
/// ## Optimistic Concurrency
///
/// `append_all()` runs in one transaction. For each stream it reads
/// `MAX(sequence_number)`, compares it to the expected version and inserts the
/// new rows. If another transaction commits between the read and the insert,
/// the unique key on `(tenant_id, aggregate_id, sequence_number)` fails the
/// insert, the transaction rolls back and the caller sees `Concurrency`.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the bundled schema.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(include_str!("../../../../migrations/0001_events.sql"))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Load all events for a tenant + aggregate stream, ascending.
    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid(),
            event_count = tracing::field::Empty
        ),
        err
    )]
    pub async fn fetch_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                tenant_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                actor_id,
                payload
            FROM events
            WHERE tenant_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let events = rows_to_events(rows)?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    pub async fn fetch_by_type(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                tenant_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                actor_id,
                payload
            FROM events
            WHERE tenant_id = $1 AND aggregate_type = $2
            ORDER BY aggregate_id ASC, sequence_number ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_type)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_by_type", e))?;

        rows_to_events(rows)
    }

    /// Append to every stream in `batches` inside one transaction.
    #[instrument(skip(self, batches), fields(streams = batches.len()), err)]
    pub async fn append_unit_of_work(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        validate_unit_of_work(&batches)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut committed = Vec::new();
        for batch in batches {
            let Some((tenant_id, aggregate_id, aggregate_type)) = batch.stream()? else {
                continue;
            };
            let aggregate_type = aggregate_type.to_string();

            let (current_version, existing_type) =
                check_stream_version(&mut tx, tenant_id, aggregate_id).await?;

            if let Some(existing_type) = existing_type {
                if existing_type != aggregate_type {
                    rollback(tx).await?;
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{existing_type}', attempted append with '{aggregate_type}'"
                    )));
                }
            }

            if !batch.expected_version.matches(current_version) {
                rollback(tx).await?;
                return Err(EventStoreError::Concurrency(format!(
                    "stream {aggregate_id}: expected {:?}, found {current_version}",
                    batch.expected_version
                )));
            }

            let mut next_sequence = current_version + 1;
            for event in batch.events {
                insert_event(&mut tx, &event, next_sequence).await?;
                committed.push(StoredEvent {
                    event_id: event.event_id,
                    tenant_id: event.tenant_id,
                    aggregate_id: event.aggregate_id,
                    aggregate_type: event.aggregate_type,
                    sequence_number: next_sequence,
                    event_type: event.event_type,
                    event_version: event.event_version,
                    occurred_at: event.occurred_at,
                    actor: event.actor,
                    payload: event.payload,
                });
                next_sequence += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }
}

async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), EventStoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &UncommittedEvent,
    sequence_number: u64,
) -> Result<(), EventStoreError> {
    sqlx::query(
        r#"
        INSERT INTO events (
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type,
            sequence_number,
            event_type,
            event_version,
            occurred_at,
            actor_id,
            payload
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(event.event_id)
    .bind(event.tenant_id.as_uuid())
    .bind(event.aggregate_id.as_uuid())
    .bind(&event.aggregate_type)
    .bind(sequence_number as i64)
    .bind(&event.event_type)
    .bind(event.event_version as i32)
    .bind(event.occurred_at)
    .bind(event.actor.as_uuid())
    .bind(&event.payload)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            EventStoreError::Concurrency(format!(
                "concurrent append detected: sequence_number {sequence_number} already exists"
            ))
        } else {
            map_sqlx_error("insert_event", e)
        }
    })?;
    Ok(())
}

/// Current version of a stream (0 if absent) and its aggregate type.
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) as current_version,
            MAX(aggregate_type) as aggregate_type
        FROM events
        WHERE tenant_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: Option<i64> = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Backend(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Backend(format!("failed to read aggregate_type: {e}")))?;

    Ok((current_version.unwrap_or(0) as u64, aggregate_type))
}

fn rows_to_events(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<StoredEvent>, EventStoreError> {
    rows.iter()
        .map(|row| {
            StoredEventRow::from_row(row)
                .map(StoredEvent::from)
                .map_err(|e| EventStoreError::Backend(format!("failed to decode event row: {e}")))
        })
        .collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => EventStoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

#[derive(Debug)]
struct StoredEventRow {
    event_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    aggregate_id: uuid::Uuid,
    aggregate_type: String,
    sequence_number: i64,
    event_type: String,
    event_version: i32,
    occurred_at: DateTime<Utc>,
    actor_id: uuid::Uuid,
    payload: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            event_id: row.try_get("event_id")?,
            tenant_id: row.try_get("tenant_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            occurred_at: row.try_get("occurred_at")?,
            actor_id: row.try_get("actor_id")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.event_id,
            tenant_id: TenantId::from_uuid(row.tenant_id),
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            sequence_number: row.sequence_number as u64,
            event_type: row.event_type,
            event_version: row.event_version as u32,
            occurred_at: row.occurred_at,
            actor: UserId::from_uuid(row.actor_id),
            payload: row.payload,
        }
    }
}

/// Run an async store call from the synchronous `EventStore` trait.
///
/// Requires a multi-threaded tokio runtime; the current worker is handed over
/// to the blocking section so other tasks keep running.
fn block_on<F, T>(fut: F) -> Result<T, EventStoreError>
where
    F: Future<Output = Result<T, EventStoreError>>,
{
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        EventStoreError::Backend(
            "PostgresEventStore must be called from within a tokio runtime".to_string(),
        )
    })?;
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl EventStore for PostgresEventStore {
    fn append_all(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.append_unit_of_work(batches))
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.fetch_stream(tenant_id, aggregate_id))
    }

    fn load_by_type(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.fetch_by_type(tenant_id, aggregate_type))
    }
}
