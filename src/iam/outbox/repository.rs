//! Transactional outbox repository (C2).
//!
//! `append` takes `&mut PgConnection` (or anything implementing
//! `sqlx::PgExecutor`) so it composes into the same transaction as the
//! aggregate write it accompanies — the append-only log and the
//! aggregate's own row changes commit atomically or not at all.

use chrono::{DateTime, Utc};
use sea_query::{Iden, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::PgExecutor;
use thiserror::Error;
use uuid::Uuid;

use crate::iam::events::DomainEvent;

#[derive(Iden)]
enum Outbox {
    Table,
    Id,
    AggregateType,
    AggregateId,
    EventType,
    Payload,
    OccurredAt,
    ProcessedAt,
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One row of the outbox table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

pub struct OutboxRepository;

impl OutboxRepository {
    /// Append a domain event to the outbox, returning its generated id.
    #[tracing::instrument(skip(executor, event), fields(event_type = event.event_type()))]
    pub async fn append<'e, E>(
        executor: E,
        event: &DomainEvent,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Uuid, OutboxError>
    where
        E: PgExecutor<'e>,
    {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let (sql, values) = Query::insert()
            .into_table(Outbox::Table)
            .columns([
                Outbox::Id,
                Outbox::AggregateType,
                Outbox::AggregateId,
                Outbox::EventType,
                Outbox::Payload,
                Outbox::OccurredAt,
            ])
            .values_panic([
                id.into(),
                aggregate_type.into(),
                aggregate_id.into(),
                event.event_type().into(),
                event.to_payload().into(),
                now.into(),
            ])
            .build_sqlx(PostgresQueryBuilder);

        sqlx::query_with(&sql, values).execute(executor).await?;

        tracing::debug!(outbox_id = %id, "appended outbox entry");
        Ok(id)
    }

    /// Claim up to `limit` unprocessed rows with `FOR UPDATE SKIP LOCKED`,
    /// so concurrent workers never contend for the same row.
    pub async fn claim_batch(
        connection: &mut sqlx::PgConnection,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows = sqlx::query_as::<_, OutboxEntry>(
            "SELECT id, aggregate_type, aggregate_id, event_type, payload, occurred_at, processed_at \
             FROM outbox \
             WHERE processed_at IS NULL \
             ORDER BY occurred_at \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(limit)
        .fetch_all(&mut *connection)
        .await?;

        Ok(rows)
    }

    /// Mark a claimed row processed, within the same transaction as the
    /// batch's policy-engine writes.
    pub async fn mark_processed(
        connection: &mut sqlx::PgConnection,
        id: Uuid,
    ) -> Result<(), OutboxError> {
        sqlx::query("UPDATE outbox SET processed_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *connection)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::events::GroupCreated;

    #[test]
    fn insert_query_is_well_formed() {
        let event = DomainEvent::GroupCreated(GroupCreated {
            group_id: "g1".to_string(),
            tenant_id: "t1".to_string(),
        });

        let (sql, _values) = Query::insert()
            .into_table(Outbox::Table)
            .columns([
                Outbox::Id,
                Outbox::AggregateType,
                Outbox::AggregateId,
                Outbox::EventType,
                Outbox::Payload,
                Outbox::OccurredAt,
            ])
            .values_panic([
                Uuid::new_v4().into(),
                "group".into(),
                "g1".into(),
                event.event_type().into(),
                event.to_payload().into(),
                Utc::now().into(),
            ])
            .build_sqlx(PostgresQueryBuilder);

        assert!(sql.starts_with("INSERT INTO \"outbox\""));
        assert!(sql.contains("\"event_type\""));
    }
}
