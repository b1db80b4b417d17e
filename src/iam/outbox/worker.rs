//! Outbox worker (C6): claims unprocessed rows, translates them into
//! policy-engine operations, applies them, and marks them processed.
//!
//! Two tasks run concurrently once [`OutboxWorker::start`] is called — a
//! NOTIFY listener and a fixed-interval poller — both feeding the same
//! `process on wake` loop, coordinated by a `tokio::sync::watch::Sender<bool>`
//! the way `bus::outbox::spawn_postgres_recovery_task` coordinates its own
//! background recovery task.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{Acquire, PgPool};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::event_source::{EventSource, EventSourceError};
use super::repository::{OutboxError, OutboxRepository};
use crate::iam::events::{DomainEvent, EventError};
use crate::iam::policy_engine::{PolicyEngineClient, PolicyEngineError};
use crate::iam::translator::{CompositeTranslator, TranslatorError};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Translator(#[from] TranslatorError),
    #[error(transparent)]
    PolicyEngine(#[from] PolicyEngineError),
    #[error(transparent)]
    EventSource(#[from] EventSourceError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of one `process_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub processed: usize,
}

/// Handle returned by [`OutboxWorker::start`]; call [`stop`](Self::stop) to
/// signal both background tasks to exit.
pub struct WorkerHandle {
    cancel: watch::Sender<bool>,
}

impl WorkerHandle {
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }
}

pub struct OutboxWorker {
    pool: PgPool,
    translator: CompositeTranslator,
    policy_engine: Arc<dyn PolicyEngineClient>,
    batch_size: i64,
    poll_interval: Duration,
    notify_channel: String,
    db_url: String,
}

impl OutboxWorker {
    pub fn new(
        pool: PgPool,
        db_url: impl Into<String>,
        translator: CompositeTranslator,
        policy_engine: Arc<dyn PolicyEngineClient>,
        batch_size: i64,
        poll_interval: Duration,
        notify_channel: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            translator,
            policy_engine,
            batch_size,
            poll_interval,
            notify_channel: notify_channel.into(),
            db_url: db_url.into(),
        }
    }

    /// Spawn the NOTIFY listener, the poll fallback, and the processing
    /// loop that wakes on signals from either.
    pub fn start(self: Arc<Self>) -> WorkerHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (wake_tx, mut wake_rx) = mpsc::channel::<Uuid>(64);

        let notify_source = super::event_source::PostgresNotifyEventSource::new(
            self.db_url.clone(),
            self.notify_channel.clone(),
        );
        let poll_source = super::event_source::PollEventSource::new(self.poll_interval);

        {
            let wake_tx = wake_tx.clone();
            let cancel_rx = cancel_rx.clone();
            tokio::spawn(async move {
                if let Err(error) = notify_source.run(wake_tx, cancel_rx).await {
                    tracing::error!(%error, "outbox notify source stopped with error");
                }
            });
        }

        {
            let cancel_rx = cancel_rx.clone();
            tokio::spawn(async move {
                if let Err(error) = poll_source.run(wake_tx, cancel_rx).await {
                    tracing::error!(%error, "outbox poll source stopped with error");
                }
            });
        }

        {
            let worker = Arc::clone(&self);
            let mut cancel_rx = cancel_rx;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel_rx.changed() => {
                            if *cancel_rx.borrow() {
                                break;
                            }
                        }
                        woken = wake_rx.recv() => {
                            if woken.is_none() {
                                break;
                            }
                            match worker.process_batch().await {
                                Ok(outcome) if outcome.claimed > 0 => {
                                    tracing::debug!(claimed = outcome.claimed, processed = outcome.processed, "outbox batch processed");
                                }
                                Ok(_) => {}
                                Err(error) => tracing::error!(%error, "outbox batch processing failed"),
                            }
                        }
                    }
                }
                tracing::info!("outbox worker processing loop stopped");
            });
        }

        WorkerHandle { cancel: cancel_tx }
    }

    /// Claim a batch, translate and apply each event, mark processed.
    /// Commits once per batch: a crash between a policy-engine write and
    /// the commit means that event is retried on the next pass, so
    /// translated operations must be idempotent (`TOUCH`/filtered
    /// `DELETE` both are) — duplicate application on crash-recovery is an
    /// accepted, documented tradeoff, not engineered away.
    #[tracing::instrument(skip(self))]
    pub async fn process_batch(&self) -> Result<BatchOutcome, WorkerError> {
        let mut connection = self.pool.acquire().await?;
        let mut transaction = connection.begin().await?;

        let entries = OutboxRepository::claim_batch(&mut transaction, self.batch_size).await?;
        let claimed = entries.len();
        let mut processed = 0;

        for entry in entries {
            let event = DomainEvent::from_payload(&entry.event_type, &entry.payload)?;
            let operations = self.translator.translate(&event)?;

            for operation in &operations {
                self.policy_engine.apply(operation).await?;
            }

            OutboxRepository::mark_processed(&mut transaction, entry.id).await?;
            processed += 1;
        }

        transaction.commit().await?;
        Ok(BatchOutcome { claimed, processed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::events::GroupCreated;
    use crate::iam::policy_engine::SubjectRelation;
    use crate::iam::translator::{IamEventTranslator, RelationshipOperation};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPolicyEngine {
        applied: Mutex<Vec<RelationshipOperation>>,
    }

    #[async_trait::async_trait]
    impl PolicyEngineClient for RecordingPolicyEngine {
        async fn write_relationship(&self, _: &str, _: &str, _: &str) -> Result<(), PolicyEngineError> {
            Ok(())
        }
        async fn delete_relationship(&self, _: &str, _: &str, _: &str) -> Result<(), PolicyEngineError> {
            Ok(())
        }
        async fn delete_relationships_by_filter(
            &self,
            _: &str,
            _: Option<String>,
            _: Option<String>,
            _: Option<String>,
            _: Option<String>,
        ) -> Result<(), PolicyEngineError> {
            Ok(())
        }
        async fn apply(&self, operation: &RelationshipOperation) -> Result<(), PolicyEngineError> {
            self.applied.lock().unwrap().push(operation.clone());
            Ok(())
        }
        async fn check_permission(&self, _: &str, _: &str, _: &str) -> Result<bool, PolicyEngineError> {
            Ok(true)
        }
        async fn lookup_resources(&self, _: &str, _: &str, _: &str) -> Result<Vec<String>, PolicyEngineError> {
            Ok(vec![])
        }
        async fn lookup_subjects(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> Result<Vec<SubjectRelation>, PolicyEngineError> {
            Ok(vec![])
        }
        async fn read_relationships(
            &self,
            _: &str,
            _: Option<String>,
            _: Option<String>,
            _: Option<String>,
            _: Option<String>,
        ) -> Result<Vec<crate::proto::Relationship>, PolicyEngineError> {
            Ok(vec![])
        }
    }

    #[test]
    fn translator_resolves_group_created_through_composite() {
        let mut composite = CompositeTranslator::new();
        composite.register(IamEventTranslator);

        let event = DomainEvent::GroupCreated(GroupCreated {
            group_id: "g1".to_string(),
            tenant_id: "t1".to_string(),
        });

        let ops = composite.translate(&event).unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[tokio::test]
    async fn recording_policy_engine_captures_applied_operations() {
        let engine = RecordingPolicyEngine::default();
        let op = RelationshipOperation::Write(crate::iam::translator::WriteRelationship {
            resource_type: "group".to_string(),
            resource_id: "g1".to_string(),
            relation: "tenant".to_string(),
            subject_type: "tenant".to_string(),
            subject_id: "t1".to_string(),
        });

        engine.apply(&op).await.unwrap();
        assert_eq!(engine.applied.lock().unwrap().len(), 1);
    }
}
