//! Wake-up sources for the outbox worker (C5).
//!
//! Two implementations of the same trait: [`PostgresNotifyEventSource`]
//! gets near-real-time delivery via `LISTEN`/`NOTIFY`; [`PollEventSource`]
//! is the fixed-interval floor that guarantees eventual delivery even if a
//! NOTIFY is dropped (Postgres does not persist notifications for
//! disconnected listeners). The worker runs both concurrently.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A source of wake-up signals for the outbox worker. The `Uuid` carried
/// by each signal is informational only — the worker always re-queries
/// for unprocessed rows rather than trusting the notified id to be the
/// only new one (a batch may have been appended between notify and
/// delivery).
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn run(
        &self,
        on_event: mpsc::Sender<Uuid>,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), EventSourceError>;
}

/// LISTEN/NOTIFY-backed event source.
pub struct PostgresNotifyEventSource {
    db_url: String,
    channel: String,
}

impl PostgresNotifyEventSource {
    pub fn new(db_url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self { db_url: db_url.into(), channel: channel.into() }
    }
}

#[async_trait]
impl EventSource for PostgresNotifyEventSource {
    #[tracing::instrument(skip(self, on_event, cancel), fields(channel = %self.channel))]
    async fn run(
        &self,
        on_event: mpsc::Sender<Uuid>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), EventSourceError> {
        let mut listener = PgListener::connect(&self.db_url).await?;
        listener.listen(&self.channel).await?;
        tracing::info!("listening for outbox notifications");

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
                notification = listener.recv() => {
                    let notification = notification?;
                    let payload = notification.payload();
                    match payload.parse::<Uuid>() {
                        Ok(id) => {
                            tracing::debug!(outbox_id = %id, "received outbox notification");
                            if on_event.send(id).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => {
                            tracing::warn!(%payload, "ignoring malformed outbox notification payload");
                        }
                    }
                }
            }
        }

        tracing::info!("outbox notify listener stopped");
        Ok(())
    }
}

/// Fixed-interval fallback, guaranteeing the worker eventually notices
/// unprocessed rows even without a NOTIFY arriving.
pub struct PollEventSource {
    interval: Duration,
}

impl PollEventSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl EventSource for PollEventSource {
    #[tracing::instrument(skip(self, on_event, cancel))]
    async fn run(
        &self,
        on_event: mpsc::Sender<Uuid>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), EventSourceError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if on_event.send(Uuid::nil()).await.is_err() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_payload_parses() {
        let id = Uuid::new_v4();
        assert_eq!(id.to_string().parse::<Uuid>().unwrap(), id);
    }

    #[test]
    fn malformed_payload_fails_to_parse() {
        for payload in ["not-a-uuid", "", "12345"] {
            assert!(payload.parse::<Uuid>().is_err());
        }
    }
}
