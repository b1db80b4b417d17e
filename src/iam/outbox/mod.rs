pub mod event_source;
pub mod repository;
pub mod worker;

pub use event_source::{EventSource, EventSourceError, PollEventSource, PostgresNotifyEventSource};
pub use repository::{OutboxEntry, OutboxError, OutboxRepository};
pub use worker::{BatchOutcome, OutboxWorker, WorkerError, WorkerHandle};
