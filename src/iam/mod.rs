//! IAM domain events, their translation into policy-engine relationship
//! operations, and the transactional outbox that carries them (C2-C6).

pub mod events;
pub mod outbox;
pub mod policy_engine;
pub mod translator;

pub use events::DomainEvent;
pub use outbox::{OutboxEntry, OutboxRepository, OutboxWorker, WorkerHandle};
pub use policy_engine::{GrpcPolicyEngineClient, PolicyEngineClient, PolicyEngineError};
pub use translator::{CompositeTranslator, IamEventTranslator, RelationshipOperation};
