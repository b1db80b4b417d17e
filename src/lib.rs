//! Kartograph - multi-tenant IAM core.
//!
//! This crate implements two subsystems:
//! - [`iam`]: the transactional outbox and authorization-projection pipeline
//!   (append domain events alongside aggregate writes, translate them into
//!   policy-engine relationship operations, apply them at-least-once).
//! - [`graph`]: the bulk-loading pipeline that stages large batches of
//!   node/edge mutations into a property graph via COPY + label-partitioned
//!   upserts instead of the graph extension's query language.

pub mod config;
pub mod iam;
pub mod graph;
pub mod util;

pub mod proto {
    tonic::include_proto!("kartograph.policy.v1");
}
