//! Graph bulk-loading pipeline (C7-C10): stages large batches of
//! node/edge mutations via COPY, resolves logical ids to graph ids, and
//! upserts label-partitioned tables under per-label advisory locks.

pub mod indexing;
pub mod mutation;
pub mod mutation_input;
pub mod queries;
pub mod staging;
pub mod strategy;
pub mod validation;

use thiserror::Error;

pub use mutation::{EntityType, MutationOperation, MutationOperationType, MutationResult};
pub use mutation_input::{parse_jsonl, MutationInputError};
pub use strategy::BulkLoadingStrategy;
pub use validation::ValidationError;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    InvalidLabelName(#[from] ValidationError),
    #[error("duplicate logical ids found in batch: {ids:?}")]
    DuplicateLogicalId { ids: Vec<String> },
    #[error(
        "orphaned edges detected: {edge_count} edge(s) reference non-existent nodes, \
         missing node ids (first {shown} of {total}): {missing:?}"
    )]
    OrphanedEdgeRef { edge_count: usize, missing: Vec<String>, shown: usize, total: usize },
    #[error("malformed {op} operation: missing id")]
    MissingId { op: &'static str },
    #[error("label '{label}' not found in graph '{graph_name}' after creation")]
    LabelNotFound { graph_name: String, label: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
