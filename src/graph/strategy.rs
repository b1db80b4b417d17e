//! Bulk-loading orchestration (C9): stages a batch, resolves edges,
//! upserts label tables under per-label advisory locks, and commits once
//! per batch. Mirrors the outbox worker's accepted duplicate-application
//! tradeoff (§9): a crash after commit but before the caller observes the
//! result can make the caller retry an already-applied batch.

use std::collections::BTreeSet;

use sqlx::{Acquire, PgPool};
use uuid::Uuid;

use super::indexing::create_label_indexes;
use super::mutation::{EntityType, MutationOperation, MutationOperationType, MutationResult};
use super::queries::{
    acquire_advisory_lock, create_label, delete_edges, delete_nodes_with_detach,
    execute_label_upsert, find_entity_table, get_existing_labels, get_label_info,
    remove_properties, update_properties,
};
use super::staging::StagingTableManager;
use super::GraphError;

/// Number of logical ids grouped into a single `ANY($1)` delete.
const DEFAULT_BATCH_SIZE: usize = 1000;

pub struct BulkLoadingStrategy {
    pool: PgPool,
    graph_name: String,
    batch_size: usize,
}

impl BulkLoadingStrategy {
    pub fn new(pool: PgPool, graph_name: impl Into<String>) -> Self {
        Self { pool, graph_name: graph_name.into(), batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Apply one batch of operations as a single transaction. Errors are
    /// caught and folded into a failed [`MutationResult`] rather than
    /// propagated, so a bad batch never poisons a caller's retry loop.
    #[tracing::instrument(skip(self, operations), fields(graph_name = %self.graph_name, batch_size = operations.len()))]
    pub async fn apply_batch(&self, operations: Vec<MutationOperation>) -> MutationResult {
        match self.try_apply_batch(operations).await {
            Ok(applied) => MutationResult::ok(applied),
            Err(err) => {
                tracing::warn!(error = %err, "batch failed, rolling back");
                MutationResult::failed(err.to_string())
            }
        }
    }

    async fn try_apply_batch(&self, operations: Vec<MutationOperation>) -> Result<usize, GraphError> {
        let create_nodes: Vec<MutationOperation> = operations
            .iter()
            .filter(|op| op.op == MutationOperationType::Create && op.entity_type == EntityType::Node)
            .cloned()
            .collect();
        let create_edges: Vec<MutationOperation> = operations
            .iter()
            .filter(|op| op.op == MutationOperationType::Create && op.entity_type == EntityType::Edge)
            .cloned()
            .collect();
        let delete_edge_ids: Vec<String> = operations
            .iter()
            .filter(|op| op.op == MutationOperationType::Delete && op.entity_type == EntityType::Edge)
            .filter_map(|op| op.id.clone())
            .collect();
        let delete_node_ids: Vec<String> = operations
            .iter()
            .filter(|op| op.op == MutationOperationType::Delete && op.entity_type == EntityType::Node)
            .filter_map(|op| op.id.clone())
            .collect();
        let update_ops: Vec<MutationOperation> = operations
            .iter()
            .filter(|op| op.op == MutationOperationType::Update)
            .cloned()
            .collect();

        let mut connection = self.pool.acquire().await?;
        let mut tx = connection.begin().await?;

        let mut touched_labels: BTreeSet<String> = BTreeSet::new();
        touched_labels.extend(create_nodes.iter().filter_map(|op| op.label.clone()));
        touched_labels.extend(create_edges.iter().filter_map(|op| op.label.clone()));
        for label in &touched_labels {
            acquire_advisory_lock(&mut tx, &self.graph_name, label).await?;
        }

        for chunk in chunk_ids(&delete_edge_ids, self.batch_size) {
            delete_edges(&mut tx, &self.graph_name, chunk).await?;
        }
        for chunk in chunk_ids(&delete_node_ids, self.batch_size) {
            delete_nodes_with_detach(&mut tx, &self.graph_name, chunk).await?;
        }

        let mut applied = delete_edge_ids.len() + delete_node_ids.len();

        if !create_nodes.is_empty() {
            applied += self.execute_node_creates(&mut tx, &create_nodes).await?;
        }
        if !create_edges.is_empty() {
            applied += self.execute_edge_creates(&mut tx, &create_edges).await?;
        }

        for op in &update_ops {
            self.execute_update(&mut tx, op).await?;
            applied += 1;
        }

        tx.commit().await?;
        Ok(applied)
    }

    async fn execute_node_creates(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        operations: &[MutationOperation],
    ) -> Result<usize, GraphError> {
        let session_id = session_id();
        let staging_table = StagingTableManager::create_node_staging_table(tx, &session_id).await?;
        StagingTableManager::copy_nodes_to_staging(tx, &staging_table, operations, &self.graph_name).await?;
        StagingTableManager::create_label_index(tx, &staging_table).await?;
        StagingTableManager::check_for_duplicate_ids(tx, &staging_table).await?;

        let labels = StagingTableManager::fetch_distinct_labels(tx, &staging_table).await?;
        let new_labels = self.pre_create_labels_and_indexes(tx, &labels, EntityType::Node).await?;

        let mut applied = 0;
        for label in &labels {
            let is_new = new_labels.contains(label);
            applied += self.upsert_label(tx, label, &staging_table, EntityType::Node, is_new).await?;
        }
        Ok(applied)
    }

    async fn execute_edge_creates(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        operations: &[MutationOperation],
    ) -> Result<usize, GraphError> {
        let session_id = session_id();
        let staging_table = StagingTableManager::create_edge_staging_table(tx, &session_id).await?;
        StagingTableManager::copy_edges_to_staging(tx, &staging_table, operations, &self.graph_name).await?;
        StagingTableManager::create_label_index(tx, &staging_table).await?;
        StagingTableManager::create_edge_resolution_indexes(tx, &staging_table).await?;
        StagingTableManager::check_for_duplicate_ids(tx, &staging_table).await?;

        let (lookup_table, _) =
            StagingTableManager::create_graphid_lookup_table(tx, &self.graph_name, &session_id).await?;
        StagingTableManager::resolve_edge_graphids(tx, &staging_table, &lookup_table).await?;
        StagingTableManager::check_for_orphaned_edges(tx, &staging_table).await?;

        let labels = StagingTableManager::fetch_distinct_labels(tx, &staging_table).await?;
        let new_labels = self.pre_create_labels_and_indexes(tx, &labels, EntityType::Edge).await?;

        let mut applied = 0;
        for label in &labels {
            let is_new = new_labels.contains(label);
            applied += self.upsert_label(tx, label, &staging_table, EntityType::Edge, is_new).await?;
        }
        Ok(applied)
    }

    /// Create any label in `labels` that doesn't exist yet, plus its
    /// index set, before the upsert loop touches it. Returns the labels
    /// that were newly created, so the upsert can skip the existing-row
    /// `NOT EXISTS` check for them.
    async fn pre_create_labels_and_indexes(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        labels: &[String],
        entity_type: EntityType,
    ) -> Result<BTreeSet<String>, GraphError> {
        let existing: BTreeSet<String> = get_existing_labels(tx, &self.graph_name).await?.into_iter().collect();
        let mut newly_created = BTreeSet::new();
        for label in labels {
            if !existing.contains(label) {
                create_label(tx, &self.graph_name, label, entity_type).await?;
                newly_created.insert(label.clone());
            }
            create_label_indexes(tx, &self.graph_name, label, entity_type).await?;
        }
        Ok(newly_created)
    }

    async fn upsert_label(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        label: &str,
        staging_table: &str,
        entity_type: EntityType,
        is_new_label: bool,
    ) -> Result<usize, GraphError> {
        let (label_id, seq_name) = get_label_info(tx, &self.graph_name, label).await?.ok_or_else(|| {
            GraphError::LabelNotFound { graph_name: self.graph_name.clone(), label: label.to_string() }
        })?;

        let (updated, inserted) = execute_label_upsert(
            tx,
            &self.graph_name,
            label,
            label_id,
            &seq_name,
            staging_table,
            entity_type,
            is_new_label,
        )
        .await?;
        Ok((updated + inserted) as usize)
    }

    async fn execute_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        op: &MutationOperation,
    ) -> Result<(), GraphError> {
        let id = op.id.as_deref().ok_or(GraphError::MissingId { op: "UPDATE" })?;
        let entity_type = op.entity_type;
        let table = find_entity_table(tx, &self.graph_name, id, entity_type)
            .await?
            .ok_or_else(|| GraphError::LabelNotFound { graph_name: self.graph_name.clone(), label: id.to_string() })?;

        if let Some(set_properties) = &op.set_properties {
            let value: serde_json::Value = serde_json::Value::Object(
                set_properties.iter().map(|(k, v)| (k.clone(), v.clone().into())).collect(),
            );
            update_properties(tx, &table, id, &value).await?;
        }
        if let Some(remove) = &op.remove_properties {
            if !remove.is_empty() {
                remove_properties(tx, &table, id, remove).await?;
            }
        }
        Ok(())
    }
}

/// Chunk `ids` into groups of `batch_size`, the same cap the source
/// applies to delete batches to bound statement size.
fn chunk_ids(ids: &[String], batch_size: usize) -> impl Iterator<Item = &[String]> {
    ids.chunks(batch_size)
}

fn session_id() -> String {
    Uuid::new_v4().simple().to_string()
}
