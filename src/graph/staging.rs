//! Staging-table management for bulk COPY loads (C7): temp tables,
//! COPY-format row encoding, resolution indexes, the graph-id lookup
//! table, and the orphan/duplicate validation passes.

use sqlx::{PgConnection, Row};

use super::mutation::MutationOperation;
use super::validation::escape_copy_value;
use super::GraphError;

pub struct StagingTableManager;

impl StagingTableManager {
    /// Create a transaction-scoped node staging table, dropped automatically
    /// at commit.
    pub async fn create_node_staging_table(
        connection: &mut PgConnection,
        session_id: &str,
    ) -> Result<String, GraphError> {
        let table_name = format!("_staging_nodes_{session_id}");
        sqlx::query(&format!(
            "CREATE TEMP TABLE \"{table_name}\" (\
                id TEXT NOT NULL, \
                label TEXT NOT NULL, \
                properties JSONB NOT NULL\
             ) ON COMMIT DROP"
        ))
        .execute(&mut *connection)
        .await?;
        Ok(table_name)
    }

    /// Create a transaction-scoped edge staging table with graphid
    /// resolution columns, dropped automatically at commit.
    pub async fn create_edge_staging_table(
        connection: &mut PgConnection,
        session_id: &str,
    ) -> Result<String, GraphError> {
        let table_name = format!("_staging_edges_{session_id}");
        sqlx::query(&format!(
            "CREATE TEMP TABLE \"{table_name}\" (\
                id TEXT NOT NULL, \
                label TEXT NOT NULL, \
                start_id TEXT NOT NULL, \
                end_id TEXT NOT NULL, \
                start_graphid ag_catalog.graphid, \
                end_graphid ag_catalog.graphid, \
                properties JSONB NOT NULL\
             ) ON COMMIT DROP"
        ))
        .execute(&mut *connection)
        .await?;
        Ok(table_name)
    }

    /// Stream node CREATE operations into the staging table via the
    /// COPY protocol. Returns the number of rows copied.
    pub async fn copy_nodes_to_staging(
        connection: &mut PgConnection,
        table_name: &str,
        operations: &[MutationOperation],
        graph_name: &str,
    ) -> Result<usize, GraphError> {
        let mut buffer = String::new();
        for op in operations {
            let id = op.id.as_deref().ok_or(GraphError::MissingId { op: "node CREATE" })?;
            let label = op.label.as_deref().ok_or(GraphError::MissingId { op: "node CREATE" })?;

            let props_json = escape_copy_value(&encode_properties(op, id, graph_name));
            buffer.push_str(&escape_copy_value(id));
            buffer.push('\t');
            buffer.push_str(&escape_copy_value(label));
            buffer.push('\t');
            buffer.push_str(&props_json);
            buffer.push('\n');
        }

        let mut copy = connection
            .copy_in_raw(&format!(
                "COPY \"{table_name}\" (id, label, properties) FROM STDIN WITH (FORMAT text)"
            ))
            .await?;
        copy.send(buffer.into_bytes()).await?;
        copy.finish().await?;
        Ok(operations.len())
    }

    /// Stream edge CREATE operations into the staging table via the COPY
    /// protocol. Returns the number of rows copied.
    pub async fn copy_edges_to_staging(
        connection: &mut PgConnection,
        table_name: &str,
        operations: &[MutationOperation],
        graph_name: &str,
    ) -> Result<usize, GraphError> {
        let mut buffer = String::new();
        for op in operations {
            let id = op.id.as_deref().ok_or(GraphError::MissingId { op: "edge CREATE" })?;
            let label = op.label.as_deref().ok_or(GraphError::MissingId { op: "edge CREATE" })?;
            let start_id = op.start_id.as_deref().ok_or(GraphError::MissingId { op: "edge CREATE" })?;
            let end_id = op.end_id.as_deref().ok_or(GraphError::MissingId { op: "edge CREATE" })?;

            let props_json = escape_copy_value(&encode_properties(op, id, graph_name));
            buffer.push_str(&escape_copy_value(id));
            buffer.push('\t');
            buffer.push_str(&escape_copy_value(label));
            buffer.push('\t');
            buffer.push_str(&escape_copy_value(start_id));
            buffer.push('\t');
            buffer.push_str(&escape_copy_value(end_id));
            buffer.push('\t');
            buffer.push_str(&props_json);
            buffer.push('\n');
        }

        let mut copy = connection
            .copy_in_raw(&format!(
                "COPY \"{table_name}\" (id, label, start_id, end_id, properties) FROM STDIN WITH (FORMAT text)"
            ))
            .await?;
        copy.send(buffer.into_bytes()).await?;
        copy.finish().await?;
        Ok(operations.len())
    }

    /// Distinct labels present in the staging table, so the strategy can
    /// pre-create the ones that don't yet exist.
    pub async fn fetch_distinct_labels(
        connection: &mut PgConnection,
        table_name: &str,
    ) -> Result<Vec<String>, GraphError> {
        let rows = sqlx::query(&format!("SELECT DISTINCT label FROM \"{table_name}\""))
            .fetch_all(&mut *connection)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    /// Index the staging table on `label`, required before any per-label
    /// `WHERE label = ?` scan — otherwise every label is a full table scan.
    pub async fn create_label_index(
        connection: &mut PgConnection,
        table_name: &str,
    ) -> Result<(), GraphError> {
        sqlx::query(&format!(
            "CREATE INDEX \"{table_name}_label_idx\" ON \"{table_name}\" (label)"
        ))
        .execute(&mut *connection)
        .await?;
        Ok(())
    }

    /// Index the edge staging table on `start_id`/`end_id`, required for
    /// the graphid-resolution joins that follow.
    pub async fn create_edge_resolution_indexes(
        connection: &mut PgConnection,
        table_name: &str,
    ) -> Result<(), GraphError> {
        sqlx::query(&format!(
            "CREATE INDEX \"{table_name}_start_id_idx\" ON \"{table_name}\" (start_id)"
        ))
        .execute(&mut *connection)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX \"{table_name}_end_id_idx\" ON \"{table_name}\" (end_id)"
        ))
        .execute(&mut *connection)
        .await?;
        Ok(())
    }

    /// Materialize a flat `(logical_id, graph_id)` lookup table from the
    /// graph's parent vertex table, replacing a join against the
    /// inherited-table hierarchy for resolution. Returns `(table_name,
    /// row_count)`.
    pub async fn create_graphid_lookup_table(
        connection: &mut PgConnection,
        graph_name: &str,
        session_id: &str,
    ) -> Result<(String, i64), GraphError> {
        let lookup_table = format!("_graphid_lookup_{session_id}");
        sqlx::query(&format!(
            "CREATE TEMP TABLE \"{lookup_table}\" ON COMMIT DROP AS \
             SELECT ag_catalog.agtype_object_field_text_agtype(properties, '\"id\"'::ag_catalog.agtype) AS logical_id, \
                    id AS graphid \
             FROM \"{graph_name}\"._ag_label_vertex"
        ))
        .execute(&mut *connection)
        .await?;

        let row = sqlx::query(&format!("SELECT COUNT(*) FROM \"{lookup_table}\""))
            .fetch_one(&mut *connection)
            .await?;
        let row_count: i64 = row.get(0);

        sqlx::query(&format!(
            "CREATE INDEX \"{lookup_table}_logical_id_idx\" ON \"{lookup_table}\" (logical_id)"
        ))
        .execute(&mut *connection)
        .await?;

        Ok((lookup_table, row_count))
    }

    /// Resolve `start_id`/`end_id` to graph ids via the lookup table. Two
    /// separate `UPDATE`s, not one join on both keys, to avoid a cartesian
    /// product. Edges with unresolvable node ids are left with null
    /// graphids for [`check_for_orphaned_edges`] to catch.
    pub async fn resolve_edge_graphids(
        connection: &mut PgConnection,
        table_name: &str,
        lookup_table: &str,
    ) -> Result<(), GraphError> {
        sqlx::query(&format!(
            "UPDATE \"{table_name}\" AS s SET start_graphid = lk.graphid \
             FROM \"{lookup_table}\" AS lk WHERE lk.logical_id = s.start_id"
        ))
        .execute(&mut *connection)
        .await?;

        sqlx::query(&format!(
            "UPDATE \"{table_name}\" AS s SET end_graphid = lk.graphid \
             FROM \"{lookup_table}\" AS lk WHERE lk.logical_id = s.end_id"
        ))
        .execute(&mut *connection)
        .await?;

        Ok(())
    }

    /// Fail the batch if any staged edge has an unresolved endpoint.
    pub async fn check_for_orphaned_edges(
        connection: &mut PgConnection,
        table_name: &str,
    ) -> Result<(), GraphError> {
        let rows = sqlx::query(&format!(
            "SELECT s.id, s.start_id, s.end_id, s.start_graphid, s.end_graphid \
             FROM \"{table_name}\" AS s \
             WHERE s.start_graphid IS NULL OR s.end_graphid IS NULL"
        ))
        .fetch_all(&mut *connection)
        .await?;

        if rows.is_empty() {
            return Ok(());
        }

        let mut missing = std::collections::BTreeSet::new();
        for row in &rows {
            let start_id: String = row.get(1);
            let end_id: String = row.get(2);
            let start_graphid: Option<String> = row.try_get(3).unwrap_or(None);
            let end_graphid: Option<String> = row.try_get(4).unwrap_or(None);
            if start_graphid.is_none() {
                missing.insert(start_id);
            }
            if end_graphid.is_none() {
                missing.insert(end_id);
            }
        }

        let total = missing.len();
        let shown = total.min(10);
        let missing: Vec<String> = missing.into_iter().take(shown).collect();

        Err(GraphError::OrphanedEdgeRef { edge_count: rows.len(), missing, shown, total })
    }

    /// Fail the batch if any logical id in the staging table appears more
    /// than once.
    pub async fn check_for_duplicate_ids(
        connection: &mut PgConnection,
        table_name: &str,
    ) -> Result<(), GraphError> {
        let rows = sqlx::query(&format!(
            "SELECT id FROM \"{table_name}\" GROUP BY id HAVING COUNT(*) > 1"
        ))
        .fetch_all(&mut *connection)
        .await?;

        if rows.is_empty() {
            return Ok(());
        }

        let ids = rows.into_iter().map(|r| r.get::<String, _>(0)).collect();
        Err(GraphError::DuplicateLogicalId { ids })
    }
}

/// Merge `set_properties` with the logical `id` and `graph_id` fields
/// every staged row's properties column must carry (§3), then serialize
/// to canonical JSON.
fn encode_properties(op: &MutationOperation, id: &str, graph_name: &str) -> String {
    let mut map = serde_json::Map::new();
    if let Some(set_properties) = &op.set_properties {
        for (key, value) in set_properties {
            map.insert(key.clone(), value.clone().into());
        }
    }
    map.insert("id".to_string(), serde_json::Value::String(id.to_string()));
    map.insert("graph_id".to_string(), serde_json::Value::String(graph_name.to_string()));
    serde_json::to_string(&serde_json::Value::Object(map)).expect("JSON object always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::mutation::{EntityType, MutationOperationType, PropertyValue};
    use std::collections::BTreeMap;

    fn node_op(id: &str, label: &str) -> MutationOperation {
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), PropertyValue::String("Alice".to_string()));
        MutationOperation {
            op: MutationOperationType::Create,
            entity_type: EntityType::Node,
            id: Some(id.to_string()),
            label: Some(label.to_string()),
            start_id: None,
            end_id: None,
            set_properties: Some(props),
            remove_properties: None,
            description: None,
            required_properties: None,
            optional_properties: None,
            example: None,
        }
    }

    #[test]
    fn encoded_properties_include_logical_id_and_graph_id() {
        let op = node_op("person:1", "person");
        let encoded = encode_properties(&op, "person:1", "kartograph");
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["id"], "person:1");
        assert_eq!(value["graph_id"], "kartograph");
        assert_eq!(value["name"], "Alice");
    }

    #[test]
    fn copy_row_escaping_applies_after_json_encoding() {
        let mut props = BTreeMap::new();
        props.insert("note".to_string(), PropertyValue::String("line1\nline2".to_string()));
        let op = MutationOperation {
            op: MutationOperationType::Create,
            entity_type: EntityType::Node,
            id: Some("person:1".to_string()),
            label: Some("person".to_string()),
            start_id: None,
            end_id: None,
            set_properties: Some(props),
            remove_properties: None,
            description: None,
            required_properties: None,
            optional_properties: None,
            example: None,
        };
        let encoded = encode_properties(&op, "person:1", "kartograph");
        let copy_escaped = escape_copy_value(&encoded);
        assert!(!copy_escaped.contains('\n'));
    }
}
