//! Parameterized SQL for Apache AGE-backed label management, upserts,
//! deletes, and property merges (C8).
//!
//! Every identifier here (graph name, label, staging-table name) has
//! already passed through [`super::validation::validate_label_name`] or the
//! session-UUID generator before it reaches this module, so composing SQL
//! via `format!` over quoted identifiers is safe — no caller ever threads
//! user-supplied identifiers directly into these functions. Every *value*
//! (as opposed to identifier) is still bound as a parameter.

use sqlx::{PgConnection, Row};

use super::mutation::EntityType;
use super::validation::compute_stable_hash;
use super::GraphError;

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `(label_id, sequence_name)` for a `(graph, label)` pair, if the label
/// already exists.
pub async fn get_label_info(
    connection: &mut PgConnection,
    graph_name: &str,
    label: &str,
) -> Result<Option<(i32, String)>, GraphError> {
    let row = sqlx::query(
        "SELECT l.id, l.seq_name \
         FROM ag_catalog.ag_label l \
         JOIN ag_catalog.ag_graph g ON l.graph = g.graphid \
         WHERE g.name = $1 AND l.name = $2",
    )
    .bind(graph_name)
    .bind(label)
    .fetch_optional(&mut *connection)
    .await?;

    Ok(row.map(|r| (r.get::<i32, _>(0), r.get::<String, _>(1))))
}

/// All non-system label names already present in a graph.
pub async fn get_existing_labels(
    connection: &mut PgConnection,
    graph_name: &str,
) -> Result<Vec<String>, GraphError> {
    let rows = sqlx::query(
        "SELECT l.name \
         FROM ag_catalog.ag_label l \
         JOIN ag_catalog.ag_graph g ON l.graph = g.graphid \
         WHERE g.name = $1 AND l.name NOT LIKE '\\_ag\\_label%' ESCAPE '\\'",
    )
    .bind(graph_name)
    .fetch_all(&mut *connection)
    .await?;

    Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
}

/// Acquire a transaction-scoped advisory lock keyed by a stable hash of
/// `graph_name:label`, released automatically at commit or rollback.
pub async fn acquire_advisory_lock(
    connection: &mut PgConnection,
    graph_name: &str,
    label: &str,
) -> Result<(), GraphError> {
    let key = compute_stable_hash(&format!("{graph_name}:{label}"));
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(&mut *connection)
        .await?;
    Ok(())
}

/// Create a new vertex or edge label via AGE's catalog functions.
pub async fn create_label(
    connection: &mut PgConnection,
    graph_name: &str,
    label: &str,
    entity_type: EntityType,
) -> Result<(), GraphError> {
    let function = match entity_type {
        EntityType::Node => "ag_catalog.create_vlabel",
        EntityType::Edge => "ag_catalog.create_elabel",
    };
    sqlx::query(&format!("SELECT {function}($1, $2)"))
        .bind(graph_name)
        .bind(label)
        .execute(&mut *connection)
        .await?;
    Ok(())
}

/// Upsert a single label's staging rows into its physical table: for a
/// brand-new (empty) label this is a plain insert; for an existing label
/// it is update-then-insert-missing, each keyed by the logical id embedded
/// in `properties`. Returns `(updated, inserted)`.
#[allow(clippy::too_many_arguments)]
pub async fn execute_label_upsert(
    connection: &mut PgConnection,
    graph_name: &str,
    label: &str,
    label_id: i32,
    seq_name: &str,
    staging_table: &str,
    entity_type: EntityType,
    is_new_label: bool,
) -> Result<(u64, u64), GraphError> {
    if is_new_label {
        let query = build_insert_query(graph_name, label, staging_table, seq_name, entity_type, false);
        let result = sqlx::query(&query)
            .bind(label_id)
            .bind(label)
            .execute(&mut *connection)
            .await?;
        return Ok((0, result.rows_affected()));
    }

    let update_query = build_update_existing_query(graph_name, label, staging_table);
    let updated = sqlx::query(&update_query)
        .bind(label)
        .execute(&mut *connection)
        .await?
        .rows_affected();

    let insert_query = build_insert_query(graph_name, label, staging_table, seq_name, entity_type, true);
    let inserted = sqlx::query(&insert_query)
        .bind(label_id)
        .bind(label)
        .execute(&mut *connection)
        .await?
        .rows_affected();

    Ok((updated, inserted))
}

fn build_update_existing_query(graph_name: &str, label: &str, staging_table: &str) -> String {
    format!(
        "UPDATE {}.{} AS t \
         SET properties = (s.properties::text)::ag_catalog.agtype \
         FROM {} AS s \
         WHERE s.label = $1 \
         AND ag_catalog.agtype_object_field_text_agtype(t.properties, '\"id\"'::ag_catalog.agtype) = s.id",
        quote_ident(graph_name),
        quote_ident(label),
        quote_ident(staging_table),
    )
}

fn build_insert_query(
    graph_name: &str,
    label: &str,
    staging_table: &str,
    seq_name: &str,
    entity_type: EntityType,
    skip_existing: bool,
) -> String {
    let seq_literal = format!("\"{graph_name}\".\"{seq_name}\"");
    let not_exists = if skip_existing {
        format!(
            " AND NOT EXISTS (SELECT 1 FROM {}.{} AS existing \
             WHERE ag_catalog.agtype_object_field_text_agtype(existing.properties, '\"id\"'::ag_catalog.agtype) = s.id)",
            quote_ident(graph_name),
            quote_ident(label),
        )
    } else {
        String::new()
    };

    match entity_type {
        EntityType::Node => format!(
            "INSERT INTO {}.{} (id, properties) \
             SELECT ag_catalog._graphid($1, nextval('{}')), (s.properties::text)::ag_catalog.agtype \
             FROM {} AS s \
             WHERE s.label = $2{}",
            quote_ident(graph_name),
            quote_ident(label),
            seq_literal,
            quote_ident(staging_table),
            not_exists,
        ),
        EntityType::Edge => format!(
            "INSERT INTO {}.{} (id, start_id, end_id, properties) \
             SELECT ag_catalog._graphid($1, nextval('{}')), s.start_graphid, s.end_graphid, \
                    (s.properties::text)::ag_catalog.agtype \
             FROM {} AS s \
             WHERE s.label = $2 AND s.start_graphid IS NOT NULL AND s.end_graphid IS NOT NULL{}",
            quote_ident(graph_name),
            quote_ident(label),
            seq_literal,
            quote_ident(staging_table),
            not_exists,
        ),
    }
}

/// Delete nodes and their incident edges (DETACH DELETE semantics),
/// directly against AGE's parent tables.
pub async fn delete_nodes_with_detach(
    connection: &mut PgConnection,
    graph_name: &str,
    ids: &[String],
) -> Result<u64, GraphError> {
    let graph = quote_ident(graph_name);
    sqlx::query(&format!(
        "DELETE FROM {graph}._ag_label_edge \
         WHERE start_id IN (SELECT id FROM {graph}._ag_label_vertex \
             WHERE ag_catalog.agtype_object_field_text_agtype(properties, '\"id\"'::ag_catalog.agtype) = ANY($1)) \
         OR end_id IN (SELECT id FROM {graph}._ag_label_vertex \
             WHERE ag_catalog.agtype_object_field_text_agtype(properties, '\"id\"'::ag_catalog.agtype) = ANY($1))"
    ))
    .bind(ids)
    .execute(&mut *connection)
    .await?;

    let result = sqlx::query(&format!(
        "DELETE FROM {graph}._ag_label_vertex \
         WHERE ag_catalog.agtype_object_field_text_agtype(properties, '\"id\"'::ag_catalog.agtype) = ANY($1)"
    ))
    .bind(ids)
    .execute(&mut *connection)
    .await?;

    Ok(result.rows_affected())
}

/// Delete edges by their logical ids.
pub async fn delete_edges(
    connection: &mut PgConnection,
    graph_name: &str,
    ids: &[String],
) -> Result<u64, GraphError> {
    let result = sqlx::query(&format!(
        "DELETE FROM {}._ag_label_edge \
         WHERE ag_catalog.agtype_object_field_text_agtype(properties, '\"id\"'::ag_catalog.agtype) = ANY($1)",
        quote_ident(graph_name),
    ))
    .bind(ids)
    .execute(&mut *connection)
    .await?;
    Ok(result.rows_affected())
}

/// Locate the label table backing an entity by its logical id, as a
/// fully-qualified `regclass` string (e.g. `"graph"."label"`).
pub async fn find_entity_table(
    connection: &mut PgConnection,
    graph_name: &str,
    entity_id: &str,
    entity_type: EntityType,
) -> Result<Option<String>, GraphError> {
    let parent_table = match entity_type {
        EntityType::Node => "_ag_label_vertex",
        EntityType::Edge => "_ag_label_edge",
    };
    let row = sqlx::query(&format!(
        "SELECT tableoid::regclass::text \
         FROM {}.{} \
         WHERE ag_catalog.agtype_object_field_text_agtype(properties, '\"id\"'::ag_catalog.agtype) = $1",
        quote_ident(graph_name),
        quote_ident(parent_table),
    ))
    .bind(entity_id)
    .fetch_optional(&mut *connection)
    .await?;

    Ok(row.map(|r| r.get::<String, _>(0)))
}

/// Merge `properties` (JSON-encoded) into an entity's existing property
/// map. `table_name` is the `regclass` string returned by
/// [`find_entity_table`] — already quoted, safe to splice directly.
pub async fn update_properties(
    connection: &mut PgConnection,
    table_name: &str,
    entity_id: &str,
    properties: &serde_json::Value,
) -> Result<(), GraphError> {
    sqlx::query(&format!(
        "UPDATE {table_name} AS t \
         SET properties = ((t.properties::text)::jsonb || $1::jsonb)::text::ag_catalog.agtype \
         WHERE ag_catalog.agtype_object_field_text_agtype(t.properties, '\"id\"'::ag_catalog.agtype) = $2"
    ))
    .bind(properties)
    .bind(entity_id)
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// Remove named properties from an entity.
pub async fn remove_properties(
    connection: &mut PgConnection,
    table_name: &str,
    entity_id: &str,
    property_names: &[String],
) -> Result<(), GraphError> {
    sqlx::query(&format!(
        "UPDATE {table_name} AS t \
         SET properties = ((t.properties::text)::jsonb - $1::text[])::text::ag_catalog.agtype \
         WHERE ag_catalog.agtype_object_field_text_agtype(t.properties, '\"id\"'::ag_catalog.agtype) = $2"
    ))
    .bind(property_names)
    .bind(entity_id)
    .execute(&mut *connection)
    .await?;
    Ok(())
}

/// Count staging rows with a resolved `start_graphid`, used for
/// diagnostics after edge resolution.
pub async fn count_resolved_edges(
    connection: &mut PgConnection,
    staging_table: &str,
) -> Result<i64, GraphError> {
    let row = sqlx::query(&format!(
        "SELECT COUNT(*) FROM {} WHERE start_graphid IS NOT NULL",
        quote_ident(staging_table),
    ))
    .fetch_one(&mut *connection)
    .await?;
    Ok(row.get::<i64, _>(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("simple"), "\"simple\"");
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }

    #[test]
    fn insert_query_for_new_label_has_no_not_exists_clause() {
        let query = build_insert_query("g", "person", "_staging_nodes_abc", "person_seq", EntityType::Node, false);
        assert!(query.contains("INSERT INTO \"g\".\"person\""));
        assert!(!query.contains("NOT EXISTS"));
    }

    #[test]
    fn insert_query_for_existing_label_has_not_exists_clause() {
        let query = build_insert_query("g", "person", "_staging_nodes_abc", "person_seq", EntityType::Node, true);
        assert!(query.contains("NOT EXISTS"));
    }

    #[test]
    fn edge_insert_query_requires_both_graphids() {
        let query = build_insert_query("g", "knows", "_staging_edges_abc", "knows_seq", EntityType::Edge, false);
        assert!(query.contains("start_graphid IS NOT NULL"));
        assert!(query.contains("end_graphid IS NOT NULL"));
    }
}
