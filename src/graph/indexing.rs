//! Index creation for newly created labels (C10).
//!
//! Three indexes apply to every label (`id`, `properties`, the
//! `properties.id` text-extraction expression); edges get two more
//! (`start_id`, `end_id`) — five total. See `DESIGN.md`'s S6
//! reconciliation for why this count, not the scenario prose's
//! "five/seven", is authoritative.

use sqlx::{PgConnection, Row};

use super::mutation::EntityType;
use super::validation::validate_label_name;
use super::GraphError;

struct IndexDefinition {
    name: String,
    sql: String,
}

fn build_index_definitions(graph_name: &str, label: &str, entity_type: EntityType) -> Vec<IndexDefinition> {
    let mut indexes = vec![
        IndexDefinition {
            name: format!("idx_{graph_name}_{label}_id_btree"),
            sql: format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{graph_name}_{label}_id_btree\" \
                 ON \"{graph_name}\".\"{label}\" USING BTREE (id)"
            ),
        },
        IndexDefinition {
            name: format!("idx_{graph_name}_{label}_props_gin"),
            sql: format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{graph_name}_{label}_props_gin\" \
                 ON \"{graph_name}\".\"{label}\" USING GIN (properties)"
            ),
        },
        IndexDefinition {
            name: format!("idx_{graph_name}_{label}_prop_id_text_btree"),
            sql: format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{graph_name}_{label}_prop_id_text_btree\" \
                 ON \"{graph_name}\".\"{label}\" USING BTREE \
                 (ag_catalog.agtype_object_field_text_agtype(properties, '\"id\"'::ag_catalog.agtype))"
            ),
        },
    ];

    if entity_type == EntityType::Edge {
        indexes.push(IndexDefinition {
            name: format!("idx_{graph_name}_{label}_start_id_btree"),
            sql: format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{graph_name}_{label}_start_id_btree\" \
                 ON \"{graph_name}\".\"{label}\" USING BTREE (start_id)"
            ),
        });
        indexes.push(IndexDefinition {
            name: format!("idx_{graph_name}_{label}_end_id_btree"),
            sql: format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{graph_name}_{label}_end_id_btree\" \
                 ON \"{graph_name}\".\"{label}\" USING BTREE (end_id)"
            ),
        });
    }

    indexes
}

/// Create the index set required for bulk-upsert performance on a label,
/// skipping any that already exist. Returns the number actually created.
#[tracing::instrument(skip(connection))]
pub async fn create_label_indexes(
    connection: &mut PgConnection,
    graph_name: &str,
    label: &str,
    entity_type: EntityType,
) -> Result<usize, GraphError> {
    validate_label_name(graph_name)?;
    validate_label_name(label)?;

    let indexes = build_index_definitions(graph_name, label, entity_type);
    let mut created = 0;

    for index in indexes {
        let exists = sqlx::query(
            "SELECT 1 FROM pg_indexes WHERE schemaname = $1 AND indexname = $2",
        )
        .bind(graph_name)
        .bind(&index.name)
        .fetch_optional(&mut *connection)
        .await?;

        if exists.is_some() {
            continue;
        }

        sqlx::query(&index.sql).execute(&mut *connection).await?;
        created += 1;
    }

    tracing::debug!(graph_name, label, created, "created label indexes");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_label_gets_three_indexes() {
        let indexes = build_index_definitions("kartograph", "person", EntityType::Node);
        assert_eq!(indexes.len(), 3);
    }

    #[test]
    fn edge_label_gets_five_indexes() {
        let indexes = build_index_definitions("kartograph", "knows", EntityType::Edge);
        assert_eq!(indexes.len(), 5);
        assert!(indexes.iter().any(|i| i.name.ends_with("start_id_btree")));
        assert!(indexes.iter().any(|i| i.name.ends_with("end_id_btree")));
    }

    #[test]
    fn property_id_index_uses_same_extraction_function_as_upsert_predicates() {
        let indexes = build_index_definitions("kartograph", "person", EntityType::Node);
        let prop_id_index = indexes
            .iter()
            .find(|i| i.name.ends_with("prop_id_text_btree"))
            .unwrap();
        assert!(prop_id_index.sql.contains("agtype_object_field_text_agtype"));
    }
}
