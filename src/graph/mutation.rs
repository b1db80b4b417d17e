//! Mutation value objects shared across the bulk-loading pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which side of the graph an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Node,
    Edge,
}

impl EntityType {
    /// Lowercase name, as used in probe fields and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Node => "node",
            EntityType::Edge => "edge",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four mutation verbs a batch line can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationOperationType {
    Define,
    Create,
    Update,
    Delete,
}

/// A property value in a mutation's `set_properties` map. Mirrors the
/// source's open, dynamically typed property dict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
}

impl From<PropertyValue> for serde_json::Value {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Null => serde_json::Value::Null,
            PropertyValue::Bool(b) => serde_json::Value::Bool(b),
            PropertyValue::Number(n) => serde_json::Value::Number(n),
            PropertyValue::String(s) => serde_json::Value::String(s),
            PropertyValue::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            PropertyValue::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// One line of mutation input (§6). `DEFINE` carries type-definition
/// metadata and no `id`; the other three verbs always carry one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MutationOperation {
    pub op: MutationOperationType,

    #[serde(rename = "type")]
    pub entity_type: EntityType,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub start_id: Option<String>,

    #[serde(default)]
    pub end_id: Option<String>,

    #[serde(default)]
    pub set_properties: Option<BTreeMap<String, PropertyValue>>,

    #[serde(default)]
    pub remove_properties: Option<Vec<String>>,

    /// DEFINE-only metadata; absent on CREATE/UPDATE/DELETE.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required_properties: Option<Vec<String>>,
    #[serde(default)]
    pub optional_properties: Option<Vec<String>>,
    #[serde(default)]
    pub example: Option<serde_json::Value>,
}

/// Outcome of one `apply_batch` call (§11): counts plus the first error
/// messages encountered, rather than a bare success/fail boolean.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationResult {
    pub success: bool,
    pub operations_applied: usize,
    pub errors: Vec<String>,
}

impl MutationResult {
    pub fn ok(operations_applied: usize) -> Self {
        Self { success: true, operations_applied, errors: Vec::new() }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, operations_applied: 0, errors: vec![error.into()] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_display_matches_probe_convention() {
        assert_eq!(EntityType::Node.as_str(), "node");
        assert_eq!(EntityType::Edge.as_str(), "edge");
    }

    #[test]
    fn mutation_result_failed_carries_message() {
        let result = MutationResult::failed("boom");
        assert!(!result.success);
        assert_eq!(result.errors, vec!["boom".to_string()]);
    }
}
