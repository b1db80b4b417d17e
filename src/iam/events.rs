//! Domain events appended to the outbox alongside aggregate writes.
//!
//! `DomainEvent` is the registry: every event kind the translator can
//! handle is a variant here, so an unregistered kind is a compile error
//! rather than a runtime lookup miss.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("unknown event type: {0}")]
    UnknownEventKind(String),
    #[error("payload does not match schema for event type {event_type}: {source}")]
    PayloadSchemaMismatch {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMember {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreated {
    pub group_id: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDeleted {
    pub group_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAdded {
    pub group_id: String,
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRemoved {
    pub group_id: String,
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRoleChanged {
    pub group_id: String,
    pub user_id: String,
    pub old_role: String,
    pub new_role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyCreated {
    pub api_key_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRevoked {
    pub api_key_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyDeleted {
    pub api_key_id: String,
    pub user_id: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceCreated {
    pub workspace_id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub parent_workspace_id: Option<String>,
    pub is_root: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceDeleted {
    pub workspace_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub parent_workspace_id: Option<String>,
    pub is_root: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMemberAdded {
    pub workspace_id: String,
    pub member_id: String,
    pub member_type: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMemberRemoved {
    pub workspace_id: String,
    pub member_id: String,
    pub member_type: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMemberRoleChanged {
    pub workspace_id: String,
    pub member_id: String,
    pub member_type: String,
    pub old_role: String,
    pub new_role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMemberAdded {
    pub tenant_id: String,
    pub user_id: String,
    pub role: String,
    #[serde(default)]
    pub added_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMemberRemoved {
    pub tenant_id: String,
    pub user_id: String,
    #[serde(default)]
    pub removed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDeleted {
    pub tenant_id: String,
    #[serde(default)]
    pub members: Vec<TenantMember>,
}

/// All IAM domain events that can be appended to the outbox and
/// translated into policy-engine relationship operations.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    GroupCreated(GroupCreated),
    GroupDeleted(GroupDeleted),
    MemberAdded(MemberAdded),
    MemberRemoved(MemberRemoved),
    MemberRoleChanged(MemberRoleChanged),
    ApiKeyCreated(ApiKeyCreated),
    ApiKeyRevoked(ApiKeyRevoked),
    ApiKeyDeleted(ApiKeyDeleted),
    WorkspaceCreated(WorkspaceCreated),
    WorkspaceDeleted(WorkspaceDeleted),
    WorkspaceMemberAdded(WorkspaceMemberAdded),
    WorkspaceMemberRemoved(WorkspaceMemberRemoved),
    WorkspaceMemberRoleChanged(WorkspaceMemberRoleChanged),
    TenantMemberAdded(TenantMemberAdded),
    TenantMemberRemoved(TenantMemberRemoved),
    TenantDeleted(TenantDeleted),
}

impl DomainEvent {
    /// The event type string stored in the outbox row and matched by the
    /// translator.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::GroupCreated(_) => "GroupCreated",
            DomainEvent::GroupDeleted(_) => "GroupDeleted",
            DomainEvent::MemberAdded(_) => "MemberAdded",
            DomainEvent::MemberRemoved(_) => "MemberRemoved",
            DomainEvent::MemberRoleChanged(_) => "MemberRoleChanged",
            DomainEvent::ApiKeyCreated(_) => "APIKeyCreated",
            DomainEvent::ApiKeyRevoked(_) => "APIKeyRevoked",
            DomainEvent::ApiKeyDeleted(_) => "APIKeyDeleted",
            DomainEvent::WorkspaceCreated(_) => "WorkspaceCreated",
            DomainEvent::WorkspaceDeleted(_) => "WorkspaceDeleted",
            DomainEvent::WorkspaceMemberAdded(_) => "WorkspaceMemberAdded",
            DomainEvent::WorkspaceMemberRemoved(_) => "WorkspaceMemberRemoved",
            DomainEvent::WorkspaceMemberRoleChanged(_) => "WorkspaceMemberRoleChanged",
            DomainEvent::TenantMemberAdded(_) => "TenantMemberAdded",
            DomainEvent::TenantMemberRemoved(_) => "TenantMemberRemoved",
            DomainEvent::TenantDeleted(_) => "TenantDeleted",
        }
    }

    /// Serialize the event's payload (without the type tag) for storage
    /// in the outbox row's `payload` column.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            DomainEvent::GroupCreated(e) => serde_json::to_value(e),
            DomainEvent::GroupDeleted(e) => serde_json::to_value(e),
            DomainEvent::MemberAdded(e) => serde_json::to_value(e),
            DomainEvent::MemberRemoved(e) => serde_json::to_value(e),
            DomainEvent::MemberRoleChanged(e) => serde_json::to_value(e),
            DomainEvent::ApiKeyCreated(e) => serde_json::to_value(e),
            DomainEvent::ApiKeyRevoked(e) => serde_json::to_value(e),
            DomainEvent::ApiKeyDeleted(e) => serde_json::to_value(e),
            DomainEvent::WorkspaceCreated(e) => serde_json::to_value(e),
            DomainEvent::WorkspaceDeleted(e) => serde_json::to_value(e),
            DomainEvent::WorkspaceMemberAdded(e) => serde_json::to_value(e),
            DomainEvent::WorkspaceMemberRemoved(e) => serde_json::to_value(e),
            DomainEvent::WorkspaceMemberRoleChanged(e) => serde_json::to_value(e),
            DomainEvent::TenantMemberAdded(e) => serde_json::to_value(e),
            DomainEvent::TenantMemberRemoved(e) => serde_json::to_value(e),
            DomainEvent::TenantDeleted(e) => serde_json::to_value(e),
        }
        .expect("domain event payloads are always representable as JSON")
    }

    /// Reconstruct a `DomainEvent` from an outbox row's `(event_type, payload)`.
    pub fn from_payload(event_type: &str, payload: &serde_json::Value) -> Result<Self, EventError> {
        let wrap = |result: Result<_, serde_json::Error>| {
            result.map_err(|source| EventError::PayloadSchemaMismatch {
                event_type: event_type.to_string(),
                source,
            })
        };

        Ok(match event_type {
            "GroupCreated" => DomainEvent::GroupCreated(wrap(serde_json::from_value(payload.clone()))?),
            "GroupDeleted" => DomainEvent::GroupDeleted(wrap(serde_json::from_value(payload.clone()))?),
            "MemberAdded" => DomainEvent::MemberAdded(wrap(serde_json::from_value(payload.clone()))?),
            "MemberRemoved" => DomainEvent::MemberRemoved(wrap(serde_json::from_value(payload.clone()))?),
            "MemberRoleChanged" => {
                DomainEvent::MemberRoleChanged(wrap(serde_json::from_value(payload.clone()))?)
            }
            "APIKeyCreated" => DomainEvent::ApiKeyCreated(wrap(serde_json::from_value(payload.clone()))?),
            "APIKeyRevoked" => DomainEvent::ApiKeyRevoked(wrap(serde_json::from_value(payload.clone()))?),
            "APIKeyDeleted" => DomainEvent::ApiKeyDeleted(wrap(serde_json::from_value(payload.clone()))?),
            "WorkspaceCreated" => {
                DomainEvent::WorkspaceCreated(wrap(serde_json::from_value(payload.clone()))?)
            }
            "WorkspaceDeleted" => {
                DomainEvent::WorkspaceDeleted(wrap(serde_json::from_value(payload.clone()))?)
            }
            "WorkspaceMemberAdded" => {
                DomainEvent::WorkspaceMemberAdded(wrap(serde_json::from_value(payload.clone()))?)
            }
            "WorkspaceMemberRemoved" => {
                DomainEvent::WorkspaceMemberRemoved(wrap(serde_json::from_value(payload.clone()))?)
            }
            "WorkspaceMemberRoleChanged" => {
                DomainEvent::WorkspaceMemberRoleChanged(wrap(serde_json::from_value(payload.clone()))?)
            }
            "TenantMemberAdded" => {
                DomainEvent::TenantMemberAdded(wrap(serde_json::from_value(payload.clone()))?)
            }
            "TenantMemberRemoved" => {
                DomainEvent::TenantMemberRemoved(wrap(serde_json::from_value(payload.clone()))?)
            }
            "TenantDeleted" => DomainEvent::TenantDeleted(wrap(serde_json::from_value(payload.clone()))?),
            other => return Err(EventError::UnknownEventKind(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_payload() {
        let event = DomainEvent::GroupCreated(GroupCreated {
            group_id: "g1".to_string(),
            tenant_id: "t1".to_string(),
        });

        let payload = event.to_payload();
        let restored = DomainEvent::from_payload(event.event_type(), &payload).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = DomainEvent::from_payload("NotARealEvent", &serde_json::json!({}));
        assert!(matches!(err, Err(EventError::UnknownEventKind(_))));
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let err = DomainEvent::from_payload("GroupCreated", &serde_json::json!({"nope": true}));
        assert!(matches!(err, Err(EventError::PayloadSchemaMismatch { .. })));
    }
}
