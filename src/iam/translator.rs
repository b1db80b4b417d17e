//! Translation of IAM domain events into policy-engine relationship
//! operations (C3/C4).
//!
//! `IamEventTranslator` is a thin exhaustive `match` over [`DomainEvent`]
//! variants rather than a `HashMap<String, Box<dyn Translator>>` keyed by
//! string event name: the translatable set is fixed by the enum, so the
//! registry lives in the type system. `CompositeTranslator` still exists
//! above it because the worker only knows it holds "a translator", not
//! which concrete one, and a future second domain's translator can be
//! registered beside this one without the worker changing.

use thiserror::Error;

use super::events::DomainEvent;

/// One relationship write, keyed as `type:id` strings on each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRelationship {
    pub resource_type: String,
    pub resource_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
}

impl WriteRelationship {
    pub fn resource(&self) -> String {
        format!("{}:{}", self.resource_type, self.resource_id)
    }

    pub fn subject(&self) -> String {
        format!("{}:{}", self.subject_type, self.subject_id)
    }

    pub fn relation_name(&self) -> &str {
        &self.relation
    }
}

/// One relationship deletion, same shape as [`WriteRelationship`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRelationship {
    pub resource_type: String,
    pub resource_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
}

impl DeleteRelationship {
    pub fn resource(&self) -> String {
        format!("{}:{}", self.resource_type, self.resource_id)
    }

    pub fn subject(&self) -> String {
        format!("{}:{}", self.subject_type, self.subject_id)
    }

    pub fn relation_name(&self) -> &str {
        &self.relation
    }
}

/// A filter-based bulk deletion. `resource_type` is required; at least
/// one of the remaining fields must be set (enforced by
/// [`DeleteRelationshipsByFilter::new`], mirroring the policy-engine
/// client's own validation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRelationshipsByFilter {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("at least one filter parameter beyond resource_type must be specified")]
    NoFilterCriteria,
    #[error("subject_type must be provided when subject_id is specified")]
    SubjectIdWithoutSubjectType,
}

impl DeleteRelationshipsByFilter {
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: Option<String>,
        relation: Option<String>,
        subject_type: Option<String>,
        subject_id: Option<String>,
    ) -> Result<Self, FilterError> {
        if resource_id.is_none() && relation.is_none() && subject_type.is_none() && subject_id.is_none() {
            return Err(FilterError::NoFilterCriteria);
        }
        if subject_id.is_some() && subject_type.is_none() {
            return Err(FilterError::SubjectIdWithoutSubjectType);
        }
        Ok(Self {
            resource_type: resource_type.into(),
            resource_id,
            relation,
            subject_type,
            subject_id,
        })
    }
}

/// One translated operation to apply against the policy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipOperation {
    Write(WriteRelationship),
    Delete(DeleteRelationship),
    DeleteByFilter(DeleteRelationshipsByFilter),
}

fn write(
    resource_type: &str,
    resource_id: &str,
    relation: &str,
    subject_type: &str,
    subject_id: &str,
) -> RelationshipOperation {
    RelationshipOperation::Write(WriteRelationship {
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        relation: relation.to_string(),
        subject_type: subject_type.to_string(),
        subject_id: subject_id.to_string(),
    })
}

fn delete(
    resource_type: &str,
    resource_id: &str,
    relation: &str,
    subject_type: &str,
    subject_id: &str,
) -> RelationshipOperation {
    RelationshipOperation::Delete(DeleteRelationship {
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        relation: relation.to_string(),
        subject_type: subject_type.to_string(),
        subject_id: subject_id.to_string(),
    })
}

/// Translates a batch of outbox events for one domain into policy-engine
/// operations.
pub trait EventTranslator {
    /// The event-type strings this translator knows how to handle.
    fn supported_event_types(&self) -> &'static [&'static str];

    /// Translate a single event into zero or more operations, in the
    /// order they must be applied.
    fn translate(&self, event: &DomainEvent) -> Vec<RelationshipOperation>;
}

pub const IAM_EVENT_TYPES: &[&str] = &[
    "GroupCreated",
    "GroupDeleted",
    "MemberAdded",
    "MemberRemoved",
    "MemberRoleChanged",
    "APIKeyCreated",
    "APIKeyRevoked",
    "APIKeyDeleted",
    "WorkspaceCreated",
    "WorkspaceDeleted",
    "WorkspaceMemberAdded",
    "WorkspaceMemberRemoved",
    "WorkspaceMemberRoleChanged",
    "TenantMemberAdded",
    "TenantMemberRemoved",
    "TenantDeleted",
];

#[derive(Debug, Default)]
pub struct IamEventTranslator;

impl EventTranslator for IamEventTranslator {
    fn supported_event_types(&self) -> &'static [&'static str] {
        IAM_EVENT_TYPES
    }

    fn translate(&self, event: &DomainEvent) -> Vec<RelationshipOperation> {
        match event {
            DomainEvent::GroupCreated(e) => {
                vec![write("group", &e.group_id, "tenant", "tenant", &e.tenant_id)]
            }

            DomainEvent::GroupDeleted(e) => {
                let mut ops = vec![delete("group", &e.group_id, "tenant", "tenant", &e.tenant_id)];
                ops.extend(e.members.iter().map(|m| {
                    delete("group", &e.group_id, &m.role, "user", &m.user_id)
                }));
                ops
            }

            DomainEvent::MemberAdded(e) => {
                vec![write("group", &e.group_id, &e.role, "user", &e.user_id)]
            }

            DomainEvent::MemberRemoved(e) => {
                vec![delete("group", &e.group_id, &e.role, "user", &e.user_id)]
            }

            DomainEvent::MemberRoleChanged(e) => vec![
                delete("group", &e.group_id, &e.old_role, "user", &e.user_id),
                write("group", &e.group_id, &e.new_role, "user", &e.user_id),
            ],

            DomainEvent::ApiKeyCreated(e) => vec![
                write("api_key", &e.api_key_id, "owner", "user", &e.user_id),
                write("api_key", &e.api_key_id, "tenant", "tenant", &e.tenant_id),
            ],

            DomainEvent::ApiKeyRevoked(_) => Vec::new(),

            DomainEvent::ApiKeyDeleted(e) => vec![
                delete("api_key", &e.api_key_id, "owner", "user", &e.user_id),
                delete("api_key", &e.api_key_id, "tenant", "tenant", &e.tenant_id),
            ],

            DomainEvent::WorkspaceCreated(e) => {
                let mut ops = vec![write(
                    "workspace",
                    &e.workspace_id,
                    "tenant",
                    "tenant",
                    &e.tenant_id,
                )];
                if e.is_root {
                    ops.push(write(
                        "tenant",
                        &e.tenant_id,
                        "root_workspace",
                        "workspace",
                        &e.workspace_id,
                    ));
                } else {
                    let parent = e
                        .parent_workspace_id
                        .as_deref()
                        .expect("non-root workspace always has a parent_workspace_id");
                    ops.push(write("workspace", &e.workspace_id, "parent", "workspace", parent));
                }
                ops
            }

            DomainEvent::WorkspaceDeleted(e) => {
                let mut ops = vec![delete(
                    "workspace",
                    &e.workspace_id,
                    "tenant",
                    "tenant",
                    &e.tenant_id,
                )];
                if e.is_root {
                    ops.push(delete(
                        "tenant",
                        &e.tenant_id,
                        "root_workspace",
                        "workspace",
                        &e.workspace_id,
                    ));
                } else {
                    let parent = e
                        .parent_workspace_id
                        .as_deref()
                        .expect("non-root workspace always has a parent_workspace_id");
                    ops.push(delete("workspace", &e.workspace_id, "parent", "workspace", parent));
                }
                ops
            }

            DomainEvent::WorkspaceMemberAdded(e) => vec![write(
                "workspace",
                &e.workspace_id,
                &e.role,
                &e.member_type,
                &e.member_id,
            )],

            DomainEvent::WorkspaceMemberRemoved(e) => vec![delete(
                "workspace",
                &e.workspace_id,
                &e.role,
                &e.member_type,
                &e.member_id,
            )],

            DomainEvent::WorkspaceMemberRoleChanged(e) => vec![
                delete("workspace", &e.workspace_id, &e.old_role, &e.member_type, &e.member_id),
                write("workspace", &e.workspace_id, &e.new_role, &e.member_type, &e.member_id),
            ],

            DomainEvent::TenantMemberAdded(e) => {
                vec![write("tenant", &e.tenant_id, &e.role, "user", &e.user_id)]
            }

            DomainEvent::TenantMemberRemoved(e) => vec![
                delete("tenant", &e.tenant_id, "admin", "user", &e.user_id),
                delete("tenant", &e.tenant_id, "member", "user", &e.user_id),
            ],

            DomainEvent::TenantDeleted(e) => {
                let filter = DeleteRelationshipsByFilter::new(
                    "tenant",
                    Some(e.tenant_id.clone()),
                    Some("root_workspace".to_string()),
                    None,
                    None,
                )
                .expect("resource_id and relation are always set here");
                let mut ops = vec![RelationshipOperation::DeleteByFilter(filter)];
                ops.extend(
                    e.members
                        .iter()
                        .map(|m| delete("tenant", &e.tenant_id, &m.role, "user", &m.user_id)),
                );
                ops
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TranslatorError {
    #[error("no translator registered for event type: {0}")]
    NoTranslatorRegistered(String),
}

/// Dispatches to the first registered translator that claims an event's
/// type. Mirrors the source's `CompositeTranslator`, which exists so new
/// domains can register their own translator without the worker caring
/// which one handled a given event.
#[derive(Default)]
pub struct CompositeTranslator {
    translators: Vec<Box<dyn EventTranslator + Send + Sync>>,
}

impl CompositeTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, translator: impl EventTranslator + Send + Sync + 'static) -> &mut Self {
        self.translators.push(Box::new(translator));
        self
    }

    pub fn translate(&self, event: &DomainEvent) -> Result<Vec<RelationshipOperation>, TranslatorError> {
        let event_type = event.event_type();
        for translator in &self.translators {
            if translator.supported_event_types().contains(&event_type) {
                return Ok(translator.translate(event));
            }
        }
        Err(TranslatorError::NoTranslatorRegistered(event_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::events::*;

    fn translator() -> IamEventTranslator {
        IamEventTranslator
    }

    #[test]
    fn supports_all_iam_domain_events() {
        let supported = translator().supported_event_types();
        for expected in [
            "GroupCreated",
            "GroupDeleted",
            "MemberAdded",
            "MemberRemoved",
            "MemberRoleChanged",
            "APIKeyCreated",
            "APIKeyRevoked",
            "WorkspaceMemberAdded",
            "WorkspaceMemberRemoved",
            "WorkspaceMemberRoleChanged",
        ] {
            assert!(supported.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn group_created_writes_tenant_relationship() {
        let event = DomainEvent::GroupCreated(GroupCreated {
            group_id: "01ARZCX0P0HZGQP3MZXQQ0NNZZ".to_string(),
            tenant_id: "01ARZCX0P0HZGQP3MZXQQ0NNYY".to_string(),
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            RelationshipOperation::Write(op) => {
                assert_eq!(op.resource(), "group:01ARZCX0P0HZGQP3MZXQQ0NNZZ");
                assert_eq!(op.subject(), "tenant:01ARZCX0P0HZGQP3MZXQQ0NNYY");
                assert_eq!(op.relation_name(), "tenant");
            }
            other => panic!("expected Write, got {other:?}"),
        }
    }

    #[test]
    fn group_deleted_without_members_deletes_only_tenant_relationship() {
        let event = DomainEvent::GroupDeleted(GroupDeleted {
            group_id: "g1".to_string(),
            tenant_id: "t1".to_string(),
            members: vec![],
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], RelationshipOperation::Delete(op) if op.relation_name() == "tenant"));
    }

    #[test]
    fn group_deleted_with_members_deletes_tenant_then_members() {
        let event = DomainEvent::GroupDeleted(GroupDeleted {
            group_id: "g1".to_string(),
            tenant_id: "t1".to_string(),
            members: vec![
                GroupMember { user_id: "user1".to_string(), role: "admin".to_string() },
                GroupMember { user_id: "user2".to_string(), role: "member".to_string() },
            ],
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|op| matches!(op, RelationshipOperation::Delete(_))));
        let roles: Vec<&str> = ops[1..]
            .iter()
            .map(|op| match op {
                RelationshipOperation::Delete(d) => d.relation_name(),
                _ => unreachable!(),
            })
            .collect();
        assert!(roles.contains(&"admin"));
        assert!(roles.contains(&"member"));
    }

    #[test]
    fn member_role_changed_deletes_old_then_writes_new() {
        let event = DomainEvent::MemberRoleChanged(MemberRoleChanged {
            group_id: "g1".to_string(),
            user_id: "u1".to_string(),
            old_role: "member".to_string(),
            new_role: "admin".to_string(),
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], RelationshipOperation::Delete(d) if d.relation_name() == "member"));
        assert!(matches!(&ops[1], RelationshipOperation::Write(w) if w.relation_name() == "admin"));
    }

    #[test]
    fn api_key_created_writes_owner_then_tenant() {
        let event = DomainEvent::ApiKeyCreated(ApiKeyCreated {
            api_key_id: "k1".to_string(),
            user_id: "user-123-abc".to_string(),
            tenant_id: "t1".to_string(),
            name: "test-key".to_string(),
            prefix: "karto_abc123".to_string(),
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 2);
        match (&ops[0], &ops[1]) {
            (RelationshipOperation::Write(owner), RelationshipOperation::Write(tenant)) => {
                assert_eq!(owner.relation_name(), "owner");
                assert_eq!(owner.subject(), "user:user-123-abc");
                assert_eq!(tenant.relation_name(), "tenant");
                assert_eq!(tenant.subject(), "tenant:t1");
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn api_key_revoked_keeps_relationships() {
        let event = DomainEvent::ApiKeyRevoked(ApiKeyRevoked {
            api_key_id: "k1".to_string(),
            user_id: "user-123-abc".to_string(),
        });

        assert!(translator().translate(&event).is_empty());
    }

    #[test]
    fn api_key_deleted_removes_all_relationships() {
        let event = DomainEvent::ApiKeyDeleted(ApiKeyDeleted {
            api_key_id: "k1".to_string(),
            user_id: "user-123-abc".to_string(),
            tenant_id: "t1".to_string(),
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| matches!(op, RelationshipOperation::Delete(_))));
    }

    #[test]
    fn tenant_member_removed_deletes_both_roles() {
        let event = DomainEvent::TenantMemberRemoved(TenantMemberRemoved {
            tenant_id: "01TENANT123".to_string(),
            user_id: "user-456".to_string(),
            removed_by: Some("user-admin".to_string()),
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 2);
        let relations: std::collections::HashSet<&str> = ops
            .iter()
            .map(|op| match op {
                RelationshipOperation::Delete(d) => d.relation_name(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(relations, ["admin", "member"].into_iter().collect());
    }

    #[test]
    fn tenant_deleted_filter_deletion_precedes_members() {
        let event = DomainEvent::TenantDeleted(TenantDeleted {
            tenant_id: "01TENANT123".to_string(),
            members: vec![TenantMember { user_id: "user-1".to_string(), role: "member".to_string() }],
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], RelationshipOperation::DeleteByFilter(_)));
        assert!(matches!(&ops[1], RelationshipOperation::Delete(_)));
    }

    #[test]
    fn tenant_deleted_with_no_members_still_emits_filter_deletion() {
        let event = DomainEvent::TenantDeleted(TenantDeleted {
            tenant_id: "01TENANT123".to_string(),
            members: vec![],
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            RelationshipOperation::DeleteByFilter(f) => {
                assert_eq!(f.resource_type, "tenant");
                assert_eq!(f.resource_id.as_deref(), Some("01TENANT123"));
                assert_eq!(f.relation.as_deref(), Some("root_workspace"));
                assert!(f.subject_type.is_none());
                assert!(f.subject_id.is_none());
            }
            other => panic!("expected DeleteByFilter, got {other:?}"),
        }
    }

    #[test]
    fn workspace_created_root_writes_tenant_then_root_workspace() {
        let event = DomainEvent::WorkspaceCreated(WorkspaceCreated {
            workspace_id: "01WORKSPACE_ROOT".to_string(),
            tenant_id: "01TENANT_ABC".to_string(),
            name: "Root Workspace".to_string(),
            parent_workspace_id: None,
            is_root: true,
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 2);
        match (&ops[0], &ops[1]) {
            (RelationshipOperation::Write(tenant_op), RelationshipOperation::Write(root_op)) => {
                assert_eq!(tenant_op.resource(), "workspace:01WORKSPACE_ROOT");
                assert_eq!(tenant_op.relation_name(), "tenant");
                assert_eq!(root_op.resource(), "tenant:01TENANT_ABC");
                assert_eq!(root_op.relation_name(), "root_workspace");
                assert_eq!(root_op.subject(), "workspace:01WORKSPACE_ROOT");
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn workspace_created_child_writes_tenant_then_parent() {
        let event = DomainEvent::WorkspaceCreated(WorkspaceCreated {
            workspace_id: "01WORKSPACE_CHILD".to_string(),
            tenant_id: "01TENANT_ABC".to_string(),
            name: "Engineering".to_string(),
            parent_workspace_id: Some("01WORKSPACE_ROOT".to_string()),
            is_root: false,
        });

        let ops = translator().translate(&event);
        assert_eq!(ops.len(), 2);
        match &ops[1] {
            RelationshipOperation::Write(parent_op) => {
                assert_eq!(parent_op.relation_name(), "parent");
                assert_eq!(parent_op.subject(), "workspace:01WORKSPACE_ROOT");
            }
            other => panic!("expected Write, got {other:?}"),
        }
    }

    #[test]
    fn workspace_member_role_changed_uses_member_type_as_subject_type() {
        let event = DomainEvent::WorkspaceMemberRoleChanged(WorkspaceMemberRoleChanged {
            workspace_id: "01WORKSPACE_ABC".to_string(),
            member_id: "01GROUP_ENG".to_string(),
            member_type: "group".to_string(),
            old_role: "editor".to_string(),
            new_role: "admin".to_string(),
        });

        let ops = translator().translate(&event);
        for op in &ops {
            let subject = match op {
                RelationshipOperation::Write(w) => w.subject(),
                RelationshipOperation::Delete(d) => d.subject(),
                _ => unreachable!(),
            };
            assert_eq!(subject, "group:01GROUP_ENG");
        }
    }

    #[test]
    fn filter_rejects_bare_resource_type() {
        let err = DeleteRelationshipsByFilter::new("tenant", None, None, None, None).unwrap_err();
        assert_eq!(err, FilterError::NoFilterCriteria);
    }

    #[test]
    fn filter_rejects_subject_id_without_subject_type() {
        let err = DeleteRelationshipsByFilter::new(
            "tenant",
            None,
            None,
            None,
            Some("u1".to_string()),
        )
        .unwrap_err();
        assert_eq!(err, FilterError::SubjectIdWithoutSubjectType);
    }

    #[test]
    fn composite_translator_dispatches_to_registered_translator() {
        let mut composite = CompositeTranslator::new();
        composite.register(IamEventTranslator);

        let event = DomainEvent::MemberAdded(MemberAdded {
            group_id: "g1".to_string(),
            user_id: "u1".to_string(),
            role: "member".to_string(),
        });

        let ops = composite.translate(&event).unwrap();
        assert_eq!(ops.len(), 1);
    }
}
