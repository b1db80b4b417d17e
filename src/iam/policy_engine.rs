//! Policy-engine client: a relationship-tuple read/write surface backed by
//! the `PolicyEngine` gRPC service in `proto/kartograph/policy.proto`.
//!
//! Grounded on the source's `SpiceDBClient`: `_parse_reference`/
//! `_parse_subject_reference` parse `type:id` and `type:id#relation`
//! strings the same way, and the read paths (`check_permission`,
//! `lookup_resources`, `lookup_subjects`, `read_relationships`) are carried
//! even though the outbox worker itself only calls the write/delete paths
//! (§11: one cohesive client, needed by tests asserting worker outcomes).

use async_trait::async_trait;
use thiserror::Error;
use tonic::transport::Channel;

use crate::iam::translator::{DeleteRelationshipsByFilter, FilterError, RelationshipOperation};
use crate::proto::policy_engine_client::PolicyEngineClient as GeneratedClient;
use crate::proto::{
    self, CheckPermissionRequest, DeleteRelationshipsRequest, LookupResourcesRequest,
    LookupSubjectsRequest, ReadRelationshipsRequest, RelationshipUpdate,
    RelationshipUpdateOperation, WriteRelationshipsRequest,
};
use crate::util::retry::{is_retryable_status, RetryConfig};

#[derive(Debug, Error)]
pub enum PolicyEngineError {
    #[error("invalid {ref_kind} format: '{value}', expected 'type:id'")]
    InvalidReference { ref_kind: &'static str, value: String },
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("policy engine rpc failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("failed to connect to policy engine: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// A subject relation returned by `lookup_subjects`.
///
/// `relation`'s meaning is context-dependent: when a subject relation
/// filter was supplied it holds the subject's own relation (e.g.
/// `"member"` for a `group#member` subject); otherwise it holds the
/// resource permission that was looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRelation {
    pub subject_id: String,
    pub relation: String,
}

fn parse_reference(reference: &str, ref_kind: &'static str) -> Result<(String, String), PolicyEngineError> {
    reference
        .split_once(':')
        .map(|(t, id)| (t.to_string(), id.to_string()))
        .ok_or_else(|| PolicyEngineError::InvalidReference { ref_kind, value: reference.to_string() })
}

fn parse_subject_reference(
    reference: &str,
) -> Result<(String, String, Option<String>), PolicyEngineError> {
    let (subject_type, id_part) = parse_reference(reference, "subject")?;
    match id_part.rsplit_once('#') {
        Some((id, relation)) => Ok((subject_type, id.to_string(), Some(relation.to_string()))),
        None => Ok((subject_type, id_part, None)),
    }
}

/// The relationship-tuple operations the outbox worker and read-side
/// callers need. A trait so tests can substitute an in-memory fake.
#[async_trait]
pub trait PolicyEngineClient: Send + Sync {
    async fn write_relationship(
        &self,
        resource: &str,
        relation: &str,
        subject: &str,
    ) -> Result<(), PolicyEngineError>;

    async fn delete_relationship(
        &self,
        resource: &str,
        relation: &str,
        subject: &str,
    ) -> Result<(), PolicyEngineError>;

    async fn delete_relationships_by_filter(
        &self,
        resource_type: &str,
        resource_id: Option<String>,
        relation: Option<String>,
        subject_type: Option<String>,
        subject_id: Option<String>,
    ) -> Result<(), PolicyEngineError>;

    /// Apply a batch of translated operations in order, one RPC per
    /// operation. A worker wanting single-RPC batching can call
    /// `write_relationships` directly; this is the convenience path used
    /// by the outbox worker's per-event application loop.
    async fn apply(&self, operation: &RelationshipOperation) -> Result<(), PolicyEngineError> {
        match operation {
            RelationshipOperation::Write(w) => {
                self.write_relationship(&w.resource(), w.relation_name(), &w.subject()).await
            }
            RelationshipOperation::Delete(d) => {
                self.delete_relationship(&d.resource(), d.relation_name(), &d.subject()).await
            }
            RelationshipOperation::DeleteByFilter(f) => {
                self.delete_relationships_by_filter(
                    &f.resource_type,
                    f.resource_id.clone(),
                    f.relation.clone(),
                    f.subject_type.clone(),
                    f.subject_id.clone(),
                )
                .await
            }
        }
    }

    async fn check_permission(
        &self,
        resource: &str,
        permission: &str,
        subject: &str,
    ) -> Result<bool, PolicyEngineError>;

    async fn bulk_check_permission(
        &self,
        checks: &[(String, String, String)],
    ) -> Result<Vec<bool>, PolicyEngineError> {
        let mut results = Vec::with_capacity(checks.len());
        for (resource, permission, subject) in checks {
            results.push(self.check_permission(resource, permission, subject).await?);
        }
        Ok(results)
    }

    async fn lookup_resources(
        &self,
        resource_type: &str,
        permission: &str,
        subject: &str,
    ) -> Result<Vec<String>, PolicyEngineError>;

    async fn lookup_subjects(
        &self,
        resource: &str,
        relation: &str,
        subject_type: &str,
        optional_subject_relation: Option<&str>,
    ) -> Result<Vec<SubjectRelation>, PolicyEngineError>;

    async fn read_relationships(
        &self,
        resource_type: &str,
        resource_id: Option<String>,
        relation: Option<String>,
        subject_type: Option<String>,
        subject_id: Option<String>,
    ) -> Result<Vec<proto::Relationship>, PolicyEngineError>;
}

/// Production client wrapping the generated tonic stub, with backoff for
/// transient RPC failures.
#[derive(Clone)]
pub struct GrpcPolicyEngineClient {
    client: GeneratedClient<Channel>,
    retry: RetryConfig,
}

impl GrpcPolicyEngineClient {
    pub async fn connect(endpoint: String) -> Result<Self, PolicyEngineError> {
        let client = GeneratedClient::connect(endpoint).await?;
        Ok(Self { client, retry: RetryConfig::for_policy_engine() })
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, PolicyEngineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, tonic::Status>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(status) if is_retryable_status(&status) && self.retry.should_retry(attempt) => {
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(status) => return Err(PolicyEngineError::Rpc(status)),
            }
        }
    }

    fn build_filter(
        resource_type: &str,
        resource_id: Option<String>,
        relation: Option<String>,
        subject_type: Option<String>,
        subject_id: Option<String>,
    ) -> Result<proto::RelationshipFilter, FilterError> {
        DeleteRelationshipsByFilter::new(
            resource_type.to_string(),
            resource_id.clone(),
            relation.clone(),
            subject_type.clone(),
            subject_id.clone(),
        )?;
        Ok(proto::RelationshipFilter {
            resource_type: resource_type.to_string(),
            optional_resource_id: resource_id,
            optional_relation: relation,
            optional_subject_type: subject_type,
            optional_subject_id: subject_id,
        })
    }
}

#[async_trait]
impl PolicyEngineClient for GrpcPolicyEngineClient {
    async fn write_relationship(
        &self,
        resource: &str,
        relation: &str,
        subject: &str,
    ) -> Result<(), PolicyEngineError> {
        let (resource_type, resource_id) = parse_reference(resource, "resource")?;
        let (subject_type, subject_id, subject_relation) = parse_subject_reference(subject)?;

        let update = RelationshipUpdate {
            operation: RelationshipUpdateOperation::Touch as i32,
            relationship: Some(proto::Relationship {
                resource: Some(proto::ObjectReference {
                    object_type: resource_type,
                    object_id: resource_id,
                }),
                relation: relation.to_string(),
                subject: Some(proto::SubjectReference {
                    object: Some(proto::ObjectReference {
                        object_type: subject_type,
                        object_id: subject_id,
                    }),
                    optional_relation: subject_relation.unwrap_or_default(),
                }),
            }),
        };

        let mut client = self.client.clone();
        self.with_retry(|| {
            let mut client = client.clone();
            let request = WriteRelationshipsRequest { updates: vec![update.clone()] };
            async move { client.write_relationships(request).await.map(|r| r.into_inner()) }
        })
        .await?;
        let _ = &mut client;
        Ok(())
    }

    async fn delete_relationship(
        &self,
        resource: &str,
        relation: &str,
        subject: &str,
    ) -> Result<(), PolicyEngineError> {
        let (resource_type, resource_id) = parse_reference(resource, "resource")?;
        let (subject_type, subject_id, _subject_relation) = parse_subject_reference(subject)?;

        let filter = Self::build_filter(
            &resource_type,
            Some(resource_id),
            Some(relation.to_string()),
            Some(subject_type),
            Some(subject_id),
        )?;

        let client = self.client.clone();
        self.with_retry(|| {
            let mut client = client.clone();
            let request = DeleteRelationshipsRequest { filter: Some(filter.clone()) };
            async move { client.delete_relationships(request).await.map(|r| r.into_inner()) }
        })
        .await?;
        Ok(())
    }

    async fn delete_relationships_by_filter(
        &self,
        resource_type: &str,
        resource_id: Option<String>,
        relation: Option<String>,
        subject_type: Option<String>,
        subject_id: Option<String>,
    ) -> Result<(), PolicyEngineError> {
        let filter =
            Self::build_filter(resource_type, resource_id, relation, subject_type, subject_id)?;

        let client = self.client.clone();
        self.with_retry(|| {
            let mut client = client.clone();
            let request = DeleteRelationshipsRequest { filter: Some(filter.clone()) };
            async move { client.delete_relationships(request).await.map(|r| r.into_inner()) }
        })
        .await?;
        Ok(())
    }

    async fn check_permission(
        &self,
        resource: &str,
        permission: &str,
        subject: &str,
    ) -> Result<bool, PolicyEngineError> {
        let (resource_type, resource_id) = parse_reference(resource, "resource")?;
        let (subject_type, subject_id, subject_relation) = parse_subject_reference(subject)?;

        let client = self.client.clone();
        let response = self
            .with_retry(|| {
                let mut client = client.clone();
                let request = CheckPermissionRequest {
                    resource: Some(proto::ObjectReference {
                        object_type: resource_type.clone(),
                        object_id: resource_id.clone(),
                    }),
                    permission: permission.to_string(),
                    subject: Some(proto::SubjectReference {
                        object: Some(proto::ObjectReference {
                            object_type: subject_type.clone(),
                            object_id: subject_id.clone(),
                        }),
                        optional_relation: subject_relation.clone().unwrap_or_default(),
                    }),
                    fully_consistent: true,
                };
                async move { client.check_permission(request).await.map(|r| r.into_inner()) }
            })
            .await?;
        Ok(response.has_permission)
    }

    async fn lookup_resources(
        &self,
        resource_type: &str,
        permission: &str,
        subject: &str,
    ) -> Result<Vec<String>, PolicyEngineError> {
        let (subject_type, subject_id) = parse_reference(subject, "subject")?;

        let mut client = self.client.clone();
        let request = LookupResourcesRequest {
            resource_type: resource_type.to_string(),
            permission: permission.to_string(),
            subject: Some(proto::SubjectReference {
                object: Some(proto::ObjectReference { object_type: subject_type, object_id: subject_id }),
                optional_relation: String::new(),
            }),
        };

        let mut stream = client.lookup_resources(request).await?.into_inner();
        let mut resource_ids = Vec::new();
        use futures::StreamExt;
        while let Some(response) = stream.next().await {
            resource_ids.push(response?.resource_id);
        }
        Ok(resource_ids)
    }

    async fn lookup_subjects(
        &self,
        resource: &str,
        relation: &str,
        subject_type: &str,
        optional_subject_relation: Option<&str>,
    ) -> Result<Vec<SubjectRelation>, PolicyEngineError> {
        let (resource_type, resource_id) = parse_reference(resource, "resource")?;

        let mut client = self.client.clone();
        let request = LookupSubjectsRequest {
            resource: Some(proto::ObjectReference { object_type: resource_type, object_id: resource_id }),
            permission: relation.to_string(),
            subject_type: subject_type.to_string(),
            optional_subject_relation: optional_subject_relation.map(str::to_string),
        };

        let mut stream = client.lookup_subjects(request).await?.into_inner();
        let mut subjects = Vec::new();
        use futures::StreamExt;
        while let Some(response) = stream.next().await {
            let subject_id = response?.subject_id;
            subjects.push(SubjectRelation {
                subject_id,
                relation: optional_subject_relation.unwrap_or(relation).to_string(),
            });
        }
        Ok(subjects)
    }

    async fn read_relationships(
        &self,
        resource_type: &str,
        resource_id: Option<String>,
        relation: Option<String>,
        subject_type: Option<String>,
        subject_id: Option<String>,
    ) -> Result<Vec<proto::Relationship>, PolicyEngineError> {
        let filter = proto::RelationshipFilter {
            resource_type: resource_type.to_string(),
            optional_resource_id: resource_id,
            optional_relation: relation,
            optional_subject_type: subject_type,
            optional_subject_id: subject_id,
        };

        let mut client = self.client.clone();
        let request = ReadRelationshipsRequest { filter: Some(filter) };
        let mut stream = client.read_relationships(request).await?.into_inner();

        let mut relationships = Vec::new();
        use futures::StreamExt;
        while let Some(response) = stream.next().await {
            if let Some(relationship) = response?.relationship {
                relationships.push(relationship);
            }
        }
        Ok(relationships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_reference() {
        let (t, id) = parse_reference("group:abc123", "resource").unwrap();
        assert_eq!(t, "group");
        assert_eq!(id, "abc123");
    }

    #[test]
    fn rejects_reference_without_colon() {
        let err = parse_reference("groupabc123", "resource").unwrap_err();
        assert!(matches!(err, PolicyEngineError::InvalidReference { ref_kind: "resource", .. }));
    }

    #[test]
    fn parses_subject_with_relation_suffix() {
        let (t, id, relation) = parse_subject_reference("group:eng-team#member").unwrap();
        assert_eq!(t, "group");
        assert_eq!(id, "eng-team");
        assert_eq!(relation.as_deref(), Some("member"));
    }

    #[test]
    fn parses_subject_without_relation_suffix() {
        let (t, id, relation) = parse_subject_reference("user:alice").unwrap();
        assert_eq!(t, "user");
        assert_eq!(id, "alice");
        assert!(relation.is_none());
    }
}
