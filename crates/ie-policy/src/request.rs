// request.rs — The attributes of one inbound admission request.
//
// A RequestContext is built by the admission service for each request and
// handed to one PolicyChecker. It is never shared between requests; the
// only mutable part is the identity slot, filled at most once by the first
// authorization check that needs the caller's service identity.

use serde::{Deserialize, Serialize};

use crate::identity::ServiceIdentity;

/// Organizational metadata attached to the target resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrgMetadata {
    /// The `k8s created-by` tag of the resource, if any.
    #[serde(default)]
    pub k8s_created_by: String,
}

/// Request-scoped cache cell for the caller's resolved service identity.
///
/// Written at most once; later fills keep the first value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySlot(Option<ServiceIdentity>);

impl IdentitySlot {
    pub fn get(&self) -> Option<&ServiceIdentity> {
        self.0.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.is_some()
    }

    /// Store `identity` unless the slot is already filled, and return the cached value.
    pub fn fill(&mut self, identity: ServiceIdentity) -> &ServiceIdentity {
        self.0.get_or_insert(identity)
    }
}

/// Normalized attributes of one admission request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    /// CREATE, UPDATE, DELETE, CONNECT.
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_groups: Vec<String>,
    /// Request type tag assigned by the admission service.
    #[serde(default, rename = "type")]
    pub request_type: String,
    #[serde(default)]
    pub org_metadata: OrgMetadata,
    /// Whether the caller created the target resource.
    #[serde(default)]
    pub is_creator: bool,

    #[serde(skip)]
    pub service_identity: IdentitySlot,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// `group/version`, or `version` alone for the core group.
    pub fn group_version(&self) -> String {
        if self.api_group.is_empty() {
            self.api_version.clone()
        } else {
            format!("{}/{}", self.api_group, self.api_version)
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Set the API group and version of the target resource.
    pub fn with_group_version(
        mut self,
        group: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.api_group = group.into();
        self.api_version = version.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = user_name.into();
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_request_type(mut self, request_type: impl Into<String>) -> Self {
        self.request_type = request_type.into();
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.org_metadata.k8s_created_by = created_by.into();
        self
    }

    pub fn with_creator(mut self, is_creator: bool) -> Self {
        self.is_creator = is_creator;
        self
    }
}
