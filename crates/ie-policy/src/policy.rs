// policy.rs — Policy definitions: rule lists, scope, validation, merge.
//
// A Policy is one bundle of typed rule lists for a scope. Several sources
// (the default policy, the enforcer's own policy, signer policy, and custom
// per-namespace policies) are merged into one effective rule set before a
// request is evaluated. Rule order survives the merge, which matters for
// the first-match-wins ownership walk.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FormatViolation;
use crate::pattern::{match_against_any, match_pattern};
use crate::request::RequestContext;

/// Which configuration source a policy came from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PolicyType {
    #[default]
    #[serde(rename = "")]
    Unknown,
    #[serde(rename = "DefaultPolicy")]
    Default,
    #[serde(rename = "IEPolicy")]
    IE,
    #[serde(rename = "SignerPolicy")]
    Signer,
    #[serde(rename = "CustomPolicy")]
    Custom,
}

impl PolicyType {
    /// The wire name used in policy definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::Unknown => "",
            PolicyType::Default => "DefaultPolicy",
            PolicyType::IE => "IEPolicy",
            PolicyType::Signer => "SignerPolicy",
            PolicyType::Custom => "CustomPolicy",
        }
    }

    fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            PolicyType::Default | PolicyType::IE | PolicyType::Signer
        )
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomic match unit. Every field is a pattern (see `pattern`); an
/// empty field matches anything, and all fields must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestMatchPattern {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, rename = "username", skip_serializing_if = "String::is_empty")]
    pub user_name: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub request_type: String,
    #[serde(default, rename = "k8screatedby", skip_serializing_if = "String::is_empty")]
    pub k8s_created_by: String,
    #[serde(default, rename = "usergroup", skip_serializing_if = "String::is_empty")]
    pub user_group: String,
}

impl RequestMatchPattern {
    /// Check every field against the request.
    ///
    /// `api_version` is compared with the request's `group/version`;
    /// `user_group` matches if any of the caller's groups matches. A caller
    /// without groups is matched as having the single empty group, so `""`,
    /// `"*"` and `"-"` still match.
    pub fn matches(&self, req: &RequestContext) -> bool {
        let groups_match = if req.user_groups.is_empty() {
            match_pattern(&self.user_group, "")
        } else {
            match_against_any(&self.user_group, &req.user_groups)
        };

        match_pattern(&self.namespace, &req.namespace)
            && match_pattern(&self.name, &req.name)
            && match_pattern(&self.operation, &req.operation)
            && match_pattern(&self.kind, &req.kind)
            && match_pattern(&self.api_version, &req.group_version())
            && match_pattern(&self.user_name, &req.user_name)
            && match_pattern(&self.request_type, &req.request_type)
            && match_pattern(&self.k8s_created_by, &req.org_metadata.k8s_created_by)
            && groups_match
    }
}

/// Signer identity (email/uid) trusted by a signer rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectMatchPattern {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
}

impl SubjectMatchPattern {
    pub fn matches(&self, email: &str, uid: &str) -> bool {
        match_pattern(&self.email, email) && match_pattern(&self.uid, uid)
    }
}

/// Which signer is trusted for which requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignerMatchPattern {
    #[serde(default)]
    pub request: RequestMatchPattern,
    #[serde(default)]
    pub subject: SubjectMatchPattern,
}

impl SignerMatchPattern {
    /// True if the request is in scope and the signer's subject matches.
    pub fn matches(&self, req: &RequestContext, email: &str, uid: &str) -> bool {
        self.request.matches(req) && self.subject.matches(email, uid)
    }
}

/// An ownership/creator exception: which requests it covers and who is
/// authorized, either by name or through a signed service identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllowedUserPattern {
    #[serde(default)]
    pub allow_changes_by_signed_service_account: bool,
    /// Name patterns matched against the last `:` segment of the caller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorized_service_account: Vec<String>,
    #[serde(default)]
    pub request: RequestMatchPattern,
}

/// The owning resource an allowed change is tied to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerMatchCondition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// "These field keys may change when the resource is owned by X."
///
/// Evaluated by the mutation checker of the admission service, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowedChangeCondition {
    #[serde(default)]
    pub request: RequestMatchPattern,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
    #[serde(default)]
    pub owner: OwnerMatchCondition,
}

/// A namespace in which trust-state enforcement is switched off.
///
/// Compared by exact equality, not as a pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowUnverifiedCondition {
    #[serde(default)]
    pub namespace: String,
}

/// The rule set for one scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enforce: Vec<RequestMatchPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_unverified: Vec<AllowUnverifiedCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_request: Vec<RequestMatchPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_signer: Vec<SignerMatchPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_for_internal_request: Vec<RequestMatchPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_by_rule: Vec<RequestMatchPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_change: Vec<AllowedChangeCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permit_if_verified_owner: Vec<AllowedUserPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permit_if_creator: Vec<AllowedUserPattern>,
    /// Empty for cluster-wide policies.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default)]
    pub policy_type: PolicyType,
}

impl Policy {
    pub fn new(policy_type: PolicyType) -> Self {
        Self {
            policy_type,
            ..Self::default()
        }
    }

    /// Check the structural invariants and report the first one broken.
    pub fn check_format(&self) -> Result<(), FormatViolation> {
        let policy_type = self.policy_type;

        if policy_type == PolicyType::Unknown {
            return Err(FormatViolation::MissingPolicyType);
        }
        if !self.namespace.is_empty() && policy_type.is_cluster_scoped() {
            return Err(FormatViolation::NamespaceNotAllowed { policy_type });
        }
        if self.namespace.is_empty() && policy_type == PolicyType::Custom {
            return Err(FormatViolation::NamespaceRequired { policy_type });
        }
        if policy_type == PolicyType::Signer && self.has_non_signer_rules() {
            return Err(FormatViolation::SignerOnly { policy_type });
        }
        if policy_type == PolicyType::Custom && !self.allowed_signer.is_empty() {
            return Err(FormatViolation::SignerNotAllowed { policy_type });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.check_format().is_ok()
    }

    /// Concatenate every rule list, `self` first.
    ///
    /// The result carries no namespace and an `Unknown` type; callers track
    /// the evaluation scope separately.
    pub fn merge(&self, other: &Policy) -> Policy {
        fn concat<T: Clone>(a: &[T], b: &[T]) -> Vec<T> {
            a.iter().chain(b).cloned().collect()
        }

        Policy {
            enforce: concat(&self.enforce, &other.enforce),
            allow_unverified: concat(&self.allow_unverified, &other.allow_unverified),
            ignore_request: concat(&self.ignore_request, &other.ignore_request),
            allowed_signer: concat(&self.allowed_signer, &other.allowed_signer),
            allowed_for_internal_request: concat(
                &self.allowed_for_internal_request,
                &other.allowed_for_internal_request,
            ),
            allowed_by_rule: concat(&self.allowed_by_rule, &other.allowed_by_rule),
            allowed_change: concat(&self.allowed_change, &other.allowed_change),
            permit_if_verified_owner: concat(
                &self.permit_if_verified_owner,
                &other.permit_if_verified_owner,
            ),
            permit_if_creator: concat(&self.permit_if_creator, &other.permit_if_creator),
            namespace: String::new(),
            policy_type: PolicyType::Unknown,
        }
    }

    /// Fold `merge` over several sources in order.
    pub fn merge_all<'a, I>(policies: I) -> Policy
    where
        I: IntoIterator<Item = &'a Policy>,
    {
        policies
            .into_iter()
            .fold(Policy::default(), |acc, p| acc.merge(p))
    }

    /// No rule in any list.
    pub fn is_empty(&self) -> bool {
        self.allowed_signer.is_empty() && !self.has_non_signer_rules()
    }

    // Counts `allow_unverified` too, so a SignerPolicy may not switch off
    // trust-state enforcement. Stricter than checking only the request lists.
    fn has_non_signer_rules(&self) -> bool {
        !(self.enforce.is_empty()
            && self.allow_unverified.is_empty()
            && self.ignore_request.is_empty()
            && self.allowed_for_internal_request.is_empty()
            && self.allowed_by_rule.is_empty()
            && self.allowed_change.is_empty()
            && self.permit_if_verified_owner.is_empty()
            && self.permit_if_creator.is_empty())
    }
}
