// error.rs — Error types for the policy subsystem.

use std::path::PathBuf;

use thiserror::Error;

use crate::policy::PolicyType;

/// The first structural invariant a policy definition breaks.
///
/// Returned by `Policy::check_format()` as a value; the caller decides
/// whether to reject the configuration load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatViolation {
    #[error("\"policyType\" must be set for any Policy")]
    MissingPolicyType,

    #[error("\"namespace\" must be empty for {policy_type}")]
    NamespaceNotAllowed { policy_type: PolicyType },

    #[error("\"namespace\" must be specified for {policy_type}")]
    NamespaceRequired { policy_type: PolicyType },

    #[error("{policy_type} must contain only AllowedSigner rule")]
    SignerOnly { policy_type: PolicyType },

    #[error("{policy_type} must not contain AllowedSigner rule")]
    SignerNotAllowed { policy_type: PolicyType },
}

/// Failure to resolve a service identity through an `IdentityLookup`.
#[derive(Debug, Error)]
pub enum LookupError {
    /// No identity with this name exists in the namespace.
    #[error("service identity '{namespace}/{name}' not found")]
    NotFound { namespace: String, name: String },

    /// The backing store could not answer.
    #[error("identity lookup failed: {0}")]
    Backend(String),
}

/// Errors from loading policy definitions.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse policy YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("failed to parse policy JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The file extension is not one of `.yaml`, `.yml`, `.json`.
    #[error("unsupported policy file format: {path}")]
    UnsupportedFormat { path: PathBuf },

    /// The definition parsed but violates a structural invariant.
    #[error("invalid policy: {source}")]
    InvalidFormat {
        #[from]
        source: FormatViolation,
    },
}
