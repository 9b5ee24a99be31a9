// loader.rs — Turn policy definitions into Policy values.
//
// Where definitions are stored (custom resources, config maps, files) is the
// host's business. This module parses text the host already fetched, or a
// local file, and builds the validated effective policy for evaluation.
//
// File format is chosen by extension: `.yaml`/`.yml` or `.json`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PolicyError;
use crate::policy::Policy;

/// Parses and validates policy definitions.
pub struct PolicyLoader;

impl PolicyLoader {
    pub fn from_yaml_str(content: &str) -> Result<Policy, PolicyError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Policy, PolicyError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parse a policy file without validating it.
    pub fn from_file(path: &Path) -> Result<Policy, PolicyError> {
        let format = PolicyFormat::for_path(path).ok_or_else(|| PolicyError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        let content = fs::read_to_string(path).map_err(|source| PolicyError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        match format {
            PolicyFormat::Yaml => Self::from_yaml_str(&content),
            PolicyFormat::Json => Self::from_json_str(&content),
        }
    }

    /// Parse a policy file and reject it if it breaks a structural invariant.
    pub fn load_validated(path: &Path) -> Result<Policy, PolicyError> {
        let policy = Self::from_file(path)?;
        policy.check_format()?;
        Ok(policy)
    }

    /// Load every policy file in a directory, in file name order.
    ///
    /// Files with other extensions are ignored. Each policy is validated.
    pub fn load_dir(dir: &Path) -> Result<Vec<Policy>, PolicyError> {
        let io_err = |source| PolicyError::IoError {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && PolicyFormat::for_path(&path).is_some() {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|p| Self::load_validated(p)).collect()
    }

    /// Validate each source and merge them, in order, into one effective policy.
    pub fn effective(policies: &[Policy]) -> Result<Policy, PolicyError> {
        for policy in policies {
            policy.check_format()?;
        }
        let merged = Policy::merge_all(policies);
        tracing::info!(
            "effective policy from {} source(s): {} enforce, {} ignore, {} owner, {} creator rules",
            policies.len(),
            merged.enforce.len(),
            merged.ignore_request.len(),
            merged.permit_if_verified_owner.len(),
            merged.permit_if_creator.len()
        );
        Ok(merged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyFormat {
    Yaml,
    Json,
}

impl PolicyFormat {
    fn for_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Some(PolicyFormat::Yaml),
            Some("json") => Some(PolicyFormat::Json),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatViolation;
    use crate::policy::PolicyType;

    const DEFAULT_YAML: &str = r#"
policyType: DefaultPolicy
enforce:
  - kind: ConfigMap
  - kind: Secret
ignoreRequest:
  - namespace: kube-system
  - username: "system:node:*"
allowUnverified:
  - namespace: sandbox
"#;

    #[test]
    fn parse_yaml_definition() {
        let policy = PolicyLoader::from_yaml_str(DEFAULT_YAML).unwrap();
        assert_eq!(policy.policy_type, PolicyType::Default);
        assert_eq!(policy.enforce.len(), 2);
        assert_eq!(policy.ignore_request[1].user_name, "system:node:*");
        assert_eq!(policy.allow_unverified[0].namespace, "sandbox");
        assert!(policy.permit_if_creator.is_empty());
    }

    #[test]
    fn parse_json_definition() {
        let policy = PolicyLoader::from_json_str(
            r#"{"policyType": "IEPolicy", "allowedForInternalRequest": [{"username": "system:serviceaccount:ie:*"}]}"#,
        )
        .unwrap();
        assert_eq!(policy.policy_type, PolicyType::IE);
        assert_eq!(policy.allowed_for_internal_request.len(), 1);
    }

    #[test]
    fn missing_policy_type_parses_as_unknown() {
        let policy = PolicyLoader::from_yaml_str("enforce:\n  - kind: Pod\n").unwrap();
        assert_eq!(policy.policy_type, PolicyType::Unknown);
        assert_eq!(
            policy.check_format(),
            Err(FormatViolation::MissingPolicyType)
        );
    }

    #[test]
    fn unknown_policy_type_string_is_a_parse_error() {
        let result = PolicyLoader::from_yaml_str("policyType: NotAPolicy\n");
        assert!(matches!(result, Err(PolicyError::YamlError(_))));
    }

    #[test]
    fn load_validated_from_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.yaml");
        fs::write(&path, DEFAULT_YAML).unwrap();

        let policy = PolicyLoader::load_validated(&path).unwrap();
        assert_eq!(policy.enforce.len(), 2);
    }

    #[test]
    fn load_validated_rejects_invalid_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        fs::write(&path, "policyType: CustomPolicy\nenforce:\n  - kind: Pod\n").unwrap();

        match PolicyLoader::load_validated(&path) {
            Err(PolicyError::InvalidFormat { source }) => {
                assert!(matches!(source, FormatViolation::NamespaceRequired { .. }));
            }
            other => panic!("expected InvalidFormat, got {:?}", other),
        }
    }

    #[test]
    fn unsupported_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            PolicyLoader::from_file(&path),
            Err(PolicyError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = PolicyLoader::from_file(Path::new("/nonexistent/policy.yaml"));
        assert!(matches!(result, Err(PolicyError::IoError { .. })));
    }

    #[test]
    fn load_dir_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("20-custom.json"),
            r#"{"policyType": "CustomPolicy", "namespace": "team-a", "enforce": [{"kind": "Deployment"}]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("10-default.yaml"), DEFAULT_YAML).unwrap();
        fs::write(dir.path().join("README.md"), "not a policy").unwrap();

        let policies = PolicyLoader::load_dir(dir.path()).unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].policy_type, PolicyType::Default);
        assert_eq!(policies[1].namespace, "team-a");

        let effective = PolicyLoader::effective(&policies).unwrap();
        let kinds: Vec<&str> = effective.enforce.iter().map(|p| p.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ConfigMap", "Secret", "Deployment"]);
    }

    #[test]
    fn effective_rejects_invalid_source() {
        let mut signer = Policy::new(PolicyType::Signer);
        signer.ignore_request.push(Default::default());
        let result = PolicyLoader::effective(&[Policy::new(PolicyType::Default), signer]);
        assert!(matches!(
            result,
            Err(PolicyError::InvalidFormat {
                source: FormatViolation::SignerOnly { .. }
            })
        ));
    }
}
