// admission_decisions.rs — End-to-end decisions over merged policy sources.
//
// Each test loads policy definitions the way the admission service would
// (several sources, validated, merged in order), builds one request
// context, and checks the verdicts the service would consume.

use std::fs;

use tempfile::tempdir;

use ie_policy::{
    ConcretePolicyChecker, NoIdentityLookup, Policy, PolicyChecker, PolicyLoader, PolicyType,
    RequestContext, RequestMatchPattern, ServiceIdentity, StaticIdentityLookup,
    INTEGRITY_UNVERIFIED_ANNOTATION, INTEGRITY_VERIFIED_ANNOTATION,
};

const DEFAULT_POLICY: &str = r#"
policyType: DefaultPolicy
enforce:
  - kind: ConfigMap
ignoreRequest:
  - namespace: kube-system
  - kind: Event
allowedForInternalRequest:
  - username: "system:serviceaccount:ie-operator:*"
"#;

const CUSTOM_POLICY: &str = r#"
policyType: CustomPolicy
namespace: team-a
enforce:
  - kind: "Deployment,StatefulSet"
    namespace: team-a
allowUnverified:
  - namespace: team-a-dev
permitIfVerifiedOwner:
  - request:
      kind: Secret
    authorizedServiceAccount:
      - "vault-*"
  - request:
      kind: ConfigMap
    allowChangesBySignedServiceAccount: true
permitIfCreator:
  - request:
      namespace: team-a
    authorizedServiceAccount:
      - deployer
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn effective_policy() -> Policy {
    let default = PolicyLoader::from_yaml_str(DEFAULT_POLICY).unwrap();
    let custom = PolicyLoader::from_yaml_str(CUSTOM_POLICY).unwrap();
    PolicyLoader::effective(&[default, custom]).unwrap()
}

#[test]
fn ignored_namespace_is_never_enforced() {
    init_tracing();
    let policy = Policy {
        enforce: vec![RequestMatchPattern {
            kind: "ConfigMap".to_string(),
            ..Default::default()
        }],
        ignore_request: vec![RequestMatchPattern {
            namespace: "kube-system".to_string(),
            ..Default::default()
        }],
        ..Policy::new(PolicyType::Default)
    };
    let mut req = RequestContext::new()
        .with_kind("ConfigMap")
        .with_namespace("kube-system");
    let checker = ConcretePolicyChecker::new(Some(&policy), &mut req, &NoIdentityLookup);

    assert!(checker.is_ignore_request());
    assert!(!checker.is_enforce_result());
}

#[test]
fn merged_sources_enforce_in_both_scopes() {
    init_tracing();
    let policy = effective_policy();
    assert_eq!(policy.policy_type, PolicyType::Unknown);
    assert_eq!(policy.enforce.len(), 2);

    let mut config_map = RequestContext::new()
        .with_namespace("default")
        .with_kind("ConfigMap")
        .with_operation("CREATE");
    let verdicts =
        ConcretePolicyChecker::new(Some(&policy), &mut config_map, &NoIdentityLookup).verdicts();
    assert!(verdicts.enforce_result);
    assert!(!verdicts.ignore_request);

    let mut stateful_set = RequestContext::new()
        .with_namespace("team-a")
        .with_group_version("apps", "v1")
        .with_kind("StatefulSet");
    let verdicts =
        ConcretePolicyChecker::new(Some(&policy), &mut stateful_set, &NoIdentityLookup).verdicts();
    assert!(verdicts.enforce_result);

    let mut elsewhere = RequestContext::new()
        .with_namespace("team-b")
        .with_kind("Deployment");
    let verdicts =
        ConcretePolicyChecker::new(Some(&policy), &mut elsewhere, &NoIdentityLookup).verdicts();
    assert!(!verdicts.enforce_result);
}

#[test]
fn internal_operator_requests_are_allowed() {
    let policy = effective_policy();
    let mut req = RequestContext::new()
        .with_namespace("ie")
        .with_kind("ConfigMap")
        .with_user("system:serviceaccount:ie-operator:ie-operator");
    let checker = ConcretePolicyChecker::new(Some(&policy), &mut req, &NoIdentityLookup);
    assert!(checker.is_allowed_for_internal_request());
    assert!(!checker.is_allowed_by_rule());
}

#[test]
fn allow_unverified_uses_exact_namespace() {
    let policy = effective_policy();

    let mut dev = RequestContext::new().with_namespace("team-a-dev");
    let checker = ConcretePolicyChecker::new(Some(&policy), &mut dev, &NoIdentityLookup);
    assert!(checker.is_trust_state_enforcement_disabled());

    let mut prod = RequestContext::new().with_namespace("team-a");
    let checker = ConcretePolicyChecker::new(Some(&policy), &mut prod, &NoIdentityLookup);
    assert!(!checker.is_trust_state_enforcement_disabled());
}

#[test]
fn verified_owner_by_authorized_name() {
    let policy = effective_policy();
    let mut req = RequestContext::new()
        .with_namespace("team-a")
        .with_kind("Secret")
        .with_user("system:serviceaccount:vault:vault-agent");
    let mut checker = ConcretePolicyChecker::new(Some(&policy), &mut req, &NoIdentityLookup);
    assert!(checker.permit_if_verified_owner());
}

#[test]
fn verified_owner_by_signed_service_account() {
    init_tracing();
    let policy = effective_policy();
    let lookup = StaticIdentityLookup::new().with_identity(
        ServiceIdentity::new("syncer", "team-a")
            .with_annotation(INTEGRITY_VERIFIED_ANNOTATION, "true"),
    );
    let mut req = RequestContext::new()
        .with_namespace("team-a")
        .with_kind("ConfigMap")
        .with_user("system:serviceaccount:team-a:syncer");

    let trace = ConcretePolicyChecker::new(Some(&policy), &mut req, &lookup).evaluate_with_trace();
    assert!(trace.verdicts.permit_if_verified_owner);
    assert_eq!(trace.steps[5].detail, "matched permitIfVerifiedOwner[1]");
    assert_eq!(
        req.service_identity.get().map(|sa| sa.name.as_str()),
        Some("syncer")
    );
    assert_eq!(lookup.lookup_count(), 1);
}

#[test]
fn malformed_trust_annotation_denies() {
    let policy = effective_policy();
    let lookup = StaticIdentityLookup::new().with_identity(
        ServiceIdentity::new("syncer", "team-a")
            .with_annotation(INTEGRITY_VERIFIED_ANNOTATION, "not-a-bool"),
    );
    let mut req = RequestContext::new()
        .with_namespace("team-a")
        .with_kind("ConfigMap")
        .with_user("system:serviceaccount:team-a:syncer");
    let mut checker = ConcretePolicyChecker::new(Some(&policy), &mut req, &lookup);
    assert!(!checker.permit_if_verified_owner());
}

#[test]
fn malformed_verified_annotation_ignores_unverified() {
    init_tracing();
    let policy = effective_policy();
    let lookup = StaticIdentityLookup::new().with_identity(
        ServiceIdentity::new("syncer", "team-a")
            .with_annotation(INTEGRITY_VERIFIED_ANNOTATION, "not-a-bool")
            .with_annotation(INTEGRITY_UNVERIFIED_ANNOTATION, "true"),
    );
    let mut req = RequestContext::new()
        .with_namespace("team-a")
        .with_kind("ConfigMap")
        .with_user("system:serviceaccount:team-a:syncer");
    let trace = ConcretePolicyChecker::new(Some(&policy), &mut req, &lookup).evaluate_with_trace();
    assert!(!trace.verdicts.permit_if_verified_owner);
    assert_eq!(trace.steps[5].detail, "no permitIfVerifiedOwner rule matched");
}

#[test]
fn creator_exception_only_for_creator() {
    let policy = effective_policy();

    let mut creator = RequestContext::new()
        .with_namespace("team-a")
        .with_kind("Deployment")
        .with_user("system:serviceaccount:team-a:deployer")
        .with_creator(true);
    let mut checker = ConcretePolicyChecker::new(Some(&policy), &mut creator, &NoIdentityLookup);
    assert!(checker.permit_if_creator());

    let mut updater = RequestContext::new()
        .with_namespace("team-a")
        .with_kind("Deployment")
        .with_user("system:serviceaccount:team-a:deployer");
    let mut checker = ConcretePolicyChecker::new(Some(&policy), &mut updater, &NoIdentityLookup);
    assert!(!checker.permit_if_creator());
}

#[test]
fn policy_directory_round_trip() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("00-default.yaml"), DEFAULT_POLICY).unwrap();
    fs::write(dir.path().join("10-team-a.yml"), CUSTOM_POLICY).unwrap();

    let sources = PolicyLoader::load_dir(dir.path()).unwrap();
    let from_dir = PolicyLoader::effective(&sources).unwrap();
    assert_eq!(from_dir, effective_policy());

    // The merged policy is typeless and therefore not itself a valid definition.
    assert!(!from_dir.is_valid());
}

#[test]
fn trace_serializes_for_audit() {
    let policy = effective_policy();
    let mut req = RequestContext::new()
        .with_namespace("kube-system")
        .with_kind("ConfigMap");
    let trace =
        ConcretePolicyChecker::new(Some(&policy), &mut req, &NoIdentityLookup).evaluate_with_trace();

    let json = serde_json::to_value(&trace).unwrap();
    assert_eq!(json["verdicts"]["ignoreRequest"], true);
    assert_eq!(json["verdicts"]["enforceResult"], false);
    assert_eq!(json["steps"].as_array().map(Vec::len), Some(7));
}
