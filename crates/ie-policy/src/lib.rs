//! # ie-policy
//!
//! Admission policy rules and the decision engine of the integrity enforcer.
//!
//! Policies are loaded from several sources, validated with
//! [`Policy::check_format`], merged into one effective rule set, and bound
//! to a single [`RequestContext`] by a [`ConcretePolicyChecker`]. The checker
//! answers the seven [`PolicyChecker`] queries that the admission service
//! combines with signature verification into its final verdict.
//!
//! ## Key invariants
//!
//! - **Default deny**: no policy, empty rule list, failed identity lookup or
//!   malformed trust annotation → no match.
//! - **Ignore beats enforce**: an ignored request is never enforced.
//! - **First match wins**: ownership entries are walked in merged order.
//! - **One request, one context**: the cached service identity never
//!   outlives the request it was resolved for.

pub mod checker;
pub mod error;
pub mod identity;
pub mod loader;
pub mod pattern;
pub mod policy;
pub mod request;

pub use checker::{
    CheckerVerdicts, ConcretePolicyChecker, EvaluationStep, EvaluationTrace, PolicyChecker,
};
pub use error::{FormatViolation, LookupError, PolicyError};
pub use identity::{
    IdentityLookup, NoIdentityLookup, ServiceAccountRef, ServiceIdentity, StaticIdentityLookup,
    INTEGRITY_UNVERIFIED_ANNOTATION, INTEGRITY_VERIFIED_ANNOTATION,
};
pub use loader::PolicyLoader;
pub use policy::{
    AllowUnverifiedCondition, AllowedChangeCondition, AllowedUserPattern, OwnerMatchCondition,
    Policy, PolicyType, RequestMatchPattern, SignerMatchPattern, SubjectMatchPattern,
};
pub use request::{IdentitySlot, OrgMetadata, RequestContext};
