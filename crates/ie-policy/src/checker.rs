// checker.rs — The decision engine for one admission request.
//
// A PolicyChecker binds the effective Policy to one RequestContext and
// answers the seven questions the admission service needs to render its
// verdict:
//
// 1. Is trust-state enforcement disabled for this namespace?
// 2. Is the request ignored?
// 3. Must the result be enforced? (never when ignored)
// 4. Is it an allowed internal request?
// 5. Is it allowed by rule?
// 6. Is the caller a verified owner?
// 7. Is the caller the creator, and permitted as such?
//
// Missing policy or empty rule lists mean "no match". Lookup failures and
// malformed annotations also mean "no match": the engine fails closed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{IdentityLookup, ServiceAccountRef, ServiceIdentity};
use crate::pattern::match_pattern;
use crate::policy::{AllowedUserPattern, Policy, RequestMatchPattern};
use crate::request::RequestContext;

/// The seven queries of the decision engine.
///
/// The ownership queries take `&mut self` because they may resolve and
/// cache the caller's service identity on the request.
pub trait PolicyChecker {
    fn is_trust_state_enforcement_disabled(&self) -> bool;
    fn is_ignore_request(&self) -> bool;
    fn is_enforce_result(&self) -> bool;
    fn is_allowed_for_internal_request(&self) -> bool;
    fn is_allowed_by_rule(&self) -> bool;
    fn permit_if_verified_owner(&mut self) -> bool;
    fn permit_if_creator(&mut self) -> bool;

    /// Evaluate all seven queries once.
    fn verdicts(&mut self) -> CheckerVerdicts {
        CheckerVerdicts {
            trust_state_enforcement_disabled: self.is_trust_state_enforcement_disabled(),
            ignore_request: self.is_ignore_request(),
            enforce_result: self.is_enforce_result(),
            allowed_for_internal_request: self.is_allowed_for_internal_request(),
            allowed_by_rule: self.is_allowed_by_rule(),
            permit_if_verified_owner: self.permit_if_verified_owner(),
            permit_if_creator: self.permit_if_creator(),
        }
    }
}

/// All seven answers for one request, for the caller to combine with the
/// signature verification result.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckerVerdicts {
    pub trust_state_enforcement_disabled: bool,
    pub ignore_request: bool,
    pub enforce_result: bool,
    pub allowed_for_internal_request: bool,
    pub allowed_by_rule: bool,
    pub permit_if_verified_owner: bool,
    pub permit_if_creator: bool,
}

/// One query in an evaluation trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationStep {
    /// Which query was evaluated (e.g., "ignore_request").
    pub check: String,
    pub result: bool,
    /// Which rule decided, or why none did (e.g., "matched ignoreRequest[0]").
    pub detail: String,
}

/// Verdicts plus the per-query trail, for audit logging by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTrace {
    pub verdicts: CheckerVerdicts,
    pub steps: Vec<EvaluationStep>,
    pub evaluated_at: DateTime<Utc>,
}

/// The policy checker used by the admission service.
pub struct ConcretePolicyChecker<'a> {
    policy: Option<&'a Policy>,
    request: &'a mut RequestContext,
    lookup: &'a dyn IdentityLookup,
}

impl<'a> ConcretePolicyChecker<'a> {
    /// Bind a policy (or none) to the request being evaluated.
    ///
    /// The checker holds the request exclusively for its lifetime; the
    /// identity slot filled during evaluation stays on the request.
    pub fn new(
        policy: Option<&'a Policy>,
        request: &'a mut RequestContext,
        lookup: &'a dyn IdentityLookup,
    ) -> Self {
        Self {
            policy,
            request,
            lookup,
        }
    }

    pub fn request(&self) -> &RequestContext {
        self.request
    }

    /// Evaluate every query and record which rule decided each one.
    pub fn evaluate_with_trace(&mut self) -> EvaluationTrace {
        let unverified = self.unverified_entry();
        let ignored = self.ignore_entry();
        let enforced = self.enforce_entry();
        let internal = self.internal_entry();
        let by_rule = self.rule_entry();
        let owner = self.owner_entry();
        let creator = self.creator_entry();

        let verdicts = CheckerVerdicts {
            trust_state_enforcement_disabled: unverified.is_match(),
            ignore_request: ignored.is_match(),
            enforce_result: enforced.is_match(),
            allowed_for_internal_request: internal.is_match(),
            allowed_by_rule: by_rule.is_match(),
            permit_if_verified_owner: owner.is_match(),
            permit_if_creator: creator.is_match(),
        };
        tracing::debug!(
            "policy check for {} {}/{}: {:?}",
            self.request.operation,
            self.request.namespace,
            self.request.name,
            verdicts
        );

        let steps = vec![
            step("trust_state_enforcement_disabled", "allowUnverified", unverified),
            step("ignore_request", "ignoreRequest", ignored),
            step("enforce_result", "enforce", enforced),
            step(
                "allowed_for_internal_request",
                "allowedForInternalRequest",
                internal,
            ),
            step("allowed_by_rule", "allowedByRule", by_rule),
            step("permit_if_verified_owner", "permitIfVerifiedOwner", owner),
            step("permit_if_creator", "permitIfCreator", creator),
        ];

        EvaluationTrace {
            verdicts,
            steps,
            evaluated_at: Utc::now(),
        }
    }

    // Each query and its trace step are answered by one of these.

    /// Exact namespace equality against `allowUnverified` entries.
    fn unverified_entry(&self) -> Outcome {
        let namespace = &self.request.namespace;
        self.policy
            .and_then(|p| p.allow_unverified.iter().position(|c| &c.namespace == namespace))
            .into()
    }

    fn ignore_entry(&self) -> Outcome {
        self.first_match(self.policy.map(|p| p.ignore_request.as_slice()))
            .into()
    }

    /// Ignore rules take precedence over enforce rules.
    fn enforce_entry(&self) -> Outcome {
        if self.ignore_entry().is_match() {
            return Outcome::Skipped("request is ignored");
        }
        self.first_match(self.policy.map(|p| p.enforce.as_slice()))
            .into()
    }

    fn internal_entry(&self) -> Outcome {
        self.first_match(self.policy.map(|p| p.allowed_for_internal_request.as_slice()))
            .into()
    }

    fn rule_entry(&self) -> Outcome {
        self.first_match(self.policy.map(|p| p.allowed_by_rule.as_slice()))
            .into()
    }

    fn owner_entry(&mut self) -> Outcome {
        let entries = self.policy.map(|p| p.permit_if_verified_owner.as_slice());
        self.authorized_entry(entries).into()
    }

    fn creator_entry(&mut self) -> Outcome {
        if !self.request.is_creator {
            return Outcome::Skipped("caller is not the creator");
        }
        let entries = self.policy.map(|p| p.permit_if_creator.as_slice());
        self.authorized_entry(entries).into()
    }

    /// Index of the first pattern matching the request.
    fn first_match(&self, patterns: Option<&[RequestMatchPattern]>) -> Option<usize> {
        patterns?.iter().position(|p| p.matches(self.request))
    }

    /// The ownership walk: index of the first entry authorizing the caller.
    ///
    /// Entries whose request pattern does not match are skipped. An entry
    /// with authorized names checks only the caller's short name; otherwise
    /// an entry trusting signed service accounts checks the caller's
    /// service identity annotations.
    fn authorized_entry(&mut self, entries: Option<&[AllowedUserPattern]>) -> Option<usize> {
        for (index, entry) in entries?.iter().enumerate() {
            if !entry.request.matches(self.request) {
                continue;
            }

            if !entry.authorized_service_account.is_empty() {
                let caller = short_user_name(&self.request.user_name);
                if entry
                    .authorized_service_account
                    .iter()
                    .any(|pattern| match_pattern(pattern, caller))
                {
                    tracing::debug!("caller '{}' authorized by name (entry {})", caller, index);
                    return Some(index);
                }
            } else if entry.allow_changes_by_signed_service_account {
                let trusted = self
                    .resolved_identity()
                    .is_some_and(ServiceIdentity::is_trusted);
                if trusted {
                    tracing::debug!(
                        "caller '{}' authorized by signed service account (entry {})",
                        self.request.user_name,
                        index
                    );
                    return Some(index);
                }
            }
        }
        None
    }

    /// The caller's service identity, resolved once per request.
    fn resolved_identity(&mut self) -> Option<&ServiceIdentity> {
        if !self.request.service_identity.is_resolved() {
            let sa = ServiceAccountRef::parse(&self.request.user_name)?;
            match self
                .lookup
                .resolve_service_identity(&sa.name, &sa.namespace)
            {
                Ok(identity) => {
                    self.request.service_identity.fill(identity);
                }
                Err(e) => {
                    tracing::warn!(
                        "service account lookup for '{}' failed: {}",
                        self.request.user_name,
                        e
                    );
                    return None;
                }
            }
        }
        self.request.service_identity.get()
    }
}

impl PolicyChecker for ConcretePolicyChecker<'_> {
    fn is_trust_state_enforcement_disabled(&self) -> bool {
        self.unverified_entry().is_match()
    }

    fn is_ignore_request(&self) -> bool {
        self.ignore_entry().is_match()
    }

    fn is_enforce_result(&self) -> bool {
        self.enforce_entry().is_match()
    }

    fn is_allowed_for_internal_request(&self) -> bool {
        self.internal_entry().is_match()
    }

    fn is_allowed_by_rule(&self) -> bool {
        self.rule_entry().is_match()
    }

    fn permit_if_verified_owner(&mut self) -> bool {
        self.owner_entry().is_match()
    }

    fn permit_if_creator(&mut self) -> bool {
        self.creator_entry().is_match()
    }
}

/// How one query was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// The rule at this index of the list matched.
    Matched(usize),
    NoMatch,
    /// The list was not consulted.
    Skipped(&'static str),
}

impl Outcome {
    fn is_match(self) -> bool {
        matches!(self, Outcome::Matched(_))
    }
}

impl From<Option<usize>> for Outcome {
    fn from(index: Option<usize>) -> Self {
        index.map_or(Outcome::NoMatch, Outcome::Matched)
    }
}

/// `ns:serviceaccount:name` → `name`; names without `:` are returned as-is.
fn short_user_name(user_name: &str) -> &str {
    user_name.rsplit(':').next().unwrap_or(user_name)
}

fn step(check: &str, list: &str, outcome: Outcome) -> EvaluationStep {
    EvaluationStep {
        check: check.to_string(),
        result: outcome.is_match(),
        detail: match outcome {
            Outcome::Matched(i) => format!("matched {}[{}]", list, i),
            Outcome::NoMatch => format!("no {} rule matched", list),
            Outcome::Skipped(reason) => format!("skipped: {}", reason),
        },
    }
}
