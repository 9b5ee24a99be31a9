// identity.rs — Service identities and their trust annotations.
//
// A caller that authenticates as a service account carries a name of the
// form `system:serviceaccount:<namespace>:<name>`. The ownership walk can
// trust such a caller when its service account object is annotated as
// integrity-verified. How the object is fetched is up to the host: the
// core only sees the `IdentityLookup` trait and the resulting annotations.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::LookupError;

/// Annotation asserting the identity has been cryptographically verified.
pub const INTEGRITY_VERIFIED_ANNOTATION: &str = "integrityVerified";

/// Annotation consulted after `integrityVerified`.
pub const INTEGRITY_UNVERIFIED_ANNOTATION: &str = "integrityUnverified";

/// Trust annotations in the order they are inspected.
const TRUST_ANNOTATIONS: &[&str] = &[
    INTEGRITY_VERIFIED_ANNOTATION,
    INTEGRITY_UNVERIFIED_ANNOTATION,
];

/// A resolved service identity, reduced to what the decision engine reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            annotations: BTreeMap::new(),
        }
    }

    /// Builder-style annotation setter.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Parse a boolean annotation. `None` when absent or malformed.
    pub fn trust_annotation(&self, key: &str) -> Option<bool> {
        let raw = self.annotations.get(key)?;
        let parsed = parse_bool(raw);
        if parsed.is_none() {
            tracing::warn!(
                "service identity {}/{}: malformed annotation {}={:?}, not trusted",
                self.namespace,
                self.name,
                key,
                raw
            );
        }
        parsed
    }

    /// Whether a trust annotation grants this identity.
    ///
    /// Annotations are inspected in order. An absent or `false` annotation
    /// moves on to the next one, the first `true` grants trust, and the first
    /// malformed value ends inspection untrusted.
    pub fn is_trusted(&self) -> bool {
        for key in TRUST_ANNOTATIONS {
            if !self.annotations.contains_key(*key) {
                continue;
            }
            match self.trust_annotation(key) {
                Some(true) => return true,
                Some(false) => continue,
                None => return false,
            }
        }
        false
    }
}

/// Boolean parsing with the accepted spellings of Kubernetes annotation values.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// `(name, namespace)` parsed from a caller identity string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountRef {
    pub name: String,
    pub namespace: String,
}

impl ServiceAccountRef {
    /// Parse `system:...:<namespace>:<name>`.
    ///
    /// Returns `None` unless the user name starts with `system:`; the last
    /// segment is the name and the one before it the namespace.
    pub fn parse(user_name: &str) -> Option<Self> {
        if !user_name.starts_with("system:") {
            return None;
        }
        let mut segments = user_name.rsplit(':');
        let name = segments.next()?;
        let namespace = segments.next()?;
        Some(Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }
}

/// Resolves a service identity by name and namespace.
///
/// Implementations may block on I/O. The decision engine applies no timeout
/// or retry; a failure only makes the current authorization entry not match.
pub trait IdentityLookup {
    fn resolve_service_identity(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<ServiceIdentity, LookupError>;
}

/// A lookup that never finds anything.
///
/// For hosts that do not enable trust via signed service identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentityLookup;

impl IdentityLookup for NoIdentityLookup {
    fn resolve_service_identity(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<ServiceIdentity, LookupError> {
        Err(LookupError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

/// In-memory identity lookup keyed by `(namespace, name)`.
///
/// Counts lookups so callers can observe the per-request cache.
#[derive(Debug, Default)]
pub struct StaticIdentityLookup {
    identities: HashMap<(String, String), ServiceIdentity>,
    lookups: Cell<usize>,
}

impl StaticIdentityLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity. Overwrites any existing entry with the same key.
    pub fn insert(&mut self, identity: ServiceIdentity) {
        self.identities.insert(
            (identity.namespace.clone(), identity.name.clone()),
            identity,
        );
    }

    pub fn with_identity(mut self, identity: ServiceIdentity) -> Self {
        self.insert(identity);
        self
    }

    /// Number of `resolve_service_identity` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.get()
    }
}

impl IdentityLookup for StaticIdentityLookup {
    fn resolve_service_identity(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<ServiceIdentity, LookupError> {
        self.lookups.set(self.lookups.get() + 1);
        self.identities
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}
