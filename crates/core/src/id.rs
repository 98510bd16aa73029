//! Resource identity: `<namespace>:<kind>/<name>`.
//!
//! The same logical object must produce the same id whether it was read from
//! the repository or exported from the cluster, so kinds are lowercased and
//! cluster-scoped objects use the `<cluster>` namespace token.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Namespace token used in ids of cluster-scoped resources.
pub const CLUSTER_SCOPE: &str = "<cluster>";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResourceIdError {
    #[error("resource id {0:?}: expected <namespace>:<kind>/<name>")]
    Malformed(String),
    #[error("resource id {0:?}: empty {1}")]
    Empty(String, &'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Derive an id from the object's coordinates. An empty namespace means
    /// cluster-scoped.
    pub fn new(namespace: &str, kind: &str, name: &str) -> Self {
        let ns = if namespace.is_empty() { CLUSTER_SCOPE } else { namespace };
        Self(format!("{}:{}/{}", ns, kind.to_ascii_lowercase(), name))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    /// `(namespace, kind, name)`; namespace is empty for cluster-scoped ids.
    pub fn components(&self) -> (&str, &str, &str) {
        // Validated at construction, so both separators are present.
        let (ns, rest) = self.0.split_once(':').unwrap_or(("", &self.0));
        let (kind, name) = rest.split_once('/').unwrap_or((rest, ""));
        let ns = if ns == CLUSTER_SCOPE { "" } else { ns };
        (ns, kind, name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for ResourceId {
    type Err = ResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ns, rest) = s.split_once(':').ok_or_else(|| ResourceIdError::Malformed(s.to_string()))?;
        let (kind, name) = rest.split_once('/').ok_or_else(|| ResourceIdError::Malformed(s.to_string()))?;
        if ns.is_empty() { return Err(ResourceIdError::Empty(s.to_string(), "namespace")); }
        if kind.is_empty() { return Err(ResourceIdError::Empty(s.to_string(), "kind")); }
        if name.is_empty() { return Err(ResourceIdError::Empty(s.to_string(), "name")); }
        let ns = if ns == CLUSTER_SCOPE { "" } else { ns };
        Ok(Self::new(ns, kind, name))
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ResourceIdError;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self { id.0 }
}
