//! Tern core types: resources, policies, sync plans and collaborator traits.

#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

mod cluster;
mod id;
mod namespace;

pub use cluster::{Cluster, ClusterSyncError, Manifests, ResourceFailure};
pub use id::{ResourceId, ResourceIdError, CLUSTER_SCOPE};
pub use namespace::NamespaceWhitelist;

pub mod prelude {
    pub use super::{
        ActionKind, Cluster, ClusterSyncError, Manifests, NamespaceWhitelist, Policy, PolicySet, Resource,
        ResourceFailure, ResourceId, ResourceMap, SyncAction, SyncDef,
    };
}

/// Resources keyed by id. Ordered so every pass walks them the same way.
pub type ResourceMap = BTreeMap<ResourceId, Resource>;

/// Declarative tag attached to a resource, usually sourced from annotations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Policy(Cow<'static, str>);

impl Policy {
    /// Exempts a resource from both apply and delete.
    pub const IGNORE: Policy = Policy(Cow::Borrowed("ignore"));

    pub fn new(tag: impl Into<String>) -> Self { Self(Cow::Owned(tag.into())) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicySet(BTreeSet<Policy>);

impl PolicySet {
    pub fn new() -> Self { Self::default() }

    pub fn contains(&self, policy: &Policy) -> bool { self.0.contains(policy) }

    pub fn insert(&mut self, policy: Policy) -> bool { self.0.insert(policy) }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> { self.0.iter() }
}

impl FromIterator<Policy> for PolicySet {
    fn from_iter<T: IntoIterator<Item = Policy>>(iter: T) -> Self { Self(iter.into_iter().collect()) }
}

/// One identified unit of desired or live configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    id: ResourceId,
    kind: String,
    name: String,
    /// Empty for cluster-scoped objects.
    namespace: String,
    policy: PolicySet,
    /// Serialized form, applied verbatim and compared against exports.
    bytes: Vec<u8>,
}

impl Resource {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        policy: PolicySet,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        let (kind, namespace, name) = (kind.into(), namespace.into(), name.into());
        let id = ResourceId::new(&namespace, &kind, &name);
        Self { id, kind, name, namespace, policy, bytes: bytes.into() }
    }

    pub fn id(&self) -> &ResourceId { &self.id }
    pub fn kind(&self) -> &str { &self.kind }
    pub fn name(&self) -> &str { &self.name }
    pub fn namespace(&self) -> &str { &self.namespace }
    pub fn policy(&self) -> &PolicySet { &self.policy }
    pub fn bytes(&self) -> &[u8] { &self.bytes }

    pub fn is_cluster_scoped(&self) -> bool { self.namespace.is_empty() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Apply,
    Delete,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Apply => "apply",
            ActionKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Apply(Resource),
    Delete(Resource),
}

impl SyncAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            SyncAction::Apply(_) => ActionKind::Apply,
            SyncAction::Delete(_) => ActionKind::Delete,
        }
    }

    pub fn resource(&self) -> &Resource {
        match self {
            SyncAction::Apply(r) | SyncAction::Delete(r) => r,
        }
    }
}

/// Ordered action set for one reconciliation pass: deletes first, then applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDef {
    pub actions: Vec<SyncAction>,
}

impl SyncDef {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, action: SyncAction) { self.actions.push(action); }

    pub fn len(&self) -> usize { self.actions.len() }

    pub fn is_empty(&self) -> bool { self.actions.is_empty() }

    pub fn iter(&self) -> std::slice::Iter<'_, SyncAction> { self.actions.iter() }

    pub fn applies(&self) -> impl Iterator<Item = &Resource> {
        self.actions.iter().filter_map(|a| match a { SyncAction::Apply(r) => Some(r), _ => None })
    }

    pub fn deletes(&self) -> impl Iterator<Item = &Resource> {
        self.actions.iter().filter_map(|a| match a { SyncAction::Delete(r) => Some(r), _ => None })
    }
}

impl Extend<SyncAction> for SyncDef {
    fn extend<T: IntoIterator<Item = SyncAction>>(&mut self, iter: T) { self.actions.extend(iter); }
}

impl<'a> IntoIterator for &'a SyncDef {
    type Item = &'a SyncAction;
    type IntoIter = std::slice::Iter<'a, SyncAction>;
    fn into_iter(self) -> Self::IntoIter { self.actions.iter() }
}
