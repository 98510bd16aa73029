//! Collaborator seams the sync engine talks through.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ActionKind, ResourceId, ResourceMap, SyncDef};

/// Turns serialized manifests into identified resources.
pub trait Manifests: Send + Sync {
    /// Parse a blob of (possibly several) resource documents.
    fn parse(&self, bytes: &[u8]) -> anyhow::Result<ResourceMap>;

    /// Read the desired state from `root/manifest_dir`.
    fn load(&self, root: &Path, manifest_dir: &Path) -> anyhow::Result<ResourceMap>;
}

/// The live system a pass reconciles against.
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    /// Every live, in-scope resource as one blob that `Manifests::parse` accepts.
    async fn export(&self) -> anyhow::Result<Vec<u8>>;

    /// Perform every action of `def`. An empty plan is a no-op.
    async fn sync(&self, def: &SyncDef) -> Result<(), ClusterSyncError>;

    /// Live namespace names in the cluster's order, restricted to the whitelist.
    async fn list_namespaces(&self) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    pub id: ResourceId,
    pub action: ActionKind,
    pub error: String,
}

/// Per-resource failures from `Cluster::sync`. Actions not listed succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{} resource(s) failed to sync{}", .failures.len(), render_failures(.failures))]
pub struct ClusterSyncError {
    pub failures: Vec<ResourceFailure>,
}

impl ClusterSyncError {
    pub fn new(failures: Vec<ResourceFailure>) -> Self { Self { failures } }

    pub fn single(id: ResourceId, action: ActionKind, error: impl fmt::Display) -> Self {
        Self { failures: vec![ResourceFailure { id, action, error: error.to_string() }] }
    }
}

fn render_failures(failures: &[ResourceFailure]) -> String {
    failures
        .iter()
        .enumerate()
        .map(|(i, fail)| format!("{}{} {} ({})", if i == 0 { ": " } else { "; " }, fail.action, fail.id, fail.error))
        .collect()
}
