//! Tern sync: reconcile the live cluster against the desired state.
//!
//! Everything live but not desired is deleted (when deletes are enabled);
//! everything desired is applied unless it is ignored, out of scope or
//! already identical in the cluster. Whether an apply changes anything is
//! left to the cluster.

#![forbid(unsafe_code)]

use metrics::{counter, histogram};
use tern_core::{Cluster, ClusterSyncError, Manifests, NamespaceWhitelist, ResourceMap, SyncDef};
use tracing::{info, warn};

mod plan;

pub use plan::{plan_apply, plan_delete};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("exporting resource defs from cluster")]
    Export(#[source] anyhow::Error),
    #[error("parsing exported resources")]
    Parse(#[source] anyhow::Error),
    #[error(transparent)]
    Apply(#[from] ClusterSyncError),
}

/// Build the action set for one pass: deletes first, then applies, each
/// phase in resource id order.
pub fn plan(
    desired: &ResourceMap,
    live: &ResourceMap,
    deletes: bool,
    whitelist: &NamespaceWhitelist,
) -> SyncDef {
    let mut def = SyncDef::new();
    if deletes {
        let desired_is_empty = desired.is_empty();
        def.extend(live.values().filter_map(|res| plan_delete(desired_is_empty, res, desired, whitelist)));
    }
    def.extend(desired.values().filter_map(|res| plan_apply(live, res, whitelist)));
    def
}

async fn live_state<M, C>(manifests: &M, cluster: &C) -> Result<ResourceMap, SyncError>
where
    M: Manifests + ?Sized,
    C: Cluster + ?Sized,
{
    let exported = cluster.export().await.map_err(SyncError::Export)?;
    manifests.parse(&exported).map_err(SyncError::Parse)
}

/// Export and plan without submitting anything to the cluster.
pub async fn plan_pass<M, C>(
    manifests: &M,
    desired: &ResourceMap,
    cluster: &C,
    deletes: bool,
    whitelist: &NamespaceWhitelist,
) -> Result<SyncDef, SyncError>
where
    M: Manifests + ?Sized,
    C: Cluster + ?Sized,
{
    let live = live_state(manifests, cluster).await?;
    Ok(plan(desired, &live, deletes, whitelist))
}

/// Run one reconciliation pass. Passes against the same cluster must not
/// overlap; the caller serializes them.
pub async fn sync<M, C>(
    manifests: &M,
    desired: &ResourceMap,
    cluster: &C,
    deletes: bool,
    whitelist: &NamespaceWhitelist,
) -> Result<(), SyncError>
where
    M: Manifests + ?Sized,
    C: Cluster + ?Sized,
{
    let t0 = std::time::Instant::now();
    counter!("sync_runs", 1u64);
    let def = match plan_pass(manifests, desired, cluster, deletes, whitelist).await {
        Ok(def) => def,
        Err(e) => {
            counter!("sync_errors", 1u64);
            warn!(error = %e, "sync pass aborted before apply");
            return Err(e);
        }
    };

    let applies = def.applies().count();
    let deletes_planned = def.deletes().count();
    counter!("sync_actions_apply", applies as u64);
    counter!("sync_actions_delete", deletes_planned as u64);
    info!(desired = desired.len(), applies, deletes = deletes_planned, "submitting sync");

    let res = cluster.sync(&def).await;
    histogram!("sync_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    if let Err(e) = &res {
        counter!("sync_errors", 1u64);
        warn!(failed = e.failures.len(), "sync finished with failures");
    }
    res.map_err(SyncError::from)
}
