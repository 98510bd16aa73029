//! Per-resource decisions. Pure: each call yields at most one action and
//! logs why it skipped when it does not.

use metrics::counter;
use tern_core::{ActionKind, NamespaceWhitelist, Policy, Resource, ResourceMap, SyncAction};
use tracing::{debug, info};

/// Why a resource produced no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Skip {
    DesiredEmpty,
    Ignored,
    Namespace,
    IgnoredInCluster,
    Unchanged,
}

impl Skip {
    pub(crate) fn reason(self) -> &'static str {
        match self {
            Skip::DesiredEmpty => "desired-empty",
            Skip::Ignored => "ignored",
            Skip::Namespace => "namespace",
            Skip::IgnoredInCluster => "ignored-in-cluster",
            Skip::Unchanged => "unchanged",
        }
    }
}

fn skipped(res: &Resource, action: ActionKind, skip: Skip) {
    counter!("sync_skips", 1u64);
    let reason = skip.reason();
    match skip {
        // Fires for every in-sync resource on every pass.
        Skip::Unchanged => debug!(resource = %res.id(), action = %action, reason, namespace = %res.namespace(), "skipping resource"),
        _ => info!(resource = %res.id(), action = %action, reason, namespace = %res.namespace(), "skipping resource"),
    }
}

fn settle(res: &Resource, action: ActionKind, decision: Result<Option<SyncAction>, Skip>) -> Option<SyncAction> {
    decision.unwrap_or_else(|skip| {
        skipped(res, action, skip);
        None
    })
}

pub(crate) fn decide_delete(
    desired_is_empty: bool,
    res: &Resource,
    desired: &ResourceMap,
    whitelist: &NamespaceWhitelist,
) -> Result<Option<SyncAction>, Skip> {
    if desired_is_empty {
        return Err(Skip::DesiredEmpty);
    }
    if res.policy().contains(&Policy::IGNORE) {
        return Err(Skip::Ignored);
    }
    if !whitelist.in_scope(res.namespace()) {
        return Err(Skip::Namespace);
    }
    if desired.contains_key(res.id()) {
        return Ok(None);
    }
    Ok(Some(SyncAction::Delete(res.clone())))
}

pub(crate) fn decide_apply(live: &ResourceMap, res: &Resource, whitelist: &NamespaceWhitelist) -> Result<Option<SyncAction>, Skip> {
    if res.policy().contains(&Policy::IGNORE) {
        return Err(Skip::Ignored);
    }
    if !whitelist.in_scope(res.namespace()) {
        return Err(Skip::Namespace);
    }
    if let Some(current) = live.get(res.id()) {
        // Marked in the cluster, e.g. after an out-of-band edit.
        if current.policy().contains(&Policy::IGNORE) {
            return Err(Skip::IgnoredInCluster);
        }
        if current.bytes() == res.bytes() {
            return Err(Skip::Unchanged);
        }
    }
    Ok(Some(SyncAction::Apply(res.clone())))
}

/// Decide whether a live resource should be deleted.
///
/// `desired_is_empty` suppresses every delete for the pass: an empty desired
/// state usually means the source failed to load, not that the cluster
/// should be wiped.
pub fn plan_delete(
    desired_is_empty: bool,
    res: &Resource,
    desired: &ResourceMap,
    whitelist: &NamespaceWhitelist,
) -> Option<SyncAction> {
    settle(res, ActionKind::Delete, decide_delete(desired_is_empty, res, desired, whitelist))
}

/// Decide whether a desired resource should be applied.
pub fn plan_apply(live: &ResourceMap, res: &Resource, whitelist: &NamespaceWhitelist) -> Option<SyncAction> {
    settle(res, ActionKind::Apply, decide_apply(live, res, whitelist))
}
