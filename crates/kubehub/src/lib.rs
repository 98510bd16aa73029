//! Tern kubehub: the live cluster behind the `Cluster` trait, via kube-rs.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::counter;
use serde_json::Value as Json;
use tern_core::{
    ActionKind, Cluster, ClusterSyncError, NamespaceWhitelist, Resource, ResourceFailure, SyncAction, SyncDef,
};
use tracing::{debug, info, warn};

mod export;

use export::{ensure_types, is_addon, is_owned, is_system_object, kind_rank, render, strip_noisy};

/// Exported when `TERN_EXPORT_KINDS` is unset. Secrets stay out of exports.
pub const DEFAULT_EXPORT_KINDS: &[&str] = &[
    "v1/Namespace",
    "v1/ServiceAccount",
    "v1/ConfigMap",
    "v1/Service",
    "apps/v1/Deployment",
    "apps/v1/DaemonSet",
    "apps/v1/StatefulSet",
    "batch/v1/CronJob",
    "networking.k8s.io/v1/Ingress",
];

fn export_kinds() -> Result<Vec<GroupVersionKind>> {
    match std::env::var("TERN_EXPORT_KINDS") {
        Ok(list) => list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(parse_gvk_key).collect(),
        Err(_) => DEFAULT_EXPORT_KINDS.iter().map(|k| parse_gvk_key(k)).collect(),
    }
}

fn field_manager() -> String {
    std::env::var("TERN_FIELD_MANAGER").unwrap_or_else(|_| "tern".to_string())
}

/// `v1/Kind` or `group/v1/Kind`.
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() }),
        [group, version, kind] => Ok(GroupVersionKind { group: (*group).to_string(), version: (*version).to_string(), kind: (*kind).to_string() }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    GroupVersionKind { group, version, kind: kind.to_string() }
}

fn find_api_resource(discovery: &Discovery, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

/// Kubernetes cluster scoped by a namespace whitelist.
pub struct KubeCluster {
    client: Client,
    whitelist: NamespaceWhitelist,
    kinds: Vec<GroupVersionKind>,
    field_manager: String,
}

impl KubeCluster {
    pub fn new(client: Client, whitelist: NamespaceWhitelist) -> Result<Self> {
        Ok(Self { client, whitelist, kinds: export_kinds()?, field_manager: field_manager() })
    }

    /// Client from the ambient kubeconfig or in-cluster service account.
    pub async fn try_default(whitelist: NamespaceWhitelist) -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Self::new(client, whitelist)
    }

    pub fn with_kinds(mut self, kinds: Vec<GroupVersionKind>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn whitelist(&self) -> &NamespaceWhitelist { &self.whitelist }

    async fn discovery(&self) -> Result<Discovery> {
        Discovery::new(self.client.clone()).run().await.context("running API discovery")
    }

    async fn list_all_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.context("listing namespaces")?;
        Ok(list.items.into_iter().filter_map(|ns| ns.metadata.name).collect())
    }

    async fn list_kind(&self, ar: &ApiResource, namespaced: bool, namespaces: &[String]) -> Result<Vec<Json>> {
        let apis: Vec<Api<DynamicObject>> = if namespaced {
            namespaces.iter().map(|ns| Api::namespaced_with(self.client.clone(), ns, ar)).collect()
        } else {
            vec![Api::all_with(self.client.clone(), ar)]
        };
        let lp = ListParams::default();
        let lists = futures::future::try_join_all(apis.iter().map(|api| api.list(&lp)))
            .await
            .with_context(|| format!("listing {}", ar.kind))?;

        let mut out = Vec::new();
        for obj in lists.into_iter().flat_map(|l| l.items) {
            let name = obj.metadata.name.clone().unwrap_or_default();
            let ns = obj.metadata.namespace.clone().unwrap_or_default();
            // Cluster-scoped Namespace objects follow the whitelist by name.
            if ar.kind == "Namespace" && !self.whitelist.in_scope(&name) {
                continue;
            }
            if is_system_object(&ar.kind, &ns, &name) {
                continue;
            }
            let mut v = serde_json::to_value(&obj).context("serializing DynamicObject")?;
            if is_owned(&v) || is_addon(&v) {
                continue;
            }
            ensure_types(&mut v, &ar.api_version, &ar.kind);
            out.push(strip_noisy(v));
        }
        Ok(out)
    }

    fn api_for(&self, discovery: &Discovery, res: &Resource) -> Result<(Api<DynamicObject>, Json)> {
        let val: serde_yaml::Value = serde_yaml::from_slice(res.bytes()).context("parsing resource YAML")?;
        let json = serde_json::to_value(val).context("converting YAML to JSON")?;
        let api_version = json.get("apiVersion").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("resource missing apiVersion"))?;
        let gvk = gvk_from_api_version(api_version, res.kind());
        let (ar, namespaced) = find_api_resource(discovery, &gvk)?;
        let api = if namespaced {
            if res.namespace().is_empty() {
                return Err(anyhow!("namespace required for namespaced kind"));
            }
            Api::namespaced_with(self.client.clone(), res.namespace(), &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        };
        Ok((api, json))
    }

    async fn apply_one(&self, discovery: &Discovery, res: &Resource) -> Result<()> {
        let (api, json) = self.api_for(discovery, res)?;
        let pp = PatchParams::apply(&self.field_manager).force();
        api.patch(res.name(), &pp, &Patch::Apply(&json)).await.context("server-side apply failed")?;
        Ok(())
    }

    async fn delete_one(&self, discovery: &Discovery, res: &Resource) -> Result<()> {
        let (api, _) = self.api_for(discovery, res)?;
        match api.delete(res.name(), &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(resource = %res.id(), "already gone");
                Ok(())
            }
            Err(e) => Err(anyhow!(e).context("delete failed")),
        }
    }
}

/// Deletes in reverse kind rank, then applies in kind rank. Ties keep plan order.
fn ordered(def: &SyncDef) -> Vec<&SyncAction> {
    let mut deletes: Vec<_> = def.iter().filter(|a| a.kind() == ActionKind::Delete).collect();
    let mut applies: Vec<_> = def.iter().filter(|a| a.kind() == ActionKind::Apply).collect();
    deletes.sort_by_key(|a| std::cmp::Reverse(kind_rank(a.resource().kind())));
    applies.sort_by_key(|a| kind_rank(a.resource().kind()));
    deletes.into_iter().chain(applies).collect()
}

#[async_trait::async_trait]
impl Cluster for KubeCluster {
    async fn export(&self) -> Result<Vec<u8>> {
        let discovery = self.discovery().await?;
        let namespaces = self.list_namespaces().await?;
        let mut objects = Vec::new();
        for gvk in &self.kinds {
            let (ar, namespaced) = match find_api_resource(&discovery, gvk) {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "export kind not served; skipping");
                    continue;
                }
            };
            objects.extend(self.list_kind(&ar, namespaced, &namespaces).await?);
        }
        info!(objects = objects.len(), namespaces = namespaces.len(), "exported cluster state");
        render(&objects)
    }

    async fn sync(&self, def: &SyncDef) -> Result<(), ClusterSyncError> {
        if def.is_empty() {
            return Ok(());
        }
        let discovery = self
            .discovery()
            .await
            .map_err(|e| ClusterSyncError::new(def.iter().map(|a| failure(a, &e)).collect()))?;

        let mut failures = Vec::new();
        for action in ordered(def) {
            let res = action.resource();
            let outcome = match action {
                SyncAction::Apply(r) => self.apply_one(&discovery, r).await,
                SyncAction::Delete(r) => self.delete_one(&discovery, r).await,
            };
            match outcome {
                Ok(()) => {
                    counter!("cluster_actions_ok", 1u64);
                    debug!(resource = %res.id(), action = %action.kind(), "done");
                }
                Err(e) => {
                    counter!("cluster_actions_err", 1u64);
                    let error = format!("{:#}", e);
                    warn!(resource = %res.id(), action = %action.kind(), error = %error, "action failed");
                    failures.push(failure(action, &e));
                }
            }
        }
        if failures.is_empty() { Ok(()) } else { Err(ClusterSyncError::new(failures)) }
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let all = self.list_all_namespaces().await?;
        Ok(self.whitelist.filter(all))
    }
}

fn failure(action: &SyncAction, e: &anyhow::Error) -> ResourceFailure {
    ResourceFailure { id: action.resource().id().clone(), action: action.kind(), error: format!("{:#}", e) }
}
