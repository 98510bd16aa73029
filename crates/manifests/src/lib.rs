//! Tern manifests: YAML documents in, identified resources out.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value as Json;
use tern_core::{Manifests, Policy, PolicySet, Resource, ResourceMap};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Annotation prefix for policy tags, e.g. `tern.dev/ignore: "true"`.
pub const POLICY_PREFIX: &str = "tern.dev/";

/// Built-in kinds that are never namespaced. Documents of any other kind
/// without `metadata.namespace` land in the default namespace.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "APIService",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "IngressClass",
    "RuntimeClass",
];

/// Extra cluster-scoped kinds (custom resources), comma-separated.
fn env_cluster_scoped_kinds() -> BTreeSet<String> {
    std::env::var("TERN_CLUSTER_SCOPED_KINDS")
        .map(|list| list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn max_yaml_bytes() -> usize {
    std::env::var("TERN_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB per document
}

fn max_yaml_nodes() -> usize {
    std::env::var("TERN_MAX_YAML_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// Kubernetes-flavoured YAML manifests.
#[derive(Debug, Clone)]
pub struct KubeManifests {
    default_namespace: String,
    cluster_scoped: BTreeSet<String>,
}

impl Default for KubeManifests {
    fn default() -> Self {
        Self { default_namespace: "default".to_string(), cluster_scoped: env_cluster_scoped_kinds() }
    }
}

impl KubeManifests {
    pub fn new() -> Self { Self::default() }

    pub fn with_default_namespace(namespace: impl Into<String>) -> Self {
        Self { default_namespace: namespace.into(), ..Self::default() }
    }

    /// Treat these kinds as cluster-scoped on top of the built-in ones.
    pub fn with_cluster_scoped_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster_scoped.extend(kinds.into_iter().map(Into::into));
        self
    }

    pub fn is_cluster_scoped(&self, kind: &str) -> bool {
        CLUSTER_SCOPED_KINDS.contains(&kind) || self.cluster_scoped.contains(kind)
    }

    fn parse_into(&self, text: &str, out: &mut ResourceMap) -> Result<()> {
        for (idx, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("document {}: parsing YAML", idx))?;
            if val.is_null() {
                continue;
            }
            let json = serde_json::to_value(val).with_context(|| format!("document {}: converting YAML to JSON", idx))?;
            if json.get("kind").and_then(|k| k.as_str()) == Some("List") {
                let items = json
                    .get("items")
                    .and_then(|i| i.as_array())
                    .ok_or_else(|| anyhow!("document {}: List without items", idx))?;
                for (i, item) in items.iter().enumerate() {
                    let label = format!("{}.items[{}]", idx, i);
                    insert_unique(out, self.resource_from(item.clone(), &label)?, &label)?;
                }
            } else {
                let label = idx.to_string();
                insert_unique(out, self.resource_from(json, &label)?, &label)?;
            }
        }
        Ok(())
    }

    fn resource_from(&self, mut json: Json, label: &str) -> Result<Resource> {
        if !json.is_object() {
            return Err(anyhow!("document {}: expected a mapping", label));
        }
        if json_node_budget_exceeded(&json, max_yaml_nodes()) {
            return Err(anyhow!("document {}: too complex (>{} nodes)", label, max_yaml_nodes()));
        }
        json.get("apiVersion").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("document {}: missing apiVersion", label))?;
        let kind = json.get("kind").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("document {}: missing kind", label))?.to_string();
        let meta = json.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("document {}: missing metadata.name", label))?
            .to_string();
        let declared_ns = meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str()).map(str::to_string);
        let namespace = match declared_ns {
            Some(ns) => ns,
            None if self.is_cluster_scoped(&kind) => String::new(),
            None => {
                set_namespace(&mut json, &self.default_namespace);
                self.default_namespace.clone()
            }
        };
        let policy = policy_from_annotations(&json);

        let bytes = serde_yaml::to_string(&canonical(json)).with_context(|| format!("document {}: serializing", label))?;
        if bytes.len() > max_yaml_bytes() {
            return Err(anyhow!("document {}: too large (>{} bytes)", label, max_yaml_bytes()));
        }
        Ok(Resource::new(kind, namespace, name, policy, bytes))
    }
}

/// Rebuild with keys in sorted order so equal objects serialize identically.
fn canonical(v: Json) -> Json {
    match v {
        Json::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Json::Object(entries.into_iter().map(|(k, v)| (k, canonical(v))).collect())
        }
        Json::Array(arr) => Json::Array(arr.into_iter().map(canonical).collect()),
        other => other,
    }
}

fn set_namespace(v: &mut Json, ns: &str) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.insert("namespace".into(), Json::String(ns.to_string()));
    }
}

/// `tern.dev/<tag>: "true"` annotations become policy tags.
pub fn policy_from_annotations(v: &Json) -> PolicySet {
    let Some(annos) = v.get("metadata").and_then(|m| m.get("annotations")).and_then(|a| a.as_object()) else {
        return PolicySet::new();
    };
    annos
        .iter()
        .filter_map(|(k, v)| {
            let tag = k.strip_prefix(POLICY_PREFIX)?;
            let on = match v {
                Json::String(s) => s.eq_ignore_ascii_case("true"),
                Json::Bool(b) => *b,
                _ => false,
            };
            (on && !tag.is_empty()).then(|| Policy::new(tag))
        })
        .collect()
}

fn insert_unique(out: &mut ResourceMap, res: Resource, label: &str) -> Result<()> {
    if out.contains_key(res.id()) {
        return Err(anyhow!("document {}: duplicate resource {}", label, res.id()));
    }
    out.insert(res.id().clone(), res);
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"))
}

impl Manifests for KubeManifests {
    fn parse(&self, bytes: &[u8]) -> Result<ResourceMap> {
        let text = std::str::from_utf8(bytes).context("manifests are not valid UTF-8")?;
        let mut out = ResourceMap::new();
        if text.trim().is_empty() {
            return Ok(out);
        }
        self.parse_into(text, &mut out)?;
        Ok(out)
    }

    fn load(&self, root: &Path, manifest_dir: &Path) -> Result<ResourceMap> {
        let dir: PathBuf = if manifest_dir.is_absolute() { manifest_dir.to_path_buf() } else { root.join(manifest_dir) };
        if !dir.is_dir() {
            return Err(anyhow!("manifest directory {} does not exist", dir.display()));
        }
        let mut out = ResourceMap::new();
        let mut files = 0usize;
        for entry in WalkDir::new(&dir).sort_by_file_name().into_iter().filter_entry(|e| !is_hidden(e)) {
            let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
            if !entry.file_type().is_file() || !is_yaml(entry.path()) {
                continue;
            }
            let path = entry.path();
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            let mut from_file = ResourceMap::new();
            self.parse_into(&text, &mut from_file).with_context(|| format!("parsing {}", path.display()))?;
            for (id, res) in from_file {
                if out.contains_key(&id) {
                    return Err(anyhow!("{}: duplicate resource {}", path.display(), id));
                }
                out.insert(id, res);
            }
            files += 1;
        }
        debug!(dir = %dir.display(), files, resources = out.len(), "loaded manifests");
        Ok(out)
    }
}
