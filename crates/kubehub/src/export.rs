//! Shaping live objects into exportable documents.

use anyhow::{Context, Result};
use serde_json::Value as Json;

/// Objects the control plane creates on its own. Never exported, so a pass
/// can't delete them.
const SYSTEM_OBJECTS: &[(&str, &str, &str)] = &[
    ("Namespace", "", "default"),
    ("Namespace", "", "kube-system"),
    ("Namespace", "", "kube-public"),
    ("Namespace", "", "kube-node-lease"),
    ("Service", "default", "kubernetes"),
    ("ConfigMap", "*", "kube-root-ca.crt"),
    ("ServiceAccount", "*", "default"),
];

/// Namespaces owned by the control plane. Nothing inside them is exported.
const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

pub(crate) fn is_system_object(kind: &str, namespace: &str, name: &str) -> bool {
    SYSTEM_NAMESPACES.contains(&namespace)
        || SYSTEM_OBJECTS
            .iter()
            .any(|(k, ns, n)| *k == kind && *n == name && (*ns == "*" || *ns == namespace))
}

/// Objects managed by the addon manager, wherever they live.
pub(crate) fn is_addon(v: &Json) -> bool {
    let Some(labels) = v.get("metadata").and_then(|m| m.get("labels")).and_then(|l| l.as_object()) else {
        return false;
    };
    labels.contains_key("addonmanager.kubernetes.io/mode")
        || labels.get("kubernetes.io/cluster-service").and_then(|v| v.as_str()) == Some("true")
}

/// Controller-owned objects follow their owner and are not synced directly.
pub(crate) fn is_owned(v: &Json) -> bool {
    v.get("metadata")
        .and_then(|m| m.get("ownerReferences"))
        .and_then(|o| o.as_array())
        .map(|o| !o.is_empty())
        .unwrap_or(false)
}

pub(crate) fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for key in ["managedFields", "resourceVersion", "uid", "generation", "creationTimestamp", "selfLink"] {
            meta.remove(key);
        }
        let drop_annos = match meta.get_mut("annotations").and_then(|a| a.as_object_mut()) {
            Some(annos) => {
                annos.remove("kubectl.kubernetes.io/last-applied-configuration");
                annos.is_empty()
            }
            None => false,
        };
        if drop_annos {
            meta.remove("annotations");
        }
    }
    // Status is server-populated
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// List responses often omit the type fields on items.
pub(crate) fn ensure_types(v: &mut Json, api_version: &str, kind: &str) {
    if let Some(obj) = v.as_object_mut() {
        obj.insert("apiVersion".into(), Json::String(api_version.to_string()));
        obj.insert("kind".into(), Json::String(kind.to_string()));
    }
}

/// One YAML document per object, separated by `---`.
pub(crate) fn render(objects: &[Json]) -> Result<Vec<u8>> {
    let mut out = String::new();
    for (i, obj) in objects.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(obj).context("serializing exported object")?);
    }
    Ok(out.into_bytes())
}

/// Apply order by kind: things others depend on go first. Deletes walk it backwards.
pub(crate) fn kind_rank(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" | "ClusterRole" | "Role" | "ClusterRoleBinding" | "RoleBinding" => 2,
        "ConfigMap" | "Secret" | "PersistentVolumeClaim" | "StorageClass" | "PersistentVolume" => 3,
        "Service" => 4,
        "Deployment" | "DaemonSet" | "StatefulSet" | "CronJob" | "Job" => 5,
        _ => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_noisy_prunes_server_fields() {
        let v = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "namespace": "ns",
                "uid": "00000000-0000-0000-0000-000000000001",
                "managedFields": [ {"foo": "bar"} ],
                "resourceVersion": "123",
                "generation": 5,
                "creationTimestamp": "2020-01-01T00:00:00Z",
                "annotations": { "kubectl.kubernetes.io/last-applied-configuration": "{}" }
            },
            "status": { "obs": true },
            "data": { "k": "v" }
        });
        let pruned = strip_noisy(v);
        let meta = pruned.get("metadata").unwrap().as_object().unwrap();
        assert_eq!(meta.keys().collect::<Vec<_>>(), vec!["name", "namespace"]);
        assert!(!pruned.as_object().unwrap().contains_key("status"));
        assert_eq!(pruned["data"]["k"], "v");
    }

    #[test]
    fn strip_noisy_keeps_policy_annotations() {
        let v = serde_json::json!({
            "metadata": { "name": "x", "annotations": { "tern.dev/ignore": "true" } }
        });
        let pruned = strip_noisy(v);
        assert_eq!(pruned["metadata"]["annotations"]["tern.dev/ignore"], "true");
    }

    #[test]
    fn system_objects() {
        assert!(is_system_object("Service", "default", "kubernetes"));
        assert!(!is_system_object("Service", "team", "kubernetes"));
        assert!(is_system_object("ServiceAccount", "team", "default"));
        assert!(is_system_object("Namespace", "", "kube-system"));
        assert!(!is_system_object("Namespace", "", "team"));
    }

    #[test]
    fn everything_in_control_plane_namespaces_is_system() {
        for (kind, ns, name) in [
            ("Deployment", "kube-system", "coredns"),
            ("DaemonSet", "kube-system", "kube-proxy"),
            ("Service", "kube-system", "kube-dns"),
            ("ServiceAccount", "kube-system", "coredns"),
            ("ConfigMap", "kube-system", "kube-proxy"),
            ("ConfigMap", "kube-public", "cluster-info"),
            ("ServiceAccount", "kube-node-lease", "lease-holder"),
        ] {
            assert!(is_system_object(kind, ns, name), "{}/{}/{} should be skipped", kind, ns, name);
        }
        assert!(!is_system_object("Deployment", "team", "coredns"));
    }

    #[test]
    fn addon_labelled_objects() {
        let mode = serde_json::json!({ "metadata": { "labels": { "addonmanager.kubernetes.io/mode": "Reconcile" } } });
        let svc = serde_json::json!({ "metadata": { "labels": { "kubernetes.io/cluster-service": "true" } } });
        let off = serde_json::json!({ "metadata": { "labels": { "kubernetes.io/cluster-service": "false" } } });
        let plain = serde_json::json!({ "metadata": { "labels": { "app": "web" } } });
        assert!(is_addon(&mode));
        assert!(is_addon(&svc));
        assert!(!is_addon(&off));
        assert!(!is_addon(&plain));
        assert!(!is_addon(&serde_json::json!({ "metadata": {} })));
    }

    #[test]
    fn owned_objects() {
        assert!(is_owned(&serde_json::json!({ "metadata": { "ownerReferences": [ { "kind": "Deployment" } ] } })));
        assert!(!is_owned(&serde_json::json!({ "metadata": { "ownerReferences": [] } })));
        assert!(!is_owned(&serde_json::json!({ "metadata": {} })));
    }

    #[test]
    fn ranks_put_namespaces_first() {
        let mut kinds = vec!["Deployment", "Widget", "Service", "Namespace", "ConfigMap", "ServiceAccount"];
        kinds.sort_by_key(|k| kind_rank(k));
        assert_eq!(kinds, vec!["Namespace", "ServiceAccount", "ConfigMap", "Service", "Deployment", "Widget"]);
    }

    #[test]
    fn render_separates_documents() {
        let objs = vec![
            serde_json::json!({ "kind": "Service", "metadata": { "name": "a" } }),
            serde_json::json!({ "kind": "Service", "metadata": { "name": "b" } }),
        ];
        let text = String::from_utf8(render(&objs).unwrap()).unwrap();
        assert_eq!(text.matches("---\n").count(), 1);
        assert!(render(&[]).unwrap().is_empty());
    }
}
