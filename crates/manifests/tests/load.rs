#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use tern_core::{Manifests, Policy, ResourceId};
use tern_manifests::KubeManifests;

fn write(dir: &Path, rel: &str, body: &str) {
    let p = dir.join(rel);
    if let Some(parent) = p.parent() { fs::create_dir_all(parent).unwrap(); }
    fs::write(p, body).unwrap();
}

fn service(ns: &str, name: &str) -> String {
    format!("apiVersion: v1\nkind: Service\nmetadata:\n  name: {}\n  namespace: {}\n", name, ns)
}

#[test]
fn loads_yaml_files_recursively() {
    let root = tempfile::tempdir().unwrap();
    write(root.path(), "deploy/a.yaml", &service("ns1", "svc-a"));
    write(root.path(), "deploy/nested/b.yml", &service("ns1", "svc-b"));
    write(root.path(), "deploy/README.md", "not a manifest");
    write(root.path(), "deploy/.hidden/c.yaml", &service("ns1", "svc-c"));
    write(root.path(), "other/d.yaml", &service("ns1", "svc-d"));

    let m = KubeManifests::new().load(root.path(), Path::new("deploy")).unwrap();
    let ids: Vec<_> = m.keys().map(|id| id.as_str().to_string()).collect();
    assert_eq!(ids, vec!["ns1:service/svc-a", "ns1:service/svc-b"]);
}

#[test]
fn loaded_and_parsed_bytes_agree() {
    let root = tempfile::tempdir().unwrap();
    let body = "kind: Service\napiVersion: v1\nmetadata:\n  namespace: ns1\n  name: svc-a\n  annotations:\n    tern.dev/ignore: \"true\"\n";
    write(root.path(), "a.yaml", body);

    let manifests = KubeManifests::new();
    let loaded = manifests.load(root.path(), Path::new(".")).unwrap();
    let res = &loaded[&ResourceId::new("ns1", "Service", "svc-a")];
    assert!(res.policy().contains(&Policy::IGNORE));

    // Exported bytes round-trip through parse to the same canonical form.
    let reparsed = manifests.parse(res.bytes()).unwrap();
    assert_eq!(reparsed[res.id()].bytes(), res.bytes());
}

#[test]
fn duplicate_across_files_names_the_file() {
    let root = tempfile::tempdir().unwrap();
    write(root.path(), "a.yaml", &service("ns1", "svc-a"));
    write(root.path(), "b.yaml", &service("ns1", "svc-a"));

    let err = KubeManifests::new().load(root.path(), Path::new(".")).unwrap_err().to_string();
    assert!(err.contains("b.yaml"), "err={}", err);
    assert!(err.contains("duplicate resource ns1:service/svc-a"), "err={}", err);
}

#[test]
fn parse_error_names_the_file() {
    let root = tempfile::tempdir().unwrap();
    write(root.path(), "broken.yaml", "apiVersion: v1\nmetadata:\n  name: x\n");

    let err = KubeManifests::new().load(root.path(), Path::new(".")).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.yaml"));
    assert!(format!("{:#}", err).contains("missing kind"));
}

#[test]
fn missing_directory_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    assert!(KubeManifests::new().load(root.path(), Path::new("nope")).is_err());
}
