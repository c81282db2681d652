use std::collections::HashSet;

use kvault_core::{Backup, Restore, Unstructured};
use serde_json::Value as Json;

use super::{reset_metadata_and_status, Prepared, ResourceRestorer};

const TOKEN_VOLUME_PREFIX: &str = "default-token-";

/// Unbinds pods from their old node and drops service account token volumes,
/// which the target cluster mounts again on admission.
#[derive(Debug, Clone, Copy, Default)]
pub struct PodRestorer;

impl ResourceRestorer for PodRestorer {
    fn handles(&self, _obj: &Unstructured, _restore: &Restore) -> bool { true }

    fn prepare(&self, obj: Unstructured, _restore: &Restore, _backup: &Backup) -> Prepared {
        let mut obj = match reset_metadata_and_status(obj, false) {
            Ok(o) => o,
            Err(e) => return Prepared::err(e),
        };
        obj.remove_path(&["spec", "nodeName"]);

        let mut dropped = HashSet::new();
        if let Some(Json::Array(volumes)) = obj.get_path_mut(&["spec", "volumes"]) {
            volumes.retain(|v| match v.get("name").and_then(Json::as_str) {
                Some(name) if name.starts_with(TOKEN_VOLUME_PREFIX) => {
                    dropped.insert(name.to_string());
                    false
                }
                _ => true,
            });
        }
        if !dropped.is_empty() {
            for list in ["containers", "initContainers"] {
                let Some(Json::Array(containers)) = obj.get_path_mut(&["spec", list]) else { continue };
                for c in containers.iter_mut() {
                    if let Some(Json::Array(mounts)) = c.get_mut("volumeMounts") {
                        mounts.retain(|m| m.get("name").and_then(Json::as_str).map_or(true, |n| !dropped.contains(n)));
                    }
                }
            }
        }
        Prepared::ok(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_node_binding_and_token_mounts() {
        let pod = obj(json!({
            "apiVersion": "v1", "kind": "Pod",
            "metadata": {"name": "p", "namespace": "ns1", "uid": "u"},
            "spec": {
                "nodeName": "node-1",
                "volumes": [{"name": "default-token-abcde"}, {"name": "data"}],
                "containers": [{"name": "c", "volumeMounts": [
                    {"name": "default-token-abcde", "mountPath": "/var/run/secrets"},
                    {"name": "data", "mountPath": "/data"}
                ]}],
                "initContainers": [{"name": "i", "volumeMounts": [{"name": "default-token-abcde"}]}]
            },
            "status": {"phase": "Running"}
        }));
        let out = prepared(PodRestorer.prepare(pod, &Restore::default(), &Backup::default()));
        assert!(out.get_path(&["spec", "nodeName"]).is_none());
        assert_eq!(out.get_path(&["spec", "volumes"]), Some(&json!([{"name": "data"}])));
        assert_eq!(
            out.get_path(&["spec", "containers"]).unwrap()[0]["volumeMounts"],
            json!([{"name": "data", "mountPath": "/data"}])
        );
        assert_eq!(out.get_path(&["spec", "initContainers"]).unwrap()[0]["volumeMounts"], json!([]));
        assert!(out.get_path(&["status"]).is_none());
    }
}
