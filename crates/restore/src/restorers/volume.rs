use anyhow::anyhow;
use kvault_core::{Backup, Restore, Unstructured};
use serde_json::Value as Json;

use super::{reset_metadata_and_status, Prepared, ResourceRestorer};

const BIND_ANNOTATION_PREFIX: &str = "pv.kubernetes.io/";

/// Persistent volumes keep their claim reference (rebound to the mapped
/// namespace) and are waited on until the cluster reports them usable.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistentVolumeRestorer;

impl ResourceRestorer for PersistentVolumeRestorer {
    fn handles(&self, _obj: &Unstructured, _restore: &Restore) -> bool { true }

    fn prepare(&self, obj: Unstructured, restore: &Restore, _backup: &Backup) -> Prepared {
        let mut obj = match reset_metadata_and_status(obj, false) {
            Ok(o) => o,
            Err(e) => return Prepared::err(e),
        };
        let mut warning = None;
        if let Some(Json::Object(claim)) = obj.get_path_mut(&["spec", "claimRef"]) {
            claim.remove("uid");
            claim.remove("resourceVersion");
            let old_ns = claim.get("namespace").and_then(Json::as_str).unwrap_or("").to_string();
            if !old_ns.is_empty() {
                if !restore.spec.namespace_filter().should_include(&old_ns) {
                    warning = Some(anyhow!("claim namespace {} is not part of this restore", old_ns));
                }
                let target = restore.spec.target_namespace(&old_ns).to_string();
                claim.insert("namespace".into(), Json::String(target));
            }
        }
        let prepared = Prepared::ok(obj);
        match warning {
            Some(w) => prepared.with_warning(w),
            None => prepared,
        }
    }

    fn wait(&self) -> bool { true }

    fn ready(&self, obj: &Unstructured) -> bool {
        matches!(obj.get_path(&["status", "phase"]).and_then(Json::as_str), Some("Available" | "Bound"))
    }
}

/// Claims lose the bind bookkeeping annotations written by the old cluster's
/// volume controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistentVolumeClaimRestorer;

impl ResourceRestorer for PersistentVolumeClaimRestorer {
    fn handles(&self, _obj: &Unstructured, _restore: &Restore) -> bool { true }

    fn prepare(&self, obj: Unstructured, _restore: &Restore, _backup: &Backup) -> Prepared {
        let mut obj = match reset_metadata_and_status(obj, false) {
            Ok(o) => o,
            Err(e) => return Prepared::err(e),
        };
        if let Some(Json::Object(annotations)) = obj.get_path_mut(&["metadata", "annotations"]) {
            annotations.retain(|k, _| !k.starts_with(BIND_ANNOTATION_PREFIX));
        }
        Prepared::ok(obj)
    }
}
