use anyhow::anyhow;
use kvault_core::{Backup, Restore, Unstructured};

use super::{reset_metadata_and_status, Prepared, ResourceRestorer};

/// Namespaces are restored only when the restore's namespace rules include
/// them, under their mapped name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceRestorer;

impl ResourceRestorer for NamespaceRestorer {
    fn handles(&self, obj: &Unstructured, restore: &Restore) -> bool {
        restore.spec.namespace_filter().should_include(obj.name())
    }

    fn prepare(&self, obj: Unstructured, restore: &Restore, _backup: &Backup) -> Prepared {
        if obj.name().is_empty() {
            return Prepared::err(anyhow!("namespace has no name"));
        }
        let target = restore.spec.target_namespace(obj.name()).to_string();
        match reset_metadata_and_status(obj, false) {
            Ok(mut obj) => {
                obj.set_name(&target);
                Prepared::ok(obj)
            }
            Err(e) => Prepared::err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use serde_json::json;

    fn ns(name: &str) -> Unstructured {
        obj(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name, "uid": "u"}, "status": {"phase": "Active"}}))
    }

    #[test]
    fn handles_follows_namespace_rules() {
        let mut restore = Restore::default();
        restore.spec.excluded_namespaces = vec!["kube-system".into()];
        assert!(NamespaceRestorer.handles(&ns("ns1"), &restore));
        assert!(!NamespaceRestorer.handles(&ns("kube-system"), &restore));

        restore.spec.included_namespaces = vec!["ns2".into()];
        assert!(!NamespaceRestorer.handles(&ns("ns1"), &restore));
    }

    #[test]
    fn prepare_renames_to_mapped_target() {
        let mut restore = Restore::default();
        restore.spec.namespace_mapping.insert("ns1".into(), "ns2".into());
        let out = prepared(NamespaceRestorer.prepare(ns("ns1"), &restore, &Backup::default()));
        assert_eq!(out.name(), "ns2");
        assert!(out.get_path(&["status"]).is_none());
        assert!(out.get_path(&["metadata", "uid"]).is_none());

        let same = prepared(NamespaceRestorer.prepare(ns("other"), &restore, &Backup::default()));
        assert_eq!(same.name(), "other");
    }
}
