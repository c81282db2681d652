//! Per-resource-type restore strategies.
//!
//! A strategy decides whether an archived object is restored, rewrites it
//! before creation, and optionally asks the engine to wait for readiness.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use kvault_core::{Backup, GroupResource, Restore, Unstructured};
use kvault_kubehub::DiscoveryHelper;
use serde_json::Value as Json;
use tracing::debug;

mod job;
mod namespace;
mod pod;
mod service;
mod volume;

pub use job::JobRestorer;
pub use namespace::NamespaceRestorer;
pub use pod::PodRestorer;
pub use service::ServiceRestorer;
pub use volume::{PersistentVolumeClaimRestorer, PersistentVolumeRestorer};

/// Outcome of [`ResourceRestorer::prepare`]. A warning may accompany either
/// a prepared object or an error.
#[derive(Debug)]
pub struct Prepared {
    pub object: Result<Json>,
    pub warning: Option<anyhow::Error>,
}

impl Prepared {
    pub fn ok(obj: Unstructured) -> Self { Self { object: Ok(obj.into_value()), warning: None } }

    pub fn err(e: anyhow::Error) -> Self { Self { object: Err(e), warning: None } }

    pub fn with_warning(mut self, w: anyhow::Error) -> Self {
        self.warning = Some(w);
        self
    }
}

pub trait ResourceRestorer: Send + Sync {
    /// Whether this object takes part in the restore at all.
    fn handles(&self, obj: &Unstructured, restore: &Restore) -> bool;

    fn prepare(&self, obj: Unstructured, restore: &Restore, backup: &Backup) -> Prepared;

    /// Whether created objects of this type must be waited on.
    fn wait(&self) -> bool { false }

    fn ready(&self, _obj: &Unstructured) -> bool { true }
}

/// Restores every object unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicRestorer;

impl ResourceRestorer for BasicRestorer {
    fn handles(&self, _obj: &Unstructured, _restore: &Restore) -> bool { true }

    fn prepare(&self, obj: Unstructured, _restore: &Restore, _backup: &Backup) -> Prepared { Prepared::ok(obj) }
}

const METADATA_KEEP: &[&str] = &["name", "namespace", "labels", "annotations"];

/// Drop server-populated metadata (uid, resourceVersion, timestamps...) and,
/// unless `keep_status`, the status block.
pub fn reset_metadata_and_status(mut obj: Unstructured, keep_status: bool) -> Result<Unstructured> {
    let meta = obj
        .as_object_mut()
        .get_mut("metadata")
        .and_then(Json::as_object_mut)
        .context("object has no metadata")?;
    meta.retain(|k, _| METADATA_KEEP.contains(&k.as_str()));
    if !keep_status {
        obj.as_object_mut().remove("status");
    }
    Ok(obj)
}

/// Strategies keyed by canonical resource type, with a fallback.
pub struct RestorerRegistry {
    by_type: HashMap<String, Arc<dyn ResourceRestorer>>,
    fallback: Arc<dyn ResourceRestorer>,
}

impl Default for RestorerRegistry {
    fn default() -> Self { Self { by_type: HashMap::new(), fallback: Arc::new(BasicRestorer) } }
}

impl RestorerRegistry {
    /// Resolve every name through discovery. Any unresolvable name fails construction.
    pub fn new<I>(discovery: &dyn DiscoveryHelper, custom: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn ResourceRestorer>)>,
    {
        let mut reg = Self::default();
        for (name, restorer) in custom {
            reg.register(discovery, &name, restorer)?;
        }
        Ok(reg)
    }

    /// The built-in strategies for every type the cluster serves.
    pub fn builtin(discovery: &dyn DiscoveryHelper) -> Self {
        let mut reg = Self::default();
        for (name, restorer) in builtin_restorers() {
            if let Err(e) = reg.register(discovery, name, restorer) {
                debug!(resource = %name, error = %e, "built-in restorer not registered");
            }
        }
        reg
    }

    pub fn register(&mut self, discovery: &dyn DiscoveryHelper, name: &str, restorer: Arc<dyn ResourceRestorer>) -> Result<()> {
        let gr = discovery
            .resolve_group_resource(name)
            .with_context(|| format!("resolving restorer resource {:?}", name))?;
        self.by_type.insert(gr.to_string(), restorer);
        Ok(())
    }

    /// The registered strategy and whether it is a custom one.
    pub fn get(&self, gr: &GroupResource) -> (Arc<dyn ResourceRestorer>, bool) {
        match self.by_type.get(&gr.to_string()) {
            Some(r) => (r.clone(), true),
            None => (self.fallback.clone(), false),
        }
    }

    pub fn len(&self) -> usize { self.by_type.len() }

    pub fn is_empty(&self) -> bool { self.by_type.is_empty() }
}

fn builtin_restorers() -> Vec<(&'static str, Arc<dyn ResourceRestorer>)> {
    fn arc<R: ResourceRestorer + 'static>(r: R) -> Arc<dyn ResourceRestorer> { Arc::new(r) }
    vec![
        ("namespaces", arc(NamespaceRestorer)),
        ("persistentvolumes", arc(PersistentVolumeRestorer)),
        ("persistentvolumeclaims", arc(PersistentVolumeClaimRestorer)),
        ("pods", arc(PodRestorer)),
        ("services", arc(ServiceRestorer)),
        ("jobs", arc(JobRestorer)),
    ]
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use kvault_kubehub::{ApiResourceInfo, ApiResourceList, Catalog};
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::new(vec![ApiResourceList::new("v1", vec![
            ApiResourceInfo::new("pods", "Pod", true),
            ApiResourceInfo::new("namespaces", "Namespace", false),
        ])])
    }

    #[test]
    fn reset_keeps_identity_and_drops_server_fields() {
        let o = obj(json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "c", "namespace": "ns", "labels": {"a": "b"}, "uid": "123", "resourceVersion": "9", "creationTimestamp": "x"},
            "data": {"k": "v"},
            "status": {"phase": "x"}
        }));
        let out = reset_metadata_and_status(o.clone(), false).unwrap();
        let meta = out.get_path(&["metadata"]).unwrap().as_object().unwrap();
        assert_eq!(meta.len(), 3);
        assert!(out.get_path(&["status"]).is_none());
        assert_eq!(out.get_path(&["data", "k"]), Some(&json!("v")));

        let kept = reset_metadata_and_status(o, true).unwrap();
        assert!(kept.get_path(&["status"]).is_some());
    }

    #[test]
    fn reset_requires_metadata() {
        assert!(reset_metadata_and_status(obj(json!({"kind": "X"})), false).is_err());
    }

    #[test]
    fn registry_resolves_short_names_and_falls_back() {
        let reg = RestorerRegistry::new(&catalog(), vec![("Pod".to_string(), Arc::new(PodRestorer) as Arc<dyn ResourceRestorer>)]).unwrap();
        assert!(reg.get(&GroupResource::new("", "pods")).1);
        assert!(!reg.get(&GroupResource::new("", "configmaps")).1);
    }

    #[test]
    fn registry_fails_on_unknown_name() {
        let res = RestorerRegistry::new(&catalog(), vec![("widgets".to_string(), Arc::new(BasicRestorer) as Arc<dyn ResourceRestorer>)]);
        assert!(res.is_err());
    }

    #[test]
    fn builtin_skips_types_the_cluster_lacks() {
        let reg = RestorerRegistry::builtin(&catalog());
        assert_eq!(reg.len(), 2);
        assert!(reg.get(&GroupResource::new("", "namespaces")).1);
    }
}
