//! kvault core types: resource identifiers, restore requests and result summaries.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::{Deserialize, Serialize};

pub mod collections;
pub mod selector;
pub mod unstructured;

pub use collections::IncludesExcludes;
pub use selector::LabelMatcher;
pub use unstructured::Unstructured;

/// Top-level archive directory holding cluster-scoped resource directories.
pub const CLUSTER_SCOPED_DIR: &str = "cluster";
/// Top-level archive directory holding one directory per namespace.
pub const NAMESPACE_SCOPED_DIR: &str = "namespaces";
/// Label stamped on every restored object, valued with the restore name.
pub const RESTORE_LABEL_KEY: &str = "kvault.io/restore-name";

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("decoding object: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("invalid group version: {0}")]
    InvalidGroupVersion(String),
    #[error("invalid label selector: {0}")]
    InvalidSelector(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// A (group, plural resource) pair. Ordered and compared by its canonical
/// string form `resource.group` (`resource` for the core group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), resource: resource.into() }
    }

    /// Parse `resource[.group]`, splitting at the first dot.
    pub fn parse(s: &str) -> Self {
        match s.split_once('.') {
            Some((resource, group)) => Self::new(group, resource),
            None => Self::new("", s),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

impl PartialOrd for GroupResource {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl Ord for GroupResource {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    /// Parse an apiVersion string: `v1` or `apps/v1`.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let parts: Vec<_> = s.split('/').collect();
        match parts.as_slice() {
            [""] => Ok(Self { group: String::new(), version: String::new() }),
            [version] => Ok(Self { group: String::new(), version: (*version).to_string() }),
            [group, version] if !version.is_empty() => Ok(Self { group: (*group).to_string(), version: (*version).to_string() }),
            _ => Err(CoreError::InvalidGroupVersion(s.to_string())),
        }
    }

    pub fn with_resource(&self, resource: &str) -> GroupResource {
        GroupResource::new(self.group.clone(), resource)
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Source snapshot identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub name: String,
    pub namespace: String,
    pub storage_location: Option<String>,
}

impl Backup {
    pub fn namespace_and_name(&self) -> String {
        if self.namespace.is_empty() { self.name.clone() } else { format!("{}/{}", self.namespace, self.name) }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    pub backup_name: String,
    #[serde(default)]
    pub included_namespaces: Vec<String>,
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
    #[serde(default)]
    pub included_resources: Vec<String>,
    #[serde(default)]
    pub excluded_resources: Vec<String>,
    /// Archived namespace name -> target namespace name.
    #[serde(default)]
    pub namespace_mapping: BTreeMap<String, String>,
    /// `None` selects everything.
    #[serde(default)]
    pub label_selector: Option<LabelSelector>,
}

impl RestoreSpec {
    /// Namespace an archived namespace restores into; identity when unmapped.
    pub fn target_namespace<'a>(&'a self, archived: &'a str) -> &'a str {
        self.namespace_mapping.get(archived).map(String::as_str).unwrap_or(archived)
    }

    pub fn namespace_filter(&self) -> IncludesExcludes {
        IncludesExcludes::new()
            .includes(self.included_namespaces.iter().cloned())
            .excludes(self.excluded_namespaces.iter().cloned())
    }
}

/// A restore request. Immutable for the duration of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Restore {
    pub name: String,
    pub namespace: String,
    pub spec: RestoreSpec,
}

/// Warning or error summary of a restore run, split by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Run-level messages not tied to one namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespaces: BTreeMap<String, Vec<String>>,
}

impl RestoreResult {
    pub fn new() -> Self { Self::default() }

    pub fn global(msg: impl fmt::Display) -> Self {
        Self { global: vec![msg.to_string()], ..Self::default() }
    }

    /// Append everything from `other`. Repeated messages are kept.
    pub fn merge(&mut self, other: RestoreResult) {
        self.global.extend(other.global);
        self.cluster.extend(other.cluster);
        for (ns, msgs) in other.namespaces {
            self.namespaces.entry(ns).or_default().extend(msgs);
        }
    }

    pub fn add_global(&mut self, msg: impl fmt::Display) {
        self.global.push(msg.to_string());
    }

    /// Record under the cluster scope when `namespace` is empty, else under the namespace.
    pub fn add(&mut self, namespace: &str, msg: impl fmt::Display) {
        if namespace.is_empty() {
            self.cluster.push(msg.to_string());
        } else {
            self.namespaces.entry(namespace.to_string()).or_default().push(msg.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.cluster.is_empty() && self.namespaces.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.cluster.len() + self.namespaces.values().map(Vec::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_resource_renders_and_parses() {
        let core = GroupResource::parse("pods");
        assert_eq!(core, GroupResource::new("", "pods"));
        assert_eq!(core.to_string(), "pods");

        let apps = GroupResource::parse("deployments.apps");
        assert_eq!(apps.group, "apps");
        assert_eq!(apps.resource, "deployments");
        assert_eq!(apps.to_string(), "deployments.apps");

        let crd = GroupResource::parse("customresourcedefinitions.apiextensions.k8s.io");
        assert_eq!(crd.group, "apiextensions.k8s.io");
    }

    #[test]
    fn group_resource_orders_by_canonical_string() {
        let mut v = vec![
            GroupResource::new("apps", "deployments"),
            GroupResource::new("", "pods"),
            GroupResource::new("", "configmaps"),
            GroupResource::new("batch", "jobs"),
        ];
        v.sort();
        let names: Vec<String> = v.iter().map(|g| g.to_string()).collect();
        assert_eq!(names, vec!["configmaps", "deployments.apps", "jobs.batch", "pods"]);
    }

    #[test]
    fn group_version_parse() {
        assert_eq!(GroupVersion::parse("v1").unwrap().to_string(), "v1");
        let gv = GroupVersion::parse("storage.k8s.io/v1").unwrap();
        assert_eq!(gv.group, "storage.k8s.io");
        assert_eq!(gv.version, "v1");
        assert!(GroupVersion::parse("a/b/c").is_err());
        assert!(GroupVersion::parse("apps/").is_err());
    }

    #[test]
    fn merge_concatenates_without_dedup() {
        let mut a = RestoreResult::new();
        a.add_global("g1");
        a.add("", "c1");
        a.add("ns1", "same");

        let mut b = RestoreResult::new();
        b.add_global("g1");
        b.add("ns1", "same");
        b.add("ns2", "other");

        a.merge(b);
        assert_eq!(a.global, vec!["g1", "g1"]);
        assert_eq!(a.cluster, vec!["c1"]);
        assert_eq!(a.namespaces["ns1"], vec!["same", "same"]);
        assert_eq!(a.namespaces["ns2"], vec!["other"]);
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn target_namespace_defaults_to_identity() {
        let mut spec = RestoreSpec::default();
        spec.namespace_mapping.insert("ns1".into(), "ns2".into());
        assert_eq!(spec.target_namespace("ns1"), "ns2");
        assert_eq!(spec.target_namespace("other"), "other");
    }
}
