//! Discovery catalog: served resource types grouped by API version.

use anyhow::{anyhow, Result};
use kvault_core::{GroupResource, GroupVersion};
use serde::{Deserialize, Serialize};

use crate::DiscoveryHelper;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResourceInfo {
    /// Plural resource name, e.g. `deployments`.
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
}

impl ApiResourceInfo {
    pub fn new(name: &str, kind: &str, namespaced: bool) -> Self {
        Self { name: name.to_string(), kind: kind.to_string(), namespaced }
    }
}

/// Resources served under one group version (`v1`, `apps/v1`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResourceList {
    pub group_version: String,
    pub resources: Vec<ApiResourceInfo>,
}

impl ApiResourceList {
    pub fn new(group_version: &str, resources: Vec<ApiResourceInfo>) -> Self {
        Self { group_version: group_version.to_string(), resources }
    }
}

/// In-memory discovery results. Populated from the cluster by [`crate::discover`]
/// or built directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    lists: Vec<ApiResourceList>,
}

impl Catalog {
    pub fn new(lists: Vec<ApiResourceList>) -> Self { Self { lists } }
}

impl DiscoveryHelper for Catalog {
    fn resources(&self) -> &[ApiResourceList] { &self.lists }

    fn resolve_group_resource(&self, name: &str) -> Result<GroupResource> {
        let wanted = GroupResource::parse(&name.trim().to_ascii_lowercase());
        if wanted.resource.is_empty() {
            return Err(anyhow!("unable to resolve resource {:?}: empty name", name));
        }
        let mut found: Option<GroupResource> = None;
        for list in &self.lists {
            let Ok(gv) = GroupVersion::parse(&list.group_version) else { continue };
            if !wanted.group.is_empty() && gv.group != wanted.group { continue; }
            let hit = list.resources.iter().find(|r| {
                !r.name.contains('/') && (r.name == wanted.resource || r.kind.to_ascii_lowercase() == wanted.resource)
            });
            let Some(r) = hit else { continue };
            let gr = gv.with_resource(&r.name);
            // core group wins over same-named resources in other groups
            if gr.group.is_empty() {
                return Ok(gr);
            }
            found.get_or_insert(gr);
        }
        found.ok_or_else(|| anyhow!("unable to resolve resource {:?}", name))
    }
}
