//! Deterministic restore order over resource types.

use std::collections::{BTreeSet, HashSet};

use anyhow::{Context, Result};
use kvault_core::{GroupResource, GroupVersion, IncludesExcludes};
use kvault_kubehub::DiscoveryHelper;
use tracing::{debug, info};

/// Priority types first (in the given order), then every other served type
/// sorted by canonical name. Types rejected by `filter` are dropped.
pub fn prioritize_resources(
    discovery: &dyn DiscoveryHelper,
    priorities: &[String],
    filter: &IncludesExcludes,
) -> Result<Vec<GroupResource>> {
    let mut ordered = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for name in priorities {
        let gr = discovery
            .resolve_group_resource(name)
            .with_context(|| format!("resolving priority resource {:?}", name))?;
        let key = gr.to_string();
        if !filter.should_include(&key) {
            info!(resource = %key, "not including resource");
            continue;
        }
        if seen.insert(key) {
            ordered.push(gr);
        }
    }

    let mut rest = BTreeSet::new();
    for list in discovery.resources() {
        let gv = GroupVersion::parse(&list.group_version)
            .with_context(|| format!("parsing group version {:?}", list.group_version))?;
        for res in &list.resources {
            if res.name.contains('/') {
                continue;
            }
            let gr = gv.with_resource(&res.name);
            let key = gr.to_string();
            if seen.contains(&key) {
                continue;
            }
            if !filter.should_include(&key) {
                debug!(resource = %key, "not including resource");
                continue;
            }
            rest.insert(gr);
        }
    }
    ordered.extend(rest);
    Ok(ordered)
}
