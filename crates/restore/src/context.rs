//! One restore run: walks the extracted tree and creates objects.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use kvault_core::{
    Backup, GroupResource, LabelMatcher, Restore, RestoreResult, Unstructured, CLUSTER_SCOPED_DIR,
    NAMESPACE_SCOPED_DIR, RESTORE_LABEL_KEY,
};
use kvault_kubehub::{DiscoveryHelper, DynamicClient, DynamicFactory, NamespaceClient, ResourceSpec};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::extract::unzip_and_extract;
use crate::filesystem::FileSystem;
use crate::log::RestoreLog;
use crate::restorers::{ResourceRestorer, RestorerRegistry};
use crate::waiter::ResourceWaiter;

pub(crate) type Outcome = (RestoreResult, RestoreResult);

/// Removes the extraction dir however the run ends.
struct TempDirGuard<'a> {
    fs: &'a dyn FileSystem,
    dir: PathBuf,
}

impl Drop for TempDirGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.fs.remove_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "removing extracted backup failed");
        }
    }
}

/// Client, strategy and optional waiter for one (resource type, namespace) batch.
struct Batch {
    client: Arc<dyn DynamicClient>,
    restorer: Arc<dyn ResourceRestorer>,
    waiter: Option<ResourceWaiter>,
}

pub(crate) struct RestoreContext<'a, 'w> {
    pub backup: &'a Backup,
    pub restore: &'a Restore,
    pub prioritized: &'a [GroupResource],
    pub selector: &'a LabelMatcher,
    pub log: &'a RestoreLog<'w>,
    pub discovery: &'a dyn DiscoveryHelper,
    pub factory: &'a dyn DynamicFactory,
    pub namespaces: &'a dyn NamespaceClient,
    pub fs: &'a dyn FileSystem,
    pub restorers: &'a RestorerRegistry,
    pub wait_timeout: Duration,
}

impl RestoreContext<'_, '_> {
    pub async fn execute(&self, reader: &mut (dyn Read + Send)) -> Outcome {
        self.log.log(format_args!("Starting restore of backup {}", self.backup.namespace_and_name()));
        let dir = match unzip_and_extract(reader, self.fs) {
            Ok(dir) => dir,
            Err(e) => {
                self.log.log(format_args!("error unzipping and extracting: {}", e));
                return (RestoreResult::new(), RestoreResult::global(e));
            }
        };
        let _cleanup = TempDirGuard { fs: self.fs, dir: dir.clone() };
        self.restore_from_dir(&dir).await
    }

    /// Cluster-scoped resources first, then every included namespace.
    pub async fn restore_from_dir(&self, dir: &Path) -> Outcome {
        let (mut warnings, mut errors) = (RestoreResult::new(), RestoreResult::new());

        let cluster_path = dir.join(CLUSTER_SCOPED_DIR);
        match self.fs.dir_exists(&cluster_path) {
            Ok(true) => {
                let (w, e) = self.restore_namespace("", &cluster_path).await;
                warnings.merge(w);
                errors.merge(e);
            }
            Ok(false) => {}
            Err(e) => errors.add("", e),
        }

        let namespaces_path = dir.join(NAMESPACE_SCOPED_DIR);
        match self.fs.dir_exists(&namespaces_path) {
            Ok(true) => {}
            Ok(false) => return (warnings, errors),
            Err(e) => {
                errors.add_global(e);
                return (warnings, errors);
            }
        }
        let entries = match self.fs.read_dir(&namespaces_path) {
            Ok(entries) => entries,
            Err(e) => {
                errors.add_global(e);
                return (warnings, errors);
            }
        };

        let filter = self.restore.spec.namespace_filter();
        for ns in entries {
            if !ns.is_dir {
                self.log.log(format_args!("{} is not a directory, skipping", ns.name));
                continue;
            }
            if !filter.should_include(&ns.name) {
                self.log.log(format_args!("Skipping namespace {}", ns.name));
                continue;
            }
            let (w, e) = self.restore_namespace(&ns.name, &namespaces_path.join(&ns.name)).await;
            warnings.merge(w);
            errors.merge(e);
        }
        (warnings, errors)
    }

    /// Restore one archived namespace dir (or the cluster dir when `archived_ns`
    /// is empty) into its mapped target.
    pub async fn restore_namespace(&self, archived_ns: &str, ns_path: &Path) -> Outcome {
        let (mut warnings, mut errors) = (RestoreResult::new(), RestoreResult::new());
        let namespace = self.restore.spec.target_namespace(archived_ns);

        if namespace.is_empty() {
            self.log.log("Restoring cluster-scoped resources");
        } else if namespace != archived_ns {
            self.log.log(format_args!("Restoring namespace {} into {}", archived_ns, namespace));
        } else {
            self.log.log(format_args!("Restoring namespace {}", namespace));
        }

        let resource_dirs = match self.fs.read_dir(ns_path) {
            Ok(entries) => entries,
            Err(e) => {
                errors.add(namespace, e);
                return (warnings, errors);
            }
        };
        // several dirs may resolve to one type (`configmaps` and `ConfigMap`)
        let mut dirs_by_type: HashMap<String, Vec<String>> = HashMap::new();
        for d in resource_dirs.into_iter().filter(|d| d.is_dir) {
            match self.discovery.resolve_group_resource(&d.name) {
                Ok(gr) => dirs_by_type.entry(gr.to_string()).or_default().push(d.name),
                Err(e) => {
                    self.log.log(format_args!("unable to resolve resource directory {}: {:#}", d.name, e));
                    warnings.add(namespace, format_args!("unable to resolve resource directory {}: {:#}", d.name, e));
                }
            }
        }

        if !namespace.is_empty() {
            match self.namespaces.ensure_namespace_exists(namespace).await {
                Ok(created) => debug!(ns = %namespace, created, "namespace ensured"),
                Err(e) => {
                    errors.add_global(format_args!("error ensuring namespace {} exists: {:#}", namespace, e));
                    return (warnings, errors);
                }
            }
        }

        for gr in self.prioritized {
            let Some(dir_names) = dirs_by_type.get(&gr.to_string()) else { continue };
            for dir_name in dir_names {
                let (w, e) = self.restore_resource_for_namespace(namespace, gr, &ns_path.join(dir_name)).await;
                warnings.merge(w);
                errors.merge(e);
            }
        }
        (warnings, errors)
    }

    /// Restore every object file of one resource type into `namespace`
    /// (empty for cluster scope).
    pub async fn restore_resource_for_namespace(&self, namespace: &str, gr: &GroupResource, resource_path: &Path) -> Outcome {
        let (mut warnings, mut errors) = (RestoreResult::new(), RestoreResult::new());
        self.log.log(format_args!("Restoring resource {} into namespace {}", gr, namespace));

        let files = match self.fs.read_dir(resource_path) {
            Ok(files) => files,
            Err(e) => {
                errors.add(namespace, format_args!("error reading {:?} resource directory: {}", gr.to_string(), e));
                return (warnings, errors);
            }
        };

        let mut batch: Option<Batch> = None;
        for file in files.iter().filter(|f| !f.is_dir) {
            let full_path = resource_path.join(&file.name);
            let shown = full_path.display().to_string();
            let obj = match self.unmarshal(&full_path) {
                Ok(obj) => obj,
                Err(e) => {
                    errors.add(namespace, format_args!("error decoding {:?}: {:#}", shown, e));
                    continue;
                }
            };

            if !self.selector.matches(&obj.labels()) {
                continue;
            }

            if batch.is_none() {
                match self.init_batch(namespace, gr, &obj).await {
                    Ok(b) => batch = Some(b),
                    Err(msg) => {
                        errors.add_global(msg);
                        return (warnings, errors);
                    }
                }
            }
            let Some(b) = batch.as_ref() else { continue };

            if !b.restorer.handles(&obj, self.restore) {
                continue;
            }
            if obj.has_controller_owner() {
                self.log.log(format_args!("{}/{} has a controller owner - skipping", obj.namespace(), obj.name()));
                continue;
            }

            let kind = obj.kind().to_string();
            let prepared = b.restorer.prepare(obj, self.restore, self.backup);
            if let Some(w) = prepared.warning {
                warnings.add(namespace, format_args!("warning preparing {}: {:#}", shown, w));
            }
            let value = match prepared.object {
                Ok(v) => v,
                Err(e) => {
                    errors.add(namespace, format_args!("error preparing {}: {:#}", shown, e));
                    continue;
                }
            };
            let mut obj = match Unstructured::from_value(value) {
                Ok(o) => o,
                Err(e) => {
                    errors.add(namespace, format_args!("{}: unexpected type: {}", shown, e));
                    continue;
                }
            };

            obj.set_namespace(namespace);
            obj.set_label(RESTORE_LABEL_KEY, &self.restore.name);

            self.log.log(format_args!("Restoring {}: {}", kind, obj.name()));
            match b.client.create(&obj).await {
                Ok(_) => {
                    counter!("restore_objects_created_total", 1u64, "resource" => gr.to_string());
                    if let Some(waiter) = &b.waiter {
                        waiter.register_item(obj.name());
                    }
                }
                Err(e) if e.is_already_exists() => {
                    counter!("restore_objects_exists_total", 1u64, "resource" => gr.to_string());
                    warnings.add(namespace, e);
                }
                Err(e) => {
                    counter!("restore_objects_failed_total", 1u64, "resource" => gr.to_string());
                    self.log.log(format_args!("error restoring {}: {}", obj.name(), e));
                    errors.add(namespace, format_args!("error restoring {}: {}", shown, e));
                }
            }
        }

        if let Some(waiter) = batch.as_ref().and_then(|b| b.waiter.as_ref()) {
            if let Err(e) = waiter.wait(self.wait_timeout).await {
                counter!("restore_wait_timeouts_total", 1u64, "resource" => gr.to_string());
                warn!(resource = %gr, ns = %namespace, unready = e.unready().len(), "readiness wait failed");
                errors.add_global(format_args!(
                    "error waiting for all {} resources to be created in namespace {}: {}",
                    gr, namespace, e
                ));
            }
        }
        (warnings, errors)
    }

    async fn init_batch(&self, namespace: &str, gr: &GroupResource, obj: &Unstructured) -> Result<Batch, String> {
        let gvk = obj
            .group_version_kind()
            .map_err(|e| format!("error getting resource client for namespace {:?}, resource {:?}: {}", namespace, gr.to_string(), e))?;
        self.log.log(format_args!("Getting client for {}", gvk));

        let namespaced = match self.discovery.lookup(gr) {
            Some((_, info)) => info.namespaced,
            None => !namespace.is_empty(),
        };
        let spec = ResourceSpec { name: gr.resource.clone(), namespaced };
        let client = self
            .factory
            .client_for(&gvk, &spec, namespace)
            .await
            .map_err(|e| format!("error getting resource client for namespace {:?}, resource {:?}: {:#}", namespace, gr.to_string(), e))?;

        let (restorer, custom) = self.restorers.get(gr);
        if custom {
            self.log.log(format_args!("Using custom restorer for {}", gr));
        } else {
            self.log.log(format_args!("Using default restorer for {}", gr));
        }

        let waiter = if restorer.wait() {
            let events = client
                .watch()
                .await
                .map_err(|e| format!("error watching for namespace {:?}, resource {:?}: {}", namespace, gr.to_string(), e))?;
            let r = restorer.clone();
            Some(ResourceWaiter::new(events, Arc::new(move |o: &Unstructured| r.ready(o))))
        } else {
            None
        };
        info!(resource = %gr, ns = %namespace, custom, wait = waiter.is_some(), "batch ready");
        Ok(Batch { client, restorer, waiter })
    }

    fn unmarshal(&self, path: &Path) -> anyhow::Result<Unstructured> {
        let bytes = self.fs.read_file(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Unstructured::from_slice(&bytes)?)
    }
}
