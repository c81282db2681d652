//! kvault restore – replays a backup archive into a live cluster.
//!
//! The archive is unpacked to a temp dir, resource types are ordered by
//! priority, and every selected object is passed through its type's strategy
//! and created in its (possibly remapped) namespace. Problems never abort the
//! call; they are collected into warning and error summaries.

#![forbid(unsafe_code)]

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use kvault_core::{Backup, IncludesExcludes, LabelMatcher, Restore, RestoreResult};
use kvault_kubehub::{DiscoveryHelper, DynamicFactory, NamespaceClient};
use metrics::{counter, histogram};
use tracing::{error, info};

pub mod config;
mod context;
pub mod extract;
pub mod filesystem;
pub mod log;
pub mod prioritize;
pub mod restorers;
pub mod waiter;

pub use config::RestoreConfig;
pub use filesystem::{FileSystem, OsFileSystem};
pub use restorers::{BasicRestorer, Prepared, ResourceRestorer, RestorerRegistry};

use context::RestoreContext;
use crate::log::RestoreLog;

#[async_trait::async_trait]
pub trait Restorer: Send + Sync {
    /// Restore `backup` from `backup_reader` (gzip tar) and write the run log,
    /// gzip-compressed, to `log_file`. Returns `(warnings, errors)`.
    async fn restore(
        &self,
        restore: &Restore,
        backup: &Backup,
        backup_reader: &mut (dyn Read + Send),
        log_file: &mut (dyn Write + Send),
    ) -> (RestoreResult, RestoreResult);
}

/// Restorer backed by discovery, a dynamic client factory and a namespace client.
pub struct KubernetesRestorer {
    discovery: Arc<dyn DiscoveryHelper>,
    factory: Arc<dyn DynamicFactory>,
    namespaces: Arc<dyn NamespaceClient>,
    fs: Arc<dyn FileSystem>,
    restorers: RestorerRegistry,
    config: RestoreConfig,
}

impl KubernetesRestorer {
    /// Built-in strategies plus `custom` ones, which replace built-ins for the
    /// same type. A custom name that discovery cannot resolve is an error.
    pub fn new(
        discovery: Arc<dyn DiscoveryHelper>,
        factory: Arc<dyn DynamicFactory>,
        namespaces: Arc<dyn NamespaceClient>,
        config: RestoreConfig,
        custom: Vec<(String, Arc<dyn ResourceRestorer>)>,
    ) -> Result<Self> {
        let mut restorers = RestorerRegistry::builtin(discovery.as_ref());
        for (name, restorer) in custom {
            restorers.register(discovery.as_ref(), &name, restorer)?;
        }
        info!(restorers = restorers.len(), priorities = ?config.resource_priorities, "restorer ready");
        Ok(Self { discovery, factory, namespaces, fs: Arc::new(OsFileSystem), restorers, config })
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }
}

#[async_trait::async_trait]
impl Restorer for KubernetesRestorer {
    async fn restore(
        &self,
        restore: &Restore,
        backup: &Backup,
        backup_reader: &mut (dyn Read + Send),
        log_file: &mut (dyn Write + Send),
    ) -> (RestoreResult, RestoreResult) {
        let t0 = Instant::now();
        counter!("restore_runs_total", 1u64);

        let selector = match LabelMatcher::new(restore.spec.label_selector.as_ref()) {
            Ok(s) => s,
            Err(e) => return (RestoreResult::new(), RestoreResult::global(e)),
        };

        let mut unresolved = Vec::new();
        let resource_filter = IncludesExcludes::generate(
            &restore.spec.included_resources,
            &restore.spec.excluded_resources,
            |item| match self.discovery.resolve_group_resource(item) {
                Ok(gr) => gr.to_string(),
                Err(e) => {
                    error!(resource = %item, error = %e, "unable to resolve resource");
                    unresolved.push(item.to_string());
                    item.to_string()
                }
            },
        );

        let prioritized = match prioritize::prioritize_resources(
            self.discovery.as_ref(),
            &self.config.resource_priorities,
            &resource_filter,
        ) {
            Ok(p) => p,
            Err(e) => return (RestoreResult::new(), RestoreResult::global(format_args!("{:#}", e))),
        };

        let log = RestoreLog::new(log_file);
        let ctx = RestoreContext {
            backup,
            restore,
            prioritized: &prioritized,
            selector: &selector,
            log: &log,
            discovery: self.discovery.as_ref(),
            factory: self.factory.as_ref(),
            namespaces: self.namespaces.as_ref(),
            fs: self.fs.as_ref(),
            restorers: &self.restorers,
            wait_timeout: self.config.wait_timeout,
        };
        let (mut warnings, errors) = ctx.execute(backup_reader).await;
        for item in unresolved {
            warnings.add_global(format_args!("unable to resolve resource {:?}", item));
        }
        log.log(format_args!("Restore finished with {} warnings and {} errors", warnings.len(), errors.len()));
        log.finish();

        histogram!("restore_duration_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(
            restore = %restore.name,
            backup = %backup.namespace_and_name(),
            warnings = warnings.len(),
            errors = errors.len(),
            took_ms = %t0.elapsed().as_millis(),
            "restore finished"
        );
        (warnings, errors)
    }
}
