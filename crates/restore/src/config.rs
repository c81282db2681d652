//! Runtime configuration for the restore engine, read from `KVAULT_*` variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource types restored ahead of everything else, in order.
pub const DEFAULT_RESOURCE_PRIORITIES: &[&str] = &[
    "namespaces",
    "persistentvolumes",
    "persistentvolumeclaims",
    "secrets",
    "configmaps",
];

pub const DEFAULT_WAIT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreConfig {
    pub resource_priorities: Vec<String>,
    /// Per-batch bound on readiness waits.
    pub wait_timeout: Duration,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            resource_priorities: DEFAULT_RESOURCE_PRIORITIES.iter().map(|s| s.to_string()).collect(),
            wait_timeout: Duration::from_secs(DEFAULT_WAIT_SECS),
        }
    }
}

impl RestoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let mut cfg = Self::default();
        if let Some(list) = get("KVAULT_RESOURCE_PRIORITIES") {
            cfg.resource_priorities = parse_list(&list);
        }
        if let Some(secs) = get("KVAULT_RESTORE_WAIT_SECS").and_then(|s| s.trim().parse::<u64>().ok()) {
            cfg.wait_timeout = Duration::from_secs(secs);
        }
        cfg
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect()
}
