//! kvault kubehub – discovery, dynamic clients and namespace wiring.
//!
//! The restore engine talks to the cluster only through the traits in this
//! crate; the `Kube*` types implement them on top of kube-rs.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::{api::core::v1::Namespace, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{
    api::{Api, PostParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    runtime::{watcher::{self, Event}, WatchStreamExt},
    Client,
};
use kvault_core::{GroupResource, GroupVersion, GroupVersionKind, Unstructured};
use tracing::{debug, info, warn};

pub mod catalog;

pub use catalog::{ApiResourceInfo, ApiResourceList, Catalog};

/// Source of the served resource catalog.
pub trait DiscoveryHelper: Send + Sync {
    /// Served resources grouped by API version.
    fn resources(&self) -> &[ApiResourceList];

    /// Resolve a plural, kind, or `resource.group` name to its canonical group resource.
    fn resolve_group_resource(&self, name: &str) -> Result<GroupResource>;

    /// Served entry for an already resolved group resource.
    fn lookup(&self, gr: &GroupResource) -> Option<(GroupVersion, &ApiResourceInfo)> {
        for list in self.resources() {
            let Ok(gv) = GroupVersion::parse(&list.group_version) else { continue };
            if gv.group != gr.group {
                continue;
            }
            if let Some(info) = list.resources.iter().find(|r| r.name == gr.resource) {
                return Some((gv, info));
            }
        }
        None
    }
}

/// Errors from calls against the live API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    AlreadyExists(String),
    #[error("api error: {0}")]
    Api(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    pub fn is_already_exists(&self) -> bool { matches!(self, ClientError::AlreadyExists(_)) }
}

impl From<kube::Error> for ClientError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => ClientError::AlreadyExists(ae.message),
            other => ClientError::Api(other.to_string()),
        }
    }
}

/// Watch notification for one object.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Applied(Unstructured),
    Deleted(Unstructured),
    Error(String),
}

pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Plural resource name plus scope, enough to address a type on the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: String,
    pub namespaced: bool,
}

/// Client bound to one resource type and namespace.
#[async_trait::async_trait]
pub trait DynamicClient: Send + Sync {
    async fn create(&self, obj: &Unstructured) -> Result<Unstructured, ClientError>;

    /// Open a watch. The subscription ends when the stream is dropped.
    async fn watch(&self) -> Result<WatchStream, ClientError>;
}

#[async_trait::async_trait]
pub trait DynamicFactory: Send + Sync {
    async fn client_for(&self, gvk: &GroupVersionKind, resource: &ResourceSpec, namespace: &str) -> Result<Arc<dyn DynamicClient>>;
}

#[async_trait::async_trait]
pub trait NamespaceClient: Send + Sync {
    /// Get-or-create. Returns true when the namespace was created.
    async fn ensure_namespace_exists(&self, name: &str) -> Result<bool>;
}

/// Discover every served version of every group (not only the preferred one).
pub async fn discover(client: Client) -> Result<Catalog> {
    let discovery = Discovery::new(client).run().await.context("running api discovery")?;
    let mut groups: Vec<_> = discovery.groups().collect();
    // Stable-ish order, core group first
    groups.sort_by(|a, b| a.name().cmp(b.name()));
    let mut lists = Vec::new();
    for group in groups {
        for version in group.versions() {
            let resources = group
                .versioned_resources(version)
                .into_iter()
                .map(|(ar, caps)| ApiResourceInfo {
                    name: ar.plural.clone(),
                    kind: ar.kind.clone(),
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                })
                .collect();
            let gv = if group.name().is_empty() { version.to_string() } else { format!("{}/{}", group.name(), version) };
            lists.push(ApiResourceList { group_version: gv, resources });
        }
    }
    info!(group_versions = lists.len(), "discovery complete");
    Ok(Catalog::new(lists))
}

fn to_unstructured(obj: &DynamicObject) -> Result<Unstructured> {
    let raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    Ok(Unstructured::from_value(raw)?)
}

fn watch_events(ev: std::result::Result<Event<DynamicObject>, watcher::Error>) -> Vec<WatchEvent> {
    let convert = |o: &DynamicObject, wrap: fn(Unstructured) -> WatchEvent| match to_unstructured(o) {
        Ok(u) => wrap(u),
        Err(e) => WatchEvent::Error(e.to_string()),
    };
    match ev {
        Ok(Event::Applied(o)) => vec![convert(&o, WatchEvent::Applied)],
        Ok(Event::Deleted(o)) => vec![convert(&o, WatchEvent::Deleted)],
        Ok(Event::Restarted(list)) => {
            debug!(count = list.len(), "watch restart");
            list.iter().map(|o| convert(o, WatchEvent::Applied)).collect()
        }
        Err(e) => {
            warn!(error = %e, "watch error");
            vec![WatchEvent::Error(e.to_string())]
        }
    }
}

/// Body for a create call. The apiserver rejects creates that carry a
/// `resourceVersion`, and archived objects always have one.
fn create_body(obj: &Unstructured) -> Result<DynamicObject> {
    let mut obj = obj.clone();
    obj.remove_path(&["metadata", "resourceVersion"]);
    serde_json::from_value(obj.into_value()).context("converting object for create")
}

/// Dynamic client over `Api<DynamicObject>`.
pub struct KubeDynamicClient {
    api: Api<DynamicObject>,
}

#[async_trait::async_trait]
impl DynamicClient for KubeDynamicClient {
    async fn create(&self, obj: &Unstructured) -> Result<Unstructured, ClientError> {
        let dyn_obj = create_body(obj)?;
        let created = self.api.create(&PostParams::default(), &dyn_obj).await?;
        Ok(to_unstructured(&created)?)
    }

    async fn watch(&self) -> Result<WatchStream, ClientError> {
        let stream = watcher::watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .flat_map(|ev| futures::stream::iter(watch_events(ev)))
            .boxed();
        Ok(stream)
    }
}

pub struct KubeDynamicFactory {
    client: Client,
}

impl KubeDynamicFactory {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl DynamicFactory for KubeDynamicFactory {
    async fn client_for(&self, gvk: &GroupVersionKind, resource: &ResourceSpec, namespace: &str) -> Result<Arc<dyn DynamicClient>> {
        if gvk.version.is_empty() || gvk.kind.is_empty() {
            return Err(anyhow!("object is missing apiVersion or kind ({})", gvk));
        }
        let kube_gvk = kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        let ar = ApiResource::from_gvk_with_plural(&kube_gvk, &resource.name);
        let api: Api<DynamicObject> = if resource.namespaced {
            if namespace.is_empty() {
                return Err(anyhow!("namespace required for namespaced resource {}", resource.name));
            }
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        };
        debug!(gvk = %gvk, resource = %resource.name, ns = %namespace, "dynamic client ready");
        Ok(Arc::new(KubeDynamicClient { api }))
    }
}

pub struct KubeNamespaceClient {
    api: Api<Namespace>,
}

impl KubeNamespaceClient {
    pub fn new(client: Client) -> Self { Self { api: Api::all(client) } }
}

#[async_trait::async_trait]
impl NamespaceClient for KubeNamespaceClient {
    async fn ensure_namespace_exists(&self, name: &str) -> Result<bool> {
        if self.api.get_opt(name).await.with_context(|| format!("getting namespace {}", name))?.is_some() {
            return Ok(false);
        }
        let ns = Namespace { metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() }, ..Default::default() };
        match self.api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(ns = %name, "namespace created");
                Ok(true)
            }
            Err(e) => match ClientError::from(e) {
                ClientError::AlreadyExists(_) => Ok(false),
                other => Err(anyhow!("error creating namespace {}: {}", name, other)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("pods \"bar\" {}", reason),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn conflict_maps_to_already_exists() {
        let e = ClientError::from(api_err(409, "AlreadyExists"));
        assert!(e.is_already_exists());
        assert!(e.to_string().contains("bar"));
    }

    #[test]
    fn other_api_errors_stay_generic() {
        assert!(!ClientError::from(api_err(409, "Conflict")).is_already_exists());
        assert!(!ClientError::from(api_err(403, "Forbidden")).is_already_exists());
    }

    #[test]
    fn watch_events_expand_restart_lists() {
        let ar = ApiResource::from_gvk_with_plural(&kube::core::GroupVersionKind::gvk("", "v1", "PersistentVolume"), "persistentvolumes");
        let a = DynamicObject::new("a", &ar);
        let b = DynamicObject::new("b", &ar);
        let evs = watch_events(Ok(Event::Restarted(vec![a.clone(), b])));
        assert_eq!(evs.len(), 2);
        assert!(matches!(&evs[0], WatchEvent::Applied(u) if u.name() == "a"));
        let del = watch_events(Ok(Event::Deleted(a)));
        assert!(matches!(&del[0], WatchEvent::Deleted(u) if u.name() == "a"));
    }

    #[test]
    fn create_body_drops_resource_version() {
        let obj = Unstructured::from_value(serde_json::json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "c1", "namespace": "ns1", "resourceVersion": "8841", "labels": {"app": "web"}},
            "data": {"k": "v"}
        }))
        .unwrap();
        let body = create_body(&obj).unwrap();
        assert_eq!(body.metadata.resource_version, None);
        assert_eq!(body.metadata.name.as_deref(), Some("c1"));
        assert_eq!(body.metadata.labels.unwrap()["app"], "web");
        assert_eq!(body.data["data"]["k"], "v");
        assert_eq!(obj.get_path(&["metadata", "resourceVersion"]), Some(&serde_json::json!("8841")));
    }
}
