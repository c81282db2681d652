//! Schema-less Kubernetes object with typed projections for the few fields
//! every object carries.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::{CoreError, CoreResult, GroupVersion, GroupVersionKind};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unstructured {
    object: Map<String, Json>,
}

fn json_type(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

impl Unstructured {
    pub fn from_value(v: Json) -> CoreResult<Self> {
        match v {
            Json::Object(object) => Ok(Self { object }),
            other => Err(CoreError::NotAnObject(json_type(&other))),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        let v: Json = serde_json::from_slice(bytes)?;
        Self::from_value(v)
    }

    pub fn into_value(self) -> Json { Json::Object(self.object) }

    pub fn as_object(&self) -> &Map<String, Json> { &self.object }

    pub fn as_object_mut(&mut self) -> &mut Map<String, Json> { &mut self.object }

    fn str_field(&self, key: &str) -> &str {
        self.object.get(key).and_then(Json::as_str).unwrap_or("")
    }

    fn meta(&self) -> Option<&Map<String, Json>> {
        self.object.get("metadata").and_then(Json::as_object)
    }

    fn meta_mut(&mut self) -> &mut Map<String, Json> {
        let meta = self.object.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
        if !meta.is_object() {
            *meta = Json::Object(Map::new());
        }
        match meta {
            Json::Object(m) => m,
            _ => unreachable!("metadata replaced with an object above"),
        }
    }

    fn meta_str(&self, key: &str) -> &str {
        self.meta().and_then(|m| m.get(key)).and_then(Json::as_str).unwrap_or("")
    }

    pub fn api_version(&self) -> &str { self.str_field("apiVersion") }

    pub fn kind(&self) -> &str { self.str_field("kind") }

    pub fn name(&self) -> &str { self.meta_str("name") }

    pub fn namespace(&self) -> &str { self.meta_str("namespace") }

    pub fn set_name(&mut self, name: &str) {
        self.meta_mut().insert("name".into(), Json::String(name.to_string()));
    }

    /// Set `metadata.namespace`; an empty namespace removes the field.
    pub fn set_namespace(&mut self, namespace: &str) {
        let meta = self.meta_mut();
        if namespace.is_empty() {
            meta.remove("namespace");
        } else {
            meta.insert("namespace".into(), Json::String(namespace.to_string()));
        }
    }

    fn string_map(&self, key: &str) -> BTreeMap<String, String> {
        self.meta()
            .and_then(|m| m.get(key))
            .and_then(Json::as_object)
            .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
            .unwrap_or_default()
    }

    pub fn labels(&self) -> BTreeMap<String, String> { self.string_map("labels") }

    pub fn annotations(&self) -> BTreeMap<String, String> { self.string_map("annotations") }

    pub fn set_label(&mut self, key: &str, value: &str) {
        let meta = self.meta_mut();
        let labels = meta.entry("labels").or_insert_with(|| Json::Object(Map::new()));
        if !labels.is_object() {
            *labels = Json::Object(Map::new());
        }
        if let Some(m) = labels.as_object_mut() {
            m.insert(key.to_string(), Json::String(value.to_string()));
        }
    }

    /// Owner references; malformed entries are ignored.
    pub fn owner_references(&self) -> Vec<OwnerReference> {
        self.meta()
            .and_then(|m| m.get("ownerReferences"))
            .and_then(Json::as_array)
            .map(|refs| refs.iter().filter_map(|r| serde_json::from_value(r.clone()).ok()).collect())
            .unwrap_or_default()
    }

    /// True when some owner reference is marked as the managing controller.
    pub fn has_controller_owner(&self) -> bool {
        self.owner_references().iter().any(|r| r.controller == Some(true))
    }

    pub fn group_version_kind(&self) -> CoreResult<GroupVersionKind> {
        let gv = GroupVersion::parse(self.api_version())?;
        Ok(GroupVersionKind { group: gv.group, version: gv.version, kind: self.kind().to_string() })
    }

    /// Look up a nested field by path.
    pub fn get_path(&self, path: &[&str]) -> Option<&Json> {
        let (first, rest) = path.split_first()?;
        let mut cur = self.object.get(*first)?;
        for seg in rest {
            cur = cur.as_object()?.get(*seg)?;
        }
        Some(cur)
    }

    pub fn get_path_mut(&mut self, path: &[&str]) -> Option<&mut Json> {
        let (first, rest) = path.split_first()?;
        let mut cur = self.object.get_mut(*first)?;
        for seg in rest {
            cur = cur.as_object_mut()?.get_mut(*seg)?;
        }
        Some(cur)
    }

    /// Remove a nested field; returns the removed value if it was present.
    pub fn remove_path(&mut self, path: &[&str]) -> Option<Json> {
        let (last, parent) = path.split_last()?;
        if parent.is_empty() {
            return self.object.remove(*last);
        }
        self.get_path_mut(parent)?.as_object_mut()?.remove(*last)
    }
}
