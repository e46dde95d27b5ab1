//! Tagged object envelope: enough structure to route and index any kind
//! without a compile-time schema per kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Remaining metadata fields (ownerReferences, finalizers, ...).
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// `{apiVersion, kind, metadata, ..rest}` with the body kept opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEnvelope {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ObjectEnvelope {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ObjectMeta { name: name.into(), namespace: namespace.map(str::to_string), ..ObjectMeta::default() },
            rest: Map::new(),
        }
    }

    pub fn from_value(v: Value) -> serde_json::Result<Self> { serde_json::from_value(v) }

    pub fn to_value(&self) -> serde_json::Result<Value> { serde_json::to_value(self) }

    pub fn name(&self) -> &str { &self.metadata.name }

    /// Namespace, treating an empty string as cluster-scoped.
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Index key: `namespace/name`, or bare `name` for cluster-scoped objects.
    pub fn cache_key(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.metadata.name),
            None => self.metadata.name.clone(),
        }
    }

    /// `(group, version)` split out of `apiVersion`.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.rest.insert(key.to_string(), value);
        self
    }
}
