//! A schema-agnostic representation of a Kubernetes object.
//!
//! The watch engine never knows the compile-time shape of the kinds it
//! mirrors (pods, deployments, arbitrary CRDs are all equally opaque to it),
//! so every object that passes through the store is carried as a
//! [`DynamicObject`]: `TypeMeta` + `ObjectMeta`, with everything else kept as
//! an untyped JSON value.
use crate::metadata::TypeMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// A dynamic representation of a Kubernetes object.
///
/// This is the single interface every stored variant implements: rather than
/// reaching into typed fields via reflection, callers that need labels,
/// annotations, or the deletion timestamp go through the methods below.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct DynamicObject {
    /// The type fields, not always present on every wire shape.
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,
    /// Object metadata: name, namespace, labels, annotations, uid, ...
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Every other top-level key (`spec`, `status`, and anything else).
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl DynamicObject {
    /// Create a minimally populated object, for use in tests and the fake server.
    #[must_use]
    pub fn new(name: &str, api_version: &str, kind: &str) -> Self {
        Self {
            types: Some(TypeMeta {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: serde_json::Value::Object(Default::default()),
        }
    }

    /// Attach a namespace.
    #[must_use]
    pub fn within(mut self, ns: &str) -> Self {
        self.metadata.namespace = Some(ns.into());
        self
    }

    /// Attach arbitrary spec/status data.
    #[must_use]
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// The object's name. Empty string if unset (should not happen for objects
    /// that passed through the API server).
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// The object's namespace, or empty string for cluster-scoped kinds.
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// The object's labels.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        static EMPTY: std::sync::OnceLock<BTreeMap<String, String>> = std::sync::OnceLock::new();
        self.metadata.labels.as_ref().unwrap_or_else(|| EMPTY.get_or_init(BTreeMap::new))
    }

    /// Mutable access to the object's annotations, initializing the map if absent.
    pub fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.metadata.annotations.get_or_insert_with(BTreeMap::new)
    }

    /// Whether `.metadata.deletionTimestamp` is set.
    pub fn is_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dynamic_object_round_trips_unknown_fields() {
        let raw = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p1", "namespace": "ns"},
            "spec": {"nodeName": "n1"},
            "status": {"phase": "Running"},
        });
        let obj: DynamicObject = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(obj.name(), "p1");
        assert_eq!(obj.namespace(), "ns");
        let back = serde_json::to_value(&obj).unwrap();
        assert_eq!(back["spec"]["nodeName"], "n1");
        assert_eq!(back["status"]["phase"], "Running");
    }

    #[test]
    fn not_deleted_by_default() {
        let obj = DynamicObject::new("p1", "v1", "Pod");
        assert!(!obj.is_deleted());
    }
}
