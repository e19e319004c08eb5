//! Resource identity: the `(group, version, resource)` triple that keys the mirror.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a Kubernetes resource type, independent of any particular cluster.
///
/// This is the storage key's first component: entries in the mirror are keyed
/// further by `(cluster, namespace, name)`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersionResource {
    /// API group, empty string for the core group.
    pub group: String,
    /// API version, e.g. `v1`.
    pub version: String,
    /// Plural resource name, e.g. `pods`.
    pub resource: String,
}

impl GroupVersionResource {
    /// Construct from explicit group, version and resource.
    pub fn gvr(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// The `apiVersion` string used on the wire: `group/version`, or bare
    /// `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The URL path prefix for list/watch/get calls against this resource, not
    /// including an optional `namespaces/{ns}/` segment or trailing name.
    pub fn url_path_prefix(&self) -> String {
        if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_core_group() {
        let gvr = GroupVersionResource::gvr("", "v1", "pods");
        assert_eq!(gvr.api_version(), "v1");
        assert_eq!(gvr.url_path_prefix(), "/api/v1");
    }

    #[test]
    fn api_version_named_group() {
        let gvr = GroupVersionResource::gvr("apps", "v1", "deployments");
        assert_eq!(gvr.api_version(), "apps/v1");
        assert_eq!(gvr.url_path_prefix(), "/apis/apps/v1");
    }
}
