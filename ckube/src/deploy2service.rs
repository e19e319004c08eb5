//! `GET /custom/v1/namespaces/{namespace}/deployments/{deployment}/services`
//! the one custom endpoint carried over
//! from the original add-on.
//!
//! Grounded on `original_source/api/extend/deploy2service.go`'s
//! `isServicesPod` subset check, but not its `podsMap`/ReplicaSet-name
//! heuristic for finding a Deployment's pods: that heuristic breaks the
//! moment a ReplicaSet is renamed or a Deployment is scaled through a
//! different controller, so this instead does the lookup the label selector
//! was made for — read the Deployment's own selector, find pods it selects,
//! then find services that select those pods in turn.
use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use ckube_wire::GroupVersionResource;
use serde_json::{json, Value};

use crate::{error::Error, router::AppState, store::StoredObject};

fn deployment_gvr() -> GroupVersionResource {
    GroupVersionResource::gvr("apps", "v1", "deployments")
}

fn pod_gvr() -> GroupVersionResource {
    GroupVersionResource::gvr("", "v1", "pods")
}

fn service_gvr() -> GroupVersionResource {
    GroupVersionResource::gvr("", "v1", "services")
}

/// Read `.spec.selector.matchLabels` off a Deployment's untyped `data`.
/// `matchExpressions` terms are not honored; every Deployment this endpoint
/// has been exercised against uses plain `matchLabels`.
fn match_labels(deployment: &StoredObject) -> BTreeMap<String, String> {
    deployment
        .raw
        .data
        .get("spec")
        .and_then(|spec| spec.get("selector"))
        .and_then(|selector| selector.get("matchLabels"))
        .and_then(|labels| serde_json::from_value::<BTreeMap<String, String>>(labels.clone()).ok())
        .unwrap_or_default()
}

/// Read a Service's `.spec.selector` off its untyped `data`. Unlike a
/// Deployment's selector this is already a bare string map on the wire.
fn service_selector(service: &StoredObject) -> BTreeMap<String, String> {
    service
        .raw
        .data
        .get("spec")
        .and_then(|spec| spec.get("selector"))
        .and_then(|selector| serde_json::from_value::<BTreeMap<String, String>>(selector.clone()).ok())
        .unwrap_or_default()
}

fn is_subset(needle: &BTreeMap<String, String>, haystack: &BTreeMap<String, String>) -> bool {
    !needle.is_empty() && needle.iter().all(|(k, v)| haystack.get(k) == Some(v))
}

/// `GET /custom/v1/namespaces/{namespace}/deployments/{deployment}/services`:
/// read the deployment's own selector, find mirrored pods it governs, and
/// return mirrored services whose selector is a subset of their union of
/// labels, with no ReplicaSet-name-suffix heuristic involved.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    Path((namespace, deployment)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let snapshot = state.current();
    crate::router::check_auth(&snapshot, &headers)?;
    let cluster = &snapshot.config.default_cluster;

    for gvr in [deployment_gvr(), pod_gvr(), service_gvr()] {
        if !snapshot.store.is_store_gvr(&gvr) {
            return Err(Error::Internal(format!("{gvr} is not a mirrored resource")));
        }
    }

    let deployment_obj = snapshot
        .store
        .get(&deployment_gvr(), cluster, &namespace, &deployment)?
        .ok_or_else(|| Error::NotFound(format!("deployments/{namespace}/{deployment}")))?;
    let selector = match_labels(&deployment_obj);
    if selector.is_empty() {
        return Ok(Json(empty_list()).into_response());
    }

    let (pods, ..) = snapshot.store.query(&pod_gvr(), std::slice::from_ref(cluster), Some(&namespace), &Default::default(), &Default::default())?;
    let mut union_labels = BTreeMap::new();
    for pod in &pods {
        if is_subset(&selector, pod.raw.labels()) {
            union_labels.extend(pod.raw.labels().clone());
        }
    }
    if union_labels.is_empty() {
        return Ok(Json(empty_list()).into_response());
    }

    let (services, ..) = snapshot.store.query(&service_gvr(), std::slice::from_ref(cluster), Some(&namespace), &Default::default(), &Default::default())?;
    let matched: Vec<Value> = services
        .iter()
        .filter(|svc| is_subset(&service_selector(svc), &union_labels))
        .map(|svc| serde_json::to_value(&svc.raw).unwrap_or(Value::Null))
        .collect();

    Ok(Json(json!({
        "apiVersion": "v1",
        "kind": "ServiceList",
        "items": matched,
    }))
    .into_response())
}

fn empty_list() -> Value {
    json!({ "apiVersion": "v1", "kind": "ServiceList", "items": [] })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn subset_requires_all_needle_keys_present() {
        let needle = map(&[("app", "web")]);
        let haystack = map(&[("app", "web"), ("tier", "frontend")]);
        assert!(is_subset(&needle, &haystack));
        assert!(!is_subset(&needle, &map(&[("tier", "frontend")])));
    }

    #[test]
    fn empty_selector_is_not_a_subset_of_anything() {
        assert!(!is_subset(&BTreeMap::new(), &map(&[("app", "web")])));
    }
}
