//! The request router: classifies inbound requests, answers list and
//! get calls from the mirror when possible, and otherwise proxy-passes or
//! watch-proxies to the object's home cluster.
//!
//! Grounded on `original_source/api/proxy.go`'s dispatch order, rebuilt on
//! `axum` — the nearest ecosystem-idiomatic analogue to the `tower`/`hyper`
//! stack `kube-client` already depends on, replacing the original's
//! `gorilla/mux`.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    body::{to_bytes, Body},
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use ckube_core::{selector_codec, Paginate};
use ckube_wire::GroupVersionResource;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::Snapshot, deploy2service, error::Error, metrics::Metrics, store::StoredObject, watch_proxy,
};

/// Query keys the router will still serve from the mirror alongside a
/// `labelSelector`; anything else falls back to proxy-pass.
const ALLOWED_QUERY_KEYS: [&str; 4] = ["labelSelector", "timeoutSeconds", "timeout", "limit"];

/// Request timeout carried on every proxy-passed, non-watch upstream call.
const PROXY_PASS_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared state every handler reads: the latest configuration snapshot and
/// the metrics registry.
pub struct AppState {
    /// The latest published configuration snapshot.
    pub snapshot: watch::Receiver<Arc<Snapshot>>,
    /// The process's metrics registry.
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub(crate) fn current(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }
}

/// Build the full `axum` router: healthcheck, metrics, the Deploy→Service
/// custom endpoint, and the generic Kubernetes-shaped fallback.
///
/// Wrapped in `tower-http`'s `TraceLayer` (one span per request, as
/// `kube-client`'s own HTTP builder and the `admission_controller` example
/// instrument their requests) and a permissive `CorsLayer`, since ckube's
/// client population is the same mix of in-cluster and browser-based
/// dashboard tooling the upstream apiservers already serve unrestricted.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthy", get(healthy))
        .route("/metrics", get(metrics_handler))
        .route(
            "/custom/v1/namespaces/:namespace/deployments/:deployment/services",
            get(deploy2service::handler),
        )
        .fallback(any(dispatch))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthy() -> &'static str {
    "1"
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
        .into_response()
}

/// One segment of a parsed Kubernetes-style API path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedPath {
    pub(crate) group: String,
    pub(crate) version: String,
    pub(crate) resource_type: String,
    pub(crate) namespace: Option<String>,
    pub(crate) name: Option<String>,
    legacy_watch: bool,
}

impl ParsedPath {
    pub(crate) fn gvr(&self) -> GroupVersionResource {
        GroupVersionResource::gvr(self.group.clone(), self.version.clone(), self.resource_type.clone())
    }
}

pub(crate) fn parse_path(path: &str) -> Option<ParsedPath> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    match segments.first().copied() {
        Some("api") => parse_rest(&segments[1..], String::new()),
        Some("apis") => {
            if segments.len() < 2 {
                return None;
            }
            parse_rest(&segments[2..], segments[1].to_string())
        }
        _ => None,
    }
}

fn parse_rest(rest: &[&str], group: String) -> Option<ParsedPath> {
    let mut idx = 0;
    let version = (*rest.get(idx)?).to_string();
    idx += 1;

    let legacy_watch = rest.get(idx) == Some(&"watch");
    if legacy_watch {
        idx += 1;
    }

    let namespace = if rest.get(idx) == Some(&"namespaces") {
        idx += 1;
        let ns = (*rest.get(idx)?).to_string();
        idx += 1;
        Some(ns)
    } else {
        None
    };

    let resource_type = (*rest.get(idx)?).to_string();
    idx += 1;
    let name = rest.get(idx).map(|s| (*s).to_string());

    Some(ParsedPath {
        group,
        version,
        resource_type,
        namespace,
        name,
        legacy_watch,
    })
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

pub(crate) fn check_auth(snapshot: &Snapshot, headers: &HeaderMap) -> Result<(), Error> {
    let Some(expected) = &snapshot.config.token else {
        return Ok(());
    };
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        Some(token) if token == expected.expose_secret() => Ok(()),
        _ => Err(Error::Unauthorized),
    }
}

/// The single entry point for every request not matched by a more specific
/// route: healthcheck/metrics/deploy2service are registered ahead of this
/// fallback, so everything reaching here is a Kubernetes-style API call or
/// an arbitrary path to straight proxy-pass.
async fn dispatch(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let result = handle(&state, request).await;
    let code = match &result {
        Ok(response) => response.status().as_u16(),
        Err(e) => e.status_code(),
    };
    state.metrics.observe_request(&path, method.as_str(), code, start.elapsed().as_secs_f64());
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn handle(state: &AppState, request: Request<Body>) -> Result<Response, Error> {
    let snapshot = state.current();
    check_auth(&snapshot, request.headers())?;

    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let query_pairs = parse_query(uri.query().unwrap_or_default());

    let Some(parsed) = parse_path(&path) else {
        return proxy_pass(&snapshot, request, None).await;
    };

    let selector = query_pairs
        .iter()
        .find(|(k, _)| k == "labelSelector")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    let (paginate, residual) = match selector_codec::decode(&selector) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::debug!(error = %e, %path, "selector decode failed, degrading to proxy-pass");
            return proxy_pass(&snapshot, request, None).await;
        }
    };

    let gvr = parsed.gvr();
    let disallowed_query = query_pairs.iter().any(|(k, _)| !ALLOWED_QUERY_KEYS.contains(&k.as_str()));
    let is_watch = parsed.legacy_watch || query_pairs.iter().any(|(k, v)| k == "watch" && v == "true");

    if !snapshot.store.is_store_gvr(&gvr) || method != Method::GET || disallowed_query {
        if is_watch {
            let cluster = resolve_target_cluster(&snapshot, &method, &query_pairs, &paginate)?;
            let client = snapshot
                .clients
                .get(&cluster)
                .ok_or_else(|| Error::UnknownCluster(cluster.clone()))?;
            return watch_proxy::stream(client, method, &uri.path_and_query().map(|p| p.as_str().to_string()).unwrap_or(path))
                .await
                .map(IntoResponse::into_response);
        }
        return proxy_pass(&snapshot, request, Some(&paginate)).await;
    }

    if let Some(name) = &parsed.name {
        let cluster = paginate.clusters().into_iter().next().unwrap_or_else(|| snapshot.config.default_cluster.clone());
        let namespace = parsed.namespace.clone().unwrap_or_default();
        let object = snapshot
            .store
            .get(&gvr, &cluster, &namespace, name)?
            .ok_or_else(|| Error::NotFound(format!("{gvr}/{namespace}/{name}")))?;
        return Ok(render_object(&object, request.headers()));
    }

    let clusters = {
        let configured = paginate.clusters();
        if configured.is_empty() {
            vec![snapshot.config.default_cluster.clone()]
        } else {
            configured
        }
    };
    let (items, total, remaining) = snapshot.store.query(&gvr, &clusters, parsed.namespace.as_deref(), &residual, &paginate)?;
    let list_kind = snapshot.config.list_kind(&gvr).unwrap_or("List").to_string();
    Ok(render_list(&gvr, &list_kind, &path, &items, total, remaining, request.headers()))
}

/// Render a single object, honoring the `application/json;as=Table` accept
/// header.
fn render_object(object: &StoredObject, headers: &HeaderMap) -> Response {
    if wants_table(headers) {
        return Json(render_table(std::slice::from_ref(object))).into_response();
    }
    Json(&object.raw).into_response()
}

fn render_list(
    gvr: &GroupVersionResource,
    list_kind: &str,
    self_link: &str,
    items: &[Arc<StoredObject>],
    total: usize,
    remaining: usize,
    headers: &HeaderMap,
) -> Response {
    if wants_table(headers) {
        let owned: Vec<StoredObject> = items.iter().map(|i| (**i).clone()).collect();
        return Json(render_table(&owned)).into_response();
    }

    let mut metadata = json!({ "selfLink": self_link });
    if remaining > 0 {
        metadata["remainingItemCount"] = json!(remaining);
    }
    let _ = total;
    let body = json!({
        "apiVersion": gvr.api_version(),
        "kind": list_kind,
        "metadata": metadata,
        "items": items.iter().map(|o| serde_json::to_value(&o.raw).unwrap_or(Value::Null)).collect::<Vec<_>>(),
    });
    Json(body).into_response()
}

fn wants_table(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("as=Table"))
}

/// Render a Kubernetes `Table` envelope from each object's index
/// annotation. Column precedence: `cluster, namespace, name` first, then
/// remaining keys alphabetically, with `is_deleted`, `labels`,
/// `created_at` pushed to the back.
fn render_table(items: &[StoredObject]) -> Value {
    use std::collections::BTreeSet;

    let mut keys: BTreeSet<String> = BTreeSet::new();
    for item in items {
        keys.extend(item.index.keys().cloned());
    }

    let front = ["cluster", "namespace", "name"];
    let back = ["is_deleted", "labels", "created_at"];
    let mut ordered: Vec<String> = front.iter().map(|s| s.to_string()).filter(|k| keys.contains(k)).collect();
    let mut middle: Vec<String> = keys
        .iter()
        .filter(|k| !front.contains(&k.as_str()) && !back.contains(&k.as_str()))
        .cloned()
        .collect();
    middle.sort();
    ordered.extend(middle);
    ordered.extend(back.iter().map(|s| s.to_string()).filter(|k| keys.contains(k)));

    let column_definitions: Vec<Value> = ordered
        .iter()
        .map(|name| json!({ "name": name, "type": "string" }))
        .collect();
    let rows: Vec<Value> = items
        .iter()
        .map(|item| {
            json!({
                "cells": ordered.iter().map(|k| item.index.get(k).cloned().unwrap_or_default()).collect::<Vec<_>>(),
                "object": item.raw,
            })
        })
        .collect();

    json!({
        "kind": "Table",
        "apiVersion": "meta.k8s.io/v1",
        "columnDefinitions": column_definitions,
        "rows": rows,
    })
}

/// Resolve which cluster a non-mirrored request targets, consuming the
/// `fieldManager`/`resourceVersion`/`dryRun[0]` tunnels for verbs that carry
/// no label selector.
fn resolve_target_cluster(snapshot: &Snapshot, method: &Method, query: &[(String, String)], paginate: &Paginate) -> Result<String, Error> {
    let tunnel_param = match method.as_str() {
        "POST" | "PATCH" | "PUT" => "fieldManager",
        "GET" => "resourceVersion",
        "DELETE" => "dryRun",
        _ => "",
    };
    if !tunnel_param.is_empty() {
        if let Some((_, value)) = query.iter().find(|(k, _)| k == tunnel_param) {
            let candidate = value.split(',').next().unwrap_or(value);
            if let Some(cluster) = selector_codec::decode_cluster_tunnel(candidate) {
                return Ok(cluster.to_string());
            }
        }
    }
    Ok(paginate.clusters().into_iter().next().unwrap_or_else(|| snapshot.config.default_cluster.clone()))
}

/// Forward a request unchanged to its target cluster's upstream, streaming
/// the response body back without decoding it.
async fn proxy_pass(snapshot: &Snapshot, request: Request<Body>, paginate: Option<&Paginate>) -> Result<Response, Error> {
    let method = request.method().clone();
    let path_and_query = request.uri().path_and_query().map(|p| p.as_str().to_string()).unwrap_or_default();
    let query_pairs = parse_query(request.uri().query().unwrap_or_default());

    let default_paginate = Paginate::default();
    let paginate = paginate.unwrap_or(&default_paginate);
    let cluster = resolve_target_cluster(snapshot, &method, &query_pairs, paginate)?;
    let client = snapshot.clients.get(&cluster).ok_or_else(|| Error::UnknownCluster(cluster.clone()))?;

    if query_pairs.iter().any(|(k, v)| k == "watch" && v == "true") {
        return watch_proxy::stream(client, method, &path_and_query).await.map(IntoResponse::into_response);
    }

    let body_bytes = to_bytes(request.into_body(), usize::MAX).await.map_err(|e| Error::Internal(e.to_string()))?;
    let upstream_request = http::Request::builder()
        .method(method)
        .uri(client.url_for(&path_and_query)?)
        .body(http_body_util::Full::new(body_bytes))
        .map_err(|e| Error::Internal(e.to_string()))?;
    let response = tokio::time::timeout(PROXY_PASS_TIMEOUT, client.send_raw(upstream_request))
        .await
        .map_err(|_| Error::Internal(format!("upstream request to `{cluster}` timed out after {PROXY_PASS_TIMEOUT:?}")))??;

    let status = response.status();
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?
        .to_bytes();
    Ok((status, bytes).into_response())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn parses_core_group_namespaced_list() {
        let p = parse_path("/api/v1/namespaces/ns1/pods").unwrap();
        assert_eq!(p.group, "");
        assert_eq!(p.version, "v1");
        assert_eq!(p.namespace.as_deref(), Some("ns1"));
        assert_eq!(p.resource_type, "pods");
        assert!(p.name.is_none());
    }

    #[test]
    fn parses_named_group_get() {
        let p = parse_path("/apis/apps/v1/namespaces/ns1/deployments/d1").unwrap();
        assert_eq!(p.group, "apps");
        assert_eq!(p.name.as_deref(), Some("d1"));
    }

    #[test]
    fn parses_legacy_watch_segment() {
        let p = parse_path("/apis/apps/v1/watch/namespaces/ns1/deployments").unwrap();
        assert!(p.legacy_watch);
    }

    #[test]
    fn rejects_unrelated_path() {
        assert!(parse_path("/healthy").is_none());
    }

    #[test]
    fn query_parses_pairs() {
        let pairs = parse_query("labelSelector=a%3Db&limit=5");
        assert_eq!(pairs, vec![("labelSelector".to_string(), "a%3Db".to_string()), ("limit".to_string(), "5".to_string())]);
    }

    #[test]
    fn table_columns_put_cluster_namespace_name_first_and_labels_last() {
        let mut index = BTreeMap::new();
        index.insert("name".to_string(), "pod1".to_string());
        index.insert("namespace".to_string(), "ns1".to_string());
        index.insert("cluster".to_string(), "c1".to_string());
        index.insert("phase".to_string(), "Running".to_string());
        index.insert("labels".to_string(), "app=foo".to_string());
        let item = StoredObject {
            raw: ckube_wire::DynamicObject::new("pod1", "v1", "Pod").within("ns1"),
            index,
        };

        let table = render_table(std::slice::from_ref(&item));
        let expected_columns = json!([
            {"name": "cluster", "type": "string"},
            {"name": "namespace", "type": "string"},
            {"name": "name", "type": "string"},
            {"name": "phase", "type": "string"},
            {"name": "labels", "type": "string"},
        ]);
        assert_json_diff::assert_json_eq!(table["columnDefinitions"], expected_columns);
        assert_eq!(table["rows"][0]["cells"], json!(["c1", "ns1", "pod1", "Running", "app=foo"]));
    }
}
