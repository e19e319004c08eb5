//! An in-process fake server backed purely by the [`Store`]: no
//! watch engine, no upstream cluster clients, just the same indexed mirror
//! the real binary serves reads from, plus write routes that feed it
//! directly. Exported for ckube's own integration tests and for downstream
//! consumers the way `original_source/pkg/client/fake/fake_ckube.go` and
//! `server/server.go` exposed one.
//!
//! Grounded on that pair: `fake_ckube.go`'s `proxy` handler (decode body,
//! namespace/name from the path override the body, dispatch by method) and
//! `server.go`'s route registration, both collapsed onto the same path
//! parser [`crate::router`] already uses for the real dispatch path.
use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use bytes::Bytes;
use ckube_core::{selector_codec, IndexConfig, Paginate};
use ckube_wire::{DynamicObject, GroupVersionResource};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

use crate::{
    error::Error,
    router::{parse_path, ParsedPath},
    store::Store,
};

const DEFAULT_CLUSTER: &str = "default";

/// A running fake server: bound to an ephemeral local port, serving list,
/// get, and write requests purely out of its own [`Store`].
pub struct FakeServer {
    addr: SocketAddr,
    store: Arc<Store>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FakeServer {
    /// Start a fake server mirroring the resource types named in
    /// `index_config`, bound to an OS-assigned local port.
    pub async fn start(index_config: &std::collections::HashMap<GroupVersionResource, IndexConfig>) -> Result<Self, Error> {
        let store = Arc::new(Store::new(index_config)?);
        let router = Router::new().route("/healthy", get(|| async { "1" })).fallback(any(dispatch)).with_state(store.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            addr,
            store,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// The address this server is listening on, e.g. to build a kubeconfig
    /// pointing at it.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Direct access to the backing store, for tests that want to seed or
    /// assert on state without going through HTTP.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Stop the server and wait for its task to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn dispatch(State(store): State<Arc<Store>>, request: axum::http::Request<axum::body::Body>) -> Response {
    handle(&store, request).await.unwrap_or_else(IntoResponse::into_response)
}

async fn handle(store: &Store, request: axum::http::Request<axum::body::Body>) -> Result<Response, Error> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or_default().to_string();

    let Some(parsed) = parse_path(&path) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let gvr = parsed.gvr();
    let cluster = resolve_cluster(&query);

    if method == Method::GET {
        return handle_read(store, &parsed, &gvr, &cluster, &query);
    }

    let body = axum::body::to_bytes(request.into_body(), usize::MAX).await.map_err(|e| Error::Internal(e.to_string()))?;
    handle_write(store, &parsed, &gvr, &cluster, &method, &body)
}

fn resolve_cluster(query: &str) -> String {
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else { continue };
        if matches!(key, "fieldManager" | "resourceVersion" | "dryRun") {
            if let Some(cluster) = selector_codec::decode_cluster_tunnel(value) {
                return cluster.to_string();
            }
        }
    }
    DEFAULT_CLUSTER.to_string()
}

fn handle_read(store: &Store, parsed: &ParsedPath, gvr: &GroupVersionResource, cluster: &str, query: &str) -> Result<Response, Error> {
    let namespace = parsed.namespace.as_deref().unwrap_or_default();
    if let Some(name) = &parsed.name {
        let object = store.get(gvr, cluster, namespace, name)?.ok_or_else(|| Error::NotFound(format!("{gvr}/{namespace}/{name}")))?;
        return Ok(Json(object.raw.clone()).into_response());
    }

    let selector = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("labelSelector=").map(str::to_string))
        .unwrap_or_default();
    let (paginate, residual) = selector_codec::decode(&selector).unwrap_or((Paginate::default(), Default::default()));
    let (items, ..) = store.query(gvr, &[cluster.to_string()], parsed.namespace.as_deref(), &residual, &paginate)?;
    Ok(Json(serde_json::json!({
        "apiVersion": gvr.api_version(),
        "kind": "List",
        "items": items.iter().map(|i| serde_json::to_value(&i.raw).unwrap_or(serde_json::Value::Null)).collect::<Vec<_>>(),
    }))
    .into_response())
}

fn handle_write(store: &Store, parsed: &ParsedPath, gvr: &GroupVersionResource, cluster: &str, method: &Method, body: &Bytes) -> Result<Response, Error> {
    let namespace = parsed.namespace.clone().unwrap_or_default();
    let mut object: DynamicObject = if body.is_empty() {
        DynamicObject::new("", &gvr.api_version(), "")
    } else {
        serde_json::from_slice(body)?
    };
    object.metadata.namespace = Some(namespace.clone());
    let name = parsed.name.clone().unwrap_or_else(|| object.name().to_string());
    object.metadata.name = Some(name.clone());

    match *method {
        Method::POST | Method::PUT | Method::PATCH => {
            store.on_added_or_modified(gvr, cluster, object.clone())?;
        }
        Method::DELETE => {
            store.on_deleted(gvr, cluster, &namespace, &name)?;
        }
        _ => return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
    Ok(Json(object).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> std::collections::HashMap<GroupVersionResource, IndexConfig> {
        std::collections::HashMap::from([(
            GroupVersionResource::gvr("", "v1", "pods"),
            IndexConfig::from([("phase".to_string(), "{.status.phase}".to_string())]),
        )])
    }

    fn gvr() -> GroupVersionResource {
        GroupVersionResource::gvr("", "v1", "pods")
    }

    #[test]
    fn resolves_default_cluster_without_tunnel() {
        assert_eq!(resolve_cluster(""), DEFAULT_CLUSTER);
        assert_eq!(resolve_cluster("resourceVersion=dsm-cluster-c2"), "c2");
    }

    #[tokio::test]
    async fn server_starts_and_exposes_an_address() {
        let server = FakeServer::start(&config()).await.unwrap();
        assert!(server.addr().port() > 0);
        server.stop().await;
    }

    #[test]
    fn handle_write_then_read_round_trips_through_the_store() {
        let store = Store::new(&config()).unwrap();
        let parsed = parse_path("/api/v1/namespaces/ns1/pods/p1").unwrap();
        let body = Bytes::from_static(br#"{"status":{"phase":"Running"}}"#);
        handle_write(&store, &parsed, &gvr(), DEFAULT_CLUSTER, &Method::POST, &body).unwrap();

        let fetched = store.get(&gvr(), DEFAULT_CLUSTER, "ns1", "p1").unwrap().unwrap();
        assert_eq!(fetched.index.get("phase").unwrap(), "Running");

        handle_write(&store, &parsed, &gvr(), DEFAULT_CLUSTER, &Method::DELETE, &Bytes::new()).unwrap();
        assert!(store.get(&gvr(), DEFAULT_CLUSTER, "ns1", "p1").unwrap().is_none());
    }

    #[test]
    fn handle_read_returns_not_found_for_missing_object() {
        let store = Store::new(&config()).unwrap();
        let parsed = parse_path("/api/v1/namespaces/ns1/pods/missing").unwrap();
        let err = handle_read(&store, &parsed, &gvr(), DEFAULT_CLUSTER, "").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
