//! End-to-end coverage of the fake server driven through a real
//! [`ckube_k8s_client::Client`], mirroring how `kube-rs-kube`'s own test
//! suites drive a server under test through its public client rather than
//! by calling handler functions directly.
use std::collections::HashMap;

use ckube::fake::FakeServer;
use ckube_core::IndexConfig;
use ckube_k8s_client::{
    client::install_default_crypto_provider,
    config::{Identity, ResolvedContext},
    Client,
};
use ckube_wire::{DynamicObject, GroupVersionResource, ObjectList};
use http::Method;
use secrecy::SecretString;

fn index_config() -> HashMap<GroupVersionResource, IndexConfig> {
    HashMap::from([
        (
            GroupVersionResource::gvr("", "v1", "pods"),
            IndexConfig::from([("phase".to_string(), "{.status.phase}".to_string())]),
        ),
        (
            GroupVersionResource::gvr("apps", "v1", "deployments"),
            IndexConfig::default(),
        ),
    ])
}

fn client_for(server: &FakeServer) -> Client {
    install_default_crypto_provider();
    let resolved = ResolvedContext {
        cluster_url: format!("http://{}", server.addr()).parse().unwrap(),
        root_cert_pem: None,
        accept_invalid_certs: false,
        identity: Identity::Bearer(SecretString::from("test-token".to_string())),
        default_namespace: "default".to_string(),
    };
    Client::new(&resolved).unwrap()
}

#[tokio::test]
async fn create_then_get_round_trips_through_the_store() {
    let server = FakeServer::start(&index_config()).await.unwrap();
    let client = client_for(&server);

    let body = serde_json::to_vec(&serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "status": {"phase": "Running"},
    }))
    .unwrap();
    let created: DynamicObject = client.request(Method::POST, "/api/v1/namespaces/ns1/pods/pod1", body).await.unwrap();
    assert_eq!(created.name(), "pod1");

    let fetched: DynamicObject = client.request(Method::GET, "/api/v1/namespaces/ns1/pods/pod1", Vec::new()).await.unwrap();
    assert_eq!(fetched.namespace(), "ns1");
    assert_eq!(fetched.data["status"]["phase"], "Running");

    server.store().on_deleted(&GroupVersionResource::gvr("", "v1", "pods"), "default", "ns1", "pod1").unwrap();
    let err = client.request::<DynamicObject>(Method::GET, "/api/v1/namespaces/ns1/pods/pod1", Vec::new()).await.unwrap_err();
    assert!(matches!(err, ckube_k8s_client::Error::Api(_)));

    server.stop().await;
}

#[tokio::test]
async fn list_reflects_store_contents_across_namespaces() {
    let server = FakeServer::start(&index_config()).await.unwrap();
    let gvr = GroupVersionResource::gvr("", "v1", "pods");
    server.store().on_added_or_modified(&gvr, "default", DynamicObject::new("p1", "v1", "Pod").within("ns1")).unwrap();
    server.store().on_added_or_modified(&gvr, "default", DynamicObject::new("p2", "v1", "Pod").within("ns2")).unwrap();

    let client = client_for(&server);
    let list: ObjectList<DynamicObject> = client.request(Method::GET, "/api/v1/pods", Vec::new()).await.unwrap();
    let names: Vec<&str> = list.iter().map(DynamicObject::name).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"p1"));
    assert!(names.contains(&"p2"));

    server.stop().await;
}

#[tokio::test]
async fn write_then_delete_on_an_unmirrored_namespace_is_idempotent() {
    let server = FakeServer::start(&index_config()).await.unwrap();
    let client = client_for(&server);

    let body = serde_json::to_vec(&serde_json::json!({"apiVersion": "apps/v1", "kind": "Deployment"})).unwrap();
    let created: DynamicObject = client.request(Method::POST, "/apis/apps/v1/namespaces/ns1/deployments/d1", body).await.unwrap();
    assert_eq!(created.name(), "d1");

    // Deleting twice must not error even though the second delete targets an
    // already-empty bucket (deleting from a namespace bucket that was never
    // created is a no-op).
    client.request_text(Method::DELETE, "/apis/apps/v1/namespaces/ns1/deployments/d1", Vec::new()).await.unwrap();
    client.request_text(Method::DELETE, "/apis/apps/v1/namespaces/ns1/deployments/d1", Vec::new()).await.unwrap();

    server.stop().await;
}
