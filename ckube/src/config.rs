//! Loading the JSON config file into an immutable [`Config`] snapshot,
//! plus a `notify`-backed hot-reload loop that atomically swaps both the
//! snapshot and the per-cluster client map.
//!
//! No component below the top of the binary reads configuration from a
//! process-wide singleton at request time: the router, the store, and
//! the watch engine are all handed a `Snapshot` (or a `watch::Receiver` of
//! one) at construction.
use std::{collections::HashMap, path::Path, path::PathBuf, sync::Arc, time::Duration};

use ckube_core::IndexConfig;
use ckube_k8s_client::{Client, Kubeconfig};
use ckube_wire::GroupVersionResource;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::Error;
use crate::store::Store;

/// One entry of the `clusters` map in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawClusterConfig {
    /// Name of the kubeconfig context this cluster resolves to.
    pub context: String,
}

/// One entry of the `proxies` list in the config file: a mirrored
/// resource type and its index configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Deserialize)]
pub struct RawProxyConfig {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
    pub list_kind: String,
    #[serde(default)]
    pub index: IndexConfig,
}

/// The raw JSON document, deserialized as-is.
#[allow(missing_docs)]
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub default_cluster: String,
    #[serde(default)]
    pub clusters: HashMap<String, RawClusterConfig>,
    #[serde(default)]
    pub proxies: Vec<RawProxyConfig>,
    #[serde(default)]
    pub token: Option<String>,
}

impl RawConfig {
    /// Parse a config document from its JSON text.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(text)?;
        if !config.clusters.contains_key(&config.default_cluster) {
            return Err(Error::Config(format!(
                "default_cluster `{}` is not in `clusters`",
                config.default_cluster
            )));
        }
        Ok(config)
    }
}

/// One mirrored resource type's static configuration: the kind used in
/// list envelopes, and its compiled index expressions.
#[allow(missing_docs)]
pub struct ResourceConfig {
    pub list_kind: String,
    pub index: IndexConfig,
}

/// The immutable configuration snapshot handed to the router, the store,
/// and the watch engine. Reloads build a new `Config` (and a new `Store`,
/// and possibly a new client map) and swap the `Arc` in one shot; nothing
/// here is ever mutated in place.
#[allow(missing_docs)]
pub struct Config {
    pub default_cluster: String,
    pub clusters: HashMap<String, RawClusterConfig>,
    pub proxies: HashMap<GroupVersionResource, ResourceConfig>,
    pub token: Option<SecretString>,
}

impl Config {
    fn from_raw(raw: RawConfig) -> Self {
        let proxies = raw
            .proxies
            .into_iter()
            .map(|p| {
                let gvr = GroupVersionResource::gvr(p.group, p.version, p.resource);
                (
                    gvr,
                    ResourceConfig {
                        list_kind: p.list_kind,
                        index: p.index,
                    },
                )
            })
            .collect();
        Self {
            default_cluster: raw.default_cluster,
            clusters: raw.clusters,
            proxies,
            token: raw.token.map(SecretString::from),
        }
    }

    /// The resource's configured list-response `kind`, if it is mirrored.
    pub fn list_kind(&self, gvr: &GroupVersionResource) -> Option<&str> {
        self.proxies.get(gvr).map(|r| r.list_kind.as_str())
    }
}

/// A `Config` plus the live client handle for every configured cluster,
/// swapped together so the two are never observed out of sync.
#[allow(missing_docs)]
pub struct Snapshot {
    pub config: Config,
    pub store: Arc<Store>,
    pub clients: HashMap<String, Client>,
}

impl Snapshot {
    /// Build a snapshot from a parsed config and a kubeconfig document,
    /// resolving every named cluster context and connecting a client to
    /// it.
    pub fn build(raw: RawConfig, kubeconfig: &Kubeconfig) -> Result<Self, Error> {
        let wanted: HashMap<String, String> =
            raw.clusters.iter().map(|(name, c)| (name.clone(), c.context.clone())).collect();
        let resolved = kubeconfig
            .resolve_all(&wanted)
            .map_err(|e| Error::Config(format!("resolving kubeconfig contexts: {e}")))?;
        let mut clients = HashMap::with_capacity(resolved.len());
        for (cluster, ctx) in resolved {
            let client = Client::new(&ctx).map_err(|e| Error::Config(format!("connecting to cluster `{cluster}`: {e}")))?;
            clients.insert(cluster, client);
        }

        let index_config: HashMap<GroupVersionResource, IndexConfig> = raw
            .proxies
            .iter()
            .map(|p| {
                (
                    GroupVersionResource::gvr(p.group.clone(), p.version.clone(), p.resource.clone()),
                    p.index.clone(),
                )
            })
            .collect();
        let store = Arc::new(Store::new(&index_config)?);

        let config = Config::from_raw(raw);
        Ok(Self { config, store, clients })
    }

    /// The client for the configured default cluster, the fallback used
    /// when a request's paginate carries no cluster set.
    pub fn default_client(&self) -> Option<&Client> {
        self.clients.get(&self.config.default_cluster)
    }
}

/// Read and parse the config file and the kubeconfig it references, then
/// build an initial snapshot.
pub async fn load(config_path: &Path, kubeconfig_path: &Path) -> Result<Snapshot, Error> {
    let text = tokio::fs::read_to_string(config_path).await?;
    let raw = RawConfig::parse(&text)?;
    let kubeconfig = Kubeconfig::read_from(kubeconfig_path).map_err(|e| Error::Config(e.to_string()))?;
    Snapshot::build(raw, &kubeconfig)
}

/// Spawn a `notify`-backed watch over `config_path`: on every write/create
/// event, re-read and rebuild the snapshot and publish it to `tx`. A
/// reload that fails to parse or connect logs the failure and leaves the
/// previously published snapshot in service.
pub fn spawn_reload_watcher(
    config_path: PathBuf,
    kubeconfig_path: PathBuf,
    tx: watch::Sender<Arc<Snapshot>>,
) -> Result<RecommendedWatcher, Error> {
    let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                let _ = notify_tx.send(());
            }
        }
    })
    .map_err(|e| Error::Config(e.to_string()))?;
    watcher
        .watch(&config_path, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Config(e.to_string()))?;

    tokio::spawn(async move {
        // Config maps mounted from a Kubernetes ConfigMap are replaced by
        // deleting and recreating the symlinked file; debounce briefly so
        // we reload the settled file rather than a half-written one.
        while notify_rx.recv().await.is_some() {
            tokio::time::sleep(Duration::from_millis(200)).await;
            match load(&config_path, &kubeconfig_path).await {
                Ok(snapshot) => {
                    tracing::info!(path = %config_path.display(), "reloaded configuration");
                    let _ = tx.send(Arc::new(snapshot));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "configuration reload failed, keeping last-good snapshot in service");
                }
            }
        }
    });

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let text = r#"{
            "default_cluster": "c1",
            "clusters": {"c1": {"context": "ctx1"}},
            "proxies": [{"version":"v1","resource":"pods","list_kind":"PodList","index":{"name":"{.metadata.name}"}}]
        }"#;
        let raw = RawConfig::parse(text).unwrap();
        assert_eq!(raw.default_cluster, "c1");
        assert_eq!(raw.proxies.len(), 1);
    }

    #[test]
    fn rejects_unknown_default_cluster() {
        let text = r#"{"default_cluster": "nope", "clusters": {}}"#;
        assert!(RawConfig::parse(text).is_err());
    }

    /// A minimal one-cluster kubeconfig naming context `ctx1`, resolvable
    /// without ever opening a connection (`Client::new` only builds TLS
    /// config and a lazy connection pool).
    const KUBECONFIG_YAML: &str = r#"
clusters:
  - name: cl1
    cluster:
      server: https://127.0.0.1:16443
      insecure-skip-tls-verify: true
users:
  - name: u1
    user:
      token: test-token
contexts:
  - name: ctx1
    context:
      cluster: cl1
      user: u1
"#;

    #[tokio::test]
    async fn reload_watcher_swaps_in_a_rewritten_config() {
        ckube_k8s_client::client::install_default_crypto_provider();
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let kubeconfig_path = dir.path().join("kubeconfig.yaml");
        std::fs::write(&kubeconfig_path, KUBECONFIG_YAML).unwrap();

        let write_config = |default_cluster: &str| {
            std::fs::write(
                &config_path,
                format!(
                    r#"{{"default_cluster": "{default_cluster}", "clusters": {{"{default_cluster}": {{"context": "ctx1"}}}}, "proxies": []}}"#
                ),
            )
            .unwrap();
        };
        write_config("c1");

        let initial = load(&config_path, &kubeconfig_path).await.unwrap();
        let (tx, mut rx) = watch::channel(Arc::new(initial));
        let _watcher = spawn_reload_watcher(config_path.clone(), kubeconfig_path, tx).unwrap();

        assert_eq!(rx.borrow().config.default_cluster, "c1");
        write_config("c1-renamed");
        tokio::time::timeout(Duration::from_secs(5), rx.changed()).await.unwrap().unwrap();
        assert_eq!(rx.borrow().config.default_cluster, "c1-renamed");
    }
}
