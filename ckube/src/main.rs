//! `ckube-server`: the CLI entrypoint. Parses flags (mirroring the original
//! `cmd/cacheproxy/main.go`), loads the config file and kubeconfig into an
//! initial [`Snapshot`], spawns the watch engine and the config-reload
//! watcher, and serves the HTTP router until a shutdown signal arrives.
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use ckube::{
    config::{self, Snapshot},
    metrics::Metrics,
    router::{self, AppState},
    watcher,
};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Caching, aggregating reverse proxy for Kubernetes-compatible API servers.
#[derive(Parser, Debug)]
#[command(name = "ckube-server", version, about)]
struct Args {
    /// Path to the ckube JSON configuration file.
    #[arg(long, env = "CKUBE_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Path to the kubeconfig resolving every configured cluster's context.
    #[arg(long, env = "CKUBE_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Address to bind the HTTP server to.
    #[arg(long, env = "CKUBE_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Default `tracing` filter directive, overridden by `RUST_LOG` if set.
    #[arg(long, env = "CKUBE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines instead of the default compact format, for
    /// ingestion by a log aggregator.
    #[arg(long, env = "CKUBE_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

fn default_kubeconfig_path() -> PathBuf {
    home::home_dir().unwrap_or_default().join(".kube").join("config")
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }
}

/// Spawn one watch-engine task per `(cluster, gvr)` in `snapshot`, all
/// sharing a single cancellation channel closed on the next reload or on
/// shutdown (a configuration reload atomically swaps both).
fn spawn_watchers(snapshot: &Arc<Snapshot>, metrics: Arc<Metrics>) -> watch::Sender<bool> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    for gvr in snapshot.config.proxies.keys() {
        for (cluster, client) in &snapshot.clients {
            tokio::spawn(watcher::run(
                gvr.clone(),
                cluster.clone(),
                client.clone(),
                snapshot.store.clone(),
                metrics.clone(),
                cancel_rx.clone(),
            ));
        }
    }
    cancel_tx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    ckube_k8s_client::client::install_default_crypto_provider();

    let kubeconfig_path = args.kubeconfig.clone().unwrap_or_else(default_kubeconfig_path);
    let initial = config::load(&args.config, &kubeconfig_path).await?;
    tracing::info!(
        config = %args.config.display(),
        kubeconfig = %kubeconfig_path.display(),
        clusters = initial.clients.len(),
        mirrored_resources = initial.config.proxies.len(),
        "loaded initial configuration"
    );

    let initial = Arc::new(initial);
    let (snapshot_tx, snapshot_rx) = watch::channel(initial.clone());
    let _reload_watcher = config::spawn_reload_watcher(args.config.clone(), kubeconfig_path.clone(), snapshot_tx);

    let metrics = Arc::new(Metrics::new());
    let mut watch_cancel = spawn_watchers(&initial, metrics.clone());

    // Every time the configuration snapshot changes (reload), tear down the
    // previous generation's watch tasks and spawn a fresh set against the
    // new store and client map, so a watch never observes a store from a
    // different generation than the clients it was constructed with.
    let reload_task = {
        let mut rx = snapshot_rx.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            loop {
                if rx.changed().await.is_err() {
                    return;
                }
                let snapshot = rx.borrow().clone();
                let _ = watch_cancel.send(true);
                watch_cancel = spawn_watchers(&snapshot, metrics.clone());
            }
        })
    };

    let state = Arc::new(AppState {
        snapshot: snapshot_rx,
        metrics,
    });
    let app = router::build(state);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(addr = %args.bind, "listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    reload_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("installing the Ctrl+C handler never fails");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing the SIGTERM handler never fails")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}
