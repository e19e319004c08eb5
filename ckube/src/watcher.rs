//! The watch engine: one long-lived task per `(cluster, gvr)` pair,
//! relisting and then tailing watch events into the indexed [`Store`].
//!
//! Grounded on the reflector idea in `kube-runtime`'s `watcher` module (a
//! small state machine cycling list → watch → relist-on-error) but built
//! directly against [`ckube_k8s_client::Client`] rather than `kube-client`'s
//! typed `Api<K>`, since every mirrored kind here is a [`DynamicObject`].
//! Reconnection uses `backon`'s fixed-delay backoff at a pinned 3-second
//! interval rather than `kube-runtime`'s own exponential `backoff` crate.
use std::{sync::Arc, time::Duration};

use backon::{BackoffBuilder, ConstantBuilder};
use ckube_wire::{DynamicObject, GroupVersionResource, ObjectList, WatchEvent};
use ckube_k8s_client::Client;
use http::Method;
use rand::Rng;
use tokio::sync::watch;

use crate::{error::Error, metrics::Metrics, store::Store};

/// The fixed reconnect back-off between relist attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// The request timeout carried on every upstream watch call, so a quiet
/// stream isn't torn down by the apiserver's own idle-connection handling
/// before the engine's own reconnect logic would kick in.
const WATCH_TIMEOUT_SECONDS: &str = "3600";

/// Spread reconnect attempts across a ±20% window so that many `(cluster,
/// gvr)` tasks whose backoff happens to land on the same tick don't all
/// reopen their watch in the same instant.
fn jittered(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..1.2);
    delay.mul_f64(factor)
}

/// Runs the relist+watch loop for one `(cluster, gvr)` pair until `cancel`
/// signals shutdown. A transient failure (connection drop, watch window
/// expiry, decode error) is logged and followed by a backoff sleep before
/// the next relist; this function only returns once `cancel` is set.
pub async fn run(
    gvr: GroupVersionResource,
    cluster: String,
    client: Client,
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut backoff = ConstantBuilder::default().with_delay(RECONNECT_DELAY).without_max_times().build();

    loop {
        if *cancel.borrow() {
            return;
        }
        match watch_once(&gvr, &cluster, &client, &store).await {
            Ok(()) => {
                tracing::debug!(%gvr, %cluster, "watch stream ended cleanly, relisting");
            }
            Err(e) => {
                tracing::warn!(%gvr, %cluster, error = %e, "watch failed, relisting after backoff");
                metrics.observe_watch_reconnect(&cluster, &gvr.to_string());
            }
        }

        let delay = jittered(backoff.next().unwrap_or(RECONNECT_DELAY));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
        }
    }
}

/// One relist-then-watch cycle: LIST the resource, clear and refill the
/// store's view of this cluster, then tail watch events until the stream
/// ends or the apiserver reports an error (most commonly `410 Gone` when
/// the resource version fell out of the watch window).
async fn watch_once(gvr: &GroupVersionResource, cluster: &str, client: &Client, store: &Store) -> Result<(), Error> {
    let list_path = format!("{}/{}", gvr.url_path_prefix(), gvr.resource);

    let list: ObjectList<DynamicObject> = client.request(Method::GET, &list_path, Vec::new()).await?;
    store.clean(gvr, cluster)?;
    let resource_version = list.metadata.resource_version.clone().unwrap_or_default();
    for item in list {
        store.on_added_or_modified(gvr, cluster, item)?;
    }

    let watch_path = format!(
        "{list_path}?watch=true&resourceVersion={resource_version}&allowWatchBookmarks=true&timeoutSeconds={WATCH_TIMEOUT_SECONDS}"
    );
    let mut events = Box::pin(client.request_events::<DynamicObject>(Method::GET, &watch_path).await?);

    use futures::StreamExt;
    while let Some(event) = events.next().await {
        match event? {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                store.on_added_or_modified(gvr, cluster, obj)?;
            }
            WatchEvent::Deleted(obj) => {
                store.on_deleted(gvr, cluster, obj.namespace(), obj.name())?;
            }
            WatchEvent::Bookmark(_) => {}
            WatchEvent::Error(resp) => {
                return Err(Error::Client(ckube_k8s_client::Error::Api(resp)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d >= Duration::from_secs(8) && d <= Duration::from_secs(12), "{d:?} out of range");
        }
    }
}
