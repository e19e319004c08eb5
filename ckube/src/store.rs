//! The indexed mirror: every mirrored object, kept four levels deep
//! by `(gvr, cluster, namespace, name)`, alongside its projected index map.
//!
//! Grounded on the reflector pattern in `kube-runtime`'s
//! `reflector::store::Writer` — one in-memory map per watched type, updated
//! by `Added`/`Modified`/`Deleted` events and queried by the router — but
//! `kube-runtime` only ever tracks one cluster's objects of one kind at a
//! time. ckube needs a `cluster` dimension `kube-runtime` has no use for, so
//! this is a hand-rolled four-level map with one `parking_lot::RwLock` per
//! `(gvr, cluster)` bucket: a watch event for one cluster never blocks a
//! read or write against any other cluster of the same resource type. A
//! thin outer `RwLock` per gvr guards only the map from cluster name to its
//! bucket lock, and is held just long enough to look up or insert a bucket.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use ckube_core::{search, IndexConfig, Paginate, Projector};
use ckube_wire::{labels::Selector, DynamicObject, GroupVersionResource};
use parking_lot::RwLock;

use crate::error::Error;

/// Annotation the store stamps onto every mirrored object recording which
/// cluster it came from. ckube's own name for the concept: the original
/// used a label under a misspelled vendor domain, which we don't carry
/// forward.
pub const CLUSTER_ANNOTATION: &str = "ckube.daocloud.io/cluster";

/// Annotation the store stamps onto every mirrored object holding its
/// projected index map, JSON-encoded, so a client inspecting a raw object
/// can see exactly what it was indexed as.
pub const INDEX_ANNOTATION: &str = "ckube.daocloud.io/index";

/// One mirrored object plus the index map it was projected to.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// The decoded object as it came off the watch, annotated with the
    /// cluster and index sentinels.
    pub raw: DynamicObject,
    /// The projected index map used for search and sort.
    pub index: BTreeMap<String, String>,
}

type NameMap = HashMap<String, Arc<StoredObject>>;
type NamespaceMap = HashMap<String, NameMap>;

/// One cluster's bucket of namespaces for a gvr, behind its own lock so a
/// watch event for this cluster never contends with another cluster's.
type ClusterBucket = Arc<RwLock<NamespaceMap>>;

struct GvrSlot {
    projector: Projector,
    /// Cluster name -> that cluster's own lock. Only consulted to look up
    /// or insert a bucket; the namespace data itself lives behind the
    /// bucket's own lock, not this one.
    clusters: RwLock<HashMap<String, ClusterBucket>>,
}

impl GvrSlot {
    /// The bucket for `cluster`, creating an empty one if this is the
    /// first time it's been seen.
    fn bucket(&self, cluster: &str) -> ClusterBucket {
        if let Some(bucket) = self.clusters.read().get(cluster) {
            return bucket.clone();
        }
        self.clusters.write().entry(cluster.to_string()).or_insert_with(|| Arc::new(RwLock::new(HashMap::new()))).clone()
    }

    /// The bucket for `cluster` if one has already been created, without
    /// creating it.
    fn existing_bucket(&self, cluster: &str) -> Option<ClusterBucket> {
        self.clusters.read().get(cluster).cloned()
    }
}

/// The indexed mirror for every configured resource type.
pub struct Store {
    slots: HashMap<GroupVersionResource, GvrSlot>,
}

impl Store {
    /// Compile a projector for every configured resource type and start
    /// each with an empty mirror.
    pub fn new(index_config: &HashMap<GroupVersionResource, IndexConfig>) -> Result<Self, Error> {
        let slots = index_config
            .iter()
            .map(|(gvr, index)| {
                let projector = Projector::compile(index)?;
                Ok((
                    gvr.clone(),
                    GvrSlot {
                        projector,
                        clusters: RwLock::new(HashMap::new()),
                    },
                ))
            })
            .collect::<Result<HashMap<_, _>, ckube_core::Error>>()?;
        Ok(Self { slots })
    }

    /// Whether `gvr` is one the mirror tracks at all. A resource absent
    /// here is always proxy-passed straight through to its cluster.
    pub fn is_store_gvr(&self, gvr: &GroupVersionResource) -> bool {
        self.slots.contains_key(gvr)
    }

    fn slot(&self, gvr: &GroupVersionResource) -> Result<&GvrSlot, Error> {
        self.slots
            .get(gvr)
            .ok_or_else(|| Error::Internal(format!("{gvr} is not a mirrored resource")))
    }

    /// Record an `Added` or `Modified` watch event: project the object's
    /// index, stamp the cluster/index annotations onto it, and insert it.
    pub fn on_added_or_modified(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        mut raw: DynamicObject,
    ) -> Result<(), Error> {
        let slot = self.slot(gvr)?;
        let full = serde_json::to_value(&raw)?;
        let mut index = slot.projector.project(&full);
        index.insert("cluster".to_string(), cluster.to_string());
        index.insert("namespace".to_string(), raw.namespace().to_string());
        index.insert("name".to_string(), raw.name().to_string());
        index.insert("is_deleted".to_string(), raw.is_deleted().to_string());

        raw.annotations_mut().insert(CLUSTER_ANNOTATION.to_string(), cluster.to_string());
        let index_json = serde_json::to_string(&index).unwrap_or_default();
        raw.annotations_mut().insert(INDEX_ANNOTATION.to_string(), index_json);

        let namespace = raw.namespace().to_string();
        let name = raw.name().to_string();
        let stored = Arc::new(StoredObject { raw, index });

        let bucket = slot.bucket(cluster);
        bucket.write().entry(namespace).or_default().insert(name, stored);
        Ok(())
    }

    /// Record a `Deleted` watch event: remove the object, if present.
    pub fn on_deleted(&self, gvr: &GroupVersionResource, cluster: &str, namespace: &str, name: &str) -> Result<(), Error> {
        let slot = self.slot(gvr)?;
        if let Some(bucket) = slot.existing_bucket(cluster) {
            if let Some(names) = bucket.write().get_mut(namespace) {
                names.remove(name);
            }
        }
        Ok(())
    }

    /// Drop every object held for `cluster`, ahead of a full relist. Called
    /// when a watch's `resourceVersion` has expired (`410 Gone`) and the
    /// engine must re-LIST from scratch. Replaces the cluster's bucket data
    /// in place rather than removing the bucket's lock itself, so a
    /// concurrent reader holding the old bucket handle just sees it emptied
    /// instead of racing a fresh `Arc` into the cluster map.
    pub fn clean(&self, gvr: &GroupVersionResource, cluster: &str) -> Result<(), Error> {
        let slot = self.slot(gvr)?;
        if let Some(bucket) = slot.existing_bucket(cluster) {
            bucket.write().clear();
        }
        Ok(())
    }

    /// Fetch a single object.
    pub fn get(&self, gvr: &GroupVersionResource, cluster: &str, namespace: &str, name: &str) -> Result<Option<Arc<StoredObject>>, Error> {
        let slot = self.slot(gvr)?;
        Ok(slot
            .existing_bucket(cluster)
            .and_then(|bucket| bucket.read().get(namespace).and_then(|names| names.get(name).cloned())))
    }

    /// Every cluster name currently holding at least one object for `gvr`.
    /// Used when a request names no cluster: the router queries across all
    /// of them.
    pub fn known_clusters(&self, gvr: &GroupVersionResource) -> Result<Vec<String>, Error> {
        let slot = self.slot(gvr)?;
        Ok(slot.clusters.read().keys().cloned().collect())
    }

    /// Evaluate a list query: cluster scoping, namespace scoping, the
    /// residual label selector left after tunnel decoding, the structured
    /// search clauses, the multi-key sort, and pagination, in that order
    /// and pagination, in that order.
    pub fn query(
        &self,
        gvr: &GroupVersionResource,
        clusters: &[String],
        namespace: Option<&str>,
        residual: &Selector,
        paginate: &Paginate,
    ) -> Result<(Vec<Arc<StoredObject>>, usize, usize), Error> {
        let slot = self.slot(gvr)?;

        let cluster_names: Vec<String> = if clusters.is_empty() {
            slot.clusters.read().keys().cloned().collect()
        } else {
            clusters.to_vec()
        };

        let mut candidates: Vec<Arc<StoredObject>> = Vec::new();
        for cluster in &cluster_names {
            let Some(bucket) = slot.existing_bucket(cluster) else { continue };
            let namespaces = bucket.read();
            match namespace {
                Some(ns) => {
                    if let Some(names) = namespaces.get(ns) {
                        candidates.extend(names.values().cloned());
                    }
                }
                None => {
                    for names in namespaces.values() {
                        candidates.extend(names.values().cloned());
                    }
                }
            }
        }

        let mut filtered = Vec::with_capacity(candidates.len());
        for item in candidates {
            if !residual.matches(&item.index) {
                continue;
            }
            if !paginate.search.is_empty() && !search::evaluate(&item.index, &paginate.search)? {
                continue;
            }
            filtered.push(item);
        }

        let sort_keys = search::parse_sort(&paginate.sort)?;
        if let Some(first) = filtered.first() {
            search::validate_keys(&sort_keys, &first.index)?;
        }
        let sorted = search::sort_items(filtered, &sort_keys, |item| &item.index)?;

        let (page, total) = search::paginate_items(sorted, paginate.page, paginate.page_size)?;
        let remaining = search::remaining_item_count(total, paginate.page, paginate.page_size);
        Ok((page, total, remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckube_wire::DynamicObject;

    fn store() -> Store {
        let mut cfg = HashMap::new();
        cfg.insert(
            GroupVersionResource::gvr("", "v1", "pods"),
            IndexConfig::from([("phase".to_string(), "{.status.phase}".to_string())]),
        );
        Store::new(&cfg).unwrap()
    }

    fn gvr() -> GroupVersionResource {
        GroupVersionResource::gvr("", "v1", "pods")
    }

    #[test]
    fn unconfigured_gvr_is_not_a_store_gvr() {
        let s = store();
        assert!(!s.is_store_gvr(&GroupVersionResource::gvr("apps", "v1", "deployments")));
        assert!(s.is_store_gvr(&gvr()));
    }

    #[test]
    fn added_object_is_fetchable_and_indexed() {
        let s = store();
        let obj = DynamicObject::new("p1", "v1", "Pod")
            .within("ns1")
            .data(serde_json::json!({"status": {"phase": "Running"}}));
        s.on_added_or_modified(&gvr(), "c1", obj).unwrap();

        let fetched = s.get(&gvr(), "c1", "ns1", "p1").unwrap().unwrap();
        assert_eq!(fetched.index.get("phase").unwrap(), "Running");
        assert_eq!(fetched.index.get("cluster").unwrap(), "c1");
        assert!(fetched.raw.metadata.annotations.as_ref().unwrap().contains_key(CLUSTER_ANNOTATION));
    }

    #[test]
    fn deleted_object_disappears() {
        let s = store();
        let obj = DynamicObject::new("p1", "v1", "Pod").within("ns1");
        s.on_added_or_modified(&gvr(), "c1", obj).unwrap();
        s.on_deleted(&gvr(), "c1", "ns1", "p1").unwrap();
        assert!(s.get(&gvr(), "c1", "ns1", "p1").unwrap().is_none());
    }

    #[test]
    fn clean_drops_only_named_cluster() {
        let s = store();
        s.on_added_or_modified(&gvr(), "c1", DynamicObject::new("p1", "v1", "Pod").within("ns1")).unwrap();
        s.on_added_or_modified(&gvr(), "c2", DynamicObject::new("p2", "v1", "Pod").within("ns1")).unwrap();
        s.clean(&gvr(), "c1").unwrap();
        assert!(s.get(&gvr(), "c1", "ns1", "p1").unwrap().is_none());
        assert!(s.get(&gvr(), "c2", "ns1", "p2").unwrap().is_some());
    }

    #[test]
    fn query_filters_by_namespace_and_search() {
        let s = store();
        s.on_added_or_modified(
            &gvr(),
            "c1",
            DynamicObject::new("p1", "v1", "Pod").within("ns1").data(serde_json::json!({"status": {"phase": "Running"}})),
        )
        .unwrap();
        s.on_added_or_modified(
            &gvr(),
            "c1",
            DynamicObject::new("p2", "v1", "Pod").within("ns2").data(serde_json::json!({"status": {"phase": "Pending"}})),
        )
        .unwrap();

        let paginate = Paginate {
            search: "phase=Running".to_string(),
            ..Default::default()
        };
        let (items, total, remaining) = s.query(&gvr(), &[], None, &Selector::new(), &paginate).unwrap();
        assert_eq!(total, 1);
        assert_eq!(remaining, 0);
        assert_eq!(items[0].raw.name(), "p1");
    }

    #[test]
    fn query_paginates_and_reports_remaining() {
        let s = store();
        for i in 0..3 {
            s.on_added_or_modified(&gvr(), "c1", DynamicObject::new(&format!("p{i}"), "v1", "Pod").within("ns1")).unwrap();
        }
        let paginate = Paginate {
            page: 1,
            page_size: 2,
            ..Default::default()
        };
        let (items, total, remaining) = s.query(&gvr(), &[], Some("ns1"), &Selector::new(), &paginate).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(total, 3);
        assert_eq!(remaining, 1);
    }
}
