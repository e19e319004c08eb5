//! Generic list envelope wrapper.
use crate::metadata::ListMeta;
use serde::Deserialize;

/// A generic Kubernetes list response.
///
/// Used when decoding the upstream's `{kind}List` responses during the
/// initial LIST phase of a watch, and when the router assembles its own
/// list envelope from the mirror (`{apiVersion, kind, metadata, items}`).
#[derive(Deserialize, Debug)]
pub struct ObjectList<T> {
    /// List-level metadata; only `resourceVersion` is meaningful here.
    #[serde(default)]
    pub metadata: ListMeta,
    /// The items themselves.
    pub items: Vec<T>,
}

impl<T> ObjectList<T> {
    /// Iterate over the list's items by reference.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> IntoIterator for ObjectList<T> {
    type IntoIter = std::vec::IntoIter<T>;
    type Item = T;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
