//! The structured query tunneled through the label-selector syntax.
use ckube_wire::labels::{Expression, Selector};
use serde::{Deserialize, Serialize};

const CLUSTER_INDEX_KEY: &str = "cluster";
pub(crate) const ADVANCED_SEARCH_PREFIX: &str = "__ckube_as__:";

/// A structured List/Watch query: page, sort, and search, smuggled through
/// a standard Kubernetes `labelSelector` (see [`crate::selector_codec`]).
///
/// Field presence mirrors the wire form exactly: zero-valued fields are
/// omitted from JSON so that `{"page":1}` round-trips byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginate {
    /// 1-indexed page number. `0` means "unpaged".
    #[serde(default, skip_serializing_if = "is_zero")]
    pub page: usize,
    /// Items per page. `0` means "unlimited".
    #[serde(rename = "pageSize", default, skip_serializing_if = "is_zero")]
    pub page_size: usize,
    /// Comma-separated `key[!type][ asc|desc]` sort keys, primary first.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sort: String,
    /// `;`-separated search clauses (see [`crate::search`]).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub search: String,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl Paginate {
    /// Whether the result set should be paginated at all.
    pub fn is_paged(&self) -> bool {
        self.page != 0 && self.page_size != 0
    }

    /// The cluster set this query is restricted to, read out of the
    /// `cluster in (…)` requirement embedded in the advanced-search clause
    /// of `search`. Empty means "no restriction" — callers default it to
    /// the configured default cluster.
    pub fn clusters(&self) -> Vec<String> {
        for clause in split_clauses(&self.search) {
            let Some(body) = clause.strip_prefix(ADVANCED_SEARCH_PREFIX) else {
                continue;
            };
            let Ok(selector) = Selector::parse(body) else {
                continue;
            };
            for expr in selector.expressions() {
                if let Expression::In(key, values) = expr {
                    if key == CLUSTER_INDEX_KEY {
                        return values.iter().cloned().collect();
                    }
                }
            }
        }
        Vec::new()
    }

    /// Replace (or add) the `cluster in (…)` requirement in the
    /// advanced-search clause so that the given cluster names survive a
    /// round-trip through the selector form.
    pub fn set_clusters(&mut self, clusters: &[String]) {
        let mut clauses: Vec<String> = split_clauses(&self.search).collect();
        let mut found = false;
        for clause in clauses.iter_mut() {
            let Some(body) = clause.strip_prefix(ADVANCED_SEARCH_PREFIX) else {
                continue;
            };
            if let Ok(mut selector) = Selector::parse(body) {
                selector.take_key(CLUSTER_INDEX_KEY);
                if !clusters.is_empty() {
                    selector.push(Expression::In(
                        CLUSTER_INDEX_KEY.to_string(),
                        clusters.iter().cloned().collect(),
                    ));
                }
                *clause = format!("{ADVANCED_SEARCH_PREFIX}{}", selector.to_selector_string());
                found = true;
                break;
            }
        }
        if !found && !clusters.is_empty() {
            let selector: Selector = std::iter::once(Expression::In(
                CLUSTER_INDEX_KEY.to_string(),
                clusters.iter().cloned().collect(),
            ))
            .collect();
            clauses.push(format!("{ADVANCED_SEARCH_PREFIX}{}", selector.to_selector_string()));
        }
        self.search = clauses.join(";");
    }
}

/// Split a search string on unescaped `;`, unescaping `;;` into a literal
/// `;` within a clause. Shared with [`crate::search`]'s clause evaluator so
/// both see exactly the same clause boundaries.
///
/// Returns owned strings (not slices) because escape removal needs to
/// collapse `;;` into `;`, not just find boundaries.
pub(crate) fn split_clauses(search: &str) -> impl Iterator<Item = String> {
    if search.is_empty() {
        return Vec::new().into_iter();
    }
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut chars = search.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ';' {
            if chars.peek() == Some(&';') {
                chars.next();
                current.push(';');
                continue;
            }
            clauses.push(std::mem::take(&mut current));
            continue;
        }
        current.push(c);
    }
    clauses.push(current);
    clauses.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fields_are_omitted() {
        let p = Paginate {
            page: 1,
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&p).unwrap(), serde_json::json!({"page": 1}));
    }

    #[test]
    fn full_round_trip() {
        let p = Paginate {
            page: 1,
            page_size: 10,
            sort: "name".into(),
            search: "name=ok".into(),
        };
        let v = serde_json::to_value(&p).unwrap();
        let back: Paginate = serde_json::from_value(v).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn clusters_round_trip_through_search() {
        let mut p = Paginate::default();
        p.set_clusters(&["c1".to_string(), "c2".to_string()]);
        assert!(p.search.starts_with(ADVANCED_SEARCH_PREFIX));
        assert_eq!(p.clusters(), vec!["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    fn clusters_coexist_with_other_search_clauses() {
        let mut p = Paginate {
            search: "name=test".into(),
            ..Default::default()
        };
        p.set_clusters(&["c1".to_string()]);
        assert!(p.search.contains("name=test"));
        assert_eq!(p.clusters(), vec!["c1".to_string()]);
    }

    #[test]
    fn split_clauses_respects_escaped_semicolon() {
        let clauses: Vec<String> = split_clauses("a;;b;c").collect();
        assert_eq!(clauses, vec!["a;b".to_string(), "c".to_string()]);
    }
}
