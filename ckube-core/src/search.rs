//! Evaluates the structured `search` clause language and the multi-key
//! typed sort against an object's projected index map.
//!
//! Both halves operate purely over `BTreeMap<String, String>` index maps so
//! that neither this module nor its caller (the indexed store) need to know
//! anything about the shape of the underlying Kubernetes object.
use std::{cmp::Ordering, collections::BTreeMap};

use ckube_wire::labels::Selector;

use crate::{error::Error, paginate::split_clauses};

const ADVANCED_SEARCH_PREFIX: &str = "__ckube_as__:";

/// Evaluate every clause of `search` (see [`crate::paginate`] for the `;`
/// clause grammar) against `index`, conjunctively: the object matches iff
/// every clause matches.
pub fn evaluate(index: &BTreeMap<String, String>, search: &str) -> Result<bool, Error> {
    for clause in split_clauses(search) {
        if !evaluate_clause(index, &clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate_clause(index: &BTreeMap<String, String>, clause: &str) -> Result<bool, Error> {
    let clause = clause.trim();
    if clause.is_empty() {
        return Ok(true);
    }
    if let Some(body) = clause.strip_prefix(ADVANCED_SEARCH_PREFIX) {
        let selector = Selector::parse(body)?;
        return Ok(selector.matches(index));
    }
    if let Some((key, value)) = split_key_value(clause) {
        let key = key.trim();
        if !index.contains_key(key) {
            return Err(Error::UnknownKey(key.to_string()));
        }
        let (value, invert) = strip_invert(value);
        let quoted = format!("\"{}\"", index.get(key).map(String::as_str).unwrap_or_default());
        let hit = quoted.contains(value);
        return Ok(if invert { !hit } else { hit });
    }
    let (value, invert) = strip_invert(clause);
    let any_hit = index.values().any(|v| v.contains(value));
    Ok(if invert { !any_hit } else { any_hit })
}

/// Split a clause on its first top-level `=`, i.e. the `key=value` form.
/// A bare clause (no `=`) returns `None`.
fn split_key_value(clause: &str) -> Option<(&str, &str)> {
    clause.split_once('=')
}

fn strip_invert(value: &str) -> (&str, bool) {
    match value.strip_prefix('!') {
        Some(rest) => (rest, true),
        None => (value, false),
    }
}

/// A single parsed sort key: `key[!type][ asc|desc]`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub key: String,
    pub kind: SortKind,
    pub desc: bool,
}

/// The comparison type a sort key is evaluated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKind {
    /// Lexical string comparison (the default).
    Str,
    /// Parse both sides as `f64` and compare numerically.
    Int,
}

/// The stable default tie-break, applied after every explicit sort key
/// (and used outright when no `sort` string was given).
pub const DEFAULT_SORT_KEYS: [&str; 3] = ["cluster", "namespace", "name"];

/// Parse a comma-separated `sort` string into an ordered list of keys,
/// appending the default tie-break (`cluster, namespace, name`) for any of
/// those not already named explicitly.
pub fn parse_sort(sort: &str) -> Result<Vec<SortKey>, Error> {
    let mut keys = Vec::new();
    for raw in sort.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        keys.push(parse_sort_key(raw)?);
    }
    for default_key in DEFAULT_SORT_KEYS {
        if !keys.iter().any(|k| k.key == default_key) {
            keys.push(SortKey {
                key: default_key.to_string(),
                kind: SortKind::Str,
                desc: false,
            });
        }
    }
    Ok(keys)
}

fn parse_sort_key(raw: &str) -> Result<SortKey, Error> {
    let mut desc = false;
    let mut body = raw;
    if let Some(rest) = body.strip_suffix(" desc") {
        desc = true;
        body = rest;
    } else if let Some(rest) = body.strip_suffix(" asc") {
        body = rest;
    }
    let (key, kind) = match body.split_once('!') {
        Some((key, "int")) => (key, SortKind::Int),
        Some((key, "str")) => (key, SortKind::Str),
        Some((_, other)) => return Err(Error::InvalidExpression(format!("unsupported sort type: {other}"))),
        None => (body, SortKind::Str),
    };
    Ok(SortKey {
        key: key.trim().to_string(),
        kind,
        desc,
    })
}

/// Verify every key in `keys` is present in `witness` (the first object's
/// index map), used as a schema witness.
pub fn validate_keys(keys: &[SortKey], witness: &BTreeMap<String, String>) -> Result<(), Error> {
    for key in keys {
        if !witness.contains_key(&key.key) {
            return Err(Error::UnknownKey(key.key.clone()));
        }
    }
    Ok(())
}

/// Stably sort `items` by `keys`, walking keys in order and falling
/// through to the next on a tie. `index_of` extracts the index map an item
/// is compared by.
pub fn sort_items<T>(
    items: Vec<T>,
    keys: &[SortKey],
    index_of: impl Fn(&T) -> &BTreeMap<String, String>,
) -> Result<Vec<T>, Error> {
    if keys.is_empty() || items.len() <= 1 {
        return Ok(items);
    }

    enum Column {
        Str(Vec<String>),
        Int(Vec<f64>),
    }

    let mut columns = Vec::with_capacity(keys.len());
    for key in keys {
        let column = match key.kind {
            SortKind::Str => Column::Str(
                items
                    .iter()
                    .map(|it| index_of(it).get(&key.key).cloned().unwrap_or_default())
                    .collect(),
            ),
            SortKind::Int => {
                let mut values = Vec::with_capacity(items.len());
                for it in &items {
                    let raw = index_of(it).get(&key.key).cloned().unwrap_or_default();
                    let parsed: f64 = raw
                        .parse()
                        .map_err(|_| Error::ValueNotNumeric(raw.clone()))?;
                    values.push(parsed);
                }
                Column::Int(values)
            }
        };
        columns.push((key.desc, column));
    }

    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        for (desc, column) in &columns {
            let ord = match column {
                Column::Str(values) => values[a].cmp(&values[b]),
                Column::Int(values) => values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal),
            };
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    Ok(order.into_iter().map(|i| slots[i].take().expect("each index used once")).collect())
}

/// Slice a (pre-sorted, pre-filtered) result set by `page`/`page_size`.
/// `total` is always the pre-pagination count. `page == 0` or
/// `page_size == 0` returns the whole set unpaged. A page beyond the end
/// returns an empty list unless `page == 1`.
pub fn paginate_items<T>(items: Vec<T>, page: usize, page_size: usize) -> Result<(Vec<T>, usize), Error> {
    let total = items.len();
    if page == 0 || page_size == 0 {
        return Ok((items, total));
    }
    let start = (page - 1) * page_size;
    if start >= total {
        if page == 1 {
            return Ok((Vec::new(), total));
        }
        return Err(Error::OutOfPage { page, page_size, total });
    }
    let end = (start + page_size).min(total);
    let sliced = items.into_iter().skip(start).take(end - start).collect();
    Ok((sliced, total))
}

/// `remainingItemCount` for the list envelope: `total - page*pageSize`,
/// clamped to `>= 0`, or `0` when unpaged.
pub fn remaining_item_count(total: usize, page: usize, page_size: usize) -> usize {
    if page == 0 || page_size == 0 {
        return 0;
    }
    total.saturating_sub(page * page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn bare_clause_matches_any_value() {
        let idx = index(&[("name", "test"), ("ok", "qq")]);
        assert!(evaluate(&idx, "qq").unwrap());
    }

    #[test]
    fn key_value_clause_is_substring_on_unquoted_value() {
        let idx = index(&[("name", "test"), ("ok", "qq")]);
        assert!(evaluate(&idx, "name=est").unwrap());
    }

    #[test]
    fn key_value_clause_pins_exact_when_quoted() {
        let idx = index(&[("name", "test"), ("ok", "qq")]);
        assert!(!evaluate(&idx, "name=\"est\"").unwrap());
    }

    #[test]
    fn bare_invert_requires_no_hit() {
        let idx = index(&[("name", "test"), ("ok", "qq")]);
        assert!(!evaluate(&idx, "!test").unwrap());
        assert!(evaluate(&idx, "!xxx").unwrap());
    }

    #[test]
    fn escaped_semicolon_survives_as_literal() {
        let idx = index(&[("name", "a;b")]);
        assert!(evaluate(&idx, "a;;").unwrap());
    }

    #[test]
    fn unknown_key_in_key_value_clause_errors() {
        let idx = index(&[("name", "test")]);
        assert!(matches!(evaluate(&idx, "nope=x"), Err(Error::UnknownKey(_))));
    }

    #[test]
    fn advanced_search_clause_evaluates_as_label_selector() {
        let idx = index(&[("name", "test")]);
        assert!(evaluate(&idx, "__ckube_as__:name notin (ok)").unwrap());
        assert!(!evaluate(&idx, "__ckube_as__:name notin (test)").unwrap());
    }

    #[test]
    fn conjunction_is_monotone() {
        let idx = index(&[("name", "test"), ("ok", "qq")]);
        assert!(evaluate(&idx, "name=est").unwrap());
        assert!(!evaluate(&idx, "name=est;ok=nope").unwrap());
    }

    fn obj(uid: &str) -> BTreeMap<String, String> {
        index(&[("uid", uid), ("cluster", "c"), ("namespace", "ns"), ("name", uid)])
    }

    #[test]
    fn int_sort_orders_numerically_not_lexically() {
        let items = vec![obj("11"), obj("2"), obj("3")];
        let keys = parse_sort("uid!int").unwrap();
        let sorted = sort_items(items, &keys, |m| m).unwrap();
        let uids: Vec<_> = sorted.iter().map(|m| m["uid"].clone()).collect();
        assert_eq!(uids, vec!["2", "3", "11"]);
    }

    #[test]
    fn default_str_sort_is_lexical() {
        let items = vec![obj("11"), obj("2"), obj("3")];
        let keys = parse_sort("uid").unwrap();
        let sorted = sort_items(items, &keys, |m| m).unwrap();
        let uids: Vec<_> = sorted.iter().map(|m| m["uid"].clone()).collect();
        assert_eq!(uids, vec!["11", "2", "3"]);
    }

    #[test]
    fn default_sort_keys_are_cluster_namespace_name() {
        let keys = parse_sort("").unwrap();
        assert_eq!(keys.iter().map(|k| k.key.as_str()).collect::<Vec<_>>(), vec!["cluster", "namespace", "name"]);
    }

    #[test]
    fn explicit_keys_keep_default_tie_break_appended() {
        let keys = parse_sort("namespace,uid!int").unwrap();
        let names: Vec<_> = keys.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(names, vec!["namespace", "uid", "cluster", "name"]);
    }

    #[test]
    fn non_numeric_int_sort_errors() {
        let items = vec![obj("abc")];
        let keys = parse_sort("uid!int").unwrap();
        assert!(matches!(sort_items(items, &keys, |m| m), Err(Error::ValueNotNumeric(_))));
    }

    #[test]
    fn pagination_slices_and_reports_total() {
        let items = vec![1, 2, 3];
        let (page1, total) = paginate_items(items.clone(), 1, 1).unwrap();
        assert_eq!(page1, vec![1]);
        assert_eq!(total, 3);
        let (page2, total2) = paginate_items(items, 2, 1).unwrap();
        assert_eq!(page2, vec![2]);
        assert_eq!(total2, 3);
    }

    #[test]
    fn out_of_page_errors_unless_first_page() {
        let items = vec![1, 2];
        assert!(matches!(paginate_items(items.clone(), 5, 1), Err(Error::OutOfPage { .. })));
        let (empty, total) = paginate_items(Vec::<i32>::new(), 1, 10).unwrap();
        assert!(empty.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn unpaged_returns_everything() {
        let items = vec![1, 2, 3];
        let (all, total) = paginate_items(items, 0, 0).unwrap();
        assert_eq!(all, vec![1, 2, 3]);
        assert_eq!(total, 3);
    }
}
