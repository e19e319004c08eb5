//! Kubernetes label selector expressions: parsing, formatting and matching.
//!
//! This is the one piece of apimachinery both the selector-tunneling codec
//! and the advanced-search clause (`__ckube_as__:`) share: both
//! need to turn a `labelSelector`-shaped string into a structured set of
//! requirements and back, and to evaluate those requirements against an
//! arbitrary string-keyed map (real labels in the codec's case, an object's
//! projected index in the search engine's case).
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    iter::FromIterator,
};
use thiserror::Error;

type Map = BTreeMap<String, String>;

/// A single label selector requirement.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Expression {
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Equal(String, String),
    NotEqual(String, String),
    Exists(String),
    DoesNotExist(String),
}

/// Failure to parse a `labelSelector` string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("unsupported selector operator in requirement `{0}`")]
    UnsupportedOperator(String),
    #[error("malformed selector requirement `{0}`")]
    Malformed(String),
}

/// A conjunction of [`Expression`]s: every requirement must hold for a match.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct Selector(Vec<Expression>);

impl Selector {
    /// An empty selector, matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// The requirements making up this selector.
    pub fn expressions(&self) -> &[Expression] {
        &self.0
    }

    /// Append a requirement.
    pub fn push(&mut self, expr: Expression) {
        self.0.push(expr);
    }

    /// Remove every requirement matching `key`, returning them.
    pub fn take_key(&mut self, key: &str) -> Vec<Expression> {
        let (taken, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.0).into_iter().partition(|e| e.key() == key);
        self.0 = rest;
        taken
    }

    /// Parse the standard Kubernetes label selector grammar: a comma
    /// separated list of `key=value`, `key!=value`, `key`, `!key`,
    /// `key in (v1,v2)` and `key notin (v1,v2)` requirements.
    ///
    /// `>` and `<` (set-based numeric comparisons) are rejected as
    /// unsupported.
    pub fn parse(s: &str) -> Result<Self, SelectorError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let mut exprs = Vec::new();
        for part in split_top_level_commas(s) {
            exprs.push(parse_requirement(part.trim())?);
        }
        Ok(Self(exprs))
    }

    /// Render back to the wire string form.
    pub fn to_selector_string(&self) -> String {
        self.0.iter().map(Expression::to_string).collect::<Vec<_>>().join(",")
    }

    /// True if this selector has no requirements.
    pub fn selects_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Evaluate every requirement against `labels` (conjunction).
    pub fn matches(&self, labels: &Map) -> bool {
        self.0.iter().all(|e| e.matches(labels))
    }
}

/// Split on commas that are not inside a `(...)` value list.
fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_requirement(req: &str) -> Result<Expression, SelectorError> {
    if let Some(key) = req.strip_prefix('!') {
        return Ok(Expression::DoesNotExist(key.trim().to_string()));
    }
    if let Some(idx) = req.find('>').or_else(|| req.find('<')) {
        let _ = idx;
        return Err(SelectorError::UnsupportedOperator(req.to_string()));
    }
    if let Some((key, rest)) = req.split_once("!=") {
        return Ok(Expression::NotEqual(key.trim().to_string(), rest.trim().to_string()));
    }
    if let Some((key, rest)) = req.split_once("==") {
        return Ok(Expression::Equal(key.trim().to_string(), rest.trim().to_string()));
    }
    if let Some((key, rest)) = req.split_once('=') {
        return Ok(Expression::Equal(key.trim().to_string(), rest.trim().to_string()));
    }
    // `key in (...)` / `key notin (...)`
    if let Some(rest) = req.strip_suffix(')') {
        if let Some((key, set)) = rest.split_once(" in (") {
            return Ok(Expression::In(key.trim().to_string(), parse_value_set(set)));
        }
        if let Some((key, set)) = rest.split_once(" notin (") {
            return Ok(Expression::NotIn(key.trim().to_string(), parse_value_set(set)));
        }
        return Err(SelectorError::Malformed(req.to_string()));
    }
    if req.is_empty() {
        return Err(SelectorError::Malformed(req.to_string()));
    }
    Ok(Expression::Exists(req.to_string()))
}

fn parse_value_set(s: &str) -> BTreeSet<String> {
    s.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect()
}

impl Expression {
    fn key(&self) -> &str {
        match self {
            Expression::In(k, _)
            | Expression::NotIn(k, _)
            | Expression::Equal(k, _)
            | Expression::NotEqual(k, _)
            | Expression::Exists(k)
            | Expression::DoesNotExist(k) => k,
        }
    }

    fn to_string(&self) -> String {
        match self {
            Expression::In(key, values) => {
                format!("{key} in ({})", values.iter().cloned().collect::<Vec<_>>().join(","))
            }
            Expression::NotIn(key, values) => {
                format!("{key} notin ({})", values.iter().cloned().collect::<Vec<_>>().join(","))
            }
            Expression::Equal(key, value) => format!("{key}={value}"),
            Expression::NotEqual(key, value) => format!("{key}!={value}"),
            Expression::Exists(key) => key.clone(),
            Expression::DoesNotExist(key) => format!("!{key}"),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self {
            Expression::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Expression::NotIn(key, values) => labels.get(key).is_none_or(|v| !values.contains(v)),
            Expression::Exists(key) => labels.contains_key(key),
            Expression::DoesNotExist(key) => !labels.contains_key(key),
            Expression::Equal(key, value) => labels.get(key) == Some(value),
            Expression::NotEqual(key, value) => labels.get(key) != Some(value),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_selector_string())
    }
}

impl FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Expression> for Selector {
    fn from(value: Expression) -> Self {
        Self(vec![value])
    }
}

impl From<LabelSelector> for Selector {
    fn from(value: LabelSelector) -> Self {
        let mut exprs: Vec<Expression> = value
            .match_labels
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| Expression::Equal(k, v))
            .collect();
        exprs.extend(value.match_expressions.unwrap_or_default().into_iter().filter_map(Into::into));
        Self(exprs)
    }
}

impl From<LabelSelectorRequirement> for Option<Expression> {
    fn from(requirement: LabelSelectorRequirement) -> Self {
        let key = requirement.key;
        let values: BTreeSet<String> = requirement.values.unwrap_or_default().into_iter().collect();
        match requirement.operator.as_str() {
            "In" => Some(Expression::In(key, values)),
            "NotIn" => Some(Expression::NotIn(key, values)),
            "Exists" => Some(Expression::Exists(key)),
            "DoesNotExist" => Some(Expression::DoesNotExist(key)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> Map {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_equal_notequal_exists() {
        let sel = Selector::parse("foo=bar,bah!=baz,qux,!quux").unwrap();
        assert!(sel.matches(&map(&[("foo", "bar"), ("bah", "nope"), ("qux", "x")])));
        assert!(!sel.matches(&map(&[("foo", "nope")])));
    }

    #[test]
    fn parses_in_notin() {
        let sel = Selector::parse("env in (prod, staging),tier notin (edge)").unwrap();
        assert!(sel.matches(&map(&[("env", "prod"), ("tier", "core")])));
        assert!(!sel.matches(&map(&[("env", "dev"), ("tier", "core")])));
        assert!(!sel.matches(&map(&[("env", "prod"), ("tier", "edge")])));
    }

    #[test]
    fn rejects_comparison_operators() {
        assert!(matches!(Selector::parse("foo>1"), Err(SelectorError::UnsupportedOperator(_))));
        assert!(matches!(Selector::parse("foo<1"), Err(SelectorError::UnsupportedOperator(_))));
    }

    #[test]
    fn to_selector_string_round_trips_requirements() {
        let s = Selector(vec![
            Expression::In("foo".into(), ["bar".into(), "baz".into()].into()),
            Expression::Equal("a".into(), "b".into()),
        ]);
        let rendered = s.to_selector_string();
        let reparsed = Selector::parse(&rendered).unwrap();
        assert_eq!(s, reparsed);
    }

    #[test]
    fn take_key_extracts_matching_requirements_only() {
        let mut sel = Selector::parse("dsm.daocloud.io/query notin (aaaa,bbbb),env=prod").unwrap();
        let taken = sel.take_key("dsm.daocloud.io/query");
        assert_eq!(taken.len(), 1);
        assert_eq!(sel.to_selector_string(), "env=prod");
    }
}
