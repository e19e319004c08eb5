//! Derives an object's index map from its raw JSON shape via path and
//! template expressions.
//!
//! Expression kind is classified syntactically, cheapest check first:
//!
//! - contains `{{` → a small Go-template-flavored expression supporting the
//!   pipe functions `default`, `quote`, and `join`.
//! - contains `{` (but not `{{`) → a Kubernetes-style JSON path
//!   (`{.metadata.foo}`), tolerant of missing keys.
//! - otherwise → a literal constant, returned unchanged for every object.
//!
//! The built-in keys `cluster`, `is_deleted`, `namespace`, and `name` are
//! always injected or overridden after the configured expressions run, so a
//! misconfigured index can never shadow them.
use std::collections::BTreeMap;

use jsonpath_rust::JsonPathInst;
use serde_json::Value;

use crate::error::Error;

/// A `(group, version, resource) -> (index key -> expression)` mapping,
/// as configured for one resource type.
pub type IndexConfig = BTreeMap<String, String>;

#[derive(Debug, Clone)]
enum Expr {
    Literal(String),
    JsonPath(String),
    Template(Vec<Stage>),
}

#[derive(Debug, Clone)]
enum Stage {
    /// The initial value: either a dotted path (evaluated relative to the
    /// object root) or a bare/quoted literal.
    Source(Source),
    Func(Func),
}

#[derive(Debug, Clone)]
enum Source {
    Path(String),
    Literal(String),
}

#[derive(Debug, Clone)]
enum Func {
    Default(String),
    Quote,
    Join(String, Vec<Source>),
}

/// A compiled set of index expressions for one resource type, ready to
/// project raw objects into index maps without re-parsing expressions per
/// object.
pub struct Projector {
    compiled: Vec<(String, Expr)>,
}

impl Projector {
    /// Compile a resource's index configuration.
    pub fn compile(config: &IndexConfig) -> Result<Self, Error> {
        let compiled = config
            .iter()
            .map(|(key, expr)| Ok((key.clone(), compile_expr(expr)?)))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self { compiled })
    }

    /// Project `raw` (the decoded object, as JSON) into its index map. Does
    /// not inject the built-in keys; callers combine this with cluster,
    /// namespace, name, and is_deleted themselves (the store knows those,
    /// the projector doesn't).
    pub fn project(&self, raw: &Value) -> BTreeMap<String, String> {
        self.compiled
            .iter()
            .map(|(key, expr)| (key.clone(), eval_expr(expr, raw)))
            .collect()
    }
}

fn compile_expr(expr: &str) -> Result<Expr, Error> {
    if expr.contains("{{") {
        Ok(Expr::Template(compile_template(expr)?))
    } else if expr.contains('{') {
        Ok(Expr::JsonPath(jsonpath_query(expr)))
    } else {
        Ok(Expr::Literal(expr.to_string()))
    }
}

/// Turn `{.metadata.foo}` into the `$.metadata.foo` query string
/// `jsonpath-rust` expects, allowing missing keys to resolve to nothing
/// rather than an error.
fn jsonpath_query(expr: &str) -> String {
    let inner = expr.trim().trim_start_matches('{').trim_end_matches('}');
    format!("${inner}")
}

fn compile_template(expr: &str) -> Result<Vec<Stage>, Error> {
    let body = expr
        .trim()
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .ok_or_else(|| Error::InvalidExpression(format!("unterminated template expression: {expr}")))?
        .trim();

    let mut stages = Vec::new();
    for (i, part) in body.split('|').map(str::trim).enumerate() {
        if i == 0 {
            stages.push(Stage::Source(parse_source(part)));
        } else {
            stages.push(Stage::Func(parse_func(part)?));
        }
    }
    Ok(stages)
}

fn parse_source(token: &str) -> Source {
    if let Some(unquoted) = unquote(token) {
        Source::Literal(unquoted)
    } else if token.starts_with('.') {
        Source::Path(token.to_string())
    } else {
        Source::Literal(token.to_string())
    }
}

fn parse_func(token: &str) -> Result<Func, Error> {
    let mut words = tokenize(token);
    let name = words.first().cloned().unwrap_or_default();
    match name.as_str() {
        "default" => {
            let arg = words.get(1).cloned().unwrap_or_default();
            Ok(Func::Default(unquote(&arg).unwrap_or(arg)))
        }
        "quote" => Ok(Func::Quote),
        "join" => {
            if words.len() < 2 {
                return Err(Error::InvalidExpression(format!("join needs a separator: {token}")));
            }
            let sep = unquote(&words[1]).unwrap_or_else(|| words[1].clone());
            let args = words[2..].iter().map(|w| parse_source(w)).collect();
            Ok(Func::Join(sep, args))
        }
        other => Err(Error::InvalidExpression(format!("unknown template function: {other}"))),
    }
}

/// Split on whitespace, keeping quoted substrings (`"a b"`) intact.
fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    let mut current = String::new();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            ',' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(token: &str) -> Option<String> {
    let token = token.trim();
    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        Some(token[1..token.len() - 1].to_string())
    } else {
        None
    }
}

fn eval_expr(expr: &Expr, root: &Value) -> String {
    match expr {
        Expr::Literal(s) => s.clone(),
        Expr::JsonPath(query) => eval_jsonpath(query, root),
        Expr::Template(stages) => eval_template(stages, root),
    }
}

fn eval_jsonpath(query: &str, root: &Value) -> String {
    let Ok(path) = query.parse::<JsonPathInst>() else {
        return String::new();
    };
    // `AllowMissingKeys` isn't a flag in jsonpath-rust: a query against a
    // missing field simply yields no matches, which is the tolerance we want.
    let found = path.find_slice(root, Default::default());
    found.first().map(|v| value_to_string(v)).unwrap_or_default()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn eval_source(source: &Source, root: &Value) -> Option<Value> {
    match source {
        Source::Literal(s) => Some(Value::String(s.clone())),
        Source::Path(path) => {
            let query = jsonpath_query(&format!("{{{path}}}"));
            let parsed = query.parse::<JsonPathInst>().ok()?;
            parsed.find_slice(root, Default::default()).first().map(|v| (**v).clone())
        }
    }
}

fn eval_template(stages: &[Stage], root: &Value) -> String {
    let mut current: Option<Value> = None;
    for stage in stages {
        match stage {
            Stage::Source(source) => current = eval_source(source, root),
            Stage::Func(Func::Default(default)) => {
                let is_empty = match &current {
                    None => true,
                    Some(Value::String(s)) => s.is_empty(),
                    Some(Value::Null) => true,
                    _ => false,
                };
                if is_empty {
                    current = Some(Value::String(default.clone()));
                }
            }
            Stage::Func(Func::Quote) => {
                let s = current.as_ref().map(value_to_string).unwrap_or_default();
                current = Some(Value::String(format!("\"{s}\"")));
            }
            Stage::Func(Func::Join(sep, args)) => {
                let parts: Vec<String> = if args.is_empty() {
                    match &current {
                        Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
                        Some(other) => vec![value_to_string(other)],
                        None => Vec::new(),
                    }
                } else {
                    args.iter()
                        .flat_map(|arg| match eval_source(arg, root) {
                            Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
                            Some(other) => vec![value_to_string(&other)],
                            None => Vec::new(),
                        })
                        .collect()
                };
                current = Some(Value::String(parts.join(sep)));
            }
        }
    }
    current.as_ref().map(value_to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(pairs: &[(&str, &str)]) -> IndexConfig {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn classifies_and_evaluates_jsonpath() {
        let p = Projector::compile(&config(&[("name", "{.metadata.name}")])).unwrap();
        let obj = json!({"metadata": {"name": "p1"}});
        assert_eq!(p.project(&obj).get("name").unwrap(), "p1");
    }

    #[test]
    fn jsonpath_tolerates_missing_keys() {
        let p = Projector::compile(&config(&[("phase", "{.status.phase}")])).unwrap();
        let obj = json!({"metadata": {"name": "p1"}});
        assert_eq!(p.project(&obj).get("phase").unwrap(), "");
    }

    #[test]
    fn literal_expression_is_constant() {
        let p = Projector::compile(&config(&[("kind", "pod")])).unwrap();
        let obj = json!({});
        assert_eq!(p.project(&obj).get("kind").unwrap(), "pod");
    }

    #[test]
    fn template_default_applies_on_missing_value() {
        let p = Projector::compile(&config(&[("phase", r#"{{ .status.phase | default "n/a" }}"#)])).unwrap();
        let obj = json!({});
        assert_eq!(p.project(&obj).get("phase").unwrap(), "n/a");

        let obj2 = json!({"status": {"phase": "Running"}});
        assert_eq!(p.project(&obj2).get("phase").unwrap(), "Running");
    }

    #[test]
    fn template_quote_wraps_value() {
        let p = Projector::compile(&config(&[("name", "{{ .metadata.name | quote }}")])).unwrap();
        let obj = json!({"metadata": {"name": "p1"}});
        assert_eq!(p.project(&obj).get("name").unwrap(), "\"p1\"");
    }

    #[test]
    fn template_join_concatenates_array_elements() {
        let p = Projector::compile(&config(&[("tags", r#"{{ join ",", .spec.tags }}"#)])).unwrap();
        let obj = json!({"spec": {"tags": ["a", "b", "c"]}});
        assert_eq!(p.project(&obj).get("tags").unwrap(), "a,b,c");
    }
}
