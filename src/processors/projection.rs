//! Field projection over JSON-shaped content.
//!
//! Paths are parsed once into segment lists and matched structurally:
//! dotted keys, `name[]` for array elements, `*` for any key, and the
//! terminal `_keys` which yields an object's key list.

use serde_json::{Map, Value};

use super::{param_str, Processor, StepOutput};

pub struct ProjectionProcessor;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    /// Key whose value must be an array; the rest of the path applies to
    /// every element.
    Elements(String),
    AnyKey,
    /// Terminal: replace the object with the list of its top-level keys.
    Keys,
}

type FieldPath = Vec<Segment>;

fn parse_field_path(path: &str) -> Result<FieldPath, String> {
    if path.is_empty() {
        return Err("empty field path".to_string());
    }
    let mut segments = Vec::new();
    let parts: Vec<&str> = path.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        let segment = if *part == "_keys" {
            if i != parts.len() - 1 {
                return Err(format!("'{path}': _keys must be the final segment"));
            }
            Segment::Keys
        } else if *part == "*" {
            Segment::AnyKey
        } else if let Some(name) = part.strip_suffix("[]") {
            if name.is_empty() {
                return Err(format!("'{path}': [] requires a key name"));
            }
            Segment::Elements(name.to_string())
        } else if part.is_empty() {
            return Err(format!("'{path}': empty segment"));
        } else {
            Segment::Key(part.to_string())
        };
        segments.push(segment);
    }
    Ok(segments)
}

/// Suffixes of the parsed paths still active at the current node.
type Active<'a> = Vec<&'a [Segment]>;

/// Advance the active suffixes across an object key. `Elements` only
/// matches when the value is actually an array.
fn advance<'a>(active: &Active<'a>, key: &str, value: &Value) -> Active<'a> {
    let mut next = Vec::new();
    for suffix in active {
        match suffix.first() {
            Some(Segment::Key(k)) if k == key => next.push(&suffix[1..]),
            Some(Segment::AnyKey) => next.push(&suffix[1..]),
            Some(Segment::Elements(k)) if k == key && value.is_array() => next.push(&suffix[1..]),
            _ => {}
        }
    }
    next
}

fn has_full_match(active: &Active<'_>) -> bool {
    active.iter().any(|s| s.is_empty())
}

fn has_keys_match(active: &Active<'_>) -> bool {
    active
        .iter()
        .any(|s| s.len() == 1 && matches!(s[0], Segment::Keys))
}

/// Restriction: keep a node iff some requested path matches a descendant
/// leaf, or the node is a container a path traverses into (such containers
/// survive pruning even when emptied).
fn project_include(value: &Value, active: &Active<'_>) -> Option<Value> {
    if active.is_empty() {
        return None;
    }
    if has_full_match(active) {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => {
            if has_keys_match(active) {
                let keys = map.keys().cloned().map(Value::String).collect();
                return Some(Value::Array(keys));
            }
            let mut out = Map::new();
            for (key, child) in map {
                let child_active = advance(active, key, child);
                if let Some(kept) = project_include(child, &child_active) {
                    out.insert(key.clone(), kept);
                }
            }
            Some(Value::Object(out))
        }
        // Arrays are transparent: the same suffixes apply to every element,
        // index order preserved.
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .filter_map(|item| project_include(item, active))
                .collect();
            Some(Value::Array(kept))
        }
        // A leaf survives only on a full path match, handled above.
        _ => None,
    }
}

/// Complement: drop every node whose path matches an excluded field; keep
/// the rest verbatim.
fn project_exclude(value: &Value, active: &Active<'_>) -> Option<Value> {
    if has_full_match(active) {
        return None;
    }
    if active.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                let child_active = advance(active, key, child);
                if let Some(kept) = project_exclude(child, &child_active) {
                    out.insert(key.clone(), kept);
                }
            }
            Some(Value::Object(out))
        }
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .filter_map(|item| project_exclude(item, active))
                .collect();
            Some(Value::Array(kept))
        }
        _ => Some(value.clone()),
    }
}

/// Empty structure mirroring the input's shape, for include mode with no
/// matching fields.
fn empty_like(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::Object(Map::new()),
        Value::Array(_) => Value::Array(Vec::new()),
        _ => Value::Null,
    }
}

/// Parse content as JSON, unwrapping one level of string encoding when the
/// content is itself a serialized JSON document.
fn parse_json_content(content: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(content.trim()).ok()?;
    if let Value::String(inner) = &value {
        if let Ok(nested) = serde_json::from_str::<Value>(inner) {
            if nested.is_object() || nested.is_array() {
                return Some(nested);
            }
        }
    }
    Some(value)
}

impl Processor for ProjectionProcessor {
    fn name(&self) -> &'static str {
        "projection"
    }

    fn wants(&self, params: &Map<String, Value>) -> bool {
        params.contains_key("fields")
    }

    fn apply(&self, content: &str, params: &Map<String, Value>) -> Result<StepOutput, String> {
        let fields = params
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| "fields must be an array of strings".to_string())?;
        let mut paths = Vec::with_capacity(fields.len());
        for field in fields {
            let field = field
                .as_str()
                .ok_or_else(|| "fields must be an array of strings".to_string())?;
            paths.push(parse_field_path(field)?);
        }
        let mode = param_str(params, "mode").unwrap_or("include");

        let Some(value) = parse_json_content(content) else {
            return Ok(StepOutput::passthrough(
                content.to_string(),
                "content is not JSON; projection skipped",
            ));
        };

        let active: Active<'_> = paths.iter().map(|p| p.as_slice()).collect();
        let projected = match mode {
            "include" => project_include(&value, &active).unwrap_or_else(|| empty_like(&value)),
            "exclude" => project_exclude(&value, &active).unwrap_or(Value::Null),
            other => return Err(format!("unknown projection mode '{other}'")),
        };

        let rendered = serde_json::to_string_pretty(&projected)
            .map_err(|e| format!("serialize projection: {e}"))?;

        let mut metadata = Map::new();
        metadata.insert("mode".to_string(), Value::String(mode.to_string()));
        metadata.insert("fieldCount".to_string(), paths.len().into());
        Ok(StepOutput::applied(rendered, metadata))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn run(content: &Value, fields: &[&str], mode: &str) -> Value {
        let mut params = Map::new();
        params.insert(
            "fields".to_string(),
            Value::Array(fields.iter().map(|f| json!(f)).collect()),
        );
        params.insert("mode".to_string(), json!(mode));
        let output = ProjectionProcessor
            .apply(&content.to_string(), &params)
            .expect("projection");
        serde_json::from_str(&output.content).expect("output is JSON")
    }

    #[test]
    fn test_include_through_array() {
        let content = json!({
            "users": [
                {"name": "A", "email": "a@x", "secret": "s1"},
                {"name": "B", "email": "b@x", "secret": "s2"}
            ],
            "total": 2
        });
        let out = run(&content, &["users.name", "users.email"], "include");
        assert_eq!(
            out,
            json!({
                "users": [
                    {"name": "A", "email": "a@x"},
                    {"name": "B", "email": "b@x"}
                ]
            })
        );
    }

    #[test]
    fn test_include_is_a_restriction() {
        let content = json!({"a": {"b": 1, "c": 2}, "d": 3});
        let out = run(&content, &["a.b"], "include");
        assert_eq!(out, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_include_unknown_field_yields_empty_shape() {
        let content = json!({"a": 1});
        assert_eq!(run(&content, &["nope"], "include"), json!({}));

        let content = json!([1, 2, 3]);
        assert_eq!(run(&content, &["nope"], "include"), json!([]));
    }

    #[test]
    fn test_include_empty_fields_yields_empty() {
        let content = json!({"a": 1});
        assert_eq!(run(&content, &[], "include"), json!({}));
    }

    #[test]
    fn test_exclude_removes_matching_paths() {
        let content = json!({
            "users": [{"name": "A", "secret": "s"}],
            "debug": {"trace": true}
        });
        let out = run(&content, &["users.secret", "debug"], "exclude");
        assert_eq!(out, json!({"users": [{"name": "A"}]}));
    }

    #[test]
    fn test_exclude_empty_fields_is_identity() {
        let content = json!({"a": [1, {"b": 2}]});
        assert_eq!(run(&content, &[], "exclude"), content);
    }

    #[test]
    fn test_elements_marker() {
        let content = json!({"orders": [{"id": 1}, {"id": 2}], "orders_meta": 9});
        let out = run(&content, &["orders[]"], "include");
        assert_eq!(out, json!({"orders": [{"id": 1}, {"id": 2}]}));

        // Elements marker does not match a non-array value.
        let content = json!({"orders": {"id": 1}});
        assert_eq!(run(&content, &["orders[]"], "include"), json!({}));
    }

    #[test]
    fn test_elements_then_key() {
        let content = json!({
            "orders": [
                {"id": 1, "sku": "a", "price": 10},
                {"id": 2, "sku": "b", "price": 20}
            ]
        });
        let out = run(&content, &["orders[].id"], "include");
        assert_eq!(out, json!({"orders": [{"id": 1}, {"id": 2}]}));

        let out = run(&content, &["orders[].price"], "exclude");
        assert_eq!(
            out,
            json!({"orders": [{"id": 1, "sku": "a"}, {"id": 2, "sku": "b"}]})
        );
    }

    #[test]
    fn test_wildcard_segment() {
        let content = json!({"a": {"x": 1, "y": 2}, "b": {"x": 3}});
        let out = run(&content, &["*.x"], "include");
        assert_eq!(out, json!({"a": {"x": 1}, "b": {"x": 3}}));
    }

    #[test]
    fn test_keys_terminates_descent() {
        let content = json!({"cfg": {"host": "h", "port": 1}});
        let out = run(&content, &["cfg._keys"], "include");
        assert_eq!(out, json!({"cfg": ["host", "port"]}));
    }

    #[test]
    fn test_keys_must_be_final() {
        assert!(parse_field_path("a._keys.b").is_err());
        assert!(parse_field_path("").is_err());
        assert!(parse_field_path("a..b").is_err());
        assert!(parse_field_path("[]").is_err());
    }

    #[test]
    fn test_non_json_passthrough() {
        let mut params = Map::new();
        params.insert("fields".to_string(), json!(["a"]));
        let output = ProjectionProcessor
            .apply("plain text, not json", &params)
            .expect("passthrough");
        assert!(!output.applied);
        assert_eq!(output.content, "plain text, not json");
        assert!(output.metadata["note"].is_string());
    }

    #[test]
    fn test_double_encoded_json() {
        let inner = json!({"a": 1, "b": 2}).to_string();
        let content = Value::String(inner).to_string();
        let out: Value = {
            let mut params = Map::new();
            params.insert("fields".to_string(), json!(["a"]));
            let output = ProjectionProcessor.apply(&content, &params).unwrap();
            serde_json::from_str(&output.content).unwrap()
        };
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn test_idempotent_under_same_params() {
        let content = json!({"users": [{"name": "A", "secret": "s"}]}).to_string();
        let mut params = Map::new();
        params.insert("fields".to_string(), json!(["users.name"]));
        let first = ProjectionProcessor.apply(&content, &params).unwrap();
        let second = ProjectionProcessor.apply(&content, &params).unwrap();
        assert_eq!(first.content, second.content);
    }

    #[test]
    fn test_object_key_order_preserved() {
        let content: Value = serde_json::from_str(r#"{"z": 1, "a": 2, "m": 3}"#).unwrap();
        let out = run(&content, &["z", "a", "m"], "include");
        let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }
}
