// Module: Query
// Structural navigation over decoded JSON values: JSONPath expressions
// ("$.users[*].email") and plain dotted paths ("user.id", "items[0].name").

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use serde_json_path::JsonPath;

static INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("valid index regex"));

/// Converts a dotted path with optional `[n]` indices to a JSON Pointer.
///
/// "data.users[0].id" -> "/data/users/0/id"
pub fn dotted_to_pointer(path: &str) -> String {
    let with_indices = INDEX_RE.replace_all(path, ".$1");
    let mut pointer = String::new();
    for segment in with_indices.split('.').filter(|s| !s.is_empty()) {
        pointer.push('/');
        // JSON Pointer escaping per RFC 6901
        pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
    }
    pointer
}

/// Evaluates a query-path expression against a JSON root.
///
/// Expressions starting with `$` run through the JSONPath engine; a single
/// match yields that value, multiple matches yield an array. Anything else
/// is treated as a dotted path resolved via JSON Pointer.
///
/// Returns `Ok(None)` when the path resolves to nothing, `Err` only for
/// syntactically invalid JSONPath.
pub fn evaluate(root: &Value, path: &str) -> Result<Option<Value>, String> {
    if path.starts_with('$') {
        let compiled = JsonPath::parse(path).map_err(|e| e.to_string())?;
        let nodes = compiled.query(root).all();
        return Ok(match nodes.len() {
            0 => None,
            1 => Some(nodes[0].clone()),
            _ => Some(Value::Array(nodes.into_iter().cloned().collect())),
        });
    }
    Ok(root.pointer(&dotted_to_pointer(path)).cloned())
}

/// Walks a dotted path only (no JSONPath), used by template interpolation
/// where `$` has no special meaning.
pub fn walk_dotted(root: &Value, path: &str) -> Option<Value> {
    root.pointer(&dotted_to_pointer(path)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pointer_conversion_handles_indices() {
        assert_eq!(dotted_to_pointer("a.b.c"), "/a/b/c");
        assert_eq!(dotted_to_pointer("items[0].id"), "/items/0/id");
        assert_eq!(dotted_to_pointer("a[2][3]"), "/a/2/3");
    }

    #[test]
    fn dotted_path_lookup() {
        let root = json!({"data": {"user": {"id": 7}}});
        assert_eq!(evaluate(&root, "data.user.id").unwrap(), Some(json!(7)));
        assert_eq!(evaluate(&root, "data.missing").unwrap(), None);
    }

    #[test]
    fn jsonpath_single_and_projection() {
        let root = json!({"users": [{"email": "a@x"}, {"email": "b@x"}]});
        assert_eq!(
            evaluate(&root, "$.users[0].email").unwrap(),
            Some(json!("a@x"))
        );
        assert_eq!(
            evaluate(&root, "$.users[*].email").unwrap(),
            Some(json!(["a@x", "b@x"]))
        );
    }

    #[test]
    fn invalid_jsonpath_is_err() {
        let root = json!({});
        assert!(evaluate(&root, "$[").is_err());
    }

    #[test]
    fn indexed_dotted_access() {
        let root = json!({"items": [10, 20, 30]});
        assert_eq!(evaluate(&root, "items[1]").unwrap(), Some(json!(20)));
    }
}
