//! Decycle / retrocycle.
//!
//! [`decycle`] turns a [`Value`] graph into a JSON tree in which every
//! container appears at most once. Later occurrences of an already visited
//! container are replaced by `{"$ref": PATH}`, where `PATH` is a JSONPath
//! locating the first occurrence:
//!
//! ```text
//! $                root
//! $[3]             array element
//! $["name"]        object member (key is a JSON string literal)
//! $["args"][0]     chained
//! ```
//!
//! [`retrocycle`] walks a freshly decoded graph and replaces the markers with
//! the values their paths point to, restoring shared and cyclic structure.
//! Paths always resolve against the root of the same message. Restored
//! references are weak handles: the first occurrence owns the container.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use super::value::{Array, Object, Value};

/// Key of the back-reference marker.
pub const REF_KEY: &str = "$ref";

/// Accepted path grammar: `$` followed by `[digits]` or `["json string"]`.
static PATH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\$(?:\[(?:\d+|"(?:[^\\"\x00-\x1f]|\\(?:[\\"/bfnrt]|u[0-9a-zA-Z]{4}))*")\])*$"#,
    )
    .expect("path regex is valid")
});

/// Replacement hook applied to every value before it is copied.
///
/// Returning `Some(json)` emits `json` verbatim instead of the value.
pub type Replacer<'a> = &'a dyn Fn(&Value) -> Option<serde_json::Value>;

/// Decycle `value` into a JSON tree.
///
/// `base_path` is appended to `$` to form the path of `value` itself, so a
/// value that will be embedded as the `args` member of a message uses
/// `["args"]`. Pass `""` for a root value.
///
/// `Undefined` object members are dropped and `Undefined` array elements
/// become `null`; a top-level `Undefined` becomes `null`.
pub fn decycle(value: &Value, base_path: &str, replacer: Replacer<'_>) -> serde_json::Value {
    let mut seen = HashMap::new();
    let root = format!("${}", base_path);
    derez(value, &root, replacer, &mut seen).unwrap_or(serde_json::Value::Null)
}

fn derez(
    value: &Value,
    path: &str,
    replacer: Replacer<'_>,
    seen: &mut HashMap<usize, String>,
) -> Option<serde_json::Value> {
    if let Some(identity) = value.identity() {
        if let Some(first) = seen.get(&identity) {
            let mut marker = serde_json::Map::new();
            marker.insert(REF_KEY.to_string(), serde_json::Value::String(first.clone()));
            return Some(serde_json::Value::Object(marker));
        }
        seen.insert(identity, path.to_string());
    }

    if let Some(replaced) = replacer(value) {
        return Some(replaced);
    }

    match value {
        Value::Undefined => None,
        Value::Null => Some(serde_json::Value::Null),
        Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        Value::Number(n) => Some(serde_json::Value::Number(n.clone())),
        Value::String(s) => Some(serde_json::Value::String(s.clone())),
        Value::Array(array) => {
            let items = array
                .to_vec()
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    derez(item, &format!("{}[{}]", path, i), replacer, seen)
                        .unwrap_or(serde_json::Value::Null)
                })
                .collect();
            Some(serde_json::Value::Array(items))
        }
        Value::Object(object) => {
            let mut map = serde_json::Map::new();
            for (key, member) in object.entries() {
                let member_path = format!("{}[{}]", path, quote(&key));
                if let Some(json) = derez(&member, &member_path, replacer, seen) {
                    map.insert(key, json);
                }
            }
            Some(serde_json::Value::Object(map))
        }
        // Without a replacer the domain types fall back to their plain JSON forms.
        Value::Uri(uri) => Some(serde_json::Value::String(uri.to_string())),
        Value::ForeignUri(uri) => Some(uri.to_json()),
        Value::Range(range) => serde_json::to_value(range).ok(),
    }
}

fn quote(key: &str) -> String {
    serde_json::Value::String(key.to_string()).to_string()
}

/// Restore shared and cyclic structure in place and return the root.
///
/// Every object of the form `{"$ref": PATH}` with a well-formed `PATH` is
/// replaced by the value the path resolves to. A path that does not resolve
/// is replaced by the literal path string. Objects whose `$ref` is not a
/// well-formed path are left alone and walked like any other object.
pub fn retrocycle(root: Value) -> Value {
    let mut fixups = Vec::new();
    let mut visited = HashSet::new();
    collect_refs(&root, &mut visited, &mut fixups);

    // Resolve everything before writing, so no write lock is held while
    // paths are followed.
    let resolved: Vec<(Slot, Value)> = fixups
        .into_iter()
        .map(|(slot, path)| {
            let value = match resolve_path(&root, &path) {
                Some(target) => target.downgrade(),
                None => Value::String(path),
            };
            (slot, value)
        })
        .collect();

    for (slot, value) in resolved {
        match slot {
            Slot::Element(array, index) => array.set(index, value),
            Slot::Member(object, key) => {
                object.insert(key, value);
            }
        }
    }

    root
}

enum Slot {
    Element(Array, usize),
    Member(Object, String),
}

fn ref_path(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    let path = object.get(REF_KEY)?;
    let path = path.as_str()?;
    if PATH_REGEX.is_match(path) {
        Some(path.to_string())
    } else {
        None
    }
}

fn collect_refs(value: &Value, visited: &mut HashSet<usize>, fixups: &mut Vec<(Slot, String)>) {
    let Some(identity) = value.identity() else {
        return;
    };
    if !visited.insert(identity) {
        return;
    }

    match value {
        Value::Array(array) => {
            for (i, element) in array.to_vec().into_iter().enumerate() {
                match ref_path(&element) {
                    Some(path) => fixups.push((Slot::Element(array.clone(), i), path)),
                    None => collect_refs(&element, visited, fixups),
                }
            }
        }
        Value::Object(object) => {
            for (key, member) in object.entries() {
                match ref_path(&member) {
                    Some(path) => fixups.push((Slot::Member(object.clone(), key), path)),
                    None => collect_refs(&member, visited, fixups),
                }
            }
        }
        _ => {}
    }
}

#[derive(Debug, PartialEq)]
enum Segment {
    Index(usize),
    Key(String),
}

/// Split a well-formed path into segments.
fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let mut rest = path.strip_prefix('$')?;
    let mut segments = Vec::new();

    while !rest.is_empty() {
        rest = rest.strip_prefix('[')?;
        if rest.starts_with('"') {
            let end = closing_quote(rest)?;
            let key: String = serde_json::from_str(&rest[..=end]).ok()?;
            segments.push(Segment::Key(key));
            rest = rest[end + 1..].strip_prefix(']')?;
        } else {
            let end = rest.find(']')?;
            segments.push(Segment::Index(rest[..end].parse().ok()?));
            rest = &rest[end + 1..];
        }
    }

    Some(segments)
}

/// Byte offset of the quote closing the string literal that starts `s`.
fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}

/// Follow `path` from `root`. `None` when any step is missing.
fn resolve_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for segment in parse_path(path)? {
        current = match (&current, segment) {
            (Value::Array(array), Segment::Index(i)) => array.get(i)?,
            (Value::Array(array), Segment::Key(key)) => array.get(key.parse().ok()?)?,
            (Value::Object(object), Segment::Key(key)) => object.get(&key)?,
            (Value::Object(object), Segment::Index(i)) => object.get(&i.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain(value: &Value) -> serde_json::Value {
        decycle(value, "", &|_| None)
    }

    #[test]
    fn test_self_array() {
        let arr = Array::new();
        arr.push(arr.clone());
        assert_eq!(plain(&Value::from(arr)), json!([{"$ref": "$"}]));
    }

    #[test]
    fn test_shared_member_uses_first_path() {
        let shared = Object::new();
        shared.insert("x", 1);
        let root = Object::new();
        root.insert("a", shared.clone());
        root.insert("b", shared);

        assert_eq!(
            plain(&Value::from(root)),
            json!({"a": {"x": 1}, "b": {"$ref": "$[\"a\"]"}})
        );
    }

    #[test]
    fn test_base_path_prefix() {
        let obj = Object::new();
        obj.insert("self", obj.clone());
        let args = Value::array(vec![Value::from(obj)]);

        assert_eq!(
            decycle(&args, "[\"args\"]", &|_| None),
            json!([{"self": {"$ref": "$[\"args\"][0]"}}])
        );
    }

    #[test]
    fn test_equal_but_distinct_objects_are_not_merged() {
        let a = Object::new();
        a.insert("v", 1);
        let b = Object::new();
        b.insert("v", 1);
        let root = Value::array(vec![a.into(), b.into()]);

        assert_eq!(plain(&root), json!([{"v": 1}, {"v": 1}]));
    }

    #[test]
    fn test_undefined_handling() {
        let obj = Object::new();
        obj.insert("gone", Value::Undefined);
        obj.insert("kept", Value::Null);
        let root = Value::array(vec![obj.into(), Value::Undefined]);

        assert_eq!(plain(&root), json!([{"kept": null}, null]));
        assert_eq!(plain(&Value::Undefined), json!(null));
    }

    #[test]
    fn test_retrocycle_restores_self_reference() {
        let parsed = Value::from_json(json!({"name": "n", "self": {"$ref": "$"}}));
        let root = retrocycle(parsed);

        assert!(root.get("self").ptr_eq(&root));
        assert_eq!(root.get("name").as_str(), Some("n"));
    }

    #[test]
    fn test_retrocycle_restores_aliases() {
        let parsed = Value::from_json(json!({
            "args": [{"x": 1}, {"$ref": "$[\"args\"][0]"}]
        }));
        let root = retrocycle(parsed);
        let args = root.get("args");

        assert!(args.index(0).ptr_eq(&args.index(1)));
    }

    #[test]
    fn test_restored_cycle_is_freed_with_its_root() {
        let parsed = Value::from_json(json!({"child": {"parent": {"$ref": "$"}}}));
        let root = retrocycle(parsed);
        let weak = root.as_object().unwrap().downgrade();

        assert!(root.get("child").get("parent").ptr_eq(&root));
        drop(root);
        assert!(!weak.is_alive());
    }

    #[test]
    fn test_unresolved_path_becomes_literal() {
        let parsed = Value::from_json(json!({
            "a": {"$ref": "$[\"missing\"][0]"},
            "b": [{"$ref": "$[7]"}]
        }));
        let root = retrocycle(parsed);

        assert_eq!(root.get("a").as_str(), Some("$[\"missing\"][0]"));
        assert_eq!(root.get("b").index(0).as_str(), Some("$[7]"));
    }

    #[test]
    fn test_malformed_ref_is_left_alone() {
        let parsed = Value::from_json(json!({"a": {"$ref": "not a path"}}));
        let root = retrocycle(parsed);
        assert_eq!(root.get("a").get("$ref").as_str(), Some("not a path"));
    }

    #[test]
    fn test_parse_path_segments() {
        assert_eq!(parse_path("$"), Some(vec![]));
        assert_eq!(
            parse_path(r#"$["a\"]b"][12]"#),
            Some(vec![Segment::Key("a\"]b".to_string()), Segment::Index(12)])
        );
        assert!(PATH_REGEX.is_match(r#"$["a\"]b"][12]"#));
        assert!(!PATH_REGEX.is_match("$.a"));
    }

    #[test]
    fn test_round_trip_self_and_shared() {
        let shared = Object::new();
        shared.insert("tag", "shared");
        let root = Object::new();
        root.insert("self", root.clone());
        root.insert("left", shared.clone());
        root.insert("right", Value::array(vec![shared.into()]));

        let text = plain(&Value::from(root)).to_string();
        let restored = retrocycle(Value::from_json(serde_json::from_str(&text).unwrap()));

        assert!(restored.get("self").ptr_eq(&restored));
        assert!(restored.get("left").ptr_eq(&restored.get("right").index(0)));
        assert_eq!(restored.get("left").get("tag").as_str(), Some("shared"));
    }
}
