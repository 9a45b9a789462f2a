//! Dynamic payload values that can alias and form cycles.
//!
//! RPC arguments and results are arbitrary object graphs. Plain
//! `serde_json::Value` is a tree, so it cannot express two slots pointing at
//! the same object, nor an object that contains itself. [`Value`] keeps
//! containers behind shared handles ([`Array`], [`Object`]); cloning a
//! container value clones the handle, not the contents, and identity is the
//! identity of the handle.
//!
//! A handle is either strong or weak. Back-references restored by the
//! decoder are stored weak, so a decoded cyclic graph is freed together
//! with its root. Reading a member or element always hands out a strong
//! handle; a weak slot whose target is gone reads as `Undefined`.
//!
//! # Example
//!
//! ```ignore
//! use plugin_rpc::codec::{Object, Value};
//!
//! let node = Object::new();
//! node.insert("name", "root");
//! node.insert("self", node.clone());
//!
//! let value = Value::from(node);
//! assert!(value.get("self").ptr_eq(&value));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use lsp_types::{Range, Url};
use parking_lot::RwLock;
use serde_json::Number;

use super::decycle::decycle;
use super::uri::UriComponents;

/// A payload value.
///
/// `Undefined` is the absence-value: it is distinct from `Null` and is what a
/// handler returns when it has nothing to say.
#[derive(Clone, Default)]
pub enum Value {
    /// No value at all.
    #[default]
    Undefined,
    /// Explicit `null`.
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Shared, mutable array.
    Array(Array),
    /// Shared, mutable object.
    Object(Object),
    /// Domain URI.
    Uri(Url),
    /// URI in the component form used by the extension ecosystem.
    ForeignUri(UriComponents),
    /// Source range.
    Range(Range),
}

impl Value {
    /// Create a new empty object value.
    pub fn object() -> Self {
        Value::Object(Object::new())
    }

    /// Create an array value from items.
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Array::from_vec(items))
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_uri(&self) -> Option<&Url> {
        match self {
            Value::Uri(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_foreign_uri(&self) -> Option<&UriComponents> {
        match self {
            Value::ForeignUri(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<&Range> {
        match self {
            Value::Range(r) => Some(r),
            _ => None,
        }
    }

    /// Property lookup. Returns `Undefined` when this is not an object or the
    /// key is missing.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(o) => o.get(key).unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Element lookup. Returns `Undefined` when this is not an array or the
    /// index is out of bounds.
    pub fn index(&self, index: usize) -> Value {
        match self {
            Value::Array(a) => a.get(index).unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Identity comparison for containers.
    ///
    /// Two container values are identical when they share the same handle.
    /// Non-container values are never identical.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Identity key of a container, used for visited-tracking.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Value::Array(a) => Some(a.identity()),
            Value::Object(o) => Some(o.identity()),
            _ => None,
        }
    }

    /// Same value with a container handle made weak.
    pub(crate) fn downgrade(&self) -> Value {
        match self {
            Value::Array(a) => Value::Array(a.downgrade()),
            Value::Object(o) => Value::Object(o.downgrade()),
            other => other.clone(),
        }
    }

    /// Same value with a container handle made strong; `Undefined` when a
    /// weak handle's target is gone.
    fn attached(self) -> Value {
        match self {
            Value::Array(a) => a.strong().map_or(Value::Undefined, Value::Array),
            Value::Object(o) => o.strong().map_or(Value::Undefined, Value::Object),
            other => other,
        }
    }

    /// Build a value tree from plain JSON. No envelope revival happens here.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(Object::from_map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            )),
        }
    }

    /// Plain JSON form of this value.
    ///
    /// Repeated containers become `{"$ref": PATH}` markers, so this
    /// terminates on cyclic graphs. Domain URIs become strings, ranges their
    /// LSP form and foreign URIs their `$mid` record.
    pub fn to_json(&self) -> serde_json::Value {
        decycle(self, "", &|_| None)
    }

    /// Short name of the value kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Uri(_) => "uri",
            Value::ForeignUri(_) => "foreign-uri",
            Value::Range(_) => "range",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(a) => a.fmt(f),
            Value::Object(o) => o.fmt(f),
            Value::Uri(u) => write!(f, "Uri({u})"),
            Value::ForeignUri(u) => write!(f, "ForeignUri({u})"),
            Value::Range(r) => write!(f, "Range({r:?})"),
        }
    }
}

enum Link<T> {
    Strong(Arc<RwLock<T>>),
    Weak(Weak<RwLock<T>>),
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        match self {
            Link::Strong(a) => Link::Strong(a.clone()),
            Link::Weak(w) => Link::Weak(w.clone()),
        }
    }
}

impl<T> Link<T> {
    fn new(inner: T) -> Self {
        Link::Strong(Arc::new(RwLock::new(inner)))
    }

    fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        match self {
            Link::Strong(a) => Some(f(&a.read())),
            Link::Weak(w) => w.upgrade().map(|a| f(&a.read())),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        match self {
            Link::Strong(a) => Some(f(&mut a.write())),
            Link::Weak(w) => w.upgrade().map(|a| f(&mut a.write())),
        }
    }

    fn strong(&self) -> Option<Self> {
        match self {
            Link::Strong(a) => Some(Link::Strong(a.clone())),
            Link::Weak(w) => w.upgrade().map(Link::Strong),
        }
    }

    fn downgrade(&self) -> Self {
        match self {
            Link::Strong(a) => Link::Weak(Arc::downgrade(a)),
            Link::Weak(w) => Link::Weak(w.clone()),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            Link::Strong(_) => true,
            Link::Weak(w) => w.strong_count() > 0,
        }
    }

    fn as_ptr(&self) -> *const RwLock<T> {
        match self {
            Link::Strong(a) => Arc::as_ptr(a),
            Link::Weak(w) => w.as_ptr(),
        }
    }
}

/// Shared array handle.
#[derive(Clone)]
pub struct Array(Link<Vec<Value>>);

impl Default for Array {
    fn default() -> Self {
        Self::from_vec(Vec::new())
    }
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Link::new(items))
    }

    pub fn len(&self) -> usize {
        self.0.read(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a clone of the element at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0
            .read(|items| items.get(index).cloned())
            .flatten()
            .map(Value::attached)
    }

    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.0.write(|items| items.push(value));
    }

    pub fn pop(&self) -> Option<Value> {
        self.0.write(Vec::pop).flatten().map(Value::attached)
    }

    /// Set the element at `index`, growing the array with `Undefined` holes
    /// when the index is past the end.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        self.0.write(|items| {
            if index >= items.len() {
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value;
        });
    }

    /// Snapshot of the elements (container elements stay shared).
    pub fn to_vec(&self) -> Vec<Value> {
        self.0
            .read(|items| items.clone())
            .unwrap_or_default()
            .into_iter()
            .map(Value::attached)
            .collect()
    }

    /// A handle that does not keep the array alive.
    pub fn downgrade(&self) -> Array {
        Self(self.0.downgrade())
    }

    /// Strong handle to the same array, unless it has been freed.
    pub fn strong(&self) -> Option<Array> {
        self.0.strong().map(Self)
    }

    /// False once a weak handle's array has been freed.
    pub fn is_alive(&self) -> bool {
        self.0.is_alive()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr())
    }

    pub(crate) fn identity(&self) -> usize {
        self.0.as_ptr() as *const () as usize
    }
}

impl fmt::Debug for Array {
    // Shallow on purpose: the graph may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array(len={}, @{:#x})", self.len(), self.identity())
    }
}

/// Shared object handle. Keys are kept sorted.
#[derive(Clone)]
pub struct Object(Link<BTreeMap<String, Value>>);

impl Default for Object {
    fn default() -> Self {
        Self::from_map(BTreeMap::new())
    }
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(Link::new(map))
    }

    pub fn len(&self) -> usize {
        self.0.read(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0
            .read(|map| map.get(key).cloned())
            .flatten()
            .map(Value::attached)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.read(|map| map.contains_key(key)).unwrap_or(false)
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let (key, value) = (key.into(), value.into());
        self.0
            .write(|map| map.insert(key, value))
            .flatten()
            .map(Value::attached)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0
            .write(|map| map.remove(key))
            .flatten()
            .map(Value::attached)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0
            .read(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the entries (container values stay shared).
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .read(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.attached()))
            .collect()
    }

    /// A handle that does not keep the object alive.
    pub fn downgrade(&self) -> Object {
        Self(self.0.downgrade())
    }

    /// Strong handle to the same object, unless it has been freed.
    pub fn strong(&self) -> Option<Object> {
        self.0.strong().map(Self)
    }

    /// False once a weak handle's object has been freed.
    pub fn is_alive(&self) -> bool {
        self.0.is_alive()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr())
    }

    pub(crate) fn identity(&self) -> usize {
        self.0.as_ptr() as *const () as usize
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object(keys={:?}, @{:#x})", self.keys(), self.identity())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite numbers have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<Url> for Value {
    fn from(u: Url) -> Self {
        Value::Uri(u)
    }
}

impl From<UriComponents> for Value {
    fn from(u: UriComponents) -> Self {
        Value::ForeignUri(u)
    }
}

impl From<Range> for Value {
    fn from(r: Range) -> Self {
        Value::Range(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Undefined, Into::into)
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::array(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_clone_shares_identity() {
        let obj = Object::new();
        let a = Value::from(obj.clone());
        let b = a.clone();

        assert!(a.ptr_eq(&b));
        obj.insert("k", 1);
        assert_eq!(b.get("k").as_i64(), Some(1));
    }

    #[test]
    fn test_structurally_equal_objects_are_distinct() {
        let a = Value::object();
        let b = Value::object();
        assert!(!a.ptr_eq(&b));
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_self_reference() {
        let obj = Object::new();
        obj.insert("self", obj.clone());

        let value = Value::from(obj);
        assert!(value.get("self").ptr_eq(&value));
        assert!(value.get("self").get("self").ptr_eq(&value));
    }

    #[test]
    fn test_missing_members_are_undefined() {
        let value = Value::object();
        assert!(value.get("nope").is_undefined());
        assert!(Value::from("x").get("nope").is_undefined());
        assert!(Value::array(vec![]).index(3).is_undefined());
    }

    #[test]
    fn test_array_set_grows_with_holes() {
        let arr = Array::new();
        arr.set(2, "c");
        assert_eq!(arr.len(), 3);
        assert!(arr.get(0).unwrap().is_undefined());
        assert_eq!(arr.get(2).unwrap().as_str(), Some("c"));
    }

    #[test]
    fn test_non_finite_float_is_null() {
        assert!(Value::from(f64::NAN).is_null());
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
    }

    #[test]
    fn test_option_none_is_undefined() {
        let v: Value = Option::<&str>::None.into();
        assert!(v.is_undefined());
    }

    #[test]
    fn test_weak_slot_reads_strong() {
        let obj = Object::new();
        obj.insert("self", Value::from(obj.clone()).downgrade());

        let value = Value::from(obj.clone());
        let read = value.get("self");
        assert!(read.ptr_eq(&value));
        assert!(read.as_object().unwrap().is_alive());

        let weak = obj.downgrade();
        drop((obj, value, read));
        assert!(!weak.is_alive());
        assert!(weak.get("self").is_none());
        assert_eq!(weak.len(), 0);
    }

    #[test]
    fn test_dead_weak_element_reads_undefined() {
        let arr = Array::new();
        {
            let gone = Object::new();
            arr.push(Value::from(gone).downgrade());
        }
        assert!(arr.get(0).unwrap().is_undefined());
        assert!(arr.to_vec()[0].is_undefined());
    }

    #[test]
    fn test_debug_on_cycle_terminates() {
        let obj = Object::new();
        obj.insert("self", obj.clone());
        let text = format!("{:?}", Value::from(obj));
        assert!(text.starts_with("Object(keys=[\"self\"]"));
    }
}
