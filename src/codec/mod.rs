//! Codec module - cycle-safe transfer of payload values.
//!
//! This module turns rich payloads into JSON text and back:
//!
//! - [`Value`] - shared, possibly cyclic payload graph
//! - [`decycle`] / [`retrocycle`] - `{"$ref": PATH}` markers for repeated containers
//! - [`encode`] / [`decode`] - full pipeline with [`SerializedObject`] envelopes
//!   for domain URIs, foreign URIs and ranges
//! - [`UriComponents`] - component form of foreign URIs
//!
//! # Design
//!
//! The codec is stateless: visited-tracking lives inside one traversal and
//! keys on container identity, never on structural equality.
//!
//! # Example
//!
//! ```
//! use plugin_rpc::codec::{decode, encode, Object, Value};
//!
//! let node = Object::new();
//! node.insert("self", node.clone());
//!
//! let text = encode(&Value::from(node)).unwrap();
//! assert_eq!(text, r#"{"self":{"$ref":"$"}}"#);
//!
//! let back = decode(&text).unwrap();
//! assert!(back.get("self").ptr_eq(&back));
//! ```

mod decycle;
mod transfer;
mod uri;
mod value;

pub use decycle::{decycle, retrocycle, Replacer, REF_KEY};
pub use transfer::{
    decode, encode, encode_at, replacer, revive, SerializedObject, SerializedObjectType,
};
pub use uri::{UriComponents, URI_MARSHAL_ID};
pub use value::{Array, Object, Value};
