//! Object transfer over the RPC channel.
//!
//! A few kinds of values are rebuilt on the receiving side as real objects
//! instead of plain records. On the way out they are replaced by a
//! [`SerializedObject`] envelope:
//!
//! ```text
//! {"$type": 0, "data": "file:///a.txt"}                       domain URI
//! {"$type": 1, "data": "untitled:Untitled-1"}                 foreign URI
//! {"$type": 2, "data": "{\"start\":{..},\"end\":{..}}"}       range
//! ```
//!
//! On the way in every object carrying both `$type` and `data` with a known
//! discriminant is revived into the corresponding [`Value`] variant. Unknown
//! discriminants pass through untouched.

use lsp_types::{Position, Range, Url};
use serde::{Deserialize, Serialize};

use super::decycle::{decycle, retrocycle};
use super::uri::UriComponents;
use super::value::{Object, Value};
use crate::error::{Result, RpcError};

/// Discriminant of a [`SerializedObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SerializedObjectType {
    DomainUri = 0,
    ForeignUri = 1,
    Range = 2,
}

impl SerializedObjectType {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::DomainUri),
            1 => Some(Self::ForeignUri),
            2 => Some(Self::Range),
            _ => None,
        }
    }
}

/// Wire envelope for a recognized value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedObject {
    #[serde(rename = "$type")]
    pub kind: u8,
    pub data: String,
}

impl SerializedObject {
    pub fn new(kind: SerializedObjectType, data: String) -> Self {
        Self {
            kind: kind as u8,
            data,
        }
    }

    fn into_json(self) -> serde_json::Value {
        serde_json::json!({ "$type": self.kind, "data": self.data })
    }
}

/// Replace recognized values by their envelope.
///
/// Plain objects are recognized by shape: `{start, end}` with unsigned
/// `line`/`character` positions is a range, and a record tagged `$mid: 1`
/// is a foreign URI.
pub fn replacer(value: &Value) -> Option<serde_json::Value> {
    let envelope = match value {
        Value::Uri(uri) => SerializedObject::new(SerializedObjectType::DomainUri, uri.to_string()),
        Value::ForeignUri(uri) => {
            SerializedObject::new(SerializedObjectType::ForeignUri, uri.to_string())
        }
        Value::Range(range) => range_envelope(range)?,
        Value::Object(object) => match range_from_object(object) {
            Some(range) => range_envelope(&range)?,
            None => {
                let uri = UriComponents::from_object(object)?;
                SerializedObject::new(SerializedObjectType::ForeignUri, uri.to_string())
            }
        },
        _ => return None,
    };
    Some(envelope.into_json())
}

fn range_envelope(range: &Range) -> Option<SerializedObject> {
    let data = serde_json::to_string(range).ok()?;
    Some(SerializedObject::new(SerializedObjectType::Range, data))
}

/// Read a range out of a plain `{start, end}` object.
///
/// Extra members are allowed and dropped.
fn range_from_object(object: &Object) -> Option<Range> {
    let start = position_from_value(&object.get("start")?)?;
    let end = position_from_value(&object.get("end")?)?;
    Some(Range::new(start, end))
}

fn position_from_value(value: &Value) -> Option<Position> {
    let object = value.as_object()?;
    let line = unsigned_integer(&object.get("line")?)?;
    let character = unsigned_integer(&object.get("character")?)?;
    Some(Position::new(line, character))
}

/// Integer in `0..=i32::MAX`, the LSP `uinteger` range.
fn unsigned_integer(value: &Value) -> Option<u32> {
    let n = u32::try_from(value.as_u64()?).ok()?;
    (n <= i32::MAX as u32).then_some(n)
}

/// Rebuild a value tree from parsed JSON, reviving envelopes bottom-up.
pub fn revive(json: serde_json::Value) -> Result<Value> {
    match json {
        serde_json::Value::Array(items) => Ok(Value::array(
            items.into_iter().map(revive).collect::<Result<Vec<_>>>()?,
        )),
        serde_json::Value::Object(map) => {
            let object = Object::new();
            for (key, member) in map {
                object.insert(key, revive(member)?);
            }
            revive_envelope(object)
        }
        other => Ok(Value::from_json(other)),
    }
}

fn revive_envelope(object: Object) -> Result<Value> {
    let (Some(kind), Some(data)) = (object.get("$type"), object.get("data")) else {
        return Ok(Value::Object(object));
    };
    let Some(kind) = kind.as_u64().and_then(SerializedObjectType::from_u64) else {
        return Ok(Value::Object(object));
    };
    let data = data
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("{:?} envelope without string data", kind)))?;

    let value = match kind {
        SerializedObjectType::DomainUri => Value::Uri(
            Url::parse(data).map_err(|e| RpcError::Decode(format!("invalid URI {data:?}: {e}")))?,
        ),
        SerializedObjectType::ForeignUri => Value::ForeignUri(UriComponents::parse(data)),
        SerializedObjectType::Range => {
            let range: Range = serde_json::from_str(data)
                .map_err(|e| RpcError::Decode(format!("invalid range {data:?}: {e}")))?;
            Value::Range(range)
        }
    };
    Ok(value)
}

/// Encode a value as JSON text, decycled and with envelopes applied.
pub fn encode(value: &Value) -> Result<String> {
    encode_at(value, "")
}

/// Like [`encode`], for a value that will be embedded at `base_path`
/// (e.g. `["args"]`) inside a larger message.
pub fn encode_at(value: &Value, base_path: &str) -> Result<String> {
    Ok(serde_json::to_string(&decycle(value, base_path, &replacer))?)
}

/// Decode JSON text: parse, revive envelopes, then restore cycles against
/// the decoded root.
pub fn decode(text: &str) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Ok(retrocycle(revive(json)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Position;
    use serde_json::json;

    #[test]
    fn test_domain_uri_round_trip() {
        let uri = Url::parse("file:///home/user/project/src/main.rs").unwrap();
        let text = encode(&Value::from(uri.clone())).unwrap();

        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            json!({"$type": 0, "data": "file:///home/user/project/src/main.rs"})
        );
        assert_eq!(decode(&text).unwrap().as_uri(), Some(&uri));
    }

    #[test]
    fn test_foreign_uri_round_trip() {
        let uri = UriComponents::parse("untitled:Untitled-1");
        let decoded = decode(&encode(&Value::from(uri.clone())).unwrap()).unwrap();

        assert_eq!(decoded.as_foreign_uri(), Some(&uri));
        assert_eq!(decoded.as_foreign_uri().unwrap().to_string(), "untitled:Untitled-1");
    }

    #[test]
    fn test_mid_record_is_enveloped() {
        let record = UriComponents::parse("file:///x.txt").to_object();
        let text = encode(&Value::from(record)).unwrap();
        let decoded = decode(&text).unwrap();

        assert_eq!(decoded.as_foreign_uri().unwrap().to_string(), "file:///x.txt");
    }

    #[test]
    fn test_range_round_trip() {
        let range = Range::new(Position::new(1, 2), Position::new(3, 4));
        let text = encode(&Value::from(range)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(json["$type"], 2);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(json["data"].as_str().unwrap()).unwrap(),
            json!({"start": {"line": 1, "character": 2}, "end": {"line": 3, "character": 4}})
        );
        assert_eq!(decode(&text).unwrap().as_range(), Some(&range));
    }

    #[test]
    fn test_range_shaped_object_is_enveloped() {
        let plain = Value::from_json(json!({
            "start": {"line": 1, "character": 2},
            "end": {"line": 3, "character": 4}
        }));
        let text = encode(&plain).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(json["$type"], 2);
        assert_eq!(
            decode(&text).unwrap().as_range(),
            Some(&Range::new(Position::new(1, 2), Position::new(3, 4)))
        );
    }

    #[test]
    fn test_near_ranges_stay_objects() {
        for shape in [
            json!({"start": {"line": 1, "character": 2}}),
            json!({"start": {"line": -1, "character": 0}, "end": {"line": 0, "character": 0}}),
            json!({"start": {"line": 1.5, "character": 0}, "end": {"line": 2, "character": 0}}),
            json!({"start": {"line": 1}, "end": {"line": 2, "character": 0}}),
        ] {
            let decoded = decode(&encode(&Value::from_json(shape.clone())).unwrap()).unwrap();
            assert!(decoded.as_object().is_some(), "{} was enveloped", shape);
        }
    }

    #[test]
    fn test_nested_domain_values() {
        let obj = Object::new();
        obj.insert("uri", Url::parse("https://example.org/a").unwrap());
        obj.insert("ranges", Value::array(vec![Range::default().into()]));

        let decoded = decode(&encode(&Value::from(obj)).unwrap()).unwrap();
        assert!(decoded.get("uri").as_uri().is_some());
        assert!(decoded.get("ranges").index(0).as_range().is_some());
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let decoded = decode(r#"{"$type": 9, "data": "x"}"#).unwrap();
        assert_eq!(decoded.get("$type").as_u64(), Some(9));
        assert_eq!(decoded.get("data").as_str(), Some("x"));
    }

    #[test]
    fn test_bad_envelope_is_an_error() {
        assert!(matches!(
            decode(r#"{"$type": 0, "data": "not a uri"}"#),
            Err(RpcError::Decode(_))
        ));
        assert!(matches!(
            decode(r#"{"$type": 2, "data": 5}"#),
            Err(RpcError::Decode(_))
        ));
    }

    #[test]
    fn test_cyclic_round_trip() {
        let obj = Object::new();
        obj.insert("name", "loop");
        obj.insert("self", obj.clone());

        let decoded = decode(&encode(&Value::from(obj.clone())).unwrap()).unwrap();
        assert!(decoded.get("self").ptr_eq(&decoded));
        assert!(!decoded.ptr_eq(&Value::from(obj)));
    }

    #[test]
    fn test_decoded_cycle_is_freed() {
        let text = r#"{"name":"loop","self":{"$ref":"$"},"items":[{"$ref":"$"}]}"#;
        let decoded = decode(text).unwrap();
        let weak = decoded.as_object().unwrap().downgrade();

        assert!(decoded.get("items").index(0).ptr_eq(&decoded));
        drop(decoded);
        assert!(!weak.is_alive());
    }

    #[test]
    fn test_malformed_text_is_an_error() {
        assert!(matches!(decode("{not json"), Err(RpcError::Json(_))));
    }
}
