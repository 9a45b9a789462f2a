//! RPC message shapes, builders and parser.
//!
//! Every message is one compact JSON object. The `type` discriminant is a
//! fixed small integer that both endpoints must agree on:
//!
//! ```text
//! Request   {"hostID"?,"type":1,"id","proxyId","method","args":[..]}
//! Reply     {"hostID"?,"type":2,"id","res"?}
//! ReplyErr  {"hostID"?,"type":3,"id","err":{..}|null}
//! Cancel    {"hostID"?,"type":4,"id"}
//! ```
//!
//! A `{"setHostID": ..}` announcement may precede them; it is not a protocol
//! message and is surfaced as [`RpcMessage::SetHostId`].

use serde::{Deserialize, Serialize};

use crate::codec::{self, Object, Value};
use crate::error::{Result, RpcError};

/// Argument appended to a request whose caller attached a cancellation token.
pub const CANCELLATION_TOKEN_MARKER: &str = "add.cancellation.token";

/// Message type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Reply = 2,
    ReplyErr = 3,
    Cancel = 4,
}

impl MessageType {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Reply),
            3 => Some(Self::ReplyErr),
            4 => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// Structured form of a real error crossing the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    #[serde(rename = "$isError")]
    is_error: bool,
    pub name: String,
    pub message: String,
    pub stack: String,
}

impl SerializedError {
    /// Create an error record. The stack defaults to `"{name}: {message}"`.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        let stack = format!("{}: {}", name, message);
        Self {
            is_error: true,
            name,
            message,
            stack,
        }
    }

    /// Replace the stack text.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    /// Convert any Rust error. The source chain is folded into the stack.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = format!("Error: {}", error);
        let mut source = error.source();
        while let Some(cause) = source {
            stack.push_str(&format!("\n    caused by: {}", cause));
            source = cause.source();
        }
        Self::new("Error", error.to_string()).with_stack(stack)
    }

    /// Read an error record out of a decoded `err` field.
    ///
    /// Only objects flagged `$isError: true` qualify; anything else is `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.get("$isError").and_then(|v| v.as_bool()) != Some(true) {
            return None;
        }
        let field = |name: &str| {
            object
                .get(name)
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        };
        Some(Self {
            is_error: true,
            name: field("name"),
            message: field("message"),
            stack: field("stack"),
        })
    }
}

impl std::fmt::Display for SerializedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Builders for outgoing message text.
pub struct MessageFactory;

impl MessageFactory {
    /// `{"setHostID": id}` announcement.
    pub fn set_host_id(host_id: &str) -> String {
        format!(r#"{{"setHostID":{}}}"#, quote(host_id))
    }

    pub fn cancel(req: &str, host_id: Option<&str>) -> String {
        format!(
            r#"{{{}"type":{},"id":{}}}"#,
            prefix(host_id),
            MessageType::Cancel as u8,
            quote(req)
        )
    }

    /// Request with `args` decycled relative to `$["args"]`.
    pub fn request(
        req: &str,
        proxy_id: &str,
        method: &str,
        args: &[Value],
        host_id: Option<&str>,
    ) -> Result<String> {
        let args = codec::encode_at(&Value::array(args.to_vec()), r#"["args"]"#)?;
        Ok(format!(
            r#"{{{}"type":{},"id":{},"proxyId":{},"method":{},"args":{}}}"#,
            prefix(host_id),
            MessageType::Request as u8,
            quote(req),
            quote(proxy_id),
            quote(method),
            args
        ))
    }

    /// Reply; `res` is omitted entirely when it is `Undefined`.
    pub fn reply_ok(req: &str, res: &Value, host_id: Option<&str>) -> Result<String> {
        if res.is_undefined() {
            return Ok(format!(
                r#"{{{}"type":{},"id":{}}}"#,
                prefix(host_id),
                MessageType::Reply as u8,
                quote(req)
            ));
        }
        let res = codec::encode_at(res, r#"["res"]"#)?;
        Ok(format!(
            r#"{{{}"type":{},"id":{},"res":{}}}"#,
            prefix(host_id),
            MessageType::Reply as u8,
            quote(req),
            res
        ))
    }

    /// Error reply; `None` is sent as `"err":null`.
    pub fn reply_err(req: &str, err: Option<&SerializedError>, host_id: Option<&str>) -> Result<String> {
        let err = match err {
            Some(err) => serde_json::to_string(err)?,
            None => "null".to_string(),
        };
        Ok(format!(
            r#"{{{}"type":{},"id":{},"err":{}}}"#,
            prefix(host_id),
            MessageType::ReplyErr as u8,
            quote(req),
            err
        ))
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn prefix(host_id: Option<&str>) -> String {
    match host_id {
        Some(id) if !id.is_empty() => format!(r#""hostID":{},"#, quote(id)),
        _ => String::new(),
    }
}

#[derive(Debug)]
pub struct RequestMessage {
    pub host_id: Option<String>,
    pub id: String,
    pub proxy_id: String,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Debug)]
pub struct ReplyMessage {
    pub host_id: Option<String>,
    pub id: String,
    /// `Undefined` when the message carried no `res`.
    pub res: Value,
}

#[derive(Debug)]
pub struct ReplyErrMessage {
    pub host_id: Option<String>,
    pub id: String,
    /// `None` for `null` and for anything that is not an error record.
    pub err: Option<SerializedError>,
}

#[derive(Debug)]
pub struct CancelMessage {
    pub host_id: Option<String>,
    pub id: String,
}

/// A decoded inbound message.
#[derive(Debug)]
pub enum RpcMessage {
    SetHostId(String),
    Request(RequestMessage),
    Reply(ReplyMessage),
    ReplyErr(ReplyErrMessage),
    Cancel(CancelMessage),
    /// A `type` this endpoint does not know; ignored by the engine.
    Unknown {
        host_id: Option<String>,
        kind: Option<u64>,
    },
}

impl RpcMessage {
    /// Decode one message. Cycles are restored against the message root.
    pub fn parse(raw: &str) -> Result<Self> {
        let root = codec::decode(raw)?;
        let object = root
            .as_object()
            .ok_or_else(|| RpcError::Protocol(format!("message is a {}, not an object", root.kind())))?;

        if let Some(id) = non_empty_string(object, "setHostID") {
            return Ok(RpcMessage::SetHostId(id));
        }

        let host_id = non_empty_string(object, "hostID");
        let kind = object.get("type").and_then(|v| v.as_u64());
        let Some(message_type) = kind.and_then(MessageType::from_u64) else {
            return Ok(RpcMessage::Unknown { host_id, kind });
        };
        let id = required_string(object, "id")?;

        let message = match message_type {
            MessageType::Request => {
                let args = object
                    .get("args")
                    .and_then(|v| v.as_array().map(|a| a.to_vec()))
                    .ok_or_else(|| RpcError::Protocol("request without args array".to_string()))?;
                RpcMessage::Request(RequestMessage {
                    host_id,
                    id,
                    proxy_id: required_string(object, "proxyId")?,
                    method: required_string(object, "method")?,
                    args,
                })
            }
            MessageType::Reply => RpcMessage::Reply(ReplyMessage {
                host_id,
                id,
                res: object.get("res").unwrap_or_default(),
            }),
            MessageType::ReplyErr => RpcMessage::ReplyErr(ReplyErrMessage {
                host_id,
                id,
                err: object.get("err").as_ref().and_then(SerializedError::from_value),
            }),
            MessageType::Cancel => RpcMessage::Cancel(CancelMessage { host_id, id }),
        };
        Ok(message)
    }

    /// Routing tag declared by the sender, if any.
    pub fn host_id(&self) -> Option<&str> {
        match self {
            RpcMessage::SetHostId(_) => None,
            RpcMessage::Request(m) => m.host_id.as_deref(),
            RpcMessage::Reply(m) => m.host_id.as_deref(),
            RpcMessage::ReplyErr(m) => m.host_id.as_deref(),
            RpcMessage::Cancel(m) => m.host_id.as_deref(),
            RpcMessage::Unknown { host_id, .. } => host_id.as_deref(),
        }
    }
}

fn non_empty_string(object: &Object, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty())
}

fn required_string(object: &Object, key: &str) -> Result<String> {
    object
        .get(key)
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| RpcError::Protocol(format!("missing string field {:?}", key)))
}
