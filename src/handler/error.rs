//! Failure outcomes of local handlers.

use std::any::Any;

use crate::codec::Value;
use crate::error::RpcError;
use crate::protocol::SerializedError;

/// What a handler fails with.
///
/// `Error` is a real error and crosses the wire as a structured record.
/// `Value` is any other rejection; the payload is not transferred and the
/// caller sees an empty rejection.
#[derive(Debug)]
pub enum HandlerError {
    Error(SerializedError),
    Value(Value),
}

impl HandlerError {
    /// Structured error with the given name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Error(SerializedError::new(name, message))
    }

    /// Plain `Error` with a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    /// The cancellation error, as raised by a handler that observed its token.
    pub fn canceled() -> Self {
        Self::new("Canceled", "Canceled")
    }

    /// Reject with a non-error value.
    pub fn reject(value: impl Into<Value>) -> Self {
        HandlerError::Value(value.into())
    }

    /// Convert a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::new("Error", message)
    }

    /// The record to send back, `None` for non-error rejections.
    pub fn into_serialized(self) -> Option<SerializedError> {
        match self {
            HandlerError::Error(err) => Some(err),
            HandlerError::Value(_) => None,
        }
    }
}

impl From<SerializedError> for HandlerError {
    fn from(err: SerializedError) -> Self {
        HandlerError::Error(err)
    }
}

impl From<RpcError> for HandlerError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Canceled => Self::canceled(),
            RpcError::Remote(err) => HandlerError::Error(err),
            RpcError::Rejected => HandlerError::Value(Value::Undefined),
            other => HandlerError::Error(SerializedError::from_error(&other)),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Error(SerializedError::from_error(&err))
    }
}
