//! Protocol module - message types, builders and parser.
//!
//! This module implements the RPC message layer on top of the codec:
//! - Request / Reply / ReplyErr / Cancel discriminants
//! - Text builders for outgoing messages
//! - Parser for incoming messages, including the `setHostID` announcement

mod message;

pub use message::{
    CancelMessage, MessageFactory, MessageType, ReplyErrMessage, ReplyMessage, RequestMessage,
    RpcMessage, SerializedError, CANCELLATION_TOKEN_MARKER,
};
