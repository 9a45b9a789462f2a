//! # plugin-rpc
//!
//! Cross-process RPC between a main process and a plugin host.
//!
//! Each side runs an [`RpcProtocol`] over a message connection. Local
//! actors are registered with [`RpcProtocol::set`]; remote actors are
//! reached through a [`Proxy`] obtained from [`RpcProtocol::get_proxy`].
//!
//! ## Architecture
//!
//! - **Codec**: JSON with cycle-safe `$ref` markers and `$type` envelopes
//!   for URIs and ranges
//! - **Protocol**: Request / Reply / ReplyErr / Cancel messages
//! - **Multiplexer**: messages of one scheduler tick go out as one batch
//! - **Transport**: in-memory channels or length-prefixed byte streams
//!
//! ## Example
//!
//! ```ignore
//! use plugin_rpc::transport::channel_pair;
//! use plugin_rpc::{Actor, ProxyIdentifier, RpcProtocol};
//!
//! const ECHO: ProxyIdentifier = ProxyIdentifier::new(false, "echo");
//!
//! #[tokio::main]
//! async fn main() -> plugin_rpc::Result<()> {
//!     let (left, right) = channel_pair();
//!     let _server = RpcProtocol::builder()
//!         .actor(&ECHO, Actor::new().method("$ping", |args, _ctx| async move {
//!             Ok(args[0].clone())
//!         }))
//!         .start(left);
//!     let client = RpcProtocol::new(right);
//!
//!     let reply = client.get_proxy(&ECHO).call("$ping", vec!["hello".into()]).await?;
//!     assert_eq!(reply.as_str(), Some("hello"));
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod contracts;
pub mod error;
pub mod handler;
pub mod identifiers;
pub mod multiplexer;
pub mod protocol;
pub mod proxy;
pub mod transport;

mod rpc;

pub use codec::Value;
pub use error::{Result, RpcError};
pub use handler::{Actor, CallContext, HandlerError};
pub use protocol::SerializedError;
pub use proxy::{create_proxy_identifier, Proxy, ProxyIdentifier, RemoteMethod};
pub use rpc::{RpcConfig, RpcProtocol, RpcProtocolBuilder};
pub use tokio_util::sync::CancellationToken;
