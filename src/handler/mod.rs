//! Handler module - local actors and call dispatch.
//!
//! Provides:
//! - [`Actor`] - maps method names to handlers
//! - [`CallContext`] - call metadata and the caller's cancellation token
//! - [`HandlerError`] - structured error or opaque rejection
//!
//! # Example
//!
//! ```ignore
//! use plugin_rpc::handler::{Actor, HandlerError};
//!
//! let actor = Actor::new()
//!     .method("$echo", |args, _ctx| async move { Ok(args[0].clone()) })
//!     .typed_method("$divide", |(a, b): (f64, f64), _ctx| async move {
//!         if b == 0.0 {
//!             return Err(HandlerError::new("RangeError", "division by zero"));
//!         }
//!         Ok(a / b)
//!     });
//! ```

mod actor;
mod context;
mod error;

pub use actor::{Actor, Handler, HandlerResult, RawHandler, TypedHandler};
pub use context::CallContext;
pub use error::HandlerError;
pub use futures::future::BoxFuture;
