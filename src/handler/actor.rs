//! Local actors: method tables the remote side can call into.
//!
//! # Example
//!
//! ```ignore
//! use plugin_rpc::handler::Actor;
//!
//! let actor = Actor::new()
//!     .method("$ping", |args, _ctx| async move { Ok(args[0].clone()) })
//!     .typed_method("$add", |(a, b): (i64, i64), _ctx| async move { Ok(a + b) });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CallContext, HandlerError};
use crate::codec::Value;
use crate::protocol::SerializedError;

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle a call with its decoded argument list.
    fn call(&self, args: Vec<Value>, ctx: CallContext) -> BoxFuture<'static, HandlerResult>;
}

/// Handler working directly on [`Value`] arguments.
pub struct RawHandler<F> {
    handler: F,
}

impl<F> RawHandler<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Handler for RawHandler<F>
where
    F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, args: Vec<Value>, ctx: CallContext) -> BoxFuture<'static, HandlerResult> {
        (self.handler)(args, ctx).boxed()
    }
}

/// Wrapper that deserializes the argument list before calling the handler
/// and serializes its result afterwards.
///
/// Arguments are read as one JSON array, so `T` is usually a tuple. A result
/// that serializes to `null` is sent as an absent result.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T, CallContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(T, CallContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T, CallContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
{
    fn call(&self, args: Vec<Value>, ctx: CallContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_value(Value::array(args).to_json()) {
            Ok(v) => v,
            Err(e) => {
                let err = SerializedError::new(
                    "TypeError",
                    format!("invalid arguments for {}: {}", ctx.method(), e),
                );
                return futures::future::ready(Err(err.into())).boxed();
            }
        };

        let fut = (self.handler)(parsed, ctx);
        async move { into_value(fut.await) }.boxed()
    }
}

fn into_value<R: Serialize>(result: std::result::Result<R, HandlerError>) -> HandlerResult {
    let json = serde_json::to_value(result?)?;
    Ok(match json {
        serde_json::Value::Null => Value::Undefined,
        other => Value::from_json(other),
    })
}

/// A local object whose `$`-methods can be invoked remotely.
#[derive(Default)]
pub struct Actor {
    methods: HashMap<String, Arc<dyn Handler>>,
}

impl Actor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw method handler.
    pub fn method<F, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(name, RawHandler::new(handler))
    }

    /// Register a method whose arguments and result go through serde.
    pub fn typed_method<F, T, R, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(T, CallContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
    {
        self.register(name, TypedHandler::new(handler))
    }

    /// Register any [`Handler`] implementation. Replaces an earlier one.
    pub fn register(mut self, name: &str, handler: impl Handler) -> Self {
        self.methods.insert(name.to_string(), Arc::new(handler));
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Start a method invocation.
    ///
    /// Returns `None` when the method does not exist. The returned future
    /// never panics: a panic in the handler, synchronous or not, becomes a
    /// structured error.
    pub fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        ctx: CallContext,
    ) -> Option<BoxFuture<'static, HandlerResult>> {
        let handler = self.methods.get(method)?.clone();
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(args, ctx)));
        let fut = match started {
            Ok(fut) => fut,
            Err(payload) => {
                return Some(futures::future::ready(Err(HandlerError::from_panic(payload))).boxed())
            }
        };
        Some(
            AssertUnwindSafe(fut)
                .catch_unwind()
                .map(|outcome| outcome.unwrap_or_else(|payload| Err(HandlerError::from_panic(payload))))
                .boxed(),
        )
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("methods", &self.method_names())
            .finish()
    }
}
