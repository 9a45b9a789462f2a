//! Proxy identifiers and remote stand-ins.
//!
//! A [`Proxy`] is the local stand-in for an actor registered on the peer.
//! Methods are addressed by name; only names starting with `$` are
//! callable remotely, everything else yields no stub. Stubs are built on
//! first use and cached per proxy.
//!
//! # Example
//!
//! ```ignore
//! let echo = protocol.get_proxy(&ECHO);
//! let ping = echo.method("$ping").expect("dollar methods are callable");
//! let reply = ping.call(vec!["hello".into()]).await?;
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::codec::Value;
use crate::error::{Result, RpcError};
use crate::rpc::Shared;

/// First character of every remotely callable method name.
pub const CALL_METHOD_PREFIX: char = '$';

/// Globally unique key shared by both sides of a contract.
///
/// Equality and hashing consider the id only.
#[derive(Clone)]
pub struct ProxyIdentifier {
    is_main: bool,
    id: Cow<'static, str>,
}

impl ProxyIdentifier {
    pub const fn new(is_main: bool, id: &'static str) -> Self {
        Self {
            is_main,
            id: Cow::Borrowed(id),
        }
    }

    /// Identifier built at runtime, e.g. from configuration.
    pub fn from_string(is_main: bool, id: impl Into<String>) -> Self {
        Self {
            is_main,
            id: Cow::Owned(id.into()),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True for actors implemented on the main side.
    #[inline]
    pub fn is_main(&self) -> bool {
        self.is_main
    }
}

/// Identifier for an actor implemented on the extension side.
pub const fn create_proxy_identifier(id: &'static str) -> ProxyIdentifier {
    ProxyIdentifier::new(false, id)
}

impl PartialEq for ProxyIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProxyIdentifier {}

impl Hash for ProxyIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ProxyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyIdentifier")
            .field("id", &self.id)
            .field("is_main", &self.is_main)
            .finish()
    }
}

impl fmt::Display for ProxyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Local stand-in for a remote actor. Cheap to clone.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    proxy_id: String,
    engine: Weak<Shared>,
    stubs: Mutex<HashMap<String, RemoteMethod>>,
}

impl Proxy {
    pub(crate) fn new(proxy_id: &str, engine: Weak<Shared>) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                proxy_id: proxy_id.to_string(),
                engine,
                stubs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn proxy_id(&self) -> &str {
        &self.inner.proxy_id
    }

    /// Stub for `name`, or `None` when the name is not a call method.
    pub fn method(&self, name: &str) -> Option<RemoteMethod> {
        if !name.starts_with(CALL_METHOD_PREFIX) {
            return None;
        }
        let mut stubs = self.inner.stubs.lock();
        let stub = stubs.entry(name.to_string()).or_insert_with(|| RemoteMethod {
            proxy_id: self.inner.proxy_id.clone(),
            method: name.to_string(),
            engine: self.inner.engine.clone(),
        });
        Some(stub.clone())
    }

    /// Call `name` with `args`.
    ///
    /// A name without the `$` prefix fails with a protocol error and sends
    /// nothing.
    pub fn call(&self, name: &str, args: Vec<Value>) -> impl Future<Output = Result<Value>> + Send + 'static {
        let started = match self.method(name) {
            Some(stub) => stub.start(args, None),
            None => Err(RpcError::Protocol(format!(
                "{} is not a callable method of {}",
                name, self.inner.proxy_id
            ))),
        };
        settle(started)
    }

    /// Same as [`Proxy::call`] with a cancellation token attached.
    pub fn call_with_token(
        &self,
        name: &str,
        args: Vec<Value>,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        let started = match self.method(name) {
            Some(stub) => stub.start(args, Some(token)),
            None => Err(RpcError::Protocol(format!(
                "{} is not a callable method of {}",
                name, self.inner.proxy_id
            ))),
        };
        settle(started)
    }

    /// True when both handles refer to the same cached proxy.
    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("proxy_id", &self.inner.proxy_id)
            .finish()
    }
}

/// A bound remote method.
///
/// The request is sent when `call*` is invoked, not when the returned
/// future is first polled.
#[derive(Clone)]
pub struct RemoteMethod {
    proxy_id: String,
    method: String,
    engine: Weak<Shared>,
}

impl RemoteMethod {
    pub fn name(&self) -> &str {
        &self.method
    }

    pub fn proxy_id(&self) -> &str {
        &self.proxy_id
    }

    pub fn call(&self, args: Vec<Value>) -> impl Future<Output = Result<Value>> + Send + 'static {
        settle(self.start(args, None))
    }

    /// Call with a cancellation token.
    ///
    /// An already cancelled token fails with [`RpcError::Canceled`] without
    /// sending. Cancelling later sends one cancel message to the peer; the
    /// call itself still settles with whatever the peer replies.
    pub fn call_with_token(
        &self,
        args: Vec<Value>,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        settle(self.start(args, Some(token)))
    }

    /// Call and deserialize the result. An absent result reads as `null`.
    pub fn call_as<R>(&self, args: Vec<Value>) -> impl Future<Output = Result<R>> + Send + 'static
    where
        R: DeserializeOwned + 'static,
    {
        let reply = self.call(args);
        async move { Ok(serde_json::from_value(reply.await?.to_json())?) }
    }

    fn start(
        &self,
        args: Vec<Value>,
        token: Option<&CancellationToken>,
    ) -> Result<tokio::sync::oneshot::Receiver<Result<Value>>> {
        let Some(engine) = self.engine.upgrade() else {
            return Err(RpcError::Canceled);
        };
        engine.remote_call(&self.proxy_id, &self.method, args, token)
    }
}

impl fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteMethod({}.{})", self.proxy_id, self.method)
    }
}

fn settle(
    started: Result<tokio::sync::oneshot::Receiver<Result<Value>>>,
) -> impl Future<Output = Result<Value>> + Send + 'static {
    async move {
        match started {
            Ok(reply) => reply.await.unwrap_or(Err(RpcError::ConnectionClosed)),
            Err(e) => Err(e),
        }
    }
}
