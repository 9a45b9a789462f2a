//! RPC protocol engine.
//!
//! One [`RpcProtocol`] runs per connection. It owns:
//! - the local actor table ([`RpcProtocol::set`])
//! - the proxy cache ([`RpcProtocol::get_proxy`])
//! - the call-id counter and the table of calls awaiting a reply
//! - the table of local invocations and their cancellation sources
//!
//! # Lifecycle
//!
//! 1. Split the connection into sink and source
//! 2. Spawn the multiplexer flush task over the sink
//! 3. Spawn the read loop over the source
//! 4. Dispatch every inbound message until the peer goes away
//!
//! # Example
//!
//! ```ignore
//! use plugin_rpc::{Actor, ProxyIdentifier, RpcProtocol};
//! use plugin_rpc::transport::channel_pair;
//!
//! const ECHO: ProxyIdentifier = ProxyIdentifier::new(false, "echo");
//!
//! let (left, right) = channel_pair();
//! let server = RpcProtocol::builder()
//!     .actor(&ECHO, Actor::new().method("$ping", |args, _ctx| async move { Ok(args[0].clone()) }))
//!     .start(left);
//! let client = RpcProtocol::new(right);
//!
//! let reply = client.get_proxy(&ECHO).call("$ping", vec!["hello".into()]).await?;
//! assert_eq!(reply.as_str(), Some("hello"));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::codec::Value;
use crate::error::{Result, RpcError};
use crate::handler::{Actor, CallContext, HandlerError, HandlerResult};
use crate::multiplexer::{read_loop, Multiplexer, DEFAULT_MAX_BATCH_SIZE};
use crate::protocol::{
    CancelMessage, MessageFactory, ReplyErrMessage, ReplyMessage, RequestMessage, RpcMessage,
    SerializedError, CANCELLATION_TOKEN_MARKER,
};
use crate::proxy::{Proxy, ProxyIdentifier};
use crate::transport::MessageConnection;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Host id expected from the peer.
    ///
    /// When set, it is announced to the peer first thing, and inbound
    /// messages declaring a different host id are dropped.
    pub remote_host_id: Option<String>,
    /// Maximum number of messages per outbound batch (at least 1).
    pub max_batch_size: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            remote_host_id: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// Builder for configuring and starting an engine.
pub struct RpcProtocolBuilder {
    config: RpcConfig,
    actors: Vec<(ProxyIdentifier, Arc<Actor>)>,
}

impl RpcProtocolBuilder {
    pub fn new() -> Self {
        Self {
            config: RpcConfig::default(),
            actors: Vec::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Expect and announce a peer host id.
    pub fn remote_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.config.remote_host_id = Some(host_id.into());
        self
    }

    /// Set the maximum batch size.
    ///
    /// Default: 1024. Values below 1 are raised to 1.
    pub fn max_batch_size(mut self, limit: usize) -> Self {
        self.config.max_batch_size = limit.max(1);
        self
    }

    /// Register a local actor before the first message can arrive.
    pub fn actor(mut self, identifier: &ProxyIdentifier, actor: impl Into<Arc<Actor>>) -> Self {
        self.actors.push((identifier.clone(), actor.into()));
        self
    }

    /// Start the engine over `connection`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<C: MessageConnection>(self, connection: C) -> RpcProtocol {
        RpcProtocol::start(self.config, self.actors, connection)
    }
}

impl Default for RpcProtocolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RpcProtocol {
    shared: Arc<Shared>,
}

impl RpcProtocol {
    pub fn builder() -> RpcProtocolBuilder {
        RpcProtocolBuilder::new()
    }

    /// Start an engine with the default configuration.
    pub fn new<C: MessageConnection>(connection: C) -> Self {
        RpcProtocolBuilder::new().start(connection)
    }

    fn start<C: MessageConnection>(
        config: RpcConfig,
        actors: Vec<(ProxyIdentifier, Arc<Actor>)>,
        connection: C,
    ) -> Self {
        let (sink, source) = connection.split();

        let announce = config
            .remote_host_id
            .as_deref()
            .map(MessageFactory::set_host_id);
        let (multiplexer, writer_task) =
            Multiplexer::spawn(sink, config.max_batch_size, announce);

        let (shutdown_tx, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        let locals = actors
            .into_iter()
            .map(|(identifier, actor)| (identifier.id().to_string(), actor))
            .collect();

        let shared = Arc::new_cyclic(|this| Shared {
            this: this.clone(),
            state: Mutex::new(State {
                locals,
                ..State::default()
            }),
            last_message_id: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            multiplexer,
            remote_host_id: config.remote_host_id,
            shutdown: shutdown.clone(),
        });

        // Writer task monitor
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = writer_task.await {
                error!("Writer task failed: {}", e);
            }
            writer_shutdown.send_replace(true);
        });

        // Read loop
        let engine = Arc::downgrade(&shared);
        tokio::spawn(async move {
            let result = read_loop(source, |raw| {
                let Some(shared) = engine.upgrade() else {
                    return;
                };
                if let Err(e) = shared.receive_one_message(&raw) {
                    warn!("Dropping undecodable message: {}", e);
                }
            })
            .await;

            match result {
                Ok(()) => debug!("Connection closed by peer"),
                Err(e) => error!("Read loop error: {}", e),
            }
            if let Some(shared) = engine.upgrade() {
                shared.fail_pending_calls();
            }
            shutdown.send_replace(true);
        });

        Self { shared }
    }

    /// Stand-in for the remote actor `identifier`, cached per id.
    pub fn get_proxy(&self, identifier: &ProxyIdentifier) -> Proxy {
        let mut state = self.shared.state.lock();
        state
            .proxies
            .entry(identifier.id().to_string())
            .or_insert_with(|| Proxy::new(identifier.id(), self.shared.this.clone()))
            .clone()
    }

    /// Register `actor` as the local implementation of `identifier`.
    ///
    /// Replaces an earlier registration. Returns the registered actor.
    pub fn set(&self, identifier: &ProxyIdentifier, actor: impl Into<Arc<Actor>>) -> Arc<Actor> {
        let actor = actor.into();
        self.shared
            .state
            .lock()
            .locals
            .insert(identifier.id().to_string(), actor.clone());
        actor
    }

    /// Feed one raw message, as if it had arrived on the connection.
    pub fn receive_message(&self, raw: &str) -> Result<()> {
        self.shared.receive_one_message(raw)
    }

    /// Stop sending and receiving.
    ///
    /// New calls fail with [`RpcError::Canceled`] and inbound messages are
    /// ignored. Calls already waiting for a reply are left pending.
    pub fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::AcqRel) {
            debug!("RPC protocol disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Calls sent and still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared.state.lock().pending_replies.len()
    }

    /// Local handler invocations still running.
    pub fn in_flight_invocations(&self) -> usize {
        self.shared.state.lock().invoked_handlers.len()
    }

    /// Outbound messages not yet handed to the transport.
    pub fn queued_messages(&self) -> usize {
        self.shared.multiplexer.pending_count()
    }

    pub fn remote_host_id(&self) -> Option<&str> {
        self.shared.remote_host_id.as_deref()
    }

    /// Wait until the connection is gone (peer closed or transport failed).
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shared.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for RpcProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcProtocol")
            .field("remote_host_id", &self.shared.remote_host_id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Engine state shared by the protocol handle, proxies and spawned tasks.
pub(crate) struct Shared {
    this: Weak<Shared>,
    state: Mutex<State>,
    last_message_id: AtomicU64,
    disposed: AtomicBool,
    multiplexer: Multiplexer,
    remote_host_id: Option<String>,
    shutdown: Arc<watch::Sender<bool>>,
}

#[derive(Default)]
struct State {
    locals: HashMap<String, Arc<Actor>>,
    proxies: HashMap<String, Proxy>,
    pending_replies: HashMap<String, PendingReply>,
    invoked_handlers: HashMap<String, JoinHandle<()>>,
    cancellation_sources: HashMap<String, CancellationToken>,
    /// Host id announced by the peer; tags every outbound message.
    message_to_send_host_id: Option<String>,
}

struct PendingReply {
    tx: oneshot::Sender<Result<Value>>,
    /// Fired on settlement to stop the cancel watcher, if any.
    settled: Option<CancellationToken>,
}

impl PendingReply {
    fn settle(self, result: Result<Value>) {
        if let Some(settled) = self.settled {
            settled.cancel();
        }
        // The caller may have dropped its future.
        let _ = self.tx.send(result);
    }
}

impl Shared {
    /// Send a request and register it as pending.
    ///
    /// Fails without sending when the engine is disposed or the token is
    /// already cancelled.
    pub(crate) fn remote_call(
        &self,
        proxy_id: &str,
        method: &str,
        mut args: Vec<Value>,
        token: Option<&CancellationToken>,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RpcError::Canceled);
        }
        if token.is_some_and(|t| t.is_cancelled()) {
            return Err(RpcError::Canceled);
        }

        let call_id = (self.last_message_id.fetch_add(1, Ordering::AcqRel) + 1).to_string();
        if token.is_some() {
            args.push(Value::from(CANCELLATION_TOKEN_MARKER));
        }

        let (tx, rx) = oneshot::channel();
        let settled = token.map(|_| CancellationToken::new());
        {
            let mut state = self.state.lock();
            let message = MessageFactory::request(
                &call_id,
                proxy_id,
                method,
                &args,
                state.message_to_send_host_id.as_deref(),
            )?;
            state.pending_replies.insert(
                call_id.clone(),
                PendingReply {
                    tx,
                    settled: settled.clone(),
                },
            );
            if let Err(e) = self.multiplexer.send(message) {
                state.pending_replies.remove(&call_id);
                return Err(e);
            }
        }
        trace!(call_id = %call_id, proxy_id, method, "request sent");

        if let (Some(token), Some(settled)) = (token.cloned(), settled) {
            let engine = self.this.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = settled.cancelled() => {}
                    _ = token.cancelled() => {
                        if let Some(shared) = engine.upgrade() {
                            shared.send_cancel(&call_id);
                        }
                    }
                }
            });
        }

        Ok(rx)
    }

    fn send_cancel(&self, call_id: &str) {
        debug!("Cancelling call {}", call_id);
        let host_id = self.state.lock().message_to_send_host_id.clone();
        if let Err(e) = self
            .multiplexer
            .send(MessageFactory::cancel(call_id, host_id.as_deref()))
        {
            warn!("Could not send cancel for call {}: {}", call_id, e);
        }
    }

    fn receive_one_message(&self, raw: &str) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Ok(());
        }

        let message = RpcMessage::parse(raw)?;

        if let RpcMessage::SetHostId(host_id) = &message {
            debug!("Peer announced host id {}", host_id);
            self.state.lock().message_to_send_host_id = Some(host_id.clone());
            return Ok(());
        }

        if let (Some(expected), Some(declared)) = (self.remote_host_id.as_deref(), message.host_id()) {
            if expected != declared {
                trace!(expected, declared, "skipping message for another host");
                return Ok(());
            }
        }

        match message {
            RpcMessage::Request(msg) => self.receive_request(msg),
            RpcMessage::Reply(msg) => self.receive_reply(msg),
            RpcMessage::ReplyErr(msg) => self.receive_reply_err(msg),
            RpcMessage::Cancel(msg) => self.receive_cancel(msg),
            RpcMessage::Unknown { kind, .. } => {
                warn!("Ignoring message of unknown type {:?}", kind);
            }
            RpcMessage::SetHostId(_) => {}
        }
        Ok(())
    }

    fn receive_request(&self, msg: RequestMessage) {
        let RequestMessage {
            id: call_id,
            proxy_id,
            method,
            mut args,
            ..
        } = msg;
        trace!(call_id = %call_id, proxy_id = %proxy_id, method = %method, "request received");

        for arg in args.iter_mut() {
            if arg.is_null() {
                *arg = Value::Undefined;
            }
        }

        let token = if args.last().and_then(Value::as_str) == Some(CANCELLATION_TOKEN_MARKER) {
            args.pop();
            Some(CancellationToken::new())
        } else {
            None
        };
        let ctx = CallContext::new(&call_id, &proxy_id, &method, token.clone());

        // Handlers may call back into the engine, so no lock while starting them.
        let actor = self.state.lock().locals.get(&proxy_id).cloned();
        let invocation = Self::invoke_handler(actor.as_ref(), &proxy_id, &method, args, ctx);

        let mut state = self.state.lock();
        if let Some(token) = token {
            state.cancellation_sources.insert(call_id.clone(), token);
        }
        let engine = self.this.clone();
        let task_call_id = call_id.clone();
        // The lock is held across the spawn so the task cannot finish
        // before its bookkeeping is in place.
        let handle = tokio::spawn(async move {
            let outcome = invocation.await;
            if let Some(shared) = engine.upgrade() {
                shared.finish_invocation(&task_call_id, outcome);
            }
        });
        state.invoked_handlers.insert(call_id, handle);
    }

    fn invoke_handler(
        actor: Option<&Arc<Actor>>,
        proxy_id: &str,
        method: &str,
        args: Vec<Value>,
        ctx: CallContext,
    ) -> BoxFuture<'static, HandlerResult> {
        let Some(actor) = actor else {
            let err = HandlerError::message(format!("Unknown actor {}", proxy_id));
            return futures::future::ready(Err(err)).boxed();
        };
        actor.invoke(method, args, ctx).unwrap_or_else(|| {
            let err = HandlerError::message(format!("Unknown method {} on actor {}", method, proxy_id));
            futures::future::ready(Err(err)).boxed()
        })
    }

    fn finish_invocation(&self, call_id: &str, outcome: HandlerResult) {
        let host_id = {
            let mut state = self.state.lock();
            state.invoked_handlers.remove(call_id);
            state.cancellation_sources.remove(call_id);
            state.message_to_send_host_id.clone()
        };
        let host_id = host_id.as_deref();

        let message = match outcome {
            Ok(value) => MessageFactory::reply_ok(call_id, &value, host_id),
            Err(err) => MessageFactory::reply_err(call_id, err.into_serialized().as_ref(), host_id),
        };
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("Could not encode reply for call {}: {}", call_id, e);
                match MessageFactory::reply_err(call_id, Some(&SerializedError::from_error(&e)), host_id) {
                    Ok(message) => message,
                    Err(e) => {
                        error!("Dropping reply for call {}: {}", call_id, e);
                        return;
                    }
                }
            }
        };

        if let Err(e) = self.multiplexer.send(message) {
            warn!("Dropping reply for call {}: {}", call_id, e);
        }
    }

    fn receive_reply(&self, msg: ReplyMessage) {
        match self.take_pending(&msg.id) {
            Some(pending) => pending.settle(Ok(msg.res)),
            None => debug!("Ignoring reply for unknown call {}", msg.id),
        }
    }

    fn receive_reply_err(&self, msg: ReplyErrMessage) {
        let Some(pending) = self.take_pending(&msg.id) else {
            debug!("Ignoring error reply for unknown call {}", msg.id);
            return;
        };
        let err = match msg.err {
            Some(err) => RpcError::Remote(err),
            None => RpcError::Rejected,
        };
        pending.settle(Err(err));
    }

    fn receive_cancel(&self, msg: CancelMessage) {
        match self.state.lock().cancellation_sources.get(&msg.id) {
            Some(source) => {
                debug!("Peer cancelled call {}", msg.id);
                source.cancel();
            }
            None => trace!(call_id = %msg.id, "cancel for unknown call"),
        }
    }

    fn take_pending(&self, call_id: &str) -> Option<PendingReply> {
        self.state.lock().pending_replies.remove(call_id)
    }

    /// Reject every call still waiting; the connection is gone.
    fn fail_pending_calls(&self) {
        let pending: Vec<PendingReply> = self
            .state
            .lock()
            .pending_replies
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        if !pending.is_empty() {
            debug!("Failing {} pending calls after connection close", pending.len());
        }
        for reply in pending {
            reply.settle(Err(RpcError::ConnectionClosed));
        }
    }
}
