//! Call context for local handlers.
//!
//! # Example
//!
//! ```ignore
//! actor.method("$search", |args, ctx| async move {
//!     for chunk in work(args) {
//!         if ctx.is_cancellation_requested() {
//!             return Err(HandlerError::canceled());
//!         }
//!         process(chunk);
//!     }
//!     Ok(Value::Undefined)
//! });
//! ```

use tokio_util::sync::CancellationToken;

/// Context passed to every handler invocation.
///
/// Cheap to clone. The cancellation token is present only when the caller
/// attached one to the call; it fires when the caller sends a cancel.
#[derive(Clone, Debug)]
pub struct CallContext {
    call_id: String,
    proxy_id: String,
    method: String,
    token: Option<CancellationToken>,
}

impl CallContext {
    pub fn new(
        call_id: impl Into<String>,
        proxy_id: impl Into<String>,
        method: impl Into<String>,
        token: Option<CancellationToken>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            proxy_id: proxy_id.into(),
            method: method.into(),
            token,
        }
    }

    /// Request id assigned by the caller.
    #[inline]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    #[inline]
    pub fn proxy_id(&self) -> &str {
        &self.proxy_id
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The caller's cancellation token, if it attached one.
    pub fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    /// True once the caller cancelled. Always false without a token.
    pub fn is_cancellation_requested(&self) -> bool {
        self.token.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Resolve when the caller cancels. Never resolves without a token.
    pub async fn cancelled(&self) {
        match &self.token {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }
}
