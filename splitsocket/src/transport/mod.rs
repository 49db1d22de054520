//! Transport connection abstraction
//!
//! Concrete connections (TCP, named pipes, ...) embed a [`TransportBase`] and
//! implement [`TransportConnection`] to get identity, close signaling and the
//! shutdown hook chain for free.

pub mod base;

pub use base::TransportBase;

use crate::completion::Drain;
use crate::error::{ConnectionAborted, HookError, LifecycleError};
use crate::id::ConnectionId;
use crate::lifecycle::{CloseToken, CompletionWatcher};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Opaque endpoint descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Inet(SocketAddr),
    Unix(PathBuf),
    Pipe(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Inet(addr) => write!(f, "{}", addr),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Pipe(name) => write!(f, "pipe:{}", name),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Inet(addr)
    }
}

/// A connection accepted by a transport
pub trait TransportConnection: Send + Sync {
    /// The lifecycle base this connection embeds
    fn base(&self) -> &TransportBase;

    /// Local endpoint, if the transport is addressed
    fn local_endpoint(&self) -> Option<Endpoint>;

    /// Remote endpoint, if the transport is addressed
    fn remote_endpoint(&self) -> Option<Endpoint>;

    /// Force-terminate the connection out of band from graceful completion
    fn abort_with(&self, reason: ConnectionAborted);

    /// Abort with the default application reason
    fn abort(&self) {
        self.abort_with(ConnectionAborted::default());
    }

    fn connection_id(&self) -> ConnectionId {
        self.base().id()
    }

    fn request_close(&self) {
        self.base().request_close();
    }

    fn close_requested(&self) -> CloseToken {
        self.base().close_requested()
    }

    fn connection_closed(&self) -> CloseToken {
        self.base().connection_closed()
    }

    fn execution(&self) -> CompletionWatcher {
        self.base().execution()
    }

    fn on_completed<F, S, Fut>(&self, callback: F, state: S) -> Result<(), LifecycleError>
    where
        Self: Sized,
        F: FnOnce(S) -> Fut + Send + 'static,
        S: Send + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.base().on_completed(callback, state)
    }

    fn fire_on_completed(&self) -> Result<Drain, LifecycleError> {
        self.base().fire_on_completed()
    }

    fn complete(&self) -> bool {
        self.base().complete()
    }

    /// Drain the shutdown hooks, then resolve the completion gate
    fn teardown(&self) -> impl Future<Output = Result<(), LifecycleError>> + Send
    where
        Self: Sized,
    {
        self.base().teardown()
    }
}
