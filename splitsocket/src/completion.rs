//! Completion callback chain
//!
//! Shutdown hooks are registered while a connection is being set up and run
//! exactly once, newest first, when it is torn down. Later hooks usually
//! depend on resources acquired by earlier ones, so unwinding in reverse
//! registration order releases them last-acquired, first-released.
//!
//! Draining is driven by [`Drain`], a hand-written future that pops and polls
//! hooks in a loop. Hooks that finish on their first poll are chained without
//! yielding and without recursion, so a long run of synchronous hooks costs
//! one poll. The drain only returns `Pending` while a hook itself is pending.

use crate::error::{HookError, LifecycleError};
use crate::id::ConnectionId;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, error, warn};

/// Future produced by a shutdown hook
pub type HookFuture = BoxFuture<'static, Result<(), HookError>>;

/// A registered hook: the callback bound to its state
struct CallbackEntry {
    identity: &'static str,
    invoke: Box<dyn FnOnce() -> HookFuture + Send>,
}

#[derive(Default)]
struct ChainState {
    completed: bool,
    entries: Vec<CallbackEntry>,
}

/// LIFO stack of shutdown hooks for one connection
pub struct CompletionChain {
    connection_id: ConnectionId,
    state: Mutex<ChainState>,
}

impl CompletionChain {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Register a hook to run during teardown.
    ///
    /// Fails with [`LifecycleError::AlreadyCompleting`] once draining has
    /// started; a hook added that late could never run.
    pub fn on_completed<F, S, Fut>(&self, callback: F, state: S) -> Result<(), LifecycleError>
    where
        F: FnOnce(S) -> Fut + Send + 'static,
        S: Send + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        let mut chain = self.state.lock();
        if chain.completed {
            return Err(LifecycleError::AlreadyCompleting);
        }
        chain.entries.push(CallbackEntry {
            identity: std::any::type_name::<F>(),
            invoke: Box::new(move || callback(state).boxed()),
        });
        Ok(())
    }

    /// Start draining the chain.
    ///
    /// The chain is sealed before any hook runs. A second call fails with
    /// [`LifecycleError::AlreadyCompleting`] and runs nothing.
    pub fn fire_on_completed(&self) -> Result<Drain, LifecycleError> {
        let entries = {
            let mut chain = self.state.lock();
            if chain.completed {
                return Err(LifecycleError::AlreadyCompleting);
            }
            chain.completed = true;
            std::mem::take(&mut chain.entries)
        };

        if !entries.is_empty() {
            debug!(
                "Connection {} draining {} completion hooks",
                self.connection_id,
                entries.len()
            );
        }

        Ok(Drain {
            connection_id: self.connection_id,
            entries,
            current: None,
            invoked: 0,
            failed: 0,
            suspended: false,
        })
    }

    /// Whether draining has started
    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Number of hooks waiting to run
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CompletionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chain = self.state.lock();
        f.debug_struct("CompletionChain")
            .field("connection_id", &self.connection_id)
            .field("completed", &chain.completed)
            .field("pending_hooks", &chain.entries.len())
            .finish()
    }
}

/// Future draining a [`CompletionChain`]. Always resolves to `()`; hook
/// failures are logged, not returned.
#[must_use = "hooks only run while the drain is polled"]
pub struct Drain {
    connection_id: ConnectionId,
    entries: Vec<CallbackEntry>,
    current: Option<(&'static str, HookFuture)>,
    invoked: usize,
    failed: usize,
    suspended: bool,
}

impl Drain {
    /// Hooks not yet started, excluding one currently suspended
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    fn report_failure(&mut self, identity: &str, reason: &dyn std::fmt::Display) {
        self.failed += 1;
        error!(
            "Connection {} completion hook {} failed: {}",
            self.connection_id, identity, reason
        );
    }
}

impl Future for Drain {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;

        loop {
            let (identity, mut hook) = match this.current.take() {
                Some(current) => current,
                None => {
                    let Some(entry) = this.entries.pop() else {
                        if this.invoked > 0 {
                            debug!(
                                "Connection {} drained {} completion hooks ({} failed)",
                                this.connection_id, this.invoked, this.failed
                            );
                        }
                        return Poll::Ready(());
                    };

                    this.invoked += 1;
                    let identity = entry.identity;
                    match panic::catch_unwind(AssertUnwindSafe(entry.invoke)) {
                        Ok(hook) => (identity, hook),
                        Err(payload) => {
                            this.report_failure(identity, &panic_message(&*payload));
                            continue;
                        }
                    }
                }
            };

            match panic::catch_unwind(AssertUnwindSafe(|| hook.as_mut().poll(cx))) {
                Ok(Poll::Pending) => {
                    if !this.suspended {
                        this.suspended = true;
                        debug!(
                            "Connection {} completion hook {} suspended, awaiting remaining hooks",
                            this.connection_id, identity
                        );
                    }
                    this.current = Some((identity, hook));
                    return Poll::Pending;
                }
                Ok(Poll::Ready(Ok(()))) => {}
                Ok(Poll::Ready(Err(err))) => this.report_failure(identity, &err),
                Err(payload) => this.report_failure(identity, &panic_message(&*payload)),
            }
        }
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        let outstanding = self.entries.len() + usize::from(self.current.is_some());
        if outstanding > 0 {
            warn!(
                "Connection {} drain dropped with {} completion hooks outstanding",
                self.connection_id, outstanding
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| format!("panicked: {msg}"))
        .or_else(|| payload.downcast_ref::<String>().map(|msg| format!("panicked: {msg}")))
        .unwrap_or_else(|| "panicked".to_string())
}
