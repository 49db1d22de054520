//! Drill host
//!
//! Hosts simulated connections built on [`TransportBase`], stacks shutdown
//! hooks on each one the way layered middleware would, and tears them down
//! once a close is requested or the transport reports the connection gone.

use splitsocket::{
    ConnectionAborted, ConnectionId, Endpoint, HookError, LifecycleError, TransportBase,
    TransportConnection,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Drill configuration
#[derive(Debug, Clone)]
pub struct DrillConfig {
    /// Simulated connections to open
    pub connections: usize,
    /// Shutdown hooks registered per connection
    pub hooks_per_connection: usize,
    /// Every Nth hook suspends before finishing (0 disables)
    pub async_every: usize,
    /// Every Nth hook fails (0 disables)
    pub fail_every: usize,
    /// Every Nth connection is aborted instead of closed (0 disables)
    pub abort_every: usize,
    /// Delay before the simulated peer hangs up
    pub close_after: Duration,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            connections: 4,
            hooks_per_connection: 3,
            async_every: 2,
            fail_every: 0,
            abort_every: 0,
            close_after: Duration::from_millis(100),
        }
    }
}

/// Totals gathered over a drill run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrillReport {
    pub connections: usize,
    pub aborted: usize,
    pub hooks_run: usize,
    pub hooks_failed: usize,
}

/// A connection with no real I/O behind it
pub struct SimulatedConnection {
    base: TransportBase,
    local: Option<Endpoint>,
    remote: Option<Endpoint>,
    abort_reason: OnceLock<ConnectionAborted>,
}

impl SimulatedConnection {
    pub fn new(index: usize) -> Self {
        let id = ConnectionId::next();
        let (local, remote) = if index % 2 == 0 {
            let port = 40000 + (index % 20000) as u16;
            (
                Some(Endpoint::from(SocketAddr::from((Ipv4Addr::LOCALHOST, 7000)))),
                Some(Endpoint::from(SocketAddr::from((Ipv4Addr::new(10, 0, 0, 2), port)))),
            )
        } else {
            (Some(Endpoint::Pipe(format!("drill-{}", id))), None)
        };

        Self {
            base: TransportBase::new(id),
            local,
            remote,
            abort_reason: OnceLock::new(),
        }
    }

    pub fn abort_reason(&self) -> Option<&ConnectionAborted> {
        self.abort_reason.get()
    }

    fn describe(&self) -> String {
        match (&self.local, &self.remote) {
            (Some(local), Some(remote)) => format!("{} <- {}", local, remote),
            (Some(local), None) => local.to_string(),
            _ => "unaddressed".to_string(),
        }
    }
}

impl TransportConnection for SimulatedConnection {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        self.local.clone()
    }

    fn remote_endpoint(&self) -> Option<Endpoint> {
        self.remote.clone()
    }

    fn abort_with(&self, reason: ConnectionAborted) {
        warn!("Connection {} aborted: {}", self.base.id(), reason);
        // First reason wins
        if self.abort_reason.set(reason).is_ok() {
            self.base.notify_connection_closed();
        }
    }
}

#[derive(Debug, Default)]
struct HookStats {
    run: AtomicUsize,
    failed: AtomicUsize,
    aborted: AtomicUsize,
    released: Mutex<Vec<(ConnectionId, usize)>>,
}

/// State handed to each shutdown hook
struct LayerHook {
    connection_id: ConnectionId,
    layer: usize,
    suspend: bool,
    fail: bool,
    stats: Arc<HookStats>,
}

async fn release_layer(hook: LayerHook) -> Result<(), HookError> {
    if hook.suspend {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    hook.stats.run.fetch_add(1, Ordering::Relaxed);
    hook.stats
        .released
        .lock()
        .await
        .push((hook.connection_id, hook.layer));

    if hook.fail {
        hook.stats.failed.fetch_add(1, Ordering::Relaxed);
        return Err(format!(
            "layer {} of connection {} failed to release",
            hook.layer, hook.connection_id
        )
        .into());
    }

    debug!("Connection {} released layer {}", hook.connection_id, hook.layer);
    Ok(())
}

fn every(n: usize, index: usize) -> bool {
    n != 0 && (index + 1) % n == 0
}

/// Drill host
pub struct Drill {
    config: DrillConfig,
    connections: Arc<RwLock<HashMap<ConnectionId, Arc<SimulatedConnection>>>>,
    stats: Arc<HookStats>,
}

impl Drill {
    pub fn new(config: DrillConfig) -> Self {
        Self {
            config,
            connections: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(HookStats::default()),
        }
    }

    /// Number of connections not yet torn down
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Open a simulated connection and stack its shutdown hooks
    pub async fn accept(&self, index: usize) -> Result<Arc<SimulatedConnection>, LifecycleError> {
        let conn = Arc::new(SimulatedConnection::new(index));
        let id = conn.connection_id();

        for layer in 0..self.config.hooks_per_connection {
            conn.on_completed(
                release_layer,
                LayerHook {
                    connection_id: id,
                    layer,
                    suspend: every(self.config.async_every, layer),
                    fail: every(self.config.fail_every, layer),
                    stats: Arc::clone(&self.stats),
                },
            )?;
        }

        self.connections.write().await.insert(id, Arc::clone(&conn));
        info!("Connection {} accepted ({})", id, conn.describe());
        Ok(conn)
    }

    /// Run a connection until it is asked to close or its transport goes away, then tear it down
    pub async fn serve(&self, conn: Arc<SimulatedConnection>) -> Result<(), LifecycleError> {
        let id = conn.connection_id();

        tokio::select! {
            _ = conn.close_requested().into_requested() => {
                debug!("Connection {} closing on request", id);
            }
            _ = conn.connection_closed().into_requested() => {
                debug!("Connection {} closing after transport loss", id);
            }
        }

        conn.teardown().await?;

        self.connections.write().await.remove(&id);
        match conn.abort_reason() {
            Some(reason) => info!("Connection {} torn down after abort: {}", id, reason),
            None => info!("Connection {} torn down", id),
        }
        Ok(())
    }

    /// Ask every live connection to close
    pub async fn close_all(&self) {
        let connections = self.connections.read().await;
        for conn in connections.values() {
            conn.request_close();
        }
    }

    /// Open the configured connections and run them until all are torn down.
    ///
    /// When `shutdown` resolves first, every live connection is asked to close.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<DrillReport, LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();

        for index in 0..self.config.connections {
            let conn = self.accept(index).await?;

            let peer = Arc::clone(&conn);
            let close_after = self.config.close_after;
            let abort = every(self.config.abort_every, index);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                tokio::time::sleep(close_after).await;
                if abort {
                    stats.aborted.fetch_add(1, Ordering::Relaxed);
                    peer.abort();
                } else {
                    // A no-op when the connection has already completed
                    peer.request_close();
                }
            });

            let drill = Arc::clone(&self);
            tasks.spawn(async move { drill.serve(conn).await });
        }

        tokio::pin!(shutdown);
        let mut interrupted = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(result)) => result?,
                    Some(Err(e)) => error!("Connection task failed: {}", e),
                    None => break,
                },
                _ = &mut shutdown, if !interrupted => {
                    interrupted = true;
                    info!("Shutdown requested, closing {} connections", self.connection_count().await);
                    self.close_all().await;
                }
            }
        }

        Ok(self.report())
    }

    pub fn report(&self) -> DrillReport {
        DrillReport {
            connections: self.config.connections,
            aborted: self.stats.aborted.load(Ordering::Relaxed),
            hooks_run: self.stats.run.load(Ordering::Relaxed),
            hooks_failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DrillConfig {
        DrillConfig {
            close_after: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_drill_tears_down_every_connection() {
        let drill = Arc::new(Drill::new(config()));

        let report = Arc::clone(&drill)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            report,
            DrillReport {
                connections: 4,
                aborted: 0,
                hooks_run: 12,
                hooks_failed: 0,
            }
        );
        assert_eq!(drill.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_layers_release_in_reverse_order() {
        let drill = Arc::new(Drill::new(DrillConfig {
            hooks_per_connection: 5,
            async_every: 3,
            ..config()
        }));

        Arc::clone(&drill).run(std::future::pending()).await.unwrap();

        let released = drill.stats.released.lock().await;
        let mut per_connection: HashMap<ConnectionId, Vec<usize>> = HashMap::new();
        for (id, layer) in released.iter() {
            per_connection.entry(*id).or_default().push(*layer);
        }
        assert_eq!(per_connection.len(), 4);
        for layers in per_connection.values() {
            assert_eq!(layers, &vec![4, 3, 2, 1, 0]);
        }
    }

    #[tokio::test]
    async fn test_failing_hooks_do_not_block_teardown() {
        let drill = Arc::new(Drill::new(DrillConfig {
            fail_every: 2,
            ..config()
        }));

        let report = Arc::clone(&drill)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(report.hooks_run, 12);
        assert_eq!(report.hooks_failed, 4);
        assert_eq!(drill.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_aborted_connections_still_tear_down() {
        let drill = Arc::new(Drill::new(DrillConfig {
            abort_every: 2,
            ..config()
        }));

        let report = Arc::clone(&drill)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(report.aborted, 2);
        assert_eq!(report.hooks_run, 12);
    }

    #[tokio::test]
    async fn test_shutdown_closes_live_connections() {
        let drill = Arc::new(Drill::new(DrillConfig {
            close_after: Duration::from_secs(60),
            ..config()
        }));

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            Arc::clone(&drill).run(std::future::ready(())),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report.hooks_run, 12);
        assert_eq!(drill.connection_count().await, 0);
    }

    #[test]
    fn test_simulated_endpoints() {
        let inet = SimulatedConnection::new(0);
        assert!(matches!(inet.remote_endpoint(), Some(Endpoint::Inet(_))));

        let pipe = SimulatedConnection::new(1);
        assert!(matches!(pipe.local_endpoint(), Some(Endpoint::Pipe(_))));
        assert!(pipe.remote_endpoint().is_none());
    }

    #[test]
    fn test_abort_reason_kept_once() {
        let conn = SimulatedConnection::new(0);
        conn.abort_with(ConnectionAborted::new("peer reset"));
        conn.abort();

        assert_eq!(conn.abort_reason().map(ConnectionAborted::message), Some("peer reset"));
        assert!(conn.connection_closed().is_requested());
    }
}
