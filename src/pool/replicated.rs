//! Pools with a primary set and a replica set.
//!
//! Writes go to a primary, read-only commands to a replica when one is live.
//! Where the endpoints come from is a [`Discovery`]: a fixed list for the
//! primary/replica and multi-primary topologies, sentinels for the sentinel
//! topology.

use std::future::Future;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::{Endpoint, Strategy};
use crate::connection::{Connection, ConnectionFactory, Role};
use crate::error::{Error, Result};
use crate::pool::classifier::is_read_only;
use crate::pool::strategy::{pick, Cursor};
use crate::pool::{ensure_database, open, ConnectionPool, NodeRole, PoolOptions, PoolStats, PooledConnection};

/// Endpoints a pool should connect to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    pub primaries: Vec<Endpoint>,
    pub replicas: Vec<Endpoint>,
}

/// Source of a pool's endpoints, consulted on every reconnect pass.
pub trait Discovery: Send + Sync + 'static {
    /// The current primaries and replicas.
    fn discover<F: ConnectionFactory>(
        &self,
        factory: &F,
        timeout: Duration,
    ) -> impl Future<Output = Result<Layout>> + Send;

    /// Where administrative commands go, tried in order.
    fn admin_endpoints(&self) -> &[Endpoint];

    /// Ask each discovered primary for its role and skip those that are not
    /// primaries.
    fn verify_roles(&self) -> bool {
        false
    }
}

/// A fixed layout.
#[derive(Debug, Clone)]
pub struct StaticEndpoints {
    layout: Layout,
}

impl StaticEndpoints {
    pub fn new(primaries: Vec<Endpoint>, replicas: Vec<Endpoint>) -> Self {
        Self {
            layout: Layout {
                primaries,
                replicas,
            },
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

impl Discovery for StaticEndpoints {
    async fn discover<F: ConnectionFactory>(&self, _factory: &F, _timeout: Duration) -> Result<Layout> {
        Ok(self.layout.clone())
    }

    fn admin_endpoints(&self) -> &[Endpoint] {
        &self.layout.primaries
    }
}

type Handle<C> = Arc<PooledConnection<C>>;

struct PoolState<C> {
    primaries: Vec<Handle<C>>,
    replicas: Vec<Handle<C>>,
    /// Writes and reads rotate independently: a write never advances the
    /// replica rotation, and a read falls back to `primary_cursor` only when
    /// no replica is connected.
    primary_cursor: Cursor,
    replica_cursor: Cursor,
    /// Reconnect passes that failed since the last successful load.
    failures: u32,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            primaries: Vec::new(),
            replicas: Vec::new(),
            primary_cursor: Cursor::default(),
            replica_cursor: Cursor::default(),
            failures: 0,
        }
    }

    fn clear(&mut self) {
        self.primaries.clear();
        self.replicas.clear();
        self.primary_cursor.reset();
        self.replica_cursor.reset();
    }
}

/// Primary/replica routing over endpoints supplied by `D`.
///
/// One async mutex guards the handles, both cursors and the failure counter,
/// so concurrent callers never connect twice or lose a cursor step.
pub struct ReplicatedPool<F: ConnectionFactory, D> {
    factory: Arc<F>,
    discovery: D,
    strategy: Strategy,
    options: PoolOptions,
    database: AtomicU16,
    state: Mutex<PoolState<F::Connection>>,
}

impl<F: ConnectionFactory, D: Discovery> ReplicatedPool<F, D> {
    pub fn new(factory: Arc<F>, discovery: D, strategy: Strategy, options: PoolOptions) -> Self {
        Self {
            database: AtomicU16::new(options.database),
            factory,
            discovery,
            strategy,
            options,
            state: Mutex::new(PoolState::new()),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    /// One full reconnect pass. Leaves the state empty on failure.
    async fn load(&self, state: &mut PoolState<F::Connection>) -> Result<()> {
        state.clear();
        let timeout = self.options.connect_timeout;
        let layout = self
            .discovery
            .discover(&*self.factory, timeout)
            .await
            .map_err(|e| Error::PoolUnavailable(format!("endpoint discovery failed: {e}")))?;

        let mut last_err = None;
        for endpoint in &layout.primaries {
            match self.open_primary(endpoint).await {
                Ok(handle) => state.primaries.push(handle),
                Err(e) => {
                    tracing::warn!(%endpoint, error = %e, "primary unreachable");
                    last_err = Some(e);
                }
            }
        }
        if state.primaries.is_empty() {
            let reason = match last_err {
                Some(e) => e.to_string(),
                None => "no primary endpoints".to_string(),
            };
            return Err(Error::PoolUnavailable(reason));
        }

        if self.options.replica_reads {
            for endpoint in &layout.replicas {
                match open(&*self.factory, endpoint, NodeRole::Replica, timeout).await {
                    Ok(handle) => state.replicas.push(handle),
                    Err(e) => tracing::warn!(%endpoint, error = %e, "skipping unreachable replica"),
                }
            }
        }

        state.failures = 0;
        tracing::debug!(
            primaries = state.primaries.len(),
            replicas = state.replicas.len(),
            "connections loaded"
        );
        Ok(())
    }

    async fn open_primary(&self, endpoint: &Endpoint) -> Result<Handle<F::Connection>> {
        let handle = open(
            &*self.factory,
            endpoint,
            NodeRole::Primary,
            self.options.connect_timeout,
        )
        .await?;
        if self.discovery.verify_roles() {
            let role = handle.lock().await.conn.role().await?;
            if role != Role::Primary {
                return Err(Error::Connect {
                    endpoint: endpoint.to_string(),
                    reason: format!("reports role {role:?}, expected primary"),
                });
            }
        }
        Ok(handle)
    }

    fn route(&self, state: &mut PoolState<F::Connection>, command: &str) -> Option<Handle<F::Connection>> {
        if self.options.replica_reads && is_read_only(command) {
            if let Some(replica) = pick(self.strategy, &state.replicas, &mut state.replica_cursor) {
                return Some(Arc::clone(replica));
            }
        }
        pick(self.strategy, &state.primaries, &mut state.primary_cursor).map(Arc::clone)
    }
}

impl<F: ConnectionFactory, D: Discovery> ConnectionPool for ReplicatedPool<F, D> {
    type Connection = F::Connection;

    async fn get_connection(&self, command: &str) -> Result<Handle<F::Connection>> {
        let handle = {
            let mut state = self.state.lock().await;
            if state.primaries.is_empty() {
                self.load(&mut state).await?;
            }
            self.route(&mut state, command)
                .ok_or_else(|| Error::PoolUnavailable("no primary connected".into()))?
        };
        tracing::debug!(command, endpoint = %handle.endpoint(), role = %handle.role(), "routed");
        ensure_database(&handle, self.database()).await?;
        Ok(handle)
    }

    async fn load_connections(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.load(&mut state).await
    }

    async fn handle_failed(&self, attempt: u32) -> bool {
        let failures = {
            let mut state = self.state.lock().await;
            state.failures += 1;
            match self.load(&mut state).await {
                Ok(()) => {
                    tracing::info!(attempt, "reconnected after failure");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, failures = state.failures, error = %e, "reconnect failed");
                    state.failures
                }
            }
        };
        tokio::time::sleep(self.options.retry_wait).await;
        failures < self.options.max_fails
    }

    async fn admin_connection(&self) -> Result<F::Connection> {
        let mut last_err = None;
        for endpoint in self.discovery.admin_endpoints() {
            match self.factory.create(endpoint, self.options.connect_timeout).await {
                Ok(conn) => return Ok(conn),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::PoolUnavailable("no admin endpoint".into())))
    }

    fn database(&self) -> u16 {
        self.database.load(Ordering::Relaxed)
    }

    fn set_database(&self, database: u16) {
        self.database.store(database, Ordering::Relaxed);
    }

    async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            primaries: state.primaries.len(),
            replicas: state.replicas.len(),
            failures: state.failures,
            database: self.database(),
        }
    }
}
