//! Connection pools: which live connection executes a given command.
//!
//! Every pool connects lazily on the first [`ConnectionPool::get_connection`],
//! rebuilds its whole state on [`ConnectionPool::load_connections`], and
//! applies the target database index to a handle right before handing it out.

pub mod classifier;
pub mod multi_primary;
pub mod primary_replica;
pub mod replicated;
pub mod sentinel;
pub mod single;
pub mod strategy;

pub use classifier::is_read_only;
pub use replicated::{Discovery, Layout, ReplicatedPool, StaticEndpoints};
pub use sentinel::{SentinelDiscovery, SentinelPool};
pub use single::SingleNodePool;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::{ClientConfig, Endpoint, Topology};
use crate::connection::{Connection, ConnectionFactory};
use crate::error::{Error, Result};

/// Which set a pooled connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Primary,
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
        })
    }
}

/// A connection plus the database index last selected on it.
pub struct Session<C> {
    pub conn: C,
    /// Fresh connections start on database 0.
    pub database: u16,
}

/// A live connection owned by a pool. One command at a time.
pub struct PooledConnection<C> {
    endpoint: Endpoint,
    role: NodeRole,
    session: Mutex<Session<C>>,
}

impl<C: Connection> PooledConnection<C> {
    pub fn new(endpoint: Endpoint, role: NodeRole, conn: C) -> Self {
        Self {
            endpoint,
            role,
            session: Mutex::new(Session { conn, database: 0 }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Exclusive access for the duration of one command.
    pub async fn lock(&self) -> MutexGuard<'_, Session<C>> {
        self.session.lock().await
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.endpoint)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a pool's state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub primaries: usize,
    pub replicas: usize,
    /// Consecutive failed reconnect passes.
    pub failures: u32,
    pub database: u16,
}

/// Settings shared by every pool variant.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub connect_timeout: Duration,
    pub retry_wait: Duration,
    pub max_fails: u32,
    pub replica_reads: bool,
    /// Consulted by the single-node pool only.
    pub auto_select_db: bool,
    pub database: u16,
}

impl PoolOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            retry_wait: config.retry_wait(),
            max_fails: config.max_fails,
            replica_reads: config.replica_reads,
            auto_select_db: config.auto_select_db,
            database: config.database,
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Routes commands to live connections and recovers from failures.
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: Connection;

    /// The connection that executes `command`, connecting first if needed.
    fn get_connection(
        &self,
        command: &str,
    ) -> impl Future<Output = Result<Arc<PooledConnection<Self::Connection>>>> + Send;

    /// Drop every handle and connect again from scratch.
    ///
    /// Fails with [`Error::PoolUnavailable`] when no primary could be reached.
    fn load_connections(&self) -> impl Future<Output = Result<()>> + Send;

    /// Called by the driver after a transient failure. `true` means the
    /// command should be retried.
    fn handle_failed(&self, attempt: u32) -> impl Future<Output = bool> + Send;

    /// A fresh, unpooled connection for administrative commands.
    fn admin_connection(&self) -> impl Future<Output = Result<Self::Connection>> + Send;

    /// Database index applied to every handed-out connection.
    fn database(&self) -> u16;

    fn set_database(&self, database: u16);

    fn stats(&self) -> impl Future<Output = PoolStats> + Send;
}

/// Bring `handle` onto `target` if it is on another database.
pub(crate) async fn ensure_database<C: Connection>(
    handle: &PooledConnection<C>,
    target: u16,
) -> Result<()> {
    let mut session = handle.lock().await;
    if session.database == target {
        return Ok(());
    }
    if !session.conn.select(target).await? {
        return Err(Error::InvalidDatabaseIndex {
            index: target,
            message: format!("{} rejected SELECT {target}", handle.endpoint),
        });
    }
    tracing::debug!(endpoint = %handle.endpoint, database = target, "database selected");
    session.database = target;
    Ok(())
}

/// Connect `endpoint` and wrap it as a pooled handle.
pub(crate) async fn open<F: ConnectionFactory>(
    factory: &F,
    endpoint: &Endpoint,
    role: NodeRole,
    timeout: Duration,
) -> Result<Arc<PooledConnection<F::Connection>>> {
    let conn = factory.create(endpoint, timeout).await?;
    Ok(Arc::new(PooledConnection::new(endpoint.clone(), role, conn)))
}

/// The pool for a configured topology.
pub enum AnyPool<F: ConnectionFactory> {
    Single(SingleNodePool<F>),
    /// Fixed primary/replica sets, one primary or several.
    Replicated(ReplicatedPool<F, StaticEndpoints>),
    Sentinel(SentinelPool<F>),
}

impl<F: ConnectionFactory> AnyPool<F> {
    pub fn from_config(factory: Arc<F>, config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let options = PoolOptions::from_config(config);
        let pool = match &config.topology {
            Topology::Single(endpoint) => {
                Self::Single(SingleNodePool::new(factory, endpoint.clone(), options))
            }
            Topology::PrimaryReplica {
                primary,
                replicas,
                strategy,
            } => Self::Replicated(ReplicatedPool::primary_replica(
                factory,
                primary.clone(),
                replicas.clone(),
                *strategy,
                options,
            )),
            Topology::MultiPrimary {
                primaries,
                replicas,
                strategy,
            } => Self::Replicated(ReplicatedPool::multi_primary(
                factory,
                primaries.clone(),
                replicas.clone(),
                *strategy,
                options,
            )?),
            Topology::Sentinel {
                sentinels,
                service_name,
            } => Self::Sentinel(ReplicatedPool::sentinel(
                factory,
                SentinelDiscovery::new(sentinels.clone(), service_name.clone()),
                options,
            )),
        };
        Ok(pool)
    }
}

impl<F: ConnectionFactory> ConnectionPool for AnyPool<F> {
    type Connection = F::Connection;

    async fn get_connection(&self, command: &str) -> Result<Arc<PooledConnection<F::Connection>>> {
        match self {
            Self::Single(pool) => pool.get_connection(command).await,
            Self::Replicated(pool) => pool.get_connection(command).await,
            Self::Sentinel(pool) => pool.get_connection(command).await,
        }
    }

    async fn load_connections(&self) -> Result<()> {
        match self {
            Self::Single(pool) => pool.load_connections().await,
            Self::Replicated(pool) => pool.load_connections().await,
            Self::Sentinel(pool) => pool.load_connections().await,
        }
    }

    async fn handle_failed(&self, attempt: u32) -> bool {
        match self {
            Self::Single(pool) => pool.handle_failed(attempt).await,
            Self::Replicated(pool) => pool.handle_failed(attempt).await,
            Self::Sentinel(pool) => pool.handle_failed(attempt).await,
        }
    }

    async fn admin_connection(&self) -> Result<F::Connection> {
        match self {
            Self::Single(pool) => pool.admin_connection().await,
            Self::Replicated(pool) => pool.admin_connection().await,
            Self::Sentinel(pool) => pool.admin_connection().await,
        }
    }

    fn database(&self) -> u16 {
        match self {
            Self::Single(pool) => pool.database(),
            Self::Replicated(pool) => pool.database(),
            Self::Sentinel(pool) => pool.database(),
        }
    }

    fn set_database(&self, database: u16) {
        match self {
            Self::Single(pool) => pool.set_database(database),
            Self::Replicated(pool) => pool.set_database(database),
            Self::Sentinel(pool) => pool.set_database(database),
        }
    }

    async fn stats(&self) -> PoolStats {
        match self {
            Self::Single(pool) => pool.stats().await,
            Self::Replicated(pool) => pool.stats().await,
            Self::Sentinel(pool) => pool.stats().await,
        }
    }
}
