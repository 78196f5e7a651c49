//! One endpoint, one cached connection.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Endpoint;
use crate::connection::ConnectionFactory;
use crate::error::{Error, Result};
use crate::pool::{ensure_database, open, ConnectionPool, NodeRole, PoolOptions, PoolStats, PooledConnection};

type Handle<F> = Arc<PooledConnection<<F as ConnectionFactory>::Connection>>;

/// Pool for a single server. Every command goes to the same connection.
pub struct SingleNodePool<F: ConnectionFactory> {
    factory: Arc<F>,
    endpoint: Endpoint,
    options: PoolOptions,
    database: AtomicU16,
    conn: Mutex<Option<Handle<F>>>,
}

impl<F: ConnectionFactory> SingleNodePool<F> {
    pub fn new(factory: Arc<F>, endpoint: Endpoint, options: PoolOptions) -> Self {
        Self {
            database: AtomicU16::new(options.database),
            factory,
            endpoint,
            options,
            conn: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn connect(&self) -> Result<Handle<F>> {
        open(
            &*self.factory,
            &self.endpoint,
            NodeRole::Primary,
            self.options.connect_timeout,
        )
        .await
        .map_err(|e| Error::PoolUnavailable(format!("{}: {e}", self.endpoint)))
    }
}

impl<F: ConnectionFactory> ConnectionPool for SingleNodePool<F> {
    type Connection = F::Connection;

    async fn get_connection(&self, _command: &str) -> Result<Handle<F>> {
        let handle = {
            let mut slot = self.conn.lock().await;
            match slot.clone() {
                Some(handle) => handle,
                None => {
                    let handle = self.connect().await?;
                    *slot = Some(Arc::clone(&handle));
                    handle
                }
            }
        };
        if self.options.auto_select_db {
            ensure_database(&handle, self.database()).await?;
        }
        Ok(handle)
    }

    async fn load_connections(&self) -> Result<()> {
        let mut slot = self.conn.lock().await;
        *slot = None;
        *slot = Some(self.connect().await?);
        Ok(())
    }

    /// Never retries. The broken handle is dropped so the next call
    /// reconnects.
    async fn handle_failed(&self, attempt: u32) -> bool {
        self.conn.lock().await.take();
        tracing::debug!(endpoint = %self.endpoint, attempt, "single node connection discarded");
        false
    }

    async fn admin_connection(&self) -> Result<F::Connection> {
        self.factory
            .create(&self.endpoint, self.options.connect_timeout)
            .await
    }

    fn database(&self) -> u16 {
        self.database.load(Ordering::Relaxed)
    }

    fn set_database(&self, database: u16) {
        self.database.store(database, Ordering::Relaxed);
    }

    async fn stats(&self) -> PoolStats {
        PoolStats {
            primaries: usize::from(self.conn.lock().await.is_some()),
            replicas: 0,
            failures: 0,
            database: self.database(),
        }
    }
}
