//! Several primaries, any number of replicas.

use std::sync::Arc;

use crate::config::{Endpoint, Strategy};
use crate::connection::ConnectionFactory;
use crate::error::{Error, Result};
use crate::pool::{PoolOptions, ReplicatedPool, StaticEndpoints};

/// Writes are spread over the primaries, reads over the replicas (or the
/// primaries when no replica is live). A reconnect pass fails only when no
/// primary at all could be reached.
pub type MultiPrimaryPool<F> = ReplicatedPool<F, StaticEndpoints>;

impl<F: ConnectionFactory> ReplicatedPool<F, StaticEndpoints> {
    pub fn multi_primary(
        factory: Arc<F>,
        primaries: Vec<Endpoint>,
        replicas: Vec<Endpoint>,
        strategy: Strategy,
        options: PoolOptions,
    ) -> Result<Self> {
        if primaries.is_empty() {
            return Err(Error::Configuration(
                "multi-primary pool needs at least one primary".into(),
            ));
        }
        Ok(Self::new(
            factory,
            StaticEndpoints::new(primaries, replicas),
            strategy,
            options,
        ))
    }
}
