//! One primary, any number of replicas.

use std::sync::Arc;

use crate::config::{Endpoint, Strategy};
use crate::connection::ConnectionFactory;
use crate::pool::{PoolOptions, ReplicatedPool, StaticEndpoints};

/// Writes go to the primary. Reads are spread over the replicas with the
/// given strategy and fall back to the primary when none is live.
pub type PrimaryReplicaPool<F> = ReplicatedPool<F, StaticEndpoints>;

impl<F: ConnectionFactory> ReplicatedPool<F, StaticEndpoints> {
    pub fn primary_replica(
        factory: Arc<F>,
        primary: Endpoint,
        replicas: Vec<Endpoint>,
        strategy: Strategy,
        options: PoolOptions,
    ) -> Self {
        Self::new(
            factory,
            StaticEndpoints::new(vec![primary], replicas),
            strategy,
            options,
        )
    }
}
