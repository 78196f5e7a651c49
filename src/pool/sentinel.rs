//! Sentinel-discovered primary/replica topology.
//!
//! Every reconnect pass asks the sentinels where the service's primary and
//! replicas currently are, so a promoted replica is picked up after failover.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::{Endpoint, Strategy, DEFAULT_PORT};
use crate::connection::{Connection, ConnectionFactory};
use crate::error::{Error, Result};
use crate::pool::{Discovery, Layout, PoolOptions, ReplicatedPool};
use crate::resp::types::RespValue;

/// Replica flags that mean "do not route here".
const DOWN_FLAGS: &[&str] = &["s_down", "o_down", "disconnected"];

/// A [`ReplicatedPool`] whose endpoints come from sentinels.
pub type SentinelPool<F, D = SentinelDiscovery> = ReplicatedPool<F, D>;

impl<F: ConnectionFactory, D: Discovery> ReplicatedPool<F, D> {
    /// Pool over endpoints found by `discovery`; replicas are picked at random.
    pub fn sentinel(factory: Arc<F>, discovery: D, options: PoolOptions) -> Self {
        Self::new(factory, discovery, Strategy::Random, options)
    }
}

/// Asks sentinels, in order, for a service's primary and replicas.
#[derive(Debug, Clone)]
pub struct SentinelDiscovery {
    sentinels: Vec<Endpoint>,
    service_name: String,
}

impl SentinelDiscovery {
    pub fn new(sentinels: Vec<Endpoint>, service_name: impl Into<String>) -> Self {
        Self {
            sentinels,
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn ask<F: ConnectionFactory>(
        &self,
        factory: &F,
        sentinel: &Endpoint,
        timeout: Duration,
    ) -> Result<Layout> {
        let mut conn = factory.create(sentinel, timeout).await?;
        let reply = conn
            .admin(&command(&["SENTINEL", "get-master-addr-by-name", &self.service_name]))
            .await?;
        let primary = parse_primary_addr(&self.service_name, reply)?;

        let replicas = match conn
            .admin(&command(&["SENTINEL", "replicas", &self.service_name]))
            .await?
        {
            RespValue::Error(msg) => {
                tracing::warn!(%sentinel, %msg, "sentinel refused replica listing");
                Vec::new()
            }
            reply => parse_replicas(&reply),
        };

        Ok(Layout {
            primaries: vec![primary],
            replicas,
        })
    }
}

impl Discovery for SentinelDiscovery {
    async fn discover<F: ConnectionFactory>(&self, factory: &F, timeout: Duration) -> Result<Layout> {
        let mut last_err = None;
        for sentinel in &self.sentinels {
            match self.ask(factory, sentinel, timeout).await {
                Ok(layout) => {
                    tracing::debug!(
                        %sentinel,
                        service = %self.service_name,
                        primary = %layout.primaries[0],
                        replicas = layout.replicas.len(),
                        "service resolved"
                    );
                    return Ok(layout);
                }
                Err(e) => {
                    tracing::debug!(%sentinel, error = %e, "sentinel query failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::PoolUnavailable("no sentinels configured".into())))
    }

    fn admin_endpoints(&self) -> &[Endpoint] {
        &self.sentinels
    }

    fn verify_roles(&self) -> bool {
        true
    }
}

fn command(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

/// Interpret `SENTINEL get-master-addr-by-name`: `[host, port]` or null.
fn parse_primary_addr(service: &str, reply: RespValue) -> Result<Endpoint> {
    match reply {
        RespValue::Array(items) if items.len() >= 2 => {
            let host = items[0]
                .as_str()
                .ok_or_else(|| Error::Protocol("invalid primary host from sentinel".into()))?;
            let port = items[1]
                .as_str()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| Error::Protocol("invalid primary port from sentinel".into()))?;
            Ok(Endpoint::new(host, port))
        }
        RespValue::Null => Err(Error::PoolUnavailable(format!(
            "sentinel does not know service '{service}'"
        ))),
        RespValue::Error(msg) => Err(Error::server(msg)),
        other => Err(Error::Protocol(format!(
            "unexpected sentinel reply: {}",
            other.type_name()
        ))),
    }
}

/// Interpret `SENTINEL replicas`: one field list per replica, either a flat
/// key/value array (RESP2) or a map (RESP3). Replicas flagged down are left out.
fn parse_replicas(reply: &RespValue) -> Vec<Endpoint> {
    let RespValue::Array(entries) = reply else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let fields = fields(entry);
            let lookup = |name: &str| {
                fields
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| *value)
            };
            let host = lookup("ip")?;
            let port = lookup("port").and_then(|p| p.parse().ok()).unwrap_or(DEFAULT_PORT);
            let flags = lookup("flags").unwrap_or_default();
            if flags.split(',').any(|flag| DOWN_FLAGS.contains(&flag)) {
                tracing::debug!(host, port, flags, "skipping replica flagged down");
                return None;
            }
            Some(Endpoint::new(host, port))
        })
        .collect()
}

fn fields(entry: &RespValue) -> Vec<(&str, &str)> {
    match entry {
        RespValue::Array(items) => items
            .chunks_exact(2)
            .filter_map(|pair| Some((pair[0].as_str()?, pair[1].as_str()?)))
            .collect(),
        RespValue::Map(pairs) => pairs
            .iter()
            .filter_map(|(k, v)| Some((k.as_str()?, v.as_str()?)))
            .collect(),
        _ => Vec::new(),
    }
}
