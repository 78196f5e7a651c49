//! The wire-client seam: what the pools and the driver need from a live
//! connection, and how one is opened.

pub mod tcp;

#[cfg(test)]
pub(crate) mod mock;

pub use tcp::{TcpConnection, TcpConnectionFactory};

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;

use crate::config::{Endpoint, ValueMode};
use crate::error::{Error, Result};
use crate::resp::types::RespValue;

/// Replication role reported by a server's `ROLE` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
    Sentinel,
    Unknown,
}

impl Role {
    /// Interpret a `ROLE` reply (first element names the role).
    pub fn from_reply(reply: &RespValue) -> Self {
        let name = match reply {
            RespValue::Array(items) => items.first().and_then(RespValue::as_str),
            _ => None,
        };
        match name {
            Some("master") => Self::Primary,
            Some("slave") | Some("replica") => Self::Replica,
            Some("sentinel") => Self::Sentinel,
            _ => Self::Unknown,
        }
    }
}

/// A live connection to one server.
///
/// `call` returns error replies as [`RespValue::Error`]; only I/O level
/// failures come back as `Err` (as [`Error::Transient`] or [`Error::Timeout`]).
pub trait Connection: Send + 'static {
    /// Send one command (name first) and read its reply.
    fn call(&mut self, args: &[Bytes]) -> impl Future<Output = Result<RespValue>> + Send;

    /// Select a database index. `Ok(false)` when the server rejects it.
    fn select(&mut self, database: u16) -> impl Future<Output = Result<bool>> + Send;

    /// Administrative passthrough, used for discovery services.
    fn admin(&mut self, args: &[Bytes]) -> impl Future<Output = Result<RespValue>> + Send {
        self.call(args)
    }

    /// Liveness and role probe.
    fn role(&mut self) -> impl Future<Output = Result<Role>> + Send;

    fn value_mode(&self) -> ValueMode;
}

/// Opens connections to endpoints. Never retries; that is the pool's job.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    fn create(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// Wire dialect spoken by [`TcpConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// RESP2, `AUTH` handshake.
    #[default]
    Resp2,
    /// RESP3 negotiated with `HELLO 3`.
    Resp3,
}

impl Dialect {
    /// Whether this dialect is compiled into the crate.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Resp2 => true,
            Self::Resp3 => cfg!(feature = "resp3"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resp2 => "resp2",
            Self::Resp3 => "resp3",
        }
    }

    /// First available dialect from an ordered preference list.
    pub fn pick<S: AsRef<str>>(order: &[S]) -> Result<Self> {
        if order.is_empty() {
            return Err(Error::Configuration("empty drivers order".into()));
        }
        for name in order {
            let dialect: Self = name.as_ref().parse()?;
            if dialect.is_available() {
                return Ok(dialect);
            }
            tracing::debug!(driver = dialect.as_str(), "driver not compiled in, skipping");
        }
        Err(Error::Configuration(format!(
            "none of the requested drivers is available: {}",
            order.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", ")
        )))
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "resp2" => Ok(Self::Resp2),
            "resp3" => Ok(Self::Resp3),
            other => Err(Error::Configuration(format!("unknown driver: {other}"))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
