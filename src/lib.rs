//! Topology-aware routing and failover for Redis-protocol connections.
//!
//! A [`Client`] sends each command through a [`Driver`](driver::Driver) to
//! the connection its pool picks: the only node, the primary, or a replica
//! for read-only commands. Broken connections are rebuilt and the command
//! retried until the pool's failure budget runs out.

pub mod client;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod pool;
pub mod reply;
pub mod resp;
pub mod runtime;

pub use client::{BlockingClient, Client, ClientBuilder, SetOptions};
pub use config::{ClientConfig, Endpoint, Strategy, Topology, ValueMode};
pub use connection::{Connection, ConnectionFactory, Dialect, Role};
pub use error::{Error, ErrorKind, Result, ServerErrorKind};
pub use pool::{ConnectionPool, PoolStats};
pub use reply::{Reply, ScanPage};
