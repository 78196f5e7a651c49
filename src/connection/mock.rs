//! In-memory connection factory for unit tests.
//!
//! Every connection answers `GET` with its endpoint's host name, so tests
//! can see which server a command was routed to.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::{Endpoint, ValueMode};
use crate::connection::{Connection, ConnectionFactory, Role};
use crate::error::{Error, Result};
use crate::resp::types::RespValue;

#[derive(Default)]
struct MockState {
    down: HashSet<Endpoint>,
    generation: HashMap<Endpoint, u64>,
    roles: HashMap<Endpoint, Role>,
    creates: Vec<Endpoint>,
    selects: Vec<(Endpoint, u16)>,
    calls: Vec<(Endpoint, String)>,
}

#[derive(Clone, Default)]
pub(crate) struct MockFactory {
    state: Arc<Mutex<MockState>>,
    value_mode: ValueMode,
}

pub(crate) fn ep(host: &str) -> Endpoint {
    Endpoint::new(host, 6379)
}

impl MockFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_value_mode(mut self, mode: ValueMode) -> Self {
        self.value_mode = mode;
        self
    }

    /// Refuse new connections to `endpoint` and break the live ones.
    pub(crate) fn set_down(&self, endpoint: &Endpoint, down: bool) {
        let mut state = self.state.lock();
        if down {
            state.down.insert(endpoint.clone());
            *state.generation.entry(endpoint.clone()).or_default() += 1;
        } else {
            state.down.remove(endpoint);
        }
    }

    /// Break live connections to `endpoint` without refusing new ones.
    pub(crate) fn drop_connections(&self, endpoint: &Endpoint) {
        *self.state.lock().generation.entry(endpoint.clone()).or_default() += 1;
    }

    pub(crate) fn set_role(&self, endpoint: &Endpoint, role: Role) {
        self.state.lock().roles.insert(endpoint.clone(), role);
    }

    pub(crate) fn creates(&self) -> Vec<Endpoint> {
        self.state.lock().creates.clone()
    }

    pub(crate) fn selects(&self) -> Vec<(Endpoint, u16)> {
        self.state.lock().selects.clone()
    }

    /// `(endpoint, lower-cased command)` in call order.
    pub(crate) fn calls(&self) -> Vec<(Endpoint, String)> {
        self.state.lock().calls.clone()
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn create(&self, endpoint: &Endpoint, _timeout: Duration) -> Result<MockConnection> {
        let mut state = self.state.lock();
        if state.down.contains(endpoint) {
            return Err(Error::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            });
        }
        state.creates.push(endpoint.clone());
        let generation = state.generation.get(endpoint).copied().unwrap_or_default();
        Ok(MockConnection {
            endpoint: endpoint.clone(),
            generation,
            state: Arc::clone(&self.state),
            value_mode: self.value_mode,
        })
    }
}

pub(crate) struct MockConnection {
    endpoint: Endpoint,
    generation: u64,
    state: Arc<Mutex<MockState>>,
    value_mode: ValueMode,
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("endpoint", &self.endpoint)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl MockConnection {
    fn check_alive(&self, state: &MockState) -> Result<()> {
        let current = state.generation.get(&self.endpoint).copied().unwrap_or_default();
        if current != self.generation {
            return Err(Error::Transient(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("connection to {} lost", self.endpoint),
            )));
        }
        Ok(())
    }
}

fn db_in_range(database: u16) -> bool {
    database < 16
}

impl Connection for MockConnection {
    async fn call(&mut self, args: &[Bytes]) -> Result<RespValue> {
        let mut state = self.state.lock();
        self.check_alive(&state)?;
        let command = args
            .first()
            .map(|c| String::from_utf8_lossy(c).to_ascii_lowercase())
            .unwrap_or_default();
        state.calls.push((self.endpoint.clone(), command.clone()));

        let reply = match command.as_str() {
            "get" => RespValue::BulkString(Bytes::from(self.endpoint.host.clone())),
            "ping" => RespValue::SimpleString("PONG".into()),
            "missing" => RespValue::Null,
            "exists" => RespValue::Integer(1),
            "flag" => RespValue::Boolean(true),
            "wrongtype" => RespValue::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into()),
            "scan" | "sscan" | "hscan" | "zscan" => RespValue::Array(vec![
                RespValue::BulkString(Bytes::from_static(b"17")),
                RespValue::Array(vec![RespValue::BulkString(Bytes::from_static(b"k1"))]),
            ]),
            "select" => {
                let database = args
                    .get(1)
                    .and_then(|a| std::str::from_utf8(a).ok())
                    .and_then(|s| s.parse::<u16>().ok());
                match database {
                    Some(db) if db_in_range(db) => RespValue::SimpleString("OK".into()),
                    _ => RespValue::Error("ERR DB index is out of range".into()),
                }
            }
            _ => RespValue::SimpleString("OK".into()),
        };
        Ok(reply)
    }

    async fn select(&mut self, database: u16) -> Result<bool> {
        let mut state = self.state.lock();
        self.check_alive(&state)?;
        state.selects.push((self.endpoint.clone(), database));
        Ok(db_in_range(database))
    }

    async fn role(&mut self) -> Result<Role> {
        let state = self.state.lock();
        self.check_alive(&state)?;
        Ok(state.roles.get(&self.endpoint).copied().unwrap_or(Role::Primary))
    }

    fn value_mode(&self) -> ValueMode {
        self.value_mode
    }
}
