//! RESP over TCP: the concrete wire adapter behind [`Connection`].
//!
//! Wraps a `tokio::net::TcpStream` with a read buffer and the RESP decoder.
//! [`TcpConnectionFactory`] performs the handshake (`AUTH` for RESP2,
//! `HELLO 3` for RESP3) before handing a connection out.

use std::io;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{ClientConfig, Endpoint, ValueMode};
use crate::connection::{Connection, ConnectionFactory, Dialect, Role};
use crate::error::{Error, Result};
use crate::resp::parser::parse;
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command;

/// Initial read buffer capacity (16 KB).
const DEFAULT_BUF_CAPACITY: usize = 16 * 1024;

/// Maximum read buffer size (512 MB).
pub const DEFAULT_MAX_BUF_SIZE: usize = 512 * 1024 * 1024;

/// A single connection to a Redis-protocol server.
pub struct TcpConnection {
    stream: TcpStream,
    endpoint: Endpoint,
    buf: BytesMut,
    read_timeout: Option<Duration>,
    value_mode: ValueMode,
    /// Timestamp of last successful I/O.
    pub last_used: Instant,
}

impl TcpConnection {
    /// Connect to `endpoint` within `timeout`.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        let addr = (endpoint.host.as_str(), endpoint.port);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::Connect {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::Connect {
                    endpoint: endpoint.to_string(),
                    reason: format!("timed out after {timeout:?}"),
                })
            }
        };
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream,
            endpoint: endpoint.clone(),
            buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            read_timeout: None,
            value_mode: ValueMode::Bytes,
            last_used: Instant::now(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Bound every reply read; `None` waits forever.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn set_value_mode(&mut self, mode: ValueMode) {
        self.value_mode = mode;
    }

    /// Send a command and read its reply.
    pub async fn execute<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<RespValue> {
        let frame = encode_command(args);
        self.stream.write_all(&frame).await?;
        self.last_used = Instant::now();
        let Some(limit) = self.read_timeout else {
            return self.read_response().await;
        };
        match tokio::time::timeout(limit, self.read_response()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no reply from {} within {limit:?}",
                self.endpoint
            ))),
        }
    }

    /// Read and decode one complete reply.
    async fn read_response(&mut self) -> Result<RespValue> {
        loop {
            if !self.buf.is_empty() {
                let snapshot = self.buf.split().freeze();
                match parse(&snapshot) {
                    Ok((value, consumed)) => {
                        if consumed < snapshot.len() {
                            self.buf.extend_from_slice(&snapshot[consumed..]);
                        }
                        self.last_used = Instant::now();
                        return Ok(value);
                    }
                    Err(Error::Incomplete) => self.buf.extend_from_slice(&snapshot),
                    Err(e) => return Err(e),
                }
            }

            if self.buf.len() >= DEFAULT_MAX_BUF_SIZE {
                return Err(Error::Protocol(format!(
                    "reply from {} exceeds {DEFAULT_MAX_BUF_SIZE} bytes",
                    self.endpoint
                )));
            }
            self.buf.reserve(DEFAULT_BUF_CAPACITY);
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::Transient(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection to {} closed by server", self.endpoint),
                )));
            }
        }
    }

    /// `AUTH [user] password`.
    async fn auth(&mut self, username: Option<&str>, password: &str) -> Result<()> {
        let reply = match username {
            Some(user) => self.execute(&["AUTH", user, password]).await?,
            None => self.execute(&["AUTH", password]).await?,
        };
        expect_ok("AUTH", reply)
    }

    /// `HELLO 3 [AUTH user password]`.
    async fn hello3(&mut self, username: Option<&str>, password: Option<&str>) -> Result<()> {
        let mut args = vec!["HELLO", "3"];
        if let Some(pass) = password {
            args.extend(["AUTH", username.unwrap_or("default"), pass]);
        }
        match self.execute(&args).await? {
            RespValue::Error(msg) => Err(Error::server(msg)),
            _ => Ok(()),
        }
    }
}

fn expect_ok(command: &str, reply: RespValue) -> Result<()> {
    match reply {
        reply if reply.is_ok() => Ok(()),
        RespValue::Error(msg) => Err(Error::server(msg)),
        other => Err(Error::Protocol(format!(
            "unexpected {command} reply: {}",
            other.type_name()
        ))),
    }
}

impl Connection for TcpConnection {
    async fn call(&mut self, args: &[Bytes]) -> Result<RespValue> {
        self.execute(args).await
    }

    async fn select(&mut self, database: u16) -> Result<bool> {
        let index = database.to_string();
        match self.execute(&["SELECT", index.as_str()]).await? {
            reply if reply.is_ok() => Ok(true),
            RespValue::Error(msg) => {
                tracing::debug!(endpoint = %self.endpoint, database, %msg, "SELECT rejected");
                Ok(false)
            }
            other => Err(Error::Protocol(format!(
                "unexpected SELECT reply: {}",
                other.type_name()
            ))),
        }
    }

    async fn role(&mut self) -> Result<Role> {
        let reply = self.execute(&["ROLE"]).await?;
        Ok(Role::from_reply(&reply))
    }

    fn value_mode(&self) -> ValueMode {
        self.value_mode
    }
}

/// Opens [`TcpConnection`]s and runs the handshake for the chosen dialect.
#[derive(Debug, Clone, Default)]
pub struct TcpConnectionFactory {
    dialect: Dialect,
    value_mode: ValueMode,
    username: Option<String>,
    password: Option<String>,
    read_timeout: Option<Duration>,
}

impl TcpConnectionFactory {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Take credentials, value mode and read timeout from `config`.
    pub fn from_config(dialect: Dialect, config: &ClientConfig) -> Self {
        Self {
            dialect,
            value_mode: config.value_mode,
            username: config.username.clone(),
            password: config.password.clone(),
            read_timeout: (config.read_timeout_ms > 0)
                .then(|| Duration::from_millis(config.read_timeout_ms)),
        }
    }

    pub fn with_value_mode(mut self, mode: ValueMode) -> Self {
        self.value_mode = mode;
        self
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn handshake(&self, conn: &mut TcpConnection) -> Result<()> {
        match self.dialect {
            Dialect::Resp3 => {
                conn.hello3(self.username.as_deref(), self.password.as_deref())
                    .await
            }
            Dialect::Resp2 => match self.password.as_deref() {
                Some(pass) => conn.auth(self.username.as_deref(), pass).await,
                None => Ok(()),
            },
        }
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    type Connection = TcpConnection;

    async fn create(&self, endpoint: &Endpoint, timeout: Duration) -> Result<TcpConnection> {
        let mut conn = TcpConnection::connect(endpoint, timeout).await?;
        conn.set_read_timeout(self.read_timeout.or(Some(timeout)));
        if let Err(e) = self.handshake(&mut conn).await {
            return Err(Error::Connect {
                endpoint: endpoint.to_string(),
                reason: format!("{} handshake failed: {e}", self.dialect),
            });
        }
        conn.set_read_timeout(self.read_timeout);
        conn.set_value_mode(self.value_mode);
        tracing::debug!(%endpoint, dialect = %self.dialect, "connection established");
        Ok(conn)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
