//! The public entry point.
//!
//! [`Client`] owns the configuration and a connection factory, activates a
//! [`Driver`] over the configured topology on first use, and exposes typed
//! per-command methods on top of [`Client::execute`].
//! [`BlockingClient`] does the same for synchronous callers.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::OnceCell;

use crate::config::{ClientConfig, Topology, ValueMode};
use crate::connection::{ConnectionFactory, Dialect, TcpConnectionFactory};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::pool::{AnyPool, ConnectionPool, PoolStats};
use crate::reply::{Reply, ScanPage};
use crate::runtime;

/// Dialects tried in order when the builder is not told otherwise.
pub const DEFAULT_DRIVERS_ORDER: &[&str] = &["resp3", "resp2"];

// ── Builder ────────────────────────────────────────────────────────

/// Builds a [`Client`] over the TCP wire adapter.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
    drivers_order: Vec<String>,
}

impl ClientBuilder {
    pub fn new(topology: Topology) -> Self {
        Self::from_config(ClientConfig::new(topology))
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            drivers_order: DEFAULT_DRIVERS_ORDER.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// Start from a URL, see [`ClientConfig::from_url`].
    pub fn from_url(url: &str) -> Result<Self> {
        ClientConfig::from_url(url).map(Self::from_config)
    }

    /// Preferred wire dialects (`"resp3"`, `"resp2"`), first available wins.
    pub fn drivers_order<S: AsRef<str>>(mut self, order: &[S]) -> Self {
        self.drivers_order = order.iter().map(|d| d.as_ref().to_string()).collect();
        self
    }

    pub fn database(mut self, database: u16) -> Self {
        self.config.database = database;
        self
    }

    pub fn credentials(mut self, username: Option<&str>, password: Option<&str>) -> Self {
        self.config.username = username.map(str::to_string);
        self.config.password = password.map(str::to_string);
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn retry_wait_ms(mut self, ms: u64) -> Self {
        self.config.retry_wait_ms = ms;
        self
    }

    pub fn max_fails(mut self, max_fails: u32) -> Self {
        self.config.max_fails = max_fails;
        self
    }

    pub fn replica_reads(mut self, enabled: bool) -> Self {
        self.config.replica_reads = enabled;
        self
    }

    pub fn auto_select_db(mut self, enabled: bool) -> Self {
        self.config.auto_select_db = enabled;
        self
    }

    pub fn value_mode(mut self, mode: ValueMode) -> Self {
        self.config.value_mode = mode;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Validate the configuration and pick the wire dialect. Nothing connects
    /// until the first command.
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        let dialect = Dialect::pick(&self.drivers_order)?;
        tracing::debug!(
            topology = self.config.topology.name(),
            %dialect,
            "client configured"
        );
        let factory = TcpConnectionFactory::from_config(dialect, &self.config);
        Ok(Client::with_factory(self.config, factory))
    }
}

// ── SET options ────────────────────────────────────────────────────

/// Expiry and condition flags for [`Client::set_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    ex: Option<u64>,
    px: Option<u64>,
    nx: bool,
    xx: bool,
}

impl SetOptions {
    /// Expire after `seconds`.
    pub fn ex(mut self, seconds: u64) -> Self {
        self.ex = Some(seconds);
        self
    }

    /// Expire after `millis`.
    pub fn px(mut self, millis: u64) -> Self {
        self.px = Some(millis);
        self
    }

    /// Only set if the key does not exist.
    pub fn nx(mut self) -> Self {
        self.nx = true;
        self
    }

    /// Only set if the key already exists.
    pub fn xx(mut self) -> Self {
        self.xx = true;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.nx && self.xx {
            return Err(Error::Configuration("SET: nx and xx are mutually exclusive".into()));
        }
        if self.ex.is_some() && self.px.is_some() {
            return Err(Error::Configuration("SET: ex and px are mutually exclusive".into()));
        }
        Ok(())
    }

    fn append_to(&self, args: &mut Args) {
        if let Some(seconds) = self.ex {
            args.push("EX").push_uint(seconds);
        }
        if let Some(millis) = self.px {
            args.push("PX").push_uint(millis);
        }
        if self.nx {
            args.push("NX");
        }
        if self.xx {
            args.push("XX");
        }
    }
}

// ── Argument building ──────────────────────────────────────────────

#[derive(Default)]
struct Args(Vec<Bytes>);

impl Args {
    fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, arg: impl AsRef<[u8]>) -> &mut Self {
        self.0.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    fn extend<A: AsRef<[u8]>>(&mut self, args: &[A]) -> &mut Self {
        self.0.extend(args.iter().map(|a| Bytes::copy_from_slice(a.as_ref())));
        self
    }

    fn push_int(&mut self, n: i64) -> &mut Self {
        let mut buf = itoa::Buffer::new();
        self.push(buf.format(n))
    }

    fn push_uint(&mut self, n: u64) -> &mut Self {
        let mut buf = itoa::Buffer::new();
        self.push(buf.format(n))
    }

    fn take(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.0)
    }
}

fn key_args<A: AsRef<[u8]>>(key: &str, rest: &[A]) -> Vec<Bytes> {
    Args::new().push(key).extend(rest).take()
}

/// Members of a list, set or sorted set. These never hold nil, so a nil
/// element is a protocol error.
fn bytes_list(reply: Reply) -> Result<Vec<Bytes>> {
    reply
        .into_array()?
        .into_iter()
        .map(|item| {
            item.into_bytes()?
                .ok_or_else(|| Error::Protocol("nil element in member list".into()))
        })
        .collect()
}

// ── Client ─────────────────────────────────────────────────────────

/// Async client routing commands over the configured topology.
pub struct Client<F: ConnectionFactory = TcpConnectionFactory> {
    config: ClientConfig,
    factory: Arc<F>,
    driver: OnceCell<Driver<AnyPool<F>>>,
}

impl Client {
    /// Shorthand for `ClientBuilder::from_url(url)?.build()`.
    pub fn from_url(url: &str) -> Result<Self> {
        ClientBuilder::from_url(url)?.build()
    }

    pub fn builder(topology: Topology) -> ClientBuilder {
        ClientBuilder::new(topology)
    }
}

impl<F: ConnectionFactory> Client<F> {
    /// Client over a caller-supplied connection factory.
    pub fn with_factory(config: ClientConfig, factory: F) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            driver: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether the driver has been activated by a first command.
    pub fn is_active(&self) -> bool {
        self.driver.initialized()
    }

    async fn driver(&self) -> Result<&Driver<AnyPool<F>>> {
        self.driver
            .get_or_try_init(|| async {
                let pool = AnyPool::from_config(Arc::clone(&self.factory), &self.config)?;
                tracing::debug!(topology = self.config.topology.name(), "driver activated");
                Ok::<_, Error>(Driver::new(pool))
            })
            .await
    }

    async fn run(&self, command: &str, args: Vec<Bytes>) -> Result<Reply> {
        self.driver().await?.call(command, &args).await
    }

    /// Run any command. Replies are normalized but otherwise untouched.
    pub async fn execute<A: AsRef<[u8]>>(&self, command: &str, args: &[A]) -> Result<Reply> {
        self.run(command, Args::new().extend(args).take()).await
    }

    /// Run a command on a fresh administrative connection (the primary, or a
    /// sentinel for sentinel topologies).
    pub async fn execute_admin<A: AsRef<[u8]>>(&self, command: &str, args: &[A]) -> Result<Reply> {
        let args = Args::new().extend(args).take();
        self.driver().await?.call_admin(command, &args).await
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        Ok(self.driver().await?.pool().stats().await)
    }

    // ── Strings ────────────────────────────────────────────────────

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.run("GET", key_args::<&str>(key, &[])).await?.into_bytes()
    }

    pub async fn set(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        self.run("SET", Args::new().push(key).push(value).take()).await?;
        Ok(())
    }

    /// `SET` with expiry or condition. `false` when an `nx`/`xx` condition
    /// was not met.
    pub async fn set_with(
        &self,
        key: &str,
        value: impl AsRef<[u8]>,
        options: SetOptions,
    ) -> Result<bool> {
        options.validate()?;
        let mut args = Args::new();
        args.push(key).push(value);
        options.append_to(&mut args);
        Ok(!self.run("SET", args.take()).await?.is_nil())
    }

    pub async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Bytes>>> {
        self.run("MGET", Args::new().extend(keys).take())
            .await?
            .into_array()?
            .into_iter()
            .map(Reply::into_bytes)
            .collect()
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.run("INCR", key_args::<&str>(key, &[])).await?.into_int()
    }

    pub async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        let args = Args::new().push(key).push_int(amount).take();
        self.run("INCRBY", args).await?.into_int()
    }

    pub async fn append(&self, key: &str, value: impl AsRef<[u8]>) -> Result<i64> {
        self.run("APPEND", Args::new().push(key).push(value).take())
            .await?
            .into_int()
    }

    pub async fn strlen(&self, key: &str) -> Result<i64> {
        self.run("STRLEN", key_args::<&str>(key, &[])).await?.into_int()
    }

    // ── Keys ───────────────────────────────────────────────────────

    pub async fn del(&self, keys: &[&str]) -> Result<i64> {
        self.run("DEL", Args::new().extend(keys).take()).await?.into_int()
    }

    pub async fn exists(&self, keys: &[&str]) -> Result<i64> {
        self.run("EXISTS", Args::new().extend(keys).take())
            .await?
            .into_int()
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let args = Args::new().push(key).push_uint(seconds).take();
        self.run("EXPIRE", args).await?.into_bool()
    }

    /// Seconds to live; -1 without expiry, -2 when the key does not exist.
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        self.run("TTL", key_args::<&str>(key, &[])).await?.into_int()
    }

    pub async fn persist(&self, key: &str) -> Result<bool> {
        self.run("PERSIST", key_args::<&str>(key, &[])).await?.into_bool()
    }

    /// `TYPE`; `"none"` when the key does not exist.
    pub async fn key_type(&self, key: &str) -> Result<String> {
        Ok(self
            .run("TYPE", key_args::<&str>(key, &[]))
            .await?
            .into_string()?
            .unwrap_or_default())
    }

    pub async fn rename(&self, key: &str, new_key: &str) -> Result<()> {
        self.run("RENAME", key_args(key, &[new_key])).await?;
        Ok(())
    }

    // ── Hashes ─────────────────────────────────────────────────────

    pub async fn hset(&self, key: &str, field: &str, value: impl AsRef<[u8]>) -> Result<i64> {
        let args = Args::new().push(key).push(field).push(value).take();
        self.run("HSET", args).await?.into_int()
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        self.run("HGET", key_args(key, &[field])).await?.into_bytes()
    }

    pub async fn hgetall(&self, key: &str) -> Result<Vec<(Bytes, Bytes)>> {
        self.run("HGETALL", key_args::<&str>(key, &[]))
            .await?
            .into_pairs()?
            .into_iter()
            .map(|(field, value)| {
                Ok((
                    field.into_bytes()?.unwrap_or_default(),
                    value.into_bytes()?.unwrap_or_default(),
                ))
            })
            .collect()
    }

    pub async fn hdel(&self, key: &str, fields: &[&str]) -> Result<i64> {
        self.run("HDEL", key_args(key, fields)).await?.into_int()
    }

    pub async fn hlen(&self, key: &str) -> Result<i64> {
        self.run("HLEN", key_args::<&str>(key, &[])).await?.into_int()
    }

    // ── Lists ──────────────────────────────────────────────────────

    pub async fn lpush<V: AsRef<[u8]>>(&self, key: &str, values: &[V]) -> Result<i64> {
        self.run("LPUSH", key_args(key, values)).await?.into_int()
    }

    pub async fn rpush<V: AsRef<[u8]>>(&self, key: &str, values: &[V]) -> Result<i64> {
        self.run("RPUSH", key_args(key, values)).await?.into_int()
    }

    pub async fn lpop(&self, key: &str) -> Result<Option<Bytes>> {
        self.run("LPOP", key_args::<&str>(key, &[])).await?.into_bytes()
    }

    pub async fn rpop(&self, key: &str) -> Result<Option<Bytes>> {
        self.run("RPOP", key_args::<&str>(key, &[])).await?.into_bytes()
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let args = Args::new().push(key).push_int(start).push_int(stop).take();
        bytes_list(self.run("LRANGE", args).await?)
    }

    pub async fn llen(&self, key: &str) -> Result<i64> {
        self.run("LLEN", key_args::<&str>(key, &[])).await?.into_int()
    }

    // ── Sets ───────────────────────────────────────────────────────

    pub async fn sadd<V: AsRef<[u8]>>(&self, key: &str, members: &[V]) -> Result<i64> {
        self.run("SADD", key_args(key, members)).await?.into_int()
    }

    pub async fn srem<V: AsRef<[u8]>>(&self, key: &str, members: &[V]) -> Result<i64> {
        self.run("SREM", key_args(key, members)).await?.into_int()
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<Bytes>> {
        bytes_list(self.run("SMEMBERS", key_args::<&str>(key, &[])).await?)
    }

    pub async fn sismember(&self, key: &str, member: impl AsRef<[u8]>) -> Result<bool> {
        self.run("SISMEMBER", Args::new().push(key).push(member).take())
            .await?
            .into_bool()
    }

    pub async fn scard(&self, key: &str) -> Result<i64> {
        self.run("SCARD", key_args::<&str>(key, &[])).await?.into_int()
    }

    // ── Sorted sets ────────────────────────────────────────────────

    pub async fn zadd<V: AsRef<[u8]>>(&self, key: &str, members: &[(f64, V)]) -> Result<i64> {
        let mut args = Args::new();
        args.push(key);
        for (score, member) in members {
            args.push(score.to_string()).push(member);
        }
        self.run("ZADD", args.take()).await?.into_int()
    }

    pub async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let args = Args::new().push(key).push_int(start).push_int(stop).take();
        bytes_list(self.run("ZRANGE", args).await?)
    }

    pub async fn zscore(&self, key: &str, member: impl AsRef<[u8]>) -> Result<Option<f64>> {
        self.run("ZSCORE", Args::new().push(key).push(member).take())
            .await?
            .into_f64()
    }

    pub async fn zcard(&self, key: &str) -> Result<i64> {
        self.run("ZCARD", key_args::<&str>(key, &[])).await?.into_int()
    }

    pub async fn zrem<V: AsRef<[u8]>>(&self, key: &str, members: &[V]) -> Result<i64> {
        self.run("ZREM", key_args(key, members)).await?.into_int()
    }

    // ── Scan family ────────────────────────────────────────────────

    /// One `SCAN` page. Start with cursor 0 and stop when the returned
    /// page's cursor is 0 again.
    pub async fn scan(&self, cursor: u64, pattern: Option<&str>, count: Option<u64>) -> Result<ScanPage> {
        self.scan_command("SCAN", None, cursor, pattern, count).await
    }

    pub async fn sscan(&self, key: &str, cursor: u64, pattern: Option<&str>, count: Option<u64>) -> Result<ScanPage> {
        self.scan_command("SSCAN", Some(key), cursor, pattern, count).await
    }

    /// Items alternate field, value.
    pub async fn hscan(&self, key: &str, cursor: u64, pattern: Option<&str>, count: Option<u64>) -> Result<ScanPage> {
        self.scan_command("HSCAN", Some(key), cursor, pattern, count).await
    }

    /// Items alternate member, score.
    pub async fn zscan(&self, key: &str, cursor: u64, pattern: Option<&str>, count: Option<u64>) -> Result<ScanPage> {
        self.scan_command("ZSCAN", Some(key), cursor, pattern, count).await
    }

    async fn scan_command(
        &self,
        command: &str,
        key: Option<&str>,
        cursor: u64,
        pattern: Option<&str>,
        count: Option<u64>,
    ) -> Result<ScanPage> {
        let mut args = Args::new();
        if let Some(key) = key {
            args.push(key);
        }
        args.push_uint(cursor);
        if let Some(pattern) = pattern {
            args.push("MATCH").push(pattern);
        }
        if let Some(count) = count {
            args.push("COUNT").push_uint(count);
        }
        ScanPage::try_from(self.run(command, args.take()).await?)
    }

    // ── Server ─────────────────────────────────────────────────────

    pub async fn info(&self, section: Option<&str>) -> Result<String> {
        let mut args = Args::new();
        if let Some(section) = section {
            args.push(section);
        }
        Ok(self.run("INFO", args.take()).await?.into_string()?.unwrap_or_default())
    }

    pub async fn dbsize(&self) -> Result<i64> {
        self.run("DBSIZE", Vec::new()).await?.into_int()
    }

    pub async fn ping(&self) -> Result<bool> {
        self.run("PING", Vec::new()).await?.into_bool()
    }

    /// Switch every connection of this client to `database`.
    pub async fn select(&self, database: u16) -> Result<()> {
        let args = Args::new().push_uint(u64::from(database)).take();
        self.run("SELECT", args).await?;
        Ok(())
    }
}

// ── BlockingClient ─────────────────────────────────────────────────

/// Synchronous wrapper around [`Client`], driven by the shared runtime in
/// [`runtime`]. Must not be used from inside an async context.
pub struct BlockingClient<F: ConnectionFactory = TcpConnectionFactory> {
    inner: Client<F>,
}

impl BlockingClient {
    pub fn from_url(url: &str) -> Result<Self> {
        Client::from_url(url).map(Self::new)
    }
}

impl<F: ConnectionFactory> BlockingClient<F> {
    pub fn new(inner: Client<F>) -> Self {
        Self { inner }
    }

    pub fn client(&self) -> &Client<F> {
        &self.inner
    }

    pub fn execute<A: AsRef<[u8]>>(&self, command: &str, args: &[A]) -> Result<Reply> {
        runtime::block_on(self.inner.execute(command, args))
    }

    pub fn execute_admin<A: AsRef<[u8]>>(&self, command: &str, args: &[A]) -> Result<Reply> {
        runtime::block_on(self.inner.execute_admin(command, args))
    }

    pub fn get(&self, key: &str) -> Result<Option<Bytes>> {
        runtime::block_on(self.inner.get(key))
    }

    pub fn set(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        runtime::block_on(self.inner.set(key, value))
    }

    pub fn set_with(&self, key: &str, value: impl AsRef<[u8]>, options: SetOptions) -> Result<bool> {
        runtime::block_on(self.inner.set_with(key, value, options))
    }

    pub fn del(&self, keys: &[&str]) -> Result<i64> {
        runtime::block_on(self.inner.del(keys))
    }

    pub fn exists(&self, keys: &[&str]) -> Result<i64> {
        runtime::block_on(self.inner.exists(keys))
    }

    pub fn incr(&self, key: &str) -> Result<i64> {
        runtime::block_on(self.inner.incr(key))
    }

    pub fn ping(&self) -> Result<bool> {
        runtime::block_on(self.inner.ping())
    }

    pub fn select(&self, database: u16) -> Result<()> {
        runtime::block_on(self.inner.select(database))
    }

    pub fn dbsize(&self) -> Result<i64> {
        runtime::block_on(self.inner.dbsize())
    }

    pub fn stats(&self) -> Result<PoolStats> {
        runtime::block_on(self.inner.stats())
    }
}
