//! Command dispatch: pool lookup, the retry loop, reply normalization.

use bytes::Bytes;

use crate::connection::Connection;
use crate::error::{Error, ErrorKind, Result};
use crate::pool::ConnectionPool;
use crate::reply::Reply;
use crate::resp::types::RespValue;

/// Commands whose replies get special treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Override {
    /// Record the new index on success, map rejection to
    /// [`Error::InvalidDatabaseIndex`].
    Select(u16),
    /// Bare `PING`, answered as `Bool(true)`.
    Ping,
    /// `SCAN`, `SSCAN`, `HSCAN`, `ZSCAN`: integer cursor.
    Scan,
    PassThrough,
}

impl Override {
    fn for_command(command: &str, args: &[Bytes]) -> Result<Self> {
        Ok(match command.to_ascii_lowercase().as_str() {
            "select" => {
                let index = args
                    .first()
                    .and_then(|a| std::str::from_utf8(a).ok())
                    .and_then(|s| s.parse::<u16>().ok())
                    .ok_or_else(|| {
                        Error::Configuration(format!(
                            "invalid database index: {}",
                            args.first()
                                .map(|a| String::from_utf8_lossy(a).into_owned())
                                .unwrap_or_default()
                        ))
                    })?;
                Self::Select(index)
            }
            "ping" if args.is_empty() => Self::Ping,
            "scan" | "sscan" | "hscan" | "zscan" => Self::Scan,
            _ => Self::PassThrough,
        })
    }
}

/// Executes commands on connections chosen by a pool.
pub struct Driver<P> {
    pool: P,
}

impl<P: ConnectionPool> Driver<P> {
    pub fn new(pool: P) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Run `command` with `args` on the connection the pool picks.
    ///
    /// Transient failures are retried for as long as the pool's
    /// `handle_failed` allows. While retrying, a pool that still cannot
    /// reconnect counts as another failed attempt. Any other error is
    /// returned wrapped with the command name.
    pub async fn call(&self, command: &str, args: &[Bytes]) -> Result<Reply> {
        let op = Override::for_command(command, args).map_err(|e| e.for_command(command))?;
        let frame = frame(command, args);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let retrying = attempt > 1;
            match self.try_once(command, &frame, op).await {
                Err(e) if e.is_transient() || (retrying && e.kind() == ErrorKind::PoolUnavailable) => {
                    tracing::warn!(command, attempt, error = %e, "command failed, reconnecting");
                    if !self.pool.handle_failed(attempt).await {
                        return Err(e.for_command(command));
                    }
                }
                result => return result.map_err(|e| e.for_command(command)),
            }
        }
    }

    /// Run an administrative command on a fresh connection from the pool.
    /// Not retried.
    pub async fn call_admin(&self, command: &str, args: &[Bytes]) -> Result<Reply> {
        let result = async {
            let mut conn = self.pool.admin_connection().await?;
            let raw = conn.admin(&frame(command, args)).await?;
            Reply::from_resp(raw, conn.value_mode())
        };
        result.await.map_err(|e| e.for_command(command))
    }

    async fn try_once(&self, command: &str, frame: &[Bytes], op: Override) -> Result<Reply> {
        let handle = self.pool.get_connection(command).await?;
        let mut session = handle.lock().await;
        let raw = session.conn.call(frame).await?;
        let mode = session.conn.value_mode();

        match op {
            Override::Select(index) => match raw {
                RespValue::Error(message) => Err(Error::InvalidDatabaseIndex { index, message }),
                _ => {
                    session.database = index;
                    self.pool.set_database(index);
                    tracing::debug!(database = index, endpoint = %handle.endpoint(), "database switched");
                    Ok(Reply::Bool(true))
                }
            },
            Override::Ping => {
                Reply::from_resp(raw, mode)?;
                Ok(Reply::Bool(true))
            }
            Override::Scan => normalize_scan(Reply::from_resp(raw, mode)?),
            Override::PassThrough => Reply::from_resp(raw, mode),
        }
    }
}

fn frame(command: &str, args: &[Bytes]) -> Vec<Bytes> {
    let mut frame = Vec::with_capacity(args.len() + 1);
    frame.push(Bytes::copy_from_slice(command.as_bytes()));
    frame.extend(args.iter().cloned());
    frame
}

/// `[cursor, items]`. The cursor is `Int`, or decimal `Text` past `i64::MAX`.
fn normalize_scan(reply: Reply) -> Result<Reply> {
    let mut parts = reply.into_array()?;
    if parts.len() != 2 {
        return Err(Error::Protocol(format!(
            "scan reply has {} elements, expected 2",
            parts.len()
        )));
    }
    let items = parts.pop().map(Reply::into_array).transpose()?.unwrap_or_default();
    let cursor = match parts.pop() {
        Some(cursor) => cursor.into_uint()?,
        None => 0,
    };
    let cursor = match i64::try_from(cursor) {
        Ok(small) => Reply::Int(small),
        Err(_) => Reply::Text(cursor.to_string()),
    };
    Ok(Reply::Array(vec![cursor, Reply::Array(items)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{ClientConfig, Strategy, Topology, ValueMode};
    use crate::connection::mock::{ep, MockFactory};
    use crate::error::ErrorKind;
    use crate::pool::{AnyPool, PoolOptions, ReplicatedPool, SingleNodePool};

    fn args(list: &[&str]) -> Vec<Bytes> {
        list.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect()
    }

    fn replicated(factory: &MockFactory, options: PoolOptions) -> Driver<AnyPool<MockFactory>> {
        Driver::new(AnyPool::Replicated(ReplicatedPool::primary_replica(
            Arc::new(factory.clone()),
            ep("a"),
            vec![ep("b"), ep("c")],
            Strategy::RoundRobin,
            options,
        )))
    }

    fn single(factory: &MockFactory) -> Driver<SingleNodePool<MockFactory>> {
        Driver::new(SingleNodePool::new(
            Arc::new(factory.clone()),
            ep("a"),
            PoolOptions::default(),
        ))
    }

    #[tokio::test]
    async fn routes_by_command() {
        let factory = MockFactory::new();
        let driver = replicated(&factory, PoolOptions::default());
        let mut hosts = Vec::new();
        for cmd in ["get", "set", "get", "get"] {
            driver.call(cmd, &args(&["k"])).await.unwrap();
            hosts.push(factory.calls().last().unwrap().0.host.clone());
        }
        assert_eq!(hosts, ["b", "a", "c", "b"]);
    }

    #[tokio::test]
    async fn normalizes_replies() {
        let factory = MockFactory::new();
        let driver = single(&factory);
        assert_eq!(driver.call("set", &args(&["k", "v"])).await.unwrap(), Reply::Bool(true));
        assert_eq!(driver.call("missing", &[]).await.unwrap(), Reply::Nil);
        assert_eq!(driver.call("flag", &[]).await.unwrap(), Reply::Bool(true));
        assert_eq!(driver.call("exists", &args(&["k"])).await.unwrap(), Reply::Int(1));
        assert_eq!(
            driver.call("get", &args(&["k"])).await.unwrap(),
            Reply::Bytes(Bytes::from_static(b"a"))
        );
    }

    #[tokio::test]
    async fn utf8_value_mode() {
        let factory = MockFactory::new().with_value_mode(ValueMode::Utf8);
        let driver = single(&factory);
        assert_eq!(
            driver.call("get", &args(&["k"])).await.unwrap(),
            Reply::Text("a".into())
        );
    }

    #[tokio::test]
    async fn server_errors_are_wrapped_not_retried() {
        let factory = MockFactory::new();
        let driver = single(&factory);
        let err = driver.call("wrongtype", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(matches!(&err, Error::Command { command, .. } if command == "wrongtype"));
        assert_eq!(factory.calls().len(), 1);
    }

    #[tokio::test]
    async fn ping_and_scan_overrides() {
        let factory = MockFactory::new();
        let driver = single(&factory);
        assert_eq!(driver.call("ping", &[]).await.unwrap(), Reply::Bool(true));
        assert_eq!(
            driver.call("scan", &args(&["0"])).await.unwrap(),
            Reply::Array(vec![
                Reply::Int(17),
                Reply::Array(vec![Reply::Bytes(Bytes::from_static(b"k1"))])
            ])
        );
    }

    #[tokio::test]
    async fn select_records_database() {
        let factory = MockFactory::new();
        let driver = replicated(&factory, PoolOptions::default());
        assert_eq!(driver.call("select", &args(&["3"])).await.unwrap(), Reply::Bool(true));
        assert_eq!(driver.pool().database(), 3);

        // The primary already switched through SELECT; replicas catch up lazily.
        driver.call("set", &args(&["k", "v"])).await.unwrap();
        driver.call("get", &args(&["k"])).await.unwrap();
        assert_eq!(factory.selects(), vec![(ep("b"), 3)]);
    }

    #[tokio::test]
    async fn select_rejection() {
        let factory = MockFactory::new();
        let driver = single(&factory);
        let err = driver.call("select", &args(&["99"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDatabaseIndex);
        assert_eq!(driver.pool().database(), 0);

        let err = driver.call("select", &args(&["nope"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_after_reconnect() {
        let factory = MockFactory::new();
        let driver = replicated(&factory, PoolOptions::default());
        driver.call("set", &args(&["k", "v"])).await.unwrap();

        factory.drop_connections(&ep("a"));
        assert_eq!(driver.call("set", &args(&["k", "v"])).await.unwrap(), Reply::Bool(true));
        assert_eq!(driver.pool().stats().await.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_fails() {
        let factory = MockFactory::new();
        let options = PoolOptions {
            max_fails: 2,
            retry_wait: Duration::from_millis(50),
            ..PoolOptions::default()
        };
        let driver = replicated(&factory, options);
        driver.call("set", &args(&["k", "v"])).await.unwrap();

        factory.set_down(&ep("a"), true);
        let start = tokio::time::Instant::now();
        let err = driver.call("set", &args(&["k", "v"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolUnavailable);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(driver.pool().stats().await.failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_the_failure_budget() {
        let factory = MockFactory::new();
        let options = PoolOptions {
            max_fails: 5,
            retry_wait: Duration::from_millis(100),
            ..PoolOptions::default()
        };
        let driver = replicated(&factory, options);
        driver.call("set", &args(&["k", "v"])).await.unwrap();

        factory.set_down(&ep("a"), true);
        let revive = {
            let factory = factory.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                factory.set_down(&ep("a"), false);
            })
        };

        let start = tokio::time::Instant::now();
        assert_eq!(driver.call("set", &args(&["k", "v"])).await.unwrap(), Reply::Bool(true));
        // Two failed reconnect passes, then the primary is back.
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(300));
        assert_eq!(driver.pool().stats().await.failures, 0);
        revive.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_pool_on_first_attempt_is_not_retried() {
        let factory = MockFactory::new();
        factory.set_down(&ep("a"), true);
        let driver = replicated(&factory, PoolOptions::default());

        let err = driver.call("get", &args(&["k"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolUnavailable);
        assert_eq!(driver.pool().stats().await.failures, 0);
    }

    #[test]
    fn scan_cursor_past_i64_is_kept() {
        let big = Reply::Array(vec![
            Reply::Bytes(Bytes::from(u64::MAX.to_string())),
            Reply::Array(vec![]),
        ]);
        assert_eq!(
            normalize_scan(big).unwrap(),
            Reply::Array(vec![Reply::Text(u64::MAX.to_string()), Reply::Array(vec![])])
        );

        let negative = Reply::Array(vec![Reply::Int(-3), Reply::Array(vec![])]);
        assert_eq!(normalize_scan(negative).unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn single_node_does_not_retry() {
        let factory = MockFactory::new();
        let driver = single(&factory);
        driver.call("set", &args(&["k", "v"])).await.unwrap();

        factory.drop_connections(&ep("a"));
        let err = driver.call("set", &args(&["k", "v"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);

        // The broken handle was discarded, so the next call reconnects.
        driver.call("set", &args(&["k", "v"])).await.unwrap();
        assert_eq!(factory.creates().len(), 2);
    }

    #[tokio::test]
    async fn admin_call_uses_fresh_connection() {
        let factory = MockFactory::new();
        let config = ClientConfig::new(Topology::Single(ep("a")));
        let driver = Driver::new(AnyPool::from_config(Arc::new(factory.clone()), &config).unwrap());
        assert_eq!(driver.call_admin("info", &[]).await.unwrap(), Reply::Bool(true));
        assert_eq!(factory.creates(), vec![ep("a")]);
        assert_eq!(driver.pool().stats().await.primaries, 0);
    }
}
