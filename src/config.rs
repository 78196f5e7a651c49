//! Endpoint, topology and client configuration, plus URL parsing.
//!
//! Supported URL schemes:
//! - `redis://[user:pass@]host[:port][/db]`: single node
//! - `redis+replicas://[user:pass@]primary[,replica…][/db]`: primary + replicas
//! - `redis+multi://[user:pass@]p1[,p2…][;r1[,r2…]][/db]`: multi-primary
//! - `redis+sentinel://[user:pass@]service@s1[:port][,s2…][/db]`: sentinel
//!
//! Every scheme accepts `?key=value&…` options: `strategy`,
//! `connect_timeout_ms`, `read_timeout_ms`, `retry_wait_ms`, `max_fails`,
//! `replica_reads`, `auto_select_db`, `decode`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default Redis Sentinel port.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// A reachable server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host[:port]` or `[ipv6]:port`, filling in `default_port`.
    pub fn parse(s: &str, default_port: u16) -> Result<Self> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| Error::Configuration(format!("unclosed IPv6 bracket: {s}")))?;
            let port = match after.strip_prefix(':') {
                Some(p) => parse_port(p)?,
                None => default_port,
            };
            (host.to_string(), port)
        } else {
            match s.rsplit_once(':') {
                // Bare IPv6 without brackets: no port.
                Some((h, _)) if h.contains(':') => (s.to_string(), default_port),
                Some((h, p)) => (h.to_string(), parse_port(p)?),
                None => (s.to_string(), default_port),
            }
        };
        let host = if host.is_empty() {
            "127.0.0.1".to_string()
        } else {
            host
        };
        Ok(Self { host, port })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

/// How to choose among equally eligible endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Uniform pick per call.
    #[default]
    Random,
    /// Shared cursor, advances one position per selection and wraps.
    RoundRobin,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::RoundRobin => "round-robin",
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "round-robin" | "roundrobin" | "round_robin" => Ok(Self::RoundRobin),
            other => Err(Error::Configuration(format!(
                "unsupported strategy '{other}', expected 'random' or 'round-robin'"
            ))),
        }
    }
}

/// Shape of the endpoint set.
#[derive(Debug, Clone, PartialEq)]
pub enum Topology {
    Single(Endpoint),
    PrimaryReplica {
        primary: Endpoint,
        replicas: Vec<Endpoint>,
        strategy: Strategy,
    },
    MultiPrimary {
        primaries: Vec<Endpoint>,
        replicas: Vec<Endpoint>,
        strategy: Strategy,
    },
    /// Primary and replicas are discovered through sentinels.
    Sentinel {
        sentinels: Vec<Endpoint>,
        service_name: String,
    },
}

impl Topology {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Single(_) => "single",
            Self::PrimaryReplica { .. } => "primary-replica",
            Self::MultiPrimary { .. } => "multi-primary",
            Self::Sentinel { .. } => "sentinel",
        }
    }

    fn set_strategy(&mut self, value: Strategy) -> Result<()> {
        match self {
            Self::PrimaryReplica { strategy, .. } | Self::MultiPrimary { strategy, .. } => {
                *strategy = value;
                Ok(())
            }
            other => Err(Error::Configuration(format!(
                "strategy is not supported by the {} topology",
                other.name()
            ))),
        }
    }
}

/// How bulk replies are surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueMode {
    /// Raw bytes.
    #[default]
    Bytes,
    /// UTF-8 text when valid, raw bytes otherwise.
    Utf8,
}

/// Full client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub topology: Topology,
    /// Optional username (Redis 6+ ACL).
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database index selected on every connection.
    pub database: u16,
    /// Single node only: issue `SELECT` on connect when `database` is
    /// non-zero. Replicated pools always keep every connection on `database`.
    pub auto_select_db: bool,
    /// Route read-only commands to replicas.
    pub replica_reads: bool,
    pub connect_timeout_ms: u64,
    /// Per-command reply timeout (0 = none).
    pub read_timeout_ms: u64,
    /// Backoff between failed reconnect passes.
    pub retry_wait_ms: u64,
    /// Consecutive failed reconnect passes before giving up.
    pub max_fails: u32,
    pub value_mode: ValueMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            topology: Topology::Single(Endpoint::default()),
            username: None,
            password: None,
            database: 0,
            auto_select_db: true,
            replica_reads: true,
            connect_timeout_ms: 5000,
            read_timeout_ms: 30_000,
            retry_wait_ms: 200,
            max_fails: 3,
            value_mode: ValueMode::Bytes,
        }
    }
}

impl ClientConfig {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    /// Reject configurations no pool can be built from.
    pub fn validate(&self) -> Result<()> {
        match &self.topology {
            Topology::Single(_) | Topology::PrimaryReplica { .. } => {}
            Topology::MultiPrimary { primaries, .. } => {
                if primaries.is_empty() {
                    return Err(Error::Configuration(
                        "multi-primary topology needs at least one primary".into(),
                    ));
                }
            }
            Topology::Sentinel {
                sentinels,
                service_name,
            } => {
                if sentinels.is_empty() {
                    return Err(Error::Configuration(
                        "sentinel topology needs at least one sentinel".into(),
                    ));
                }
                if service_name.is_empty() {
                    return Err(Error::Configuration("empty sentinel service name".into()));
                }
            }
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::Configuration("connect_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Parse a URL into a ClientConfig.
    pub fn from_url(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::Configuration(format!("invalid URL, missing ://: {url}")))?;
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, Some(q)),
            None => (rest, None),
        };

        let mut config = Self::default();
        let (host_part, db_part) = split_path(rest);
        if let Some(db) = db_part {
            config.database = db
                .parse()
                .map_err(|_| Error::Configuration(format!("invalid db number: {db}")))?;
        }

        config.topology = match scheme {
            "redis" => {
                let host_port = strip_userinfo(&mut config, host_part);
                Topology::Single(Endpoint::parse(host_port, DEFAULT_PORT)?)
            }
            "redis+replicas" => {
                let hosts = strip_userinfo(&mut config, host_part);
                let mut endpoints = parse_host_list(hosts, DEFAULT_PORT)?.into_iter();
                let primary = endpoints.next().ok_or_else(|| {
                    Error::Configuration("replica URL must include a primary host".into())
                })?;
                Topology::PrimaryReplica {
                    primary,
                    replicas: endpoints.collect(),
                    strategy: Strategy::Random,
                }
            }
            "redis+multi" => {
                let hosts = strip_userinfo(&mut config, host_part);
                let (primaries, replicas) = match hosts.split_once(';') {
                    Some((p, r)) => (p, r),
                    None => (hosts, ""),
                };
                Topology::MultiPrimary {
                    primaries: parse_host_list(primaries, DEFAULT_PORT)?,
                    replicas: parse_host_list(replicas, DEFAULT_PORT)?,
                    strategy: Strategy::Random,
                }
            }
            "redis+sentinel" => parse_sentinel(&mut config, host_part)?,
            "rediss" | "rediss+replicas" | "rediss+multi" | "rediss+sentinel" => {
                return Err(Error::Configuration(format!(
                    "TLS schemes are not supported: {scheme}"
                )));
            }
            other => {
                return Err(Error::Configuration(format!("unknown URL scheme: {other}")));
            }
        };

        if let Some(query) = query {
            apply_query(&mut config, query)?;
        }
        config.validate()?;
        Ok(config)
    }
}

// ── URL parsing helpers ────────────────────────────────────────────

/// Split `rest` into (before_path, Some(path)) or (rest, None).
fn split_path(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('/') {
        Some((before, after)) if !after.is_empty() => (before, Some(after)),
        Some((before, _)) => (before, None),
        None => (rest, None),
    }
}

/// Strip a `user:pass@` prefix into the config, returning the host part.
fn strip_userinfo<'a>(config: &mut ClientConfig, host_part: &'a str) -> &'a str {
    match host_part.rsplit_once('@') {
        Some((userinfo, hosts)) => {
            parse_userinfo(config, userinfo);
            hosts
        }
        None => host_part,
    }
}

/// Parse `user:pass`, `:pass` or a bare password.
fn parse_userinfo(config: &mut ClientConfig, userinfo: &str) {
    match userinfo.split_once(':') {
        Some((user, pass)) => {
            if !user.is_empty() {
                config.username = Some(user.to_string());
            }
            if !pass.is_empty() {
                config.password = Some(pass.to_string());
            }
        }
        None if !userinfo.is_empty() => config.password = Some(userinfo.to_string()),
        None => {}
    }
}

fn parse_host_list(hosts: &str, default_port: u16) -> Result<Vec<Endpoint>> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| Endpoint::parse(h, default_port))
        .collect()
}

/// Parse `[user:pass@]service@host[:port][,host[:port]…]`.
fn parse_sentinel(config: &mut ClientConfig, host_part: &str) -> Result<Topology> {
    let parts: Vec<&str> = host_part.split('@').collect();
    let (service_name, hosts) = match parts.len() {
        2 => (parts[0], parts[1]),
        3 => {
            parse_userinfo(config, parts[0]);
            (parts[1], parts[2])
        }
        _ => {
            return Err(Error::Configuration(
                "sentinel URL must look like redis+sentinel://service@host:port".into(),
            ));
        }
    };
    if service_name.is_empty() {
        return Err(Error::Configuration("empty sentinel service name".into()));
    }
    let sentinels = parse_host_list(hosts, DEFAULT_SENTINEL_PORT)?;
    if sentinels.is_empty() {
        return Err(Error::Configuration(
            "sentinel URL must include at least one sentinel host".into(),
        ));
    }
    Ok(Topology::Sentinel {
        sentinels,
        service_name: service_name.to_string(),
    })
}

fn apply_query(config: &mut ClientConfig, query: &str) -> Result<()> {
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::Configuration(format!("option without value: {pair}")))?;
        match key {
            "strategy" => config.topology.set_strategy(value.parse()?)?,
            "connect_timeout_ms" => config.connect_timeout_ms = parse_number(key, value)?,
            "read_timeout_ms" => config.read_timeout_ms = parse_number(key, value)?,
            "retry_wait_ms" => config.retry_wait_ms = parse_number(key, value)?,
            "max_fails" => config.max_fails = parse_number(key, value)?,
            "replica_reads" => config.replica_reads = parse_flag(key, value)?,
            "auto_select_db" => config.auto_select_db = parse_flag(key, value)?,
            "decode" => {
                config.value_mode = if parse_flag(key, value)? {
                    ValueMode::Utf8
                } else {
                    ValueMode::Bytes
                }
            }
            other => {
                return Err(Error::Configuration(format!("unknown URL option: {other}")));
            }
        }
    }
    Ok(())
}

fn parse_port(p: &str) -> Result<u16> {
    p.parse()
        .map_err(|_| Error::Configuration(format!("invalid port: {p}")))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid value for {key}: {value}")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Configuration(format!("invalid value for {key}: {value}"))),
    }
}

// ── Tests ──────────────────────────────────────────────────────────
