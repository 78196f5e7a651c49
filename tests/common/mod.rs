//! Shared helpers for integration tests.
//!
//! [`FakeServer`] is an in-process Redis-protocol server on `127.0.0.1:0`.
//! It records every command it receives, answers `GET` of an unknown key
//! with its own name (so tests can see where a read was routed), and can
//! play a sentinel for one service.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use kvroute::resp::{parse, RespValue};
use kvroute::{Endpoint, Error};

/// Install a test subscriber once; `RUST_LOG=kvroute=debug` shows routing.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct SentinelView {
    service: String,
    primary: Option<Endpoint>,
    replicas: Vec<(Endpoint, String)>,
}

struct ServerState {
    role: String,
    password: Option<String>,
    store: HashMap<(u16, Bytes), Bytes>,
    commands: Vec<Vec<String>>,
    connections: usize,
    sentinel: Option<SentinelView>,
}

/// A scripted Redis-protocol server.
pub struct FakeServer {
    name: String,
    endpoint: Endpoint,
    state: Arc<Mutex<ServerState>>,
    alive: Arc<AtomicBool>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl FakeServer {
    pub async fn start(name: &str) -> Self {
        Self::start_with_role(name, "master").await
    }

    pub async fn start_with_role(name: &str, role: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState {
            role: role.to_string(),
            password: None,
            store: HashMap::new(),
            commands: Vec::new(),
            connections: 0,
            sentinel: None,
        }));
        let alive = Arc::new(AtomicBool::new(true));

        let accept = {
            let name = name.to_string();
            let state = Arc::clone(&state);
            let alive = Arc::clone(&alive);
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        break;
                    };
                    state.lock().connections += 1;
                    tokio::spawn(serve(
                        socket,
                        name.clone(),
                        Arc::clone(&state),
                        Arc::clone(&alive),
                    ));
                }
            })
        };

        Self {
            name: name.to_string(),
            endpoint: Endpoint::new("127.0.0.1", addr.port()),
            state,
            alive,
            accept: Mutex::new(Some(accept)),
        }
    }

    /// A sentinel that knows `service`.
    pub async fn sentinel(name: &str, service: &str) -> Self {
        let server = Self::start_with_role(name, "sentinel").await;
        server.state.lock().sentinel = Some(SentinelView {
            service: service.to_string(),
            ..SentinelView::default()
        });
        server
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub fn addr(&self) -> String {
        self.endpoint.to_string()
    }

    pub fn set_role(&self, role: &str) {
        self.state.lock().role = role.to_string();
    }

    pub fn require_password(&self, password: &str) {
        self.state.lock().password = Some(password.to_string());
    }

    /// Point this sentinel at a primary and replicas (`(endpoint, flags)`).
    pub fn point_at(&self, primary: &FakeServer, replicas: &[(&FakeServer, &str)]) {
        let mut state = self.state.lock();
        let view = state.sentinel.get_or_insert_with(SentinelView::default);
        view.primary = Some(primary.endpoint());
        view.replicas = replicas
            .iter()
            .map(|(server, flags)| (server.endpoint(), flags.to_string()))
            .collect();
    }

    /// Every command received, lower-cased name first.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().commands.clone()
    }

    /// Received command names, handshake and probes excluded.
    pub fn data_commands(&self) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|c| c.first().cloned())
            .filter(|c| !matches!(c.as_str(), "hello" | "auth" | "role" | "select"))
            .collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some(command))
            .count()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Stop listening and drop every open connection at its next command.
    /// New connections are refused once this returns.
    pub async fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let accept = self.accept.lock().take();
        if let Some(accept) = accept {
            accept.abort();
            let _ = accept.await;
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(accept) = self.accept.lock().take() {
            accept.abort();
        }
    }
}

async fn serve(mut socket: TcpStream, name: String, state: Arc<Mutex<ServerState>>, alive: Arc<AtomicBool>) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut conn = ConnState::default();
    loop {
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        loop {
            let snapshot = buf.split().freeze();
            let (frame, consumed) = match parse(&snapshot) {
                Ok(parsed) => parsed,
                Err(Error::Incomplete) => {
                    buf.extend_from_slice(&snapshot);
                    break;
                }
                Err(_) => return,
            };
            buf.extend_from_slice(&snapshot[consumed..]);

            if !alive.load(Ordering::SeqCst) {
                return;
            }
            let args = frame_args(frame);
            let reply = respond(&name, &state, &mut conn, &args);
            if socket.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

#[derive(Default)]
struct ConnState {
    database: u16,
    resp3: bool,
    authenticated: bool,
}

fn frame_args(frame: RespValue) -> Vec<Bytes> {
    match frame {
        RespValue::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                RespValue::BulkString(b) => Some(b),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn respond(name: &str, state: &Mutex<ServerState>, conn: &mut ConnState, args: &[Bytes]) -> Vec<u8> {
    let text: Vec<String> = args
        .iter()
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect();
    let Some(command) = text.first().map(|c| c.to_ascii_lowercase()) else {
        return error("ERR empty command");
    };
    let mut state = state.lock();
    let mut logged = text.clone();
    logged[0] = command.clone();
    state.commands.push(logged);

    if state.password.is_some() && !conn.authenticated && !matches!(command.as_str(), "auth" | "hello") {
        return error("NOAUTH Authentication required.");
    }

    match command.as_str() {
        "hello" => {
            if let Some(pos) = text.iter().position(|a| a.eq_ignore_ascii_case("auth")) {
                let pass = text.get(pos + 2).cloned();
                if state.password.is_some() && state.password != pass {
                    return error("WRONGPASS invalid username-password pair");
                }
                conn.authenticated = true;
            } else if state.password.is_some() {
                return error("NOAUTH HELLO must be called with the client already authenticated");
            }
            conn.resp3 = text.get(1).map(String::as_str) == Some("3");
            let mut out = b"%2\r\n".to_vec();
            out.extend(bulk("server"));
            out.extend(bulk("redis"));
            out.extend(bulk("proto"));
            out.extend(integer(if conn.resp3 { 3 } else { 2 }));
            out
        }
        "auth" => {
            let pass = text.last().cloned();
            if state.password.is_some() && state.password == pass {
                conn.authenticated = true;
                ok()
            } else {
                error("WRONGPASS invalid username-password pair")
            }
        }
        "ping" => simple("PONG"),
        "select" => match text.get(1).and_then(|s| s.parse::<u16>().ok()) {
            Some(db) if db < 16 => {
                conn.database = db;
                ok()
            }
            _ => error("ERR DB index is out of range"),
        },
        "get" => {
            let key = args.get(1).cloned().unwrap_or_default();
            match state.store.get(&(conn.database, key)) {
                Some(value) => bulk_bytes(value),
                None => bulk(name),
            }
        }
        "set" => {
            if let (Some(key), Some(value)) = (args.get(1), args.get(2)) {
                state.store.insert((conn.database, key.clone()), value.clone());
            }
            ok()
        }
        "del" => {
            let removed = args[1..]
                .iter()
                .filter(|key| state.store.remove(&(conn.database, (*key).clone())).is_some())
                .count();
            integer(removed as i64)
        }
        "exists" => {
            let found = args[1..]
                .iter()
                .filter(|key| state.store.contains_key(&(conn.database, (*key).clone())))
                .count();
            integer(found as i64)
        }
        "dbsize" => {
            let db = conn.database;
            integer(state.store.keys().filter(|(d, _)| *d == db).count() as i64)
        }
        "info" => bulk(&format!("# Server\r\nname:{name}\r\nrole:{}\r\n", state.role)),
        "role" => {
            let mut out = b"*1\r\n".to_vec();
            out.extend(bulk(&state.role));
            out
        }
        "sentinel" => sentinel_reply(&state, &text, conn.resp3),
        _ => ok(),
    }
}

fn sentinel_reply(state: &ServerState, text: &[String], resp3: bool) -> Vec<u8> {
    let Some(view) = &state.sentinel else {
        return error("ERR unknown command 'SENTINEL'");
    };
    let sub = text.get(1).map(|s| s.to_ascii_lowercase()).unwrap_or_default();
    let service = text.get(2).map(String::as_str).unwrap_or_default();
    if service != view.service {
        return match sub.as_str() {
            "get-master-addr-by-name" => null(resp3),
            _ => error("ERR No such master with that name"),
        };
    }
    match (sub.as_str(), &view.primary) {
        ("get-master-addr-by-name", Some(primary)) => {
            let mut out = b"*2\r\n".to_vec();
            out.extend(bulk(&primary.host));
            out.extend(bulk(&primary.port.to_string()));
            out
        }
        ("get-master-addr-by-name", None) => null(resp3),
        ("replicas" | "slaves", _) => {
            let mut out = format!("*{}\r\n", view.replicas.len()).into_bytes();
            for (endpoint, flags) in &view.replicas {
                out.extend(b"*6\r\n");
                let port = endpoint.port.to_string();
                for field in ["ip", endpoint.host.as_str(), "port", port.as_str(), "flags", flags.as_str()] {
                    out.extend(bulk(field));
                }
            }
            out
        }
        _ => error("ERR unknown sentinel subcommand"),
    }
}

fn ok() -> Vec<u8> {
    simple("OK")
}

fn simple(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

fn error(msg: &str) -> Vec<u8> {
    format!("-{msg}\r\n").into_bytes()
}

fn integer(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

fn bulk(s: &str) -> Vec<u8> {
    bulk_bytes(s.as_bytes())
}

fn bulk_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn null(resp3: bool) -> Vec<u8> {
    if resp3 {
        b"_\r\n".to_vec()
    } else {
        b"*-1\r\n".to_vec()
    }
}
