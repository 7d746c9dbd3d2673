//! # Fake Store Server
//!
//! Accept RESP connections, parse commands, and answer them from an
//! in-memory keyspace. Runs on its own tokio runtime in a background thread
//! so blocking clients under test can talk to it from plain `#[test]`s.
//!
//! Supported commands: PING, ECHO, AUTH, SELECT, CLIENT, QUIT, INFO, GET,
//! SET (EX/PX, NX/XX), DEL, EXISTS, SADD, SMEMBERS, SREM, HSET, HGETALL.
//! Any command can be overridden with a canned raw reply.

use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};

use crate::protocol::{RespError, RespParser};

enum Entry {
    Str {
        value: Vec<u8>,
        expires_at: Option<Instant>,
    },
    Set(BTreeSet<Vec<u8>>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self, Entry::Str { expires_at: Some(at), .. } if *at <= now)
    }
}

struct ServerState {
    password: Option<String>,
    keyspace: Mutex<HashMap<Vec<u8>, Entry>>,
    overrides: Mutex<HashMap<String, Vec<u8>>>,
    command_counts: Mutex<HashMap<String, usize>>,
    accepted: AtomicUsize,
    // Bumped by `disconnect_all`; every connection task watches it.
    kick: watch::Sender<u64>,
}

impl ServerState {
    fn new(password: Option<String>) -> Self {
        let (kick, _) = watch::channel(0);
        ServerState {
            password,
            keyspace: Mutex::new(HashMap::new()),
            overrides: Mutex::new(HashMap::new()),
            command_counts: Mutex::new(HashMap::new()),
            accepted: AtomicUsize::new(0),
            kick,
        }
    }
}

/// Builder for `FakeServer`.
#[derive(Debug, Default)]
pub struct FakeServerBuilder {
    password: Option<String>,
}

impl FakeServerBuilder {
    /// Requires `AUTH <password>` before any data command.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Binds to an ephemeral localhost port and starts serving.
    pub fn start(self) -> io::Result<FakeServer> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let state = Arc::new(ServerState::new(self.password));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let (stop_tx, stop_rx) = oneshot::channel();

        let serve_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("fkv-testkit".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    match TcpListener::from_std(listener) {
                        Ok(listener) => serve(listener, serve_state, stop_rx).await,
                        Err(err) => tracing::error!(error = %err, "fake server failed to start"),
                    }
                });
            })?;

        Ok(FakeServer {
            addr,
            state,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// In-memory RESP server for tests and local benchmarks.
pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn builder() -> FakeServerBuilder {
        FakeServerBuilder::default()
    }

    /// Starts a server without authentication.
    pub fn start() -> io::Result<Self> {
        FakeServer::builder().start()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `host:port` string usable as a connection string.
    pub fn connection_string(&self) -> String {
        self.addr.to_string()
    }

    /// Number of TCP connections accepted so far.
    pub fn connections_accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Number of times `command` (case-insensitive) was received.
    pub fn command_count(&self, command: &str) -> usize {
        let key = command.to_ascii_uppercase();
        self.state.command_counts.lock().get(&key).copied().unwrap_or(0)
    }

    /// Answers every future `command` with `raw_reply` verbatim.
    pub fn set_reply(&self, command: &str, raw_reply: impl Into<Vec<u8>>) {
        self.state
            .overrides
            .lock()
            .insert(command.to_ascii_uppercase(), raw_reply.into());
    }

    /// Drops every open client connection; the listener keeps accepting.
    pub fn disconnect_all(&self) {
        self.state.kick.send_modify(|generation| *generation += 1);
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve(listener: TcpListener, state: Arc<ServerState>, mut stop: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    state.accepted.fetch_add(1, Ordering::SeqCst);
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, state).await {
                            tracing::debug!(error = %err, "fake server connection ended");
                        }
                    });
                }
                Err(err) => tracing::warn!(error = %err, "fake server accept failed"),
            },
        }
    }
}

/// Handles a single client connection.
async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut authenticated = state.password.is_none();
    let mut kick = state.kick.subscribe();

    loop {
        let bytes = tokio::select! {
            read = stream.read_buf(&mut buffer) => read?,
            _ = kick.changed() => return Ok(()),
        };
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    let quit = is_command(&args, b"QUIT");
                    let response = dispatch_command(&args, &state, &mut authenticated);
                    stream.write_all(&response).await?;
                    if quit {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    stream.write_all(&resp_error("protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn dispatch_command(args: &[Vec<u8>], state: &ServerState, authenticated: &mut bool) -> Vec<u8> {
    if args.is_empty() {
        return resp_error("empty command");
    }

    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    *state.command_counts.lock().entry(name.clone()).or_insert(0) += 1;

    if let Some(raw) = state.overrides.lock().get(&name) {
        return raw.clone();
    }

    match name.as_str() {
        "AUTH" => return handle_auth(args, state, authenticated),
        "QUIT" => return resp_simple("OK"),
        "PING" => return handle_ping(args),
        _ => {}
    }
    if !*authenticated {
        return resp_raw_error("NOAUTH Authentication required.");
    }

    match name.as_str() {
        "ECHO" if args.len() == 2 => resp_bulk(&args[1]),
        "SELECT" | "CLIENT" => resp_simple("OK"),
        "INFO" => resp_bulk(b"role:master\r\nengine:fkv-testkit\r\n"),
        "GET" => handle_get(args, state),
        "SET" => handle_set(args, state),
        "DEL" => handle_del(args, state),
        "EXISTS" => handle_exists(args, state),
        "SADD" => handle_sadd(args, state),
        "SMEMBERS" => handle_smembers(args, state),
        "SREM" => handle_srem(args, state),
        "HSET" => handle_hset(args, state),
        "HGETALL" => handle_hgetall(args, state),
        _ => resp_error("unknown command"),
    }
}

fn handle_auth(args: &[Vec<u8>], state: &ServerState, authenticated: &mut bool) -> Vec<u8> {
    let supplied = match args.len() {
        2 => &args[1],
        3 => &args[2],
        _ => return resp_error("wrong number of arguments for AUTH"),
    };
    match &state.password {
        Some(password) if password.as_bytes() == supplied.as_slice() => {
            *authenticated = true;
            resp_simple("OK")
        }
        Some(_) => resp_raw_error("WRONGPASS invalid username-password pair"),
        None => resp_error("AUTH called without any password configured"),
    }
}

fn handle_ping(args: &[Vec<u8>]) -> Vec<u8> {
    match args.len() {
        1 => resp_simple("PONG"),
        2 => resp_bulk(&args[1]),
        _ => resp_error("wrong number of arguments for PING"),
    }
}

fn handle_get(args: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for GET");
    }
    let mut keyspace = state.keyspace.lock();
    purge_if_expired(&mut keyspace, &args[1]);
    match keyspace.get(&args[1]) {
        Some(Entry::Str { value, .. }) => resp_bulk(value),
        Some(_) => resp_wrong_type(),
        None => resp_null(),
    }
}

fn handle_set(args: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    if args.len() < 3 {
        return resp_error("wrong number of arguments for SET");
    }

    let mut ttl = None;
    let mut only_if_exists = false;
    let mut only_if_missing = false;
    let mut idx = 3;
    while idx < args.len() {
        let option = String::from_utf8_lossy(&args[idx]).to_ascii_uppercase();
        match option.as_str() {
            "NX" => only_if_missing = true,
            "XX" => only_if_exists = true,
            "EX" | "PX" => {
                let Some(raw) = args.get(idx + 1) else {
                    return resp_error("syntax error");
                };
                let amount = match parse_u64(raw) {
                    Ok(amount) => amount,
                    Err(resp) => return resp,
                };
                ttl = Some(if option == "EX" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                });
                idx += 1;
            }
            _ => return resp_error("syntax error"),
        }
        idx += 1;
    }
    if only_if_exists && only_if_missing {
        return resp_error("syntax error");
    }

    let mut keyspace = state.keyspace.lock();
    purge_if_expired(&mut keyspace, &args[1]);
    let exists = keyspace.contains_key(&args[1]);
    if (only_if_exists && !exists) || (only_if_missing && exists) {
        return resp_null();
    }

    keyspace.insert(
        args[1].clone(),
        Entry::Str {
            value: args[2].clone(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        },
    );
    resp_simple("OK")
}

fn handle_del(args: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    if args.len() < 2 {
        return resp_error("wrong number of arguments for DEL");
    }

    let mut keyspace = state.keyspace.lock();
    let mut removed = 0i64;
    for key in &args[1..] {
        purge_if_expired(&mut keyspace, key);
        if keyspace.remove(key).is_some() {
            removed += 1;
        }
    }
    resp_integer(removed)
}

fn handle_exists(args: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    if args.len() < 2 {
        return resp_error("wrong number of arguments for EXISTS");
    }

    let mut keyspace = state.keyspace.lock();
    let mut found = 0i64;
    for key in &args[1..] {
        purge_if_expired(&mut keyspace, key);
        if keyspace.contains_key(key) {
            found += 1;
        }
    }
    resp_integer(found)
}

fn handle_sadd(args: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    if args.len() < 3 {
        return resp_error("wrong number of arguments for SADD");
    }

    let mut keyspace = state.keyspace.lock();
    let entry = keyspace
        .entry(args[1].clone())
        .or_insert_with(|| Entry::Set(BTreeSet::new()));
    let Entry::Set(members) = entry else {
        return resp_wrong_type();
    };
    let added = args[2..]
        .iter()
        .filter(|member| members.insert(member.to_vec()))
        .count();
    resp_integer(added as i64)
}

fn handle_smembers(args: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for SMEMBERS");
    }

    let keyspace = state.keyspace.lock();
    match keyspace.get(&args[1]) {
        Some(Entry::Set(members)) => resp_array(members.iter().map(|m| m.as_slice())),
        Some(_) => resp_wrong_type(),
        None => resp_array(std::iter::empty()),
    }
}

fn handle_srem(args: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    if args.len() < 3 {
        return resp_error("wrong number of arguments for SREM");
    }

    let mut keyspace = state.keyspace.lock();
    let removed = match keyspace.get_mut(&args[1]) {
        Some(Entry::Set(members)) => args[2..].iter().filter(|m| members.remove(*m)).count(),
        Some(_) => return resp_wrong_type(),
        None => 0,
    };
    if matches!(keyspace.get(&args[1]), Some(Entry::Set(members)) if members.is_empty()) {
        keyspace.remove(&args[1]);
    }
    resp_integer(removed as i64)
}

fn handle_hset(args: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    if args.len() < 4 || args.len() % 2 != 0 {
        return resp_error("wrong number of arguments for HSET");
    }

    let mut keyspace = state.keyspace.lock();
    let entry = keyspace
        .entry(args[1].clone())
        .or_insert_with(|| Entry::Hash(Vec::new()));
    let Entry::Hash(fields) = entry else {
        return resp_wrong_type();
    };

    let mut added = 0i64;
    for pair in args[2..].chunks(2) {
        match fields.iter_mut().find(|(field, _)| *field == pair[0]) {
            Some((_, value)) => *value = pair[1].clone(),
            None => {
                fields.push((pair[0].clone(), pair[1].clone()));
                added += 1;
            }
        }
    }
    resp_integer(added)
}

fn handle_hgetall(args: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for HGETALL");
    }

    let keyspace = state.keyspace.lock();
    match keyspace.get(&args[1]) {
        Some(Entry::Hash(fields)) => resp_array(
            fields
                .iter()
                .flat_map(|(field, value)| [field.as_slice(), value.as_slice()]),
        ),
        Some(_) => resp_wrong_type(),
        None => resp_array(std::iter::empty()),
    }
}

fn purge_if_expired(keyspace: &mut HashMap<Vec<u8>, Entry>, key: &[u8]) {
    if keyspace.get(key).is_some_and(|entry| entry.is_expired(Instant::now())) {
        keyspace.remove(key);
    }
}

fn is_command(args: &[Vec<u8>], name: &[u8]) -> bool {
    args.first().is_some_and(|cmd| cmd.eq_ignore_ascii_case(name))
}

fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_error(message: &str) -> Vec<u8> {
    resp_raw_error(&format!("ERR {}", message))
}

fn resp_raw_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"-");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_wrong_type() -> Vec<u8> {
    resp_raw_error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn resp_integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b":");
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_array<'a>(items: impl Iterator<Item = &'a [u8]>) -> Vec<u8> {
    let items: Vec<&[u8]> = items.collect();
    let mut buf = Vec::new();
    buf.extend_from_slice(b"*");
    buf.extend_from_slice(items.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for item in items {
        buf.extend_from_slice(&resp_bulk(item));
    }
    buf
}

fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn parse_u64(arg: &[u8]) -> Result<u64, Vec<u8>> {
    if arg.is_empty() {
        return Err(resp_error("invalid integer"));
    }
    let mut value: u64 = 0;
    for &b in arg {
        if !b.is_ascii_digit() {
            return Err(resp_error("invalid integer"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as u64);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    #[test]
    fn set_conditions_follow_existence() {
        let state = ServerState::new(None);
        let mut auth = true;
        assert_eq!(dispatch_command(&command(&["SET", "k", "v", "XX"]), &state, &mut auth), resp_null());
        assert_eq!(dispatch_command(&command(&["SET", "k", "v", "NX"]), &state, &mut auth), resp_simple("OK"));
        assert_eq!(dispatch_command(&command(&["SET", "k", "w", "NX"]), &state, &mut auth), resp_null());
        assert_eq!(dispatch_command(&command(&["GET", "k"]), &state, &mut auth), resp_bulk(b"v"));
    }

    #[test]
    fn sets_track_membership() {
        let state = ServerState::new(None);
        let mut auth = true;
        assert_eq!(dispatch_command(&command(&["SADD", "s", "b", "a", "a"]), &state, &mut auth), resp_integer(2));
        assert_eq!(
            dispatch_command(&command(&["SMEMBERS", "s"]), &state, &mut auth),
            resp_array([b"a".as_slice(), b"b".as_slice()].into_iter())
        );
        assert_eq!(dispatch_command(&command(&["SREM", "s", "a", "z"]), &state, &mut auth), resp_integer(1));
    }

    #[test]
    fn auth_gates_data_commands() {
        let state = ServerState::new(Some("pw".to_string()));
        let mut auth = false;
        assert!(dispatch_command(&command(&["GET", "k"]), &state, &mut auth).starts_with(b"-NOAUTH"));
        assert!(dispatch_command(&command(&["AUTH", "nope"]), &state, &mut auth).starts_with(b"-WRONGPASS"));
        assert_eq!(dispatch_command(&command(&["AUTH", "pw"]), &state, &mut auth), resp_simple("OK"));
        assert_eq!(dispatch_command(&command(&["GET", "k"]), &state, &mut auth), resp_null());
    }

    #[test]
    fn overrides_replace_replies() {
        let state = ServerState::new(None);
        state.overrides.lock().insert("INFO".to_string(), b"$1\r\nx\r\n".to_vec());
        let mut auth = true;
        assert_eq!(dispatch_command(&command(&["info"]), &state, &mut auth), b"$1\r\nx\r\n".to_vec());
    }
}
