use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use fkv_client::{ConnectionIdentity, ConnectionPool, RespValue, StoreHandle};
use fkv_common::FkvError;
use fkv_testkit::FakeServer;

fn spawn_server(expected_commands: usize, handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream)) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    if data.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "empty"));
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}

fn write_simple(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(b"+");
    let _ = stream.write_all(msg.as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn identity(server: &FakeServer) -> ConnectionIdentity {
    ConnectionIdentity::new(server.connection_string(), Duration::from_secs(2))
}

fn free_port_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").to_string()
}

#[test]
fn handshake_selects_database_and_names_client() {
    let addr = spawn_server(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args, vec![b"SELECT".to_vec(), b"3".to_vec()]);
            write_simple(stream, "OK");
        }
        1 => {
            assert_eq!(args, vec![b"CLIENT".to_vec(), b"SETNAME".to_vec(), b"flow".to_vec()]);
            write_simple(stream, "OK");
        }
        _ => {
            assert_eq!(args, vec![b"PING".to_vec()]);
            write_simple(stream, "PONG");
        }
    });

    let pool = ConnectionPool::tcp();
    let id = ConnectionIdentity::new(format!("{addr},defaultDatabase=3,name=flow"), Duration::from_secs(1));
    let handle = pool.get_or_create(&id).expect("connect");
    let reply = handle.exec(&[b"PING"]).expect("ping");
    assert_eq!(reply, RespValue::Simple(b"PONG".to_vec()));
}

#[test]
fn pooled_handle_roundtrip() {
    let server = FakeServer::start().expect("server");
    let pool = ConnectionPool::tcp();
    let handle = pool.get_or_create(&identity(&server)).expect("connect");

    assert_eq!(handle.exec(&[b"SET", b"key", b"value"]).unwrap(), RespValue::Simple(b"OK".to_vec()));
    assert_eq!(handle.exec(&[b"GET", b"key"]).unwrap(), RespValue::Bulk(Some(b"value".to_vec())));
    assert_eq!(handle.exec(&[b"DEL", b"key"]).unwrap(), RespValue::Integer(1));
}

#[test]
fn concurrent_callers_share_one_socket() {
    let server = FakeServer::start().expect("server");
    let pool = ConnectionPool::tcp();
    let id = identity(&server);
    let barrier = Barrier::new(8);

    let handles: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let pool = &pool;
                let id = &id;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    let handle = pool.get_or_create(id).expect("connect");
                    for round in 0..20 {
                        let key = format!("w{worker}-{round}");
                        handle.exec(&[b"SET", key.as_bytes(), key.as_bytes()]).expect("set");
                        let reply = handle.exec(&[b"GET", key.as_bytes()]).expect("get");
                        assert_eq!(reply, RespValue::Bulk(Some(key.into_bytes())));
                    }
                    handle
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().expect("worker")).collect()
    });

    assert_eq!(server.connections_accepted(), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
}

#[test]
fn authenticates_with_password() {
    let server = FakeServer::builder().password("s3cret").start().expect("server");
    let pool = ConnectionPool::tcp();

    let good = ConnectionIdentity::new(
        format!("{},password=s3cret", server.connection_string()),
        Duration::from_secs(2),
    );
    let handle = pool.get_or_create(&good).expect("connect");
    assert_eq!(handle.exec(&[b"GET", b"missing"]).unwrap(), RespValue::Bulk(None));

    let bad = ConnectionIdentity::new(
        format!("{},password=wrong", server.connection_string()),
        Duration::from_secs(2),
    );
    let err = pool.get_or_create(&bad).err().expect("auth failure");
    assert!(matches!(err, FkvError::Server(message) if message.starts_with("WRONGPASS")));
    assert!(!pool.contains(&bad));
    assert!(pool.contains(&good));
}

#[test]
fn invalid_connection_string_fails_fast() {
    let pool = ConnectionPool::tcp();
    let id = ConnectionIdentity::new("host:6379,ssl=true", Duration::from_secs(1));
    let err = pool.get_or_create(&id).err().expect("invalid");
    assert!(matches!(err, FkvError::IdentityInvalid(_)));
    assert!(!err.is_transient());
    assert!(pool.is_empty());
}

#[test]
fn refused_connection_is_transient_and_not_cached() {
    let pool = ConnectionPool::tcp();
    let id = ConnectionIdentity::new(free_port_addr(), Duration::from_secs(1));

    let err = pool.get_or_create(&id).err().expect("refused");
    assert!(err.is_transient());
    assert!(!pool.contains(&id));

    let err = pool.get_or_create(&id).err().expect("still refused");
    assert!(err.is_transient());
    assert_eq!(pool.stats().connects_attempted, 2);
}

#[test]
fn stalled_handshake_is_bounded_by_connect_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    thread::spawn(move || {
        // Accept and keep the socket open without ever replying.
        let (_stream, _) = listener.accept().expect("accept");
        let _ = release_rx.recv();
    });

    let pool = Arc::new(ConnectionPool::tcp());
    let id = ConnectionIdentity::new(format!("{addr},password=secret"), Duration::from_secs(1));
    let (done_tx, done_rx) = mpsc::channel();
    {
        let pool = Arc::clone(&pool);
        let id = id.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let result = pool.get_or_create(&id).map(|_| ());
            let _ = done_tx.send((result, started.elapsed()));
        });
    }

    let (result, elapsed) = done_rx
        .recv_timeout(Duration::from_secs(6))
        .expect("connect must give up within the timeout");
    drop(release_tx);

    let err = result.err().expect("handshake timed out");
    assert!(matches!(err, FkvError::ConnectTimeout(timeout) if timeout == Duration::from_secs(1)));
    assert!(err.is_transient());
    assert!(elapsed < Duration::from_secs(3));
    assert!(!pool.contains(&id));
}

#[test]
fn unresolvable_host_is_transient() {
    let pool = ConnectionPool::tcp();
    let id = ConnectionIdentity::new("no-such-host.invalid:6379", Duration::from_secs(1));

    let err = pool.get_or_create(&id).err().expect("lookup failure");
    assert!(matches!(err, FkvError::ConnectionUnavailable(_)));
    assert!(err.is_transient());
    assert!(pool.is_empty());
}

#[test]
fn shutdown_closes_and_later_calls_reconnect() {
    let server = FakeServer::start().expect("server");
    let pool = ConnectionPool::tcp();
    let id = identity(&server);

    let first = pool.get_or_create(&id).expect("connect");
    assert_eq!(pool.shutdown(), 1);
    assert!(first.is_closed());
    assert!(first.exec(&[b"PING"]).is_err());
    // A closed handle never dials a replacement socket.
    assert_eq!(server.connections_accepted(), 1);

    let second = pool.get_or_create(&id).expect("reconnect");
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.exec(&[b"PING"]).unwrap(), RespValue::Simple(b"PONG".to_vec()));
    assert_eq!(server.connections_accepted(), 2);
}

#[test]
fn handle_recovers_after_server_drops_connection() {
    let server = FakeServer::start().expect("server");
    let pool = ConnectionPool::tcp();
    let handle = pool.get_or_create(&identity(&server)).expect("connect");
    assert!(handle.exec(&[b"PING"]).is_ok());

    server.disconnect_all();
    thread::sleep(Duration::from_millis(50));

    // The first command after the drop may observe the dead socket.
    let recovered = (0..2).any(|_| handle.exec(&[b"PING"]).is_ok());
    assert!(recovered);
    assert_eq!(server.connections_accepted(), 2);
}

#[test]
fn unpooled_connection_quits_on_drop() {
    let server = FakeServer::start().expect("server");
    let pool = ConnectionPool::tcp();

    {
        let owned = pool
            .create_unpooled(&server.connection_string(), Duration::from_secs(2))
            .expect("connect");
        assert_eq!(owned.exec(&[b"PING"]).unwrap(), RespValue::Simple(b"PONG".to_vec()));
        assert!(pool.is_empty());
    }

    thread::sleep(Duration::from_millis(50));
    assert_eq!(server.command_count("QUIT"), 1);
    assert_eq!(pool.stats().closes, 1);
}
