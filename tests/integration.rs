//! End-to-end scenarios driven over real `TcpStream`s, exercising the wire
//! surface rather than calling internals directly.

use std::time::Duration;

use redis_lite::config::{Binding, Config};
use redis_lite::{build_db, serve};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_server(replicaof: Option<Binding>) -> std::net::SocketAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Config {
        dir: String::new(),
        dbfilename: String::new(),
        port: addr.port(),
        replicaof,
    };
    let db = build_db(config);
    tokio::spawn(serve(db, listener));
    addr
}

fn encode_array(parts: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for p in parts {
        out.extend_from_slice(format!("${}\r\n", p.len()).as_bytes());
        out.extend_from_slice(p.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
}

async fn send_cmd(stream: &mut TcpStream, parts: &[&str]) {
    send(stream, &encode_array(parts)).await;
}

/// Reads until at least `n` bytes have arrived or the peer closes the
/// connection, with a generous overall timeout so a stuck assertion fails
/// fast instead of hanging the test run.
async fn recv_at_least(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut buf = [0u8; 4096];
        let mut got = Vec::new();
        while got.len() < n {
            let r = stream.read(&mut buf).await.unwrap();
            if r == 0 {
                break;
            }
            got.extend_from_slice(&buf[..r]);
        }
        got
    })
    .await
    .expect("timed out waiting for reply")
}

#[tokio::test]
async fn ping_then_echo_round_trips() {
    let addr = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send_cmd(&mut stream, &["PING"]).await;
    assert_eq!(recv_at_least(&mut stream, 7).await, b"+PONG\r\n");

    send_cmd(&mut stream, &["ECHO", "hi"]).await;
    assert_eq!(recv_at_least(&mut stream, 8).await, b"$2\r\nhi\r\n");
}

#[tokio::test]
async fn set_with_px_expires_the_key() {
    let addr = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send_cmd(&mut stream, &["SET", "k", "v", "PX", "100"]).await;
    assert_eq!(recv_at_least(&mut stream, 5).await, b"+OK\r\n");

    send_cmd(&mut stream, &["GET", "k"]).await;
    assert_eq!(recv_at_least(&mut stream, 7).await, b"$1\r\nv\r\n");

    tokio::time::sleep(Duration::from_millis(150)).await;

    send_cmd(&mut stream, &["GET", "k"]).await;
    assert_eq!(recv_at_least(&mut stream, 5).await, b"$-1\r\n");
}

#[tokio::test]
async fn xadd_auto_sequences_and_rejects_non_increasing_ids() {
    let addr = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send_cmd(&mut stream, &["XADD", "s", "0-*", "f", "v"]).await;
    assert_eq!(recv_at_least(&mut stream, 9).await, b"$3\r\n0-1\r\n");

    send_cmd(&mut stream, &["XADD", "s", "0-*", "f", "v"]).await;
    assert_eq!(recv_at_least(&mut stream, 9).await, b"$3\r\n0-2\r\n");

    send_cmd(&mut stream, &["XADD", "s", "0-0", "f", "v"]).await;
    let reply = recv_at_least(&mut stream, 5).await;
    let text = String::from_utf8_lossy(&reply);
    assert!(
        text.starts_with("-ERR The ID specified in XADD must be greater than 0-0"),
        "unexpected reply: {text}"
    );
}

#[tokio::test]
async fn xrange_returns_inclusive_slice() {
    let addr = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for ms in ["1", "2", "3"] {
        send_cmd(&mut stream, &["XADD", "s", &format!("{ms}-0"), "f", "v"]).await;
        recv_at_least(&mut stream, 1).await;
    }

    send_cmd(&mut stream, &["XRANGE", "s", "1-0", "2-0"]).await;
    let reply = recv_at_least(&mut stream, 1).await;
    let text = String::from_utf8_lossy(&reply);
    assert!(text.starts_with("*2\r\n"), "expected two entries, got: {text}");
    assert!(text.contains("1-0") && text.contains("2-0") && !text.contains("3-0"));
}

#[tokio::test]
async fn blocking_xread_wakes_on_new_entry() {
    let addr = start_server(None).await;
    let mut reader = TcpStream::connect(addr).await.unwrap();
    let mut writer = TcpStream::connect(addr).await.unwrap();

    send_cmd(&mut reader, &["XREAD", "BLOCK", "5000", "STREAMS", "s", "$"]).await;

    let started = tokio::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(100)).await;
    send_cmd(&mut writer, &["XADD", "s", "*", "f", "v"]).await;
    recv_at_least(&mut writer, 1).await;

    let reply = recv_at_least(&mut reader, 1).await;
    let elapsed = started.elapsed();
    let text = String::from_utf8_lossy(&reply);
    assert!(text.contains("\r\ns\r\n"), "expected stream key 's' in reply: {text}");
    assert!(elapsed < Duration::from_secs(1), "blocked far longer than the triggering write: {elapsed:?}");
}

/// Starts a replica against `master_addr`, waiting for its handshake to
/// register with the master before returning.
async fn connect_replica(master_addr: std::net::SocketAddr) -> std::net::SocketAddr {
    let replica_addr = start_server(Some(Binding(master_addr.ip().to_string(), master_addr.port()))).await;
    // Give the replica's background handshake task time to complete PSYNC.
    tokio::time::sleep(Duration::from_millis(200)).await;
    replica_addr
}

#[tokio::test]
async fn wait_with_no_writes_returns_immediately() {
    let master_addr = start_server(None).await;
    connect_replica(master_addr).await;

    let mut client = TcpStream::connect(master_addr).await.unwrap();
    let started = tokio::time::Instant::now();
    send_cmd(&mut client, &["WAIT", "1", "500"]).await;
    let reply = recv_at_least(&mut client, 4).await;
    assert_eq!(reply, b":1\r\n");
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn replication_propagates_set_to_replica() {
    let master_addr = start_server(None).await;
    let replica_addr = connect_replica(master_addr).await;

    let mut master_client = TcpStream::connect(master_addr).await.unwrap();
    send_cmd(&mut master_client, &["SET", "k", "v"]).await;
    assert_eq!(recv_at_least(&mut master_client, 5).await, b"+OK\r\n");

    // Propagation is asynchronous; poll the replica briefly for the value.
    let mut replica_client = TcpStream::connect(replica_addr).await.unwrap();
    let mut seen = Vec::new();
    for _ in 0..20 {
        send_cmd(&mut replica_client, &["GET", "k"]).await;
        seen = recv_at_least(&mut replica_client, 1).await;
        if seen == b"$1\r\nv\r\n" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(seen, b"$1\r\nv\r\n", "replica never observed the propagated SET");
}

#[tokio::test]
async fn direct_set_on_replica_mutates_locally_without_a_reply() {
    let master_addr = start_server(None).await;
    let replica_addr = start_server(Some(Binding(master_addr.ip().to_string(), master_addr.port()))).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut replica_client = TcpStream::connect(replica_addr).await.unwrap();
    send_cmd(&mut replica_client, &["SET", "direct", "value"]).await;
    let result = tokio::time::timeout(Duration::from_millis(200), replica_client.read(&mut [0u8; 16])).await;
    assert!(result.is_err(), "replica unexpectedly replied to a direct SET");

    send_cmd(&mut replica_client, &["GET", "direct"]).await;
    assert_eq!(recv_at_least(&mut replica_client, 1).await, b"$5\r\nvalue\r\n");
}
