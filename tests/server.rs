use beacon::config::DispatchMode;
use beacon::store::StorePool;
use beacon::{ServerBuilder, ServerHandle, TriggerMode};

use std::fs;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn site(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("beacon-it-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();

    for (file, body) in [
        ("judge.html", "<h1>judge</h1>"),
        ("index.html", "<h1>index</h1>"),
        ("log.html", "log in"),
        ("welcome.html", "welcome"),
        ("logError.html", "nope"),
        ("registerError.html", "taken"),
    ] {
        let path = dir.join(file);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    }
    fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();
    dir
}

fn start(builder: ServerBuilder) -> (SocketAddr, ServerHandle, JoinHandle<beacon::Result<()>>) {
    let server = builder
        .address("127.0.0.1")
        .port(0)
        .backlog(128)
        .build()
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    let thread = thread::spawn(move || server.run());
    (addr, handle, thread)
}

fn stop(handle: ServerHandle, thread: JoinHandle<beacon::Result<()>>) {
    handle.shutdown();
    thread.join().unwrap().unwrap();
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Reads one response: the head as text and a body of `Content-Length`
/// bytes.
fn read_response(stream: &mut TcpStream) -> (String, String) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert_eq!(n, 1, "connection closed inside a response head");
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();

    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .map(|value| value.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).unwrap();
    (head, String::from_utf8(body).unwrap())
}

fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected close, got {n} more bytes"),
        Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
    }
}

fn get(path: &str, keep_alive: bool) -> String {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: {connection}\r\n\r\n")
}

#[test]
fn test_keep_alive_serves_several_requests() {
    let (addr, handle, thread) = start(ServerBuilder::new().doc_root(site("keepalive")).workers(2));

    let mut client = connect(addr);
    for _ in 0..3 {
        client.write_all(get("/", true).as_bytes()).unwrap();
        let (head, body) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "unexpected head: {head}");
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert_eq!(body, "<h1>judge</h1>");
    }

    assert_eq!(handle.live_connections(), 1);
    stop(handle, thread);
}

#[test]
fn test_close_request_is_answered_then_closed() {
    let (addr, handle, thread) = start(ServerBuilder::new().doc_root(site("close")));

    let mut client = connect(addr);
    client.write_all(get("/index.html", false).as_bytes()).unwrap();

    let (head, body) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: text/html\r\n"));
    assert_eq!(body, "<h1>index</h1>");
    assert_closed(&mut client);

    stop(handle, thread);
}

#[test]
fn test_missing_file_is_404() {
    let (addr, handle, thread) = start(ServerBuilder::new().doc_root(site("missing")));

    let mut client = connect(addr);
    client.write_all(get("/nothing.html", true).as_bytes()).unwrap();

    let (head, _) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert_closed(&mut client);

    stop(handle, thread);
}

#[test]
fn test_oversized_request_is_400() {
    let (addr, handle, thread) = start(
        ServerBuilder::new()
            .doc_root(site("oversized"))
            .read_buffer_size(256),
    );

    // Exactly one buffer of input and never a line end.
    let mut request = b"GET /".to_vec();
    request.resize(256, b'a');

    let mut client = connect(addr);
    client.write_all(&request).unwrap();

    let (head, _) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"), "unexpected head: {head}");
    assert_closed(&mut client);

    stop(handle, thread);
}

#[test]
fn test_fragmented_request_is_reassembled() {
    let (addr, handle, thread) = start(ServerBuilder::new().doc_root(site("fragmented")));

    let mut client = connect(addr);
    client.set_nodelay(true).unwrap();
    for chunk in get("/", false).as_bytes().chunks(3) {
        client.write_all(chunk).unwrap();
        thread::sleep(Duration::from_millis(2));
    }

    let (head, body) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, "<h1>judge</h1>");

    stop(handle, thread);
}

#[test]
fn test_register_then_login() {
    let (addr, handle, thread) = start(ServerBuilder::new().doc_root(site("forms")));

    let post = |path: &str, body: &str| {
        format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    };

    let mut client = connect(addr);

    client.write_all(post("/3CGISQL.cgi", "user=ada&passwd=pw").as_bytes()).unwrap();
    let (_, body) = read_response(&mut client);
    assert_eq!(body, "log in");

    client.write_all(post("/3CGISQL.cgi", "user=ada&passwd=other").as_bytes()).unwrap();
    let (_, body) = read_response(&mut client);
    assert_eq!(body, "taken");

    client.write_all(post("/2CGISQL.cgi", "user=ada&passwd=pw").as_bytes()).unwrap();
    let (_, body) = read_response(&mut client);
    assert_eq!(body, "welcome");

    client.write_all(post("/2CGISQL.cgi", "user=ada&passwd=bad").as_bytes()).unwrap();
    let (_, body) = read_response(&mut client);
    assert_eq!(body, "nope");

    stop(handle, thread);
}

#[test]
fn test_idle_connection_is_evicted() {
    let (addr, handle, thread) = start(
        ServerBuilder::new()
            .doc_root(site("idle"))
            .idle_timeout(Duration::from_millis(150))
            .tick_interval(Duration::from_millis(50)),
    );

    let mut client = connect(addr);
    client.write_all(b"POST /3CGISQL.cgi HTTP/1.1\r\nContent-Length: 40\r\n\r\nuser=").unwrap();

    assert!(wait_until(Duration::from_secs(2), || handle.live_connections() == 1));
    assert!(
        wait_until(Duration::from_secs(3), || handle.live_connections() == 0),
        "idle connection should be evicted"
    );
    assert_closed(&mut client);

    stop(handle, thread);
}

#[test]
fn test_active_connection_outlives_idle_timeout() {
    let (addr, handle, thread) = start(
        ServerBuilder::new()
            .doc_root(site("active"))
            .idle_timeout(Duration::from_millis(300))
            .tick_interval(Duration::from_millis(50)),
    );

    let mut client = connect(addr);
    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(900) {
        client.write_all(get("/", true).as_bytes()).unwrap();
        let (head, _) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        thread::sleep(Duration::from_millis(50));
    }

    assert_eq!(handle.live_connections(), 1);
    stop(handle, thread);
}

#[test]
fn test_inline_dispatch() {
    let (addr, handle, thread) = start(
        ServerBuilder::new()
            .doc_root(site("inline"))
            .dispatch(DispatchMode::Inline),
    );

    let mut client = connect(addr);
    client.write_all(get("/", true).as_bytes()).unwrap();
    let (head, body) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, "<h1>judge</h1>");

    stop(handle, thread);
}

#[test]
fn test_edge_triggered_connections() {
    let (addr, handle, thread) = start(
        ServerBuilder::new()
            .doc_root(site("edge"))
            .listen_trigger(TriggerMode::Edge)
            .conn_trigger(TriggerMode::Edge),
    );

    let clients: Vec<_> = (0..8).map(|_| connect(addr)).collect();
    for mut client in clients {
        client.write_all(get("/", true).as_bytes()).unwrap();
        client.write_all(get("/index.html", false).as_bytes()).unwrap();

        let (_, first) = read_response(&mut client);
        let (_, second) = read_response(&mut client);
        assert_eq!(first, "<h1>judge</h1>");
        assert_eq!(second, "<h1>index</h1>");
        assert_closed(&mut client);
    }

    stop(handle, thread);
}

fn login(user: &str, password: &str, keep_alive: bool) -> String {
    let body = format!("user={user}&passwd={password}");
    let connection = if keep_alive { "keep-alive" } else { "close" };
    format!(
        "POST /2CGISQL.cgi HTTP/1.1\r\nHost: localhost\r\nConnection: {connection}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

#[test]
fn test_full_queue_defers_instead_of_dropping() {
    let store = Arc::new(StorePool::new(1).unwrap());
    let (addr, handle, thread) = start(
        ServerBuilder::new()
            .doc_root(site("deferred"))
            .workers(1)
            .queue_capacity(1)
            .store(store.clone())
            .store_timeout(Duration::from_millis(400)),
    );

    // With the only store handle taken, a login keeps the only worker
    // waiting, so the queue fills up behind it.
    let held = store.acquire(Duration::from_secs(1)).unwrap();
    let mut blocker = connect(addr);
    blocker.write_all(login("ada", "pw", false).as_bytes()).unwrap();
    thread::sleep(Duration::from_millis(100));

    let clients: Vec<_> = (0..8)
        .map(|_| {
            thread::spawn(move || {
                let mut client = connect(addr);
                client.write_all(get("/", false).as_bytes()).unwrap();
                read_response(&mut client)
            })
        })
        .collect();

    for client in clients {
        let (head, body) = client.join().unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body, "<h1>judge</h1>");
    }

    let (head, _) = read_response(&mut blocker);
    assert!(head.starts_with("HTTP/1.1 500 Internal Error\r\n"), "unexpected head: {head}");
    assert!(handle.deferred_events() > 0, "the full queue should have deferred events");

    drop(held);
    stop(handle, thread);
}

#[test]
fn test_pipelined_request_is_not_handled_on_the_reactor() {
    let store = Arc::new(StorePool::new(1).unwrap());
    let (addr, handle, thread) = start(
        ServerBuilder::new()
            .doc_root(site("pipelined"))
            .workers(4)
            .store(store.clone())
            .store_timeout(Duration::from_millis(1000)),
    );

    let held = store.acquire(Duration::from_secs(1)).unwrap();

    // The login behind the first response waits for the store.
    let mut slow = connect(addr);
    let pipelined = get("/", true) + &login("ada", "pw", true);
    slow.write_all(pipelined.as_bytes()).unwrap();

    let (head, _) = read_response(&mut slow);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let mut other = connect(addr);
    other.write_all(get("/", false).as_bytes()).unwrap();
    let (head, _) = read_response(&mut other);
    let elapsed = started.elapsed();

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(elapsed < Duration::from_millis(500), "answered after {elapsed:?}");

    let (head, _) = read_response(&mut slow);
    assert!(head.starts_with("HTTP/1.1 500 Internal Error\r\n"), "unexpected head: {head}");

    drop(held);
    stop(handle, thread);
}

#[test]
fn test_huge_content_length_is_400_and_server_survives() {
    let (addr, handle, thread) = start(ServerBuilder::new().doc_root(site("huge")));

    let mut client = connect(addr);
    client
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n")
        .unwrap();

    let (head, _) = read_response(&mut client);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"), "unexpected head: {head}");
    assert_closed(&mut client);

    let mut next = connect(addr);
    next.write_all(get("/", false).as_bytes()).unwrap();
    let (head, _) = read_response(&mut next);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));

    stop(handle, thread);
}

#[test]
fn test_connection_limit_turns_clients_away() {
    let (addr, handle, thread) = start(
        ServerBuilder::new()
            .doc_root(site("limit"))
            .max_connections(1),
    );

    let _held = connect(addr);
    assert!(wait_until(Duration::from_secs(2), || handle.live_connections() == 1));

    let mut rejected = connect(addr);
    let mut reply = String::new();
    rejected.read_to_string(&mut reply).unwrap();
    assert_eq!(reply, "Internal server busy");
    assert_eq!(handle.live_connections(), 1);

    stop(handle, thread);
}

#[test]
fn test_peer_close_releases_connection() {
    let (addr, handle, thread) = start(ServerBuilder::new().doc_root(site("peerclose")));

    let client = connect(addr);
    assert!(wait_until(Duration::from_secs(2), || handle.live_connections() == 1));

    client.shutdown(Shutdown::Both).unwrap();
    drop(client);
    assert!(wait_until(Duration::from_secs(2), || handle.live_connections() == 0));

    stop(handle, thread);
}

#[test]
fn test_shutdown_closes_open_connections() {
    let (addr, handle, thread) = start(ServerBuilder::new().doc_root(site("shutdown")));

    let mut client = connect(addr);
    assert!(wait_until(Duration::from_secs(2), || handle.live_connections() == 1));

    stop(handle.clone(), thread);
    assert_eq!(handle.live_connections(), 0);
    assert_closed(&mut client);
}
