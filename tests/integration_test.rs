use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crucible::store::{Paths, Registry};

/// Binds to an ephemeral port, spawns `run_server` on it, and returns the
/// port once the listener is confirmed ready by a successful connect.
async fn start_server(paths: Paths, aof: bool, rdb: bool) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let registry = Arc::new(Registry::new(paths, aof, rdb));
    tokio::spawn(async move {
        let _ = crucible::server::run_server(
            "127.0.0.1",
            port,
            registry,
            Duration::from_secs(3600),
        )
        .await;
    });

    for _ in 0..50 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return port;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server never came up on port {port}");
}

struct Client {
    writer: tokio::net::tcp::OwnedWriteHalf,
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
}

impl Client {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Client {
            writer: write_half,
            reader: BufReader::new(read_half),
        }
    }

    async fn send(&mut self, line: &str) -> String {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        let mut reply = String::new();
        self.reader.read_line(&mut reply).await.unwrap();
        reply.trim_end_matches(['\n', '\r']).to_string()
    }
}

fn temp_paths() -> (tempfile::TempDir, Paths) {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths {
        database_dir: dir.path().join("databases"),
        log_dir: dir.path().join("logs"),
    };
    (dir, paths)
}

#[tokio::test]
async fn basic_set_get_round_trip() {
    let (_dir, paths) = temp_paths();
    let port = start_server(paths, true, true).await;
    let mut client = Client::connect(port).await;

    assert_eq!(client.send("SELECT main").await, "Loaded Dataset 'main'");
    assert_eq!(client.send("SET greeting hello").await, "OK");
    assert_eq!(client.send("GET greeting").await, "hello");
    assert_eq!(client.send("GET missing").await, "(nil)");
}

#[tokio::test]
async fn select_is_required_before_other_commands() {
    let (_dir, paths) = temp_paths();
    let port = start_server(paths, true, true).await;
    let mut client = Client::connect(port).await;

    let reply = client.send("GET anything").await;
    assert!(reply.starts_with("ERR"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn duplicate_select_is_rejected() {
    let (_dir, paths) = temp_paths();
    let port = start_server(paths, true, true).await;
    let mut client = Client::connect(port).await;

    assert_eq!(client.send("SELECT main").await, "Loaded Dataset 'main'");
    let reply = client.send("SELECT other").await;
    assert!(reply.starts_with("ERR"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn ttl_lifecycle_and_expiry() {
    let (_dir, paths) = temp_paths();
    let port = start_server(paths, true, true).await;
    let mut client = Client::connect(port).await;

    client.send("SELECT main").await;
    client.send("SET k v").await;
    assert_eq!(client.send("TTL k").await, "-1");

    assert_eq!(client.send("EXPIRE k 1").await, "1");
    let ttl = client.send("TTL k").await;
    assert_ne!(ttl, "-1");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(client.send("GET k").await, "(nil)");
}

#[tokio::test]
async fn set_keepttl_preserves_existing_expiry() {
    let (_dir, paths) = temp_paths();
    let port = start_server(paths, true, true).await;
    let mut client = Client::connect(port).await;

    client.send("SELECT main").await;
    client.send("SET k v1 -EX 10").await;
    client.send("SET k v2 -KEEPTTL").await;
    let ttl = client.send("TTL k").await;
    assert_ne!(ttl, "-1");
    assert_eq!(client.send("GET k").await, "v2");
}

#[tokio::test]
async fn sorted_set_add_rank_and_range() {
    let (_dir, paths) = temp_paths();
    let port = start_server(paths, true, true).await;
    let mut client = Client::connect(port).await;

    client.send("SELECT main").await;
    assert_eq!(client.send("ZADD board 10 alice 20 bob 5 carol").await, "3");
    assert_eq!(client.send("ZRANK board alice").await, "1");
    assert_eq!(client.send("ZRANK board carol").await, "0");

    let range = client.send("ZRANGE board 0 -1").await;
    assert_eq!(range, "carol alice bob");
}

#[tokio::test]
async fn del_reports_nothing_and_removes_keys() {
    let (_dir, paths) = temp_paths();
    let port = start_server(paths, true, true).await;
    let mut client = Client::connect(port).await;

    client.send("SELECT main").await;
    client.send("SET k v").await;
    client.send("DEL k missing").await;
    assert_eq!(client.send("GET k").await, "(nil)");
}

#[tokio::test]
async fn state_survives_a_restart_via_log_replay() {
    let (_dir, paths) = temp_paths();

    {
        let port = start_server(paths.clone(), true, true).await;
        let mut client = Client::connect(port).await;
        client.send("SELECT main").await;
        client.send("SET durable yes").await;
        client.send("ZADD ranked 1 a 2 b").await;
    }

    // No explicit shutdown hook exists yet, so recovery is exercised by
    // opening a fresh registry against the same paths directly.
    let registry = Registry::new(paths, true, true);
    let dataset = registry.select("main").await.unwrap();
    assert_eq!(
        dataset.get("durable").await.unwrap(),
        Some(b"yes".to_vec())
    );
    assert_eq!(dataset.zrank("ranked", b"a").await.unwrap(), Some(0));
}

#[tokio::test]
async fn deselect_without_select_is_an_error() {
    let (_dir, paths) = temp_paths();
    let port = start_server(paths, true, true).await;
    let mut client = Client::connect(port).await;

    let reply = client.send("DESELECT").await;
    assert!(reply.starts_with("ERR"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn exit_closes_the_connection() {
    let (_dir, paths) = temp_paths();
    let port = start_server(paths, true, true).await;
    let mut client = Client::connect(port).await;

    client.send("SELECT main").await;
    client.send("EXIT").await;

    let mut probe = String::new();
    let n = client.reader.read_line(&mut probe).await.unwrap();
    assert_eq!(n, 0, "connection should be closed after EXIT");
}
