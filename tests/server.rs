//! End-to-end tests over loopback TCP.

use bytes::Bytes;
use snapkv::config::ServerConfig;
use snapkv::protocol::RespValue;
use snapkv::server::Server;
use snapkv::snapshot;
use snapkv::storage::StorageEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Reply as seen by the client.
#[derive(Debug, PartialEq)]
enum Reply {
    Status(String),
    Error(String),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
}

fn bulk(s: &str) -> Reply {
    Reply::Bulk(s.as_bytes().to_vec())
}

struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.get_mut().write_all(bytes).await.unwrap();
    }

    async fn command(&mut self, args: &[&[u8]]) -> Reply {
        let request = RespValue::array(
            args.iter()
                .map(|a| RespValue::bulk_string(Bytes::copy_from_slice(a)))
                .collect(),
        );
        self.send_raw(&request.serialize()).await;
        self.read_reply().await
    }

    async fn cmd(&mut self, args: &[&str]) -> Reply {
        let args: Vec<&[u8]> = args.iter().map(|a| a.as_bytes()).collect();
        self.command(&args).await
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.unwrap();
        assert!(line.ends_with("\r\n"), "unterminated line {:?}", line);
        line.truncate(line.len() - 2);
        line
    }

    async fn read_reply(&mut self) -> Reply {
        let line = self.read_line().await;
        let (kind, rest) = line.split_at(1);
        match kind {
            "+" => Reply::Status(rest.to_string()),
            "-" => Reply::Error(rest.to_string()),
            "$" if rest == "-1" => Reply::Nil,
            "$" => {
                let len: usize = rest.parse().unwrap();
                let mut data = vec![0u8; len + 2];
                self.stream.read_exact(&mut data).await.unwrap();
                data.truncate(len);
                Reply::Bulk(data)
            }
            "*" => {
                let count: usize = rest.parse().unwrap();
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Box::pin(self.read_reply()).await);
                }
                Reply::Array(items)
            }
            other => panic!("unexpected reply type {:?}", other),
        }
    }

    /// True once the server has closed the connection.
    async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 64];
        matches!(
            tokio::time::timeout(Duration::from_secs(1), self.stream.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

async fn start_server(storage: Arc<StorageEngine>, dir: &str) -> std::net::SocketAddr {
    let config = Arc::new(ServerConfig {
        dir: dir.to_string(),
        dbfilename: "dump.rdb".to_string(),
    });
    let server = Server::bind("127.0.0.1:0", storage, config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run_until(std::future::pending()));
    addr
}

async fn start_empty() -> std::net::SocketAddr {
    start_server(Arc::new(StorageEngine::new()), "/data").await
}

/// Writes `data` as `dump.rdb` in a fresh directory. The directory lives as
/// long as the returned guard.
fn write_snapshot(data: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dump.rdb");
    std::fs::write(&path, data).unwrap();
    (dir, path)
}

/// Unwraps an array of bulk strings into raw byte vectors.
fn bulk_items(reply: Reply) -> Vec<Vec<u8>> {
    let Reply::Array(items) = reply else {
        panic!("expected an array, got {:?}", reply);
    };
    items
        .into_iter()
        .map(|item| match item {
            Reply::Bulk(b) => b,
            other => panic!("unexpected element {:?}", other),
        })
        .collect()
}

#[tokio::test]
async fn ping_and_echo() {
    let addr = start_empty().await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.cmd(&["PING"]).await, Reply::Status("PONG".into()));
    assert_eq!(client.cmd(&["echo", "hello"]).await, bulk("hello"));
}

#[tokio::test]
async fn set_get_round_trip() {
    let addr = start_empty().await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.cmd(&["SET", "k", "v"]).await, Reply::Status("OK".into()));
    assert_eq!(client.cmd(&["GET", "k"]).await, bulk("v"));

    let binary: &[u8] = b"\x00\xff\r\n\xc3";
    assert_eq!(
        client.command(&[b"SET", b"bin", binary]).await,
        Reply::Status("OK".into())
    );
    assert_eq!(
        client.command(&[b"GET", b"bin"]).await,
        Reply::Bulk(binary.to_vec())
    );
}

#[tokio::test]
async fn get_missing_key_is_nil() {
    let addr = start_empty().await;
    let mut client = Client::connect(addr).await;
    assert_eq!(client.cmd(&["GET", "never-written"]).await, Reply::Nil);
}

#[tokio::test]
async fn px_expiry() {
    let addr = start_empty().await;
    let mut client = Client::connect(addr).await;

    client.cmd(&["SET", "keep", "1"]).await;
    assert_eq!(
        client.cmd(&["SET", "temp", "v", "PX", "100"]).await,
        Reply::Status("OK".into())
    );
    assert_eq!(client.cmd(&["GET", "temp"]).await, bulk("v"));

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(client.cmd(&["GET", "temp"]).await, Reply::Nil);
    assert_eq!(
        client.cmd(&["KEYS", "*"]).await,
        Reply::Array(vec![bulk("keep")])
    );
}

#[tokio::test]
async fn config_get_dir() {
    let addr = start_empty().await;
    let mut client = Client::connect(addr).await;
    assert_eq!(
        client.cmd(&["CONFIG", "GET", "dir"]).await,
        Reply::Array(vec![bulk("dir"), bulk("/data")])
    );
}

#[tokio::test]
async fn command_errors_keep_connection_open() {
    let addr = start_empty().await;
    let mut client = Client::connect(addr).await;

    assert_eq!(
        client.cmd(&["NOPE"]).await,
        Reply::Error("ERR unknown command 'NOPE'".into())
    );
    assert_eq!(
        client.cmd(&["SET", "k", "v", "PX", "abc"]).await,
        Reply::Error("ERR value is not an integer or out of range".into())
    );
    assert_eq!(client.cmd(&["GET", "k"]).await, Reply::Nil);
    assert_eq!(client.cmd(&["PING"]).await, Reply::Status("PONG".into()));
}

#[tokio::test]
async fn keys_lists_writes_from_all_connections_once() {
    let addr = start_empty().await;

    let mut tasks = Vec::new();
    for c in 0..4 {
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            for i in 0..25 {
                let key = format!("c{}-k{}", c, i);
                client.cmd(&["SET", &key, "v"]).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut client = Client::connect(addr).await;
    let mut names = bulk_items(client.cmd(&["KEYS", "*"]).await);
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 100);
}

#[tokio::test]
async fn concurrent_sets_to_one_key_never_mix() {
    let addr = start_empty().await;
    let first = "a".repeat(10_000);
    let second = "b".repeat(10_000);

    let mut tasks = Vec::new();
    for value in [first.clone(), second.clone()] {
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            for _ in 0..50 {
                client.cmd(&["SET", "shared", &value]).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut client = Client::connect(addr).await;
    let stored = client.cmd(&["GET", "shared"]).await;
    assert!(stored == bulk(&first) || stored == bulk(&second));
}

#[tokio::test]
async fn malformed_frame_closes_only_that_connection() {
    let addr = start_empty().await;
    let mut bad = Client::connect(addr).await;
    let mut good = Client::connect(addr).await;

    bad.send_raw(b"hello there\r\n").await;
    let reply = bad.read_reply().await;
    assert!(
        matches!(&reply, Reply::Error(e) if e.starts_with("ERR Protocol error")),
        "{:?}",
        reply
    );
    assert!(bad.is_closed().await);

    assert_eq!(good.cmd(&["PING"]).await, Reply::Status("PONG".into()));
}

#[tokio::test]
async fn serves_keys_loaded_from_snapshot() {
    let mut data = b"REDIS0011\xfa\x09redis-ver\x057.2.0\xfe\x00\xfb\x02\x00".to_vec();
    data.extend_from_slice(b"\x00\x03foo\x03bar\x00\x03baz\x03qux\xff");
    data.extend_from_slice(&[0u8; 8]);
    let (_dir, path) = write_snapshot(&data);

    let storage = Arc::new(StorageEngine::new());
    assert_eq!(snapshot::load_into(&path, &storage).unwrap(), 2);
    let addr = start_server(storage, "/data").await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.cmd(&["GET", "foo"]).await, bulk("bar"));
    assert_eq!(client.cmd(&["GET", "baz"]).await, bulk("qux"));
    let mut keys = bulk_items(client.cmd(&["KEYS", "*"]).await);
    keys.sort();
    assert_eq!(keys, vec![b"baz".to_vec(), b"foo".to_vec()]);
}

#[tokio::test]
async fn truncated_snapshot_still_boots() {
    let data = b"REDIS0011\xfe\x00\x00\x03foo\x03bar\x00\x03baz\x09qu".to_vec();
    let (_dir, path) = write_snapshot(&data);

    let storage = Arc::new(StorageEngine::new());
    assert!(snapshot::load_into(&path, &storage).is_err());
    let addr = start_server(storage, "/data").await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.cmd(&["GET", "foo"]).await, bulk("bar"));
    assert_eq!(client.cmd(&["GET", "baz"]).await, Reply::Nil);
    assert_eq!(client.cmd(&["PING"]).await, Reply::Status("PONG".into()));
}
