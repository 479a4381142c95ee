//! End-to-end server tests
//!
//! NIST 800-53: IA-2 (Identification and Authentication), AC-3 (Access Enforcement)
//! Implementation: Runs the server on an ephemeral port and drives it with the client library

use rfs::auth::hash_password;
use rfs::protocol::MessageStream;
use rfs::shell::{self, ShellCommand};
use rfs::{Client, Config, Error, Message, MessageType, Server};
use std::net::SocketAddr;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

/// Start a server over a data root holding a home for `alice`
async fn start_server(configure: impl FnOnce(&mut Config)) -> (SocketAddr, TempDir) {
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("alice")).unwrap();

    let mut config = Config {
        bind_address: "127.0.0.1".into(),
        port: 0,
        root_dir: root.path().to_path_buf(),
        ..Config::default()
    };
    configure(&mut config);

    let server = Server::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    (addr, root)
}

async fn connect(addr: SocketAddr) -> Client {
    Client::connect(&addr.ip().to_string(), addr.port())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_login_retry_then_success() {
    let (addr, _root) = start_server(|config| {
        config.users.insert("alice".into(), hash_password("s3cret"));
    })
    .await;
    let mut client = connect(addr).await;

    let err = client.login("alice", "wrong").await.unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text == "Bad login attempt"));

    let err = client.login("mallory", "s3cret").await.unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text == "User does not exist"));

    let err = client.list(".").await.unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text == "Not logged in"));

    client.login("alice", "s3cret").await.unwrap();
    assert_eq!(client.username(), Some("alice"));

    let err = client.login("alice", "s3cret").await.unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text == "Client already assigned a user"));
    assert_eq!(client.print_directory().await.unwrap(), "/");
}

#[tokio::test]
async fn test_full_session() {
    let (addr, root) = start_server(|_| {}).await;
    let local = TempDir::new().unwrap();
    let mut client = connect(addr).await;
    client.login("alice", "anything").await.unwrap();

    client.make_directory("docs").await.unwrap();
    client.change_directory("docs").await.unwrap();
    assert_eq!(client.print_directory().await.unwrap(), "/docs");

    let upload = local.path().join("report.txt");
    std::fs::write(&upload, b"quarterly numbers\n").unwrap();
    client.upload(&upload, "report.txt").await.unwrap();
    assert_eq!(
        std::fs::read(root.path().join("alice/docs/report.txt")).unwrap(),
        b"quarterly numbers\n"
    );

    client.copy("report.txt", "/copy.txt", false).await.unwrap();
    client.change_directory("/").await.unwrap();
    assert_eq!(client.list(".").await.unwrap(), "copy.txt\ndocs/");

    let download = local.path().join("copy.txt");
    let bytes = client.download("copy.txt", &download).await.unwrap();
    assert_eq!(bytes, 18);
    assert_eq!(std::fs::read(&download).unwrap(), b"quarterly numbers\n");

    client.copy("docs", "archive", true).await.unwrap();
    assert!(root.path().join("alice/archive/report.txt").is_file());

    client.remove("copy.txt", false).await.unwrap();
    client.remove("docs", true).await.unwrap();
    assert_eq!(client.list("").await.unwrap(), "archive/");

    let err = client.download("nope.txt", &download).await.unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text == "Requested file does not exist"));
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (addr, root) = start_server(|_| {}).await;
    std::fs::create_dir(root.path().join("bob")).unwrap();
    std::fs::create_dir(root.path().join("alice/work")).unwrap();

    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    alice.login("alice", "").await.unwrap();
    bob.login("bob", "").await.unwrap();

    alice.change_directory("work").await.unwrap();
    assert_eq!(alice.print_directory().await.unwrap(), "/work");
    assert_eq!(bob.print_directory().await.unwrap(), "/");

    let err = bob.change_directory("work").await.unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text == "Invalid directory"));
    let err = bob.list("../alice").await.unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text == "Path is outside the home directory"));
}

#[tokio::test]
async fn test_unknown_type_keeps_connection_open() {
    let (addr, _root) = start_server(|_| {}).await;
    let mut client = connect(addr).await;
    client.login("alice", "").await.unwrap();

    let response = client
        .request(&Message::from_raw(99, b"junk".to_vec()))
        .await
        .unwrap();
    assert!(response.is(MessageType::ResponseError));
    assert_eq!(response.text_lossy(), "Error in handling request");

    assert_eq!(client.print_directory().await.unwrap(), "/");
}

#[tokio::test]
async fn test_truncated_frame_closes_connection() {
    let (addr, _root) = start_server(|_| {}).await;

    let mut raw = TcpStream::connect(addr).await.unwrap();
    // Header announces 10 bytes, only 3 follow before the write half closes
    raw.write_all(&[0, 0, 0, 0, 10, b'a', b'b', b'c']).await.unwrap();
    raw.shutdown().await.unwrap();

    let mut stream = MessageStream::new(raw);
    assert!(matches!(
        stream.read_message().await,
        Err(Error::ConnectionLost)
    ));

    // The server keeps accepting new connections
    let mut client = connect(addr).await;
    client.login("alice", "").await.unwrap();
}

#[tokio::test]
async fn test_shell_commands_end_to_end() {
    let (addr, root) = start_server(|_| {}).await;
    let local = TempDir::new().unwrap();
    let mut client = connect(addr).await;
    client.login("alice", "").await.unwrap();

    let source = local.path().join("my notes.txt");
    std::fs::write(&source, b"hello").unwrap();

    let run = |line: String| shell::parse(&line).unwrap().unwrap();

    assert_eq!(
        shell::execute(&mut client, run("mkdir \"sub dir\"".into()))
            .await
            .unwrap(),
        None
    );
    let up = format!("up \"{}\" \"sub dir/notes.txt\"", source.display());
    shell::execute(&mut client, run(up)).await.unwrap();
    assert!(root.path().join("alice/sub dir/notes.txt").is_file());

    assert_eq!(
        shell::execute(&mut client, run("ls".into())).await.unwrap(),
        Some("'sub dir'/".to_string())
    );
    shell::execute(&mut client, run("cd \"sub dir\"".into()))
        .await
        .unwrap();
    assert_eq!(
        shell::execute(&mut client, run("pwd".into())).await.unwrap(),
        Some("/sub dir".to_string())
    );

    let err = shell::execute(&mut client, run("rm -r .".into()))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot remove parent directory of working directory");

    assert_eq!(run("exit".into()), ShellCommand::Exit);
}

/// NIST 800-53: AC-10 - Concurrent sessions each get their own state
#[tokio::test]
async fn test_concurrent_uploads() {
    let (addr, root) = start_server(|_| {}).await;
    let local = TempDir::new().unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let source = local.path().join(format!("file{i}.txt"));
        std::fs::write(&source, format!("content {i}")).unwrap();
        tasks.spawn(async move {
            let mut client = connect(addr).await;
            client.login("alice", "").await.unwrap();
            client.make_directory(&format!("dir{i}")).await.unwrap();
            client.change_directory(&format!("dir{i}")).await.unwrap();
            client.upload(&source, "upload.txt").await.unwrap();
            client.print_directory().await.unwrap()
        });
    }

    let mut directories = Vec::new();
    while let Some(result) = tasks.join_next().await {
        directories.push(result.unwrap());
    }
    directories.sort();
    assert_eq!(directories.len(), 8);
    assert_eq!(directories[0], "/dir0");

    for i in 0..8 {
        assert_eq!(
            std::fs::read_to_string(root.path().join(format!("alice/dir{i}/upload.txt"))).unwrap(),
            format!("content {i}")
        );
    }
}
