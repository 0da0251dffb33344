//! End-to-end tests against the real binary
//!
//! Spawns sshpipe with piped stdio and drives it over loopback with a russh
//! client: authentication outcomes, the one-channel rule, shell granting,
//! bidirectional piping and single-shot listener behavior.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::ChannelMsg;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

/// Client that accepts whatever host key the server presents; sshpipe
/// generates a fresh one per run, so there is nothing to pin.
struct TrustingClient;

#[async_trait]
impl client::Handler for TrustingClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn spawn_server(extra_args: &[&str]) -> (Child, u16) {
    let port = free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_sshpipe"))
        .args(extra_args)
        .args(["--port", &port.to_string()])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to spawn sshpipe");
    (child, port)
}

/// Connect with retries so the server has time to bind. Probing with a
/// plain TCP connection would consume the single accept, so the real
/// handshake doubles as the readiness check.
async fn connect(port: u16) -> Handle<TrustingClient> {
    let config = Arc::new(client::Config::default());
    for _ in 0..100 {
        match client::connect(config.clone(), ("127.0.0.1", port), TrustingClient).await {
            Ok(handle) => return handle,
            Err(_) => sleep(Duration::from_millis(50)).await,
        }
    }
    panic!("server on port {} never became reachable", port);
}

/// Wait for the reply to a want-reply channel request.
async fn expect_request_reply(channel: &mut russh::Channel<client::Msg>) -> bool {
    loop {
        match timeout(Duration::from_secs(10), channel.wait()).await {
            Ok(Some(ChannelMsg::Success)) => return true,
            Ok(Some(ChannelMsg::Failure)) => return false,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("channel closed while waiting for a request reply"),
            Err(_) => panic!("timed out waiting for a request reply"),
        }
    }
}

#[tokio::test]
async fn wrong_secret_is_rejected_and_right_secret_accepted() {
    // Repeat mode, so the rejected connection does not use up the single
    // accept; it also shows a bad connection never poisons the next one.
    let (_child, port) = spawn_server(&["--password", "abc", "--loop"]);

    let mut session = connect(port).await;
    let authed = session.authenticate_password("pipe", "abd").await.unwrap();
    assert!(!authed, "near-miss secret must be rejected");
    drop(session);

    let mut session = connect(port).await;
    let authed = session.authenticate_password("pipe", "abc").await.unwrap();
    assert!(authed, "exact secret must be accepted");

    let mut channel = session.channel_open_session().await.unwrap();
    channel.request_shell(true).await.unwrap();
    assert!(expect_request_reply(&mut channel).await, "shell must be granted");
}

#[tokio::test]
async fn wideopen_accepts_any_client() {
    let (_child, port) = spawn_server(&["--wideopen"]);

    let mut session = connect(port).await;
    let authed = session.authenticate_none("whoever").await.unwrap();
    assert!(authed, "wideopen must accept the none method");

    let mut channel = session.channel_open_session().await.unwrap();
    channel.request_shell(true).await.unwrap();
    assert!(expect_request_reply(&mut channel).await);
}

#[tokio::test]
async fn pipes_bytes_both_ways_and_exits_cleanly() {
    let (mut child, port) = spawn_server(&["--password", "abc"]);
    let mut child_stdin = child.stdin.take().unwrap();
    let mut child_stdout = child.stdout.take().unwrap();

    let mut session = connect(port).await;
    assert!(session.authenticate_password("pipe", "abc").await.unwrap());
    let mut channel = session.channel_open_session().await.unwrap();
    channel.request_shell(true).await.unwrap();
    assert!(expect_request_reply(&mut channel).await);

    // Peer -> local stdout.
    channel.data(&b"from the peer"[..]).await.unwrap();
    let mut buf = [0u8; 13];
    timeout(Duration::from_secs(10), child_stdout.read_exact(&mut buf))
        .await
        .expect("timed out reading the server's stdout")
        .unwrap();
    assert_eq!(&buf, b"from the peer");

    // Local stdin -> peer.
    child_stdin.write_all(b"from the host").await.unwrap();
    child_stdin.flush().await.unwrap();
    let mut received = Vec::new();
    while received.len() < 13 {
        match timeout(Duration::from_secs(10), channel.wait())
            .await
            .expect("timed out waiting for channel data")
        {
            Some(ChannelMsg::Data { data }) => received.extend_from_slice(&data),
            Some(_) => continue,
            None => panic!("channel closed before all data arrived"),
        }
    }
    assert_eq!(received, b"from the host");

    // Close both directions; the session should end and, in single-shot
    // mode, the process should exit cleanly.
    drop(child_stdin);
    channel.eof().await.unwrap();
    loop {
        match timeout(Duration::from_secs(10), channel.wait())
            .await
            .expect("timed out waiting for channel teardown")
        {
            Some(_) => continue,
            None => break,
        }
    }
    drop(channel);
    drop(session);

    let status = timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("timed out waiting for the server to exit")
        .unwrap();
    assert!(status.success(), "server should exit 0, got {:?}", status);
}

#[tokio::test]
async fn second_channel_on_same_connection_is_refused() {
    let (_child, port) = spawn_server(&["--password", "abc"]);

    let mut session = connect(port).await;
    assert!(session.authenticate_password("pipe", "abc").await.unwrap());

    let _first = session.channel_open_session().await.unwrap();
    let second = session.channel_open_session().await;
    assert!(second.is_err(), "second channel open must be refused");
}

#[tokio::test]
async fn exec_request_is_refused() {
    let (_child, port) = spawn_server(&["--password", "abc"]);

    let mut session = connect(port).await;
    assert!(session.authenticate_password("pipe", "abc").await.unwrap());
    let mut channel = session.channel_open_session().await.unwrap();

    channel.exec(true, "cat /etc/passwd").await.unwrap();
    assert!(
        !expect_request_reply(&mut channel).await,
        "remote command execution must be refused"
    );
}

#[tokio::test]
async fn non_session_first_channel_ends_the_connection() {
    let (mut child, port) = spawn_server(&["--password", "abc"]);

    let mut session = connect(port).await;
    assert!(session.authenticate_password("pipe", "abc").await.unwrap());

    // A first channel of the wrong type gets an explicit open-failure
    // reply, then the server gives up on the whole connection.
    let err = session
        .channel_open_direct_tcpip("127.0.0.1", 80, "127.0.0.1", 40000)
        .await
        .expect_err("a non-session first channel must be refused");
    assert!(
        matches!(err, russh::Error::ChannelOpenFailure(_)),
        "expected an open-failure reply, got: {:?}",
        err
    );

    let status = timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("timed out waiting for the server to exit")
        .unwrap();
    assert_eq!(
        status.code(),
        Some(1),
        "a dead-on-arrival only connection should exit with code 1"
    );
}

#[tokio::test]
async fn repeat_mode_serves_connections_one_at_a_time() {
    let (mut child, port) = spawn_server(&["--wideopen", "--loop"]);
    let child_stdin = child.stdin.take().unwrap();
    let mut child_stdout = child.stdout.take().unwrap();

    let mut first = connect(port).await;
    assert!(first.authenticate_none("one").await.unwrap());
    let mut channel = first.channel_open_session().await.unwrap();
    channel.request_shell(true).await.unwrap();
    assert!(expect_request_reply(&mut channel).await);

    // While the first session is live the listener is not re-armed: a
    // second handshake gets no answer.
    let config = Arc::new(client::Config::default());
    assert!(
        timeout(
            Duration::from_millis(500),
            client::connect(config, ("127.0.0.1", port), TrustingClient),
        )
        .await
        .is_err(),
        "a second connection must not be serviced while the first is live"
    );

    channel.data(&b"one"[..]).await.unwrap();
    let mut buf = [0u8; 3];
    timeout(Duration::from_secs(10), child_stdout.read_exact(&mut buf))
        .await
        .expect("timed out reading the first session's output")
        .unwrap();
    assert_eq!(&buf, b"one");

    // Run the first session all the way down.
    drop(child_stdin);
    channel.eof().await.unwrap();
    loop {
        match timeout(Duration::from_secs(10), channel.wait())
            .await
            .expect("timed out waiting for the first session's teardown")
        {
            Some(_) => continue,
            None => break,
        }
    }
    drop(channel);
    drop(first);

    // Only now does the next connection get its turn.
    let mut second = connect(port).await;
    assert!(second.authenticate_none("two").await.unwrap());
    let mut channel = second.channel_open_session().await.unwrap();
    channel.request_shell(true).await.unwrap();
    assert!(expect_request_reply(&mut channel).await);

    channel.data(&b"two"[..]).await.unwrap();
    let mut buf = [0u8; 3];
    timeout(Duration::from_secs(10), child_stdout.read_exact(&mut buf))
        .await
        .expect("timed out reading the second session's output")
        .unwrap();
    assert_eq!(&buf, b"two");
}

#[tokio::test]
async fn single_shot_refuses_a_second_connection() {
    let (_child, port) = spawn_server(&["--password", "abc"]);

    let mut session = connect(port).await;
    assert!(session.authenticate_password("pipe", "abc").await.unwrap());
    let mut channel = session.channel_open_session().await.unwrap();
    channel.request_shell(true).await.unwrap();
    assert!(expect_request_reply(&mut channel).await);

    // The listening port was closed right after the first accept.
    let refused = tokio::net::TcpStream::connect(("127.0.0.1", port)).await;
    assert!(refused.is_err(), "second TCP connection must be refused");
}
