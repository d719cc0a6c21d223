//! Integration tests for the connection layer.
//!
//! Each test runs a scripted server on a loopback listener.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use afd_net::{
    ConnectOptions, Connection, Error, ErrorKind, ExitCode, MAX_LINE_LENGTH, Protocol,
};

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn options(timeout_ms: u64) -> ConnectOptions {
    ConnectOptions::builder(Protocol::Smtp)
        .transfer_timeout(Duration::from_millis(timeout_ms))
        .build()
}

#[tokio::test]
async fn test_lines_then_residue_then_body() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"220 ready\r\n250 ok\r\nBODY").await.unwrap();
        let mut cmd = [0u8; 6];
        sock.read_exact(&mut cmd).await.unwrap();
        assert_eq!(&cmd, b"NOOP\r\n");
        sock.write_all(b"-TAIL").await.unwrap();
    });

    let mut conn = Connection::connect("127.0.0.1", port, options(2000))
        .await
        .unwrap();
    assert!(!conn.tls_active());
    assert_eq!(conn.read_line().await.unwrap().text(), "220 ready");
    assert_eq!(conn.read_line().await.unwrap().text(), "250 ok");

    conn.write_command("NOOP").await.unwrap();
    let mut body = [0u8; 9];
    conn.read_exact(&mut body).await.unwrap();
    assert_eq!(&body, b"BODY-TAIL");
    assert_eq!(conn.line_buffer().bytes_buffered(), 0);

    server.await.unwrap();
    conn.close().await;
}

#[tokio::test]
async fn test_read_timeout_marks_connection() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(sock);
    });

    let mut conn = Connection::connect("127.0.0.1", port, options(50))
        .await
        .unwrap();
    let err = conn.read_line().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(conn.timed_out());
    assert!(!conn.is_healthy());
    assert!(conn.is_closed_by_peer().await);
    conn.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_remote_hangup() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"421 bye").await.unwrap();
    });

    let mut conn = Connection::connect("127.0.0.1", port, options(2000))
        .await
        .unwrap();
    server.await.unwrap();
    let err = conn.read_line().await.unwrap_err();
    assert!(matches!(err, Error::RemoteHangup));
    assert!(err.is_retryable());
    assert!(conn.hung_up());
    assert!(conn.is_healthy());
}

#[tokio::test]
async fn test_peer_close_detected_by_peek() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        drop(sock);
    });

    let mut conn = Connection::connect("127.0.0.1", port, options(2000))
        .await
        .unwrap();
    server.await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(conn.is_closed_by_peer().await);
}

#[tokio::test]
async fn test_open_connection_not_reported_closed() {
    let (listener, port) = listener().await;
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (_sock, _) = listener.accept().await.unwrap();
        let _ = rx.await;
    });

    let mut conn = Connection::connect("127.0.0.1", port, options(2000))
        .await
        .unwrap();
    assert!(!conn.is_closed_by_peer().await);
    tx.send(()).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_refused_connect() {
    let (listener, port) = listener().await;
    drop(listener);

    let err = Connection::connect("127.0.0.1", port, options(2000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Refused);
    assert_eq!(err.exit_code(), ExitCode::Incorrect);
}

#[tokio::test]
async fn test_oversized_command_refused() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let _ = listener.accept().await.unwrap();
    });

    let mut conn = Connection::connect("127.0.0.1", port, options(2000))
        .await
        .unwrap();
    let line = "X".repeat(MAX_LINE_LENGTH);
    let err = conn.write_command(&line).await.unwrap_err();
    assert!(matches!(err, Error::CommandTooLong(_)));
    assert!(conn.is_healthy());
    server.await.unwrap();
}

#[tokio::test]
async fn test_reconnect_resets_buffer() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut first, _) = listener.accept().await.unwrap();
        first.write_all(b"one\r\nleftover").await.unwrap();
        let (mut second, _) = listener.accept().await.unwrap();
        drop(first);
        second.write_all(b"two\r\n").await.unwrap();
    });

    let mut conn = Connection::connect("127.0.0.1", port, options(2000))
        .await
        .unwrap();
    assert_eq!(conn.read_line().await.unwrap().text(), "one");

    conn.reconnect().await.unwrap();
    assert_eq!(conn.line_buffer().bytes_buffered(), 0);
    assert_eq!(conn.read_line().await.unwrap().text(), "two");
    server.await.unwrap();
}
