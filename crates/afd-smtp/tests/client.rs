//! SMTP client tests against scripted loopback servers.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use afd_smtp::{Address, AuthType, Client, Error, ExitCode, SmtpConfig, SmtpConnection};

/// Server side of one accepted connection.
struct Peer<S> {
    io: BufReader<S>,
}

impl Peer<TcpStream> {
    async fn accept(listener: &TcpListener) -> Self {
        let (sock, _) = listener.accept().await.unwrap();
        Self {
            io: BufReader::new(sock),
        }
    }

    /// Runs the server side of the TLS handshake after a 220 to STARTTLS.
    async fn upgrade(self) -> Peer<tokio_rustls::server::TlsStream<TcpStream>> {
        assert!(self.io.buffer().is_empty(), "client pipelined past STARTTLS");
        let tls = acceptor().accept(self.io.into_inner()).await.unwrap();
        Peer {
            io: BufReader::new(tls),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Peer<S> {
    async fn line(&mut self) -> String {
        let mut line = String::new();
        let n = self.io.read_line(&mut line).await.unwrap();
        assert!(n > 0, "client closed the connection");
        assert!(line.ends_with("\r\n"), "line not CRLF terminated: {line:?}");
        line.truncate(line.len() - 2);
        line
    }

    async fn expect(&mut self, command: &str, reply: &str) {
        assert_eq!(self.line().await, command);
        self.send(reply).await;
    }

    /// Reads DATA content up to and including the terminating dot line.
    async fn data(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        loop {
            let mut line = Vec::new();
            let n = self.io.read_until(b'\n', &mut line).await.unwrap();
            assert!(n > 0, "client closed during DATA");
            data.extend_from_slice(&line);
            if line == b".\r\n" {
                return data;
            }
        }
    }

    async fn send(&mut self, reply: &str) {
        let io = self.io.get_mut();
        io.write_all(reply.as_bytes()).await.unwrap();
        io.flush().await.unwrap();
    }
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn config(port: u16) -> afd_smtp::SmtpConfigBuilder {
    SmtpConfig::builder("127.0.0.1")
        .port(port)
        .client_hostname("client.test")
        .transfer_timeout(Duration::from_secs(2))
}

fn acceptor() -> TlsAcceptor {
    let cert = CertificateDer::from(include_bytes!("data/cert.der").to_vec());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        include_bytes!("data/key.der").to_vec(),
    ));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

async fn greet<S: AsyncRead + AsyncWrite + Unpin>(peer: &mut Peer<S>, extensions: &[&str]) {
    peer.send("220 mx.test ESMTP ready\r\n").await;
    ehlo(peer, extensions).await;
}

async fn ehlo<S: AsyncRead + AsyncWrite + Unpin>(peer: &mut Peer<S>, extensions: &[&str]) {
    assert_eq!(peer.line().await, "EHLO client.test");
    if extensions.is_empty() {
        peer.send("250 mx.test\r\n").await;
        return;
    }
    let mut reply = String::from("250-mx.test greets client.test\r\n");
    for (i, ext) in extensions.iter().enumerate() {
        let sep = if i + 1 == extensions.len() { ' ' } else { '-' };
        reply.push_str(&format!("250{sep}{ext}\r\n"));
    }
    peer.send(&reply).await;
}

#[tokio::test]
async fn test_starttls_login_and_send() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        greet(&mut peer, &["STARTTLS", "AUTH LOGIN PLAIN"]).await;
        peer.expect("STARTTLS", "220 2.0.0 Ready to start TLS\r\n").await;
        let mut peer = peer.upgrade().await;
        ehlo(&mut peer, &["SIZE 1000000", "AUTH LOGIN PLAIN"]).await;
        peer.expect("AUTH LOGIN", "334 VXNlcm5hbWU6\r\n").await;
        peer.expect("YWxpY2U=", "334 UGFzc3dvcmQ6\r\n").await;
        peer.expect("cHc=", "235 2.7.0 Authentication successful\r\n").await;
        peer.expect("MAIL FROM:<a@x>", "250 OK\r\n").await;
        peer.expect("RCPT TO:<b@y>", "250 OK\r\n").await;
        peer.expect("DATA", "354 End data with <CR><LF>.<CR><LF>\r\n").await;
        assert_eq!(peer.data().await, b"Subject: hi\r\n\r\n..safe line\r\n.\r\n");
        peer.send("250 2.0.0 queued\r\n").await;
        peer.expect("QUIT", "221 2.0.0 Bye\r\n").await;
    });

    let config = config(port).starttls(true).build();
    let client = Client::connect(&config).await.unwrap();
    assert!(client.connection().tls_active());
    let caps = client.capabilities();
    assert!(caps.ssl_enabled);
    assert!(!caps.starttls, "capabilities must come from the second EHLO");
    assert!(caps.auth_login && caps.auth_plain);
    assert_eq!(client.server_info().max_message_size(), Some(1_000_000));

    let client = client.auth_login("alice", "pw").await.unwrap();
    let client = client.mail_from(Address::new("a@x").unwrap()).await.unwrap();
    let client = client.rcpt_to(Address::new("b@y").unwrap()).await.unwrap();
    let data = client.data().await.unwrap();
    let client = data
        .send_message(b"Subject: hi\r\n\r\n.safe line\r\n")
        .await
        .unwrap();
    client.quit().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_login_and_send() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        greet(&mut peer, &["SIZE 1000000", "AUTH LOGIN PLAIN"]).await;
        peer.expect("AUTH LOGIN", "334 VXNlcm5hbWU6\r\n").await;
        peer.expect("YWxpY2U=", "334 UGFzc3dvcmQ6\r\n").await;
        peer.expect("cHc=", "235 2.7.0 Authentication successful\r\n").await;
        peer.expect("MAIL FROM:<a@x>", "250 OK\r\n").await;
        peer.expect("RCPT TO:<b@y>", "250 OK\r\n").await;
        peer.expect("DATA", "354 End data with <CR><LF>.<CR><LF>\r\n").await;
        assert_eq!(peer.data().await, b"Subject: hi\r\n\r\n..safe line\r\n.\r\n");
        peer.send("250 2.0.0 queued as 42\r\n").await;
        peer.expect("QUIT", "221 2.0.0 Bye\r\n").await;
    });

    let client = Client::connect(&config(port).build()).await.unwrap();
    assert_eq!(client.server_info().hostname, "mx.test");
    let caps = client.capabilities();
    assert!(caps.auth_login && caps.auth_plain);
    assert!(!caps.starttls && !caps.ssl_enabled);
    assert_eq!(client.server_info().max_message_size(), Some(1_000_000));

    let client = client.auth_login("alice", "pw").await.unwrap();
    let client = client.mail_from(Address::new("a@x").unwrap()).await.unwrap();
    let client = client.rcpt_to(Address::new("b@y").unwrap()).await.unwrap();
    let data = client.data().await.unwrap();
    let client = data
        .send_message(b"Subject: hi\r\n\r\n.safe line\r\n")
        .await
        .unwrap();
    client.quit().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_auth_plain_and_streamed_body() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        greet(&mut peer, &["AUTH PLAIN"]).await;
        peer.expect("AUTH PLAIN AGFsaWNlAHB3", "235 ok\r\n").await;
        peer.expect("MAIL FROM:<a@x>", "250 OK\r\n").await;
        peer.expect("RCPT TO:<b@y>", "250 OK\r\n").await;
        peer.expect("RCPT TO:<c@y>", "251 forwarding\r\n").await;
        peer.expect("DATA", "354 go ahead\r\n").await;
        assert_eq!(
            peer.data().await,
            b"Subject: =?utf-8?B?R3LDvMOfZQ==?=\r\nline1\r\n..dot\r\ntail\r\n.\r\n"
        );
        peer.send("250 ok\r\n").await;
        peer.expect("MAIL FROM:<>", "250 OK\r\n").await;
        peer.expect("RSET", "250 flushed\r\n").await;
        peer.expect("NOOP", "250 ok\r\n").await;
        peer.expect("QUIT", "221 bye\r\n").await;
    });

    let config = config(port)
        .credentials("alice", "pw", AuthType::SmtpAuthPlain)
        .build();
    let client = Client::connect(&config).await.unwrap();
    let client = client
        .authenticate(config.credentials.as_ref().unwrap())
        .await
        .unwrap();
    let client = client.mail_from(Address::new("a@x").unwrap()).await.unwrap();
    let client = client.rcpt_to(Address::new("b@y").unwrap()).await.unwrap();
    let client = client.rcpt_to(Address::new("c@y").unwrap()).await.unwrap();
    let mut data = client.data().await.unwrap();
    data.write_subject("Grüße".as_bytes(), None).await.unwrap();
    data.write(b"line1\n.").await.unwrap();
    data.write(b"dot\n").await.unwrap();
    data.write(b"tail").await.unwrap();
    let client = data.finish().await.unwrap();

    let client = client.mail_from(Address::null()).await.unwrap();
    let mut client = client.reset().await.unwrap();
    client.noop().await.unwrap();
    client.quit().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_helo_fallback() {
    let (socket, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&socket).await;
        peer.send("220 old.test SMTP\r\n").await;
        peer.expect("EHLO client.test", "502 command not implemented\r\n").await;
        peer.expect("HELO client.test", "250 old.test\r\n").await;
    });

    let client = Client::connect(&config(port).build()).await.unwrap();
    assert!(client.server_info().extensions.is_empty());
    assert!(!client.capabilities().auth_login);
    let err = client.auth_login("alice", "pw").await.unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)), "{err}");
    server.await.unwrap();

    let (socket, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&socket).await;
        peer.send("220 old.test SMTP\r\n").await;
        peer.expect("EHLO client.test", "500 unrecognized\r\n").await;
        peer.expect("HELO client.test", "250 old.test\r\n").await;
        peer.expect("QUIT", "221 bye\r\n").await;
    });
    let client = Client::connect(&config(port).build()).await.unwrap();
    client.quit().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_rejected_banner() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.send("554-mx.test no service\r\n554 go away\r\n").await;
    });

    let err = Client::connect(&config(port).build()).await.unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::Reply(554));
    assert!(err.to_string().contains("go away"));
    assert!(err.is_permanent());
    server.await.unwrap();
}

#[tokio::test]
async fn test_rejected_recipient() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        greet(&mut peer, &[]).await;
        peer.expect("MAIL FROM:<a@x>", "250 OK\r\n").await;
        peer.expect("RCPT TO:<nobody@y>", "550 5.1.1 no such user\r\n").await;
    });

    let client = Client::connect(&config(port).build()).await.unwrap();
    let client = client.mail_from(Address::new("a@x").unwrap()).await.unwrap();
    let err = client
        .rcpt_to(Address::new("nobody@y").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::Reply(550));
    assert!(err.to_string().contains("no such user"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_starttls_refused() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        greet(&mut peer, &["STARTTLS", "AUTH LOGIN PLAIN"]).await;
        peer.expect("STARTTLS", "454 4.7.0 TLS not available\r\n").await;
    });

    let config = config(port).starttls(true).build();
    let err = Client::connect(&config).await.unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::Reply(454));
    assert!(err.is_transient());
    server.await.unwrap();
}

#[tokio::test]
async fn test_starttls_not_offered() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        greet(&mut peer, &["AUTH LOGIN"]).await;
    });

    let client = Client::connect(&config(port).build()).await.unwrap();
    let err = client.starttls().await.unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn test_auth_failure() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        greet(&mut peer, &["AUTH LOGIN"]).await;
        peer.expect("AUTH LOGIN", "334 VXNlcm5hbWU6\r\n").await;
        peer.expect("YWxpY2U=", "334 UGFzc3dvcmQ6\r\n").await;
        peer.expect("cHc=", "535 5.7.8 authentication failed\r\n").await;
    });

    let client = Client::connect(&config(port).build()).await.unwrap();
    let err = client.auth_login("alice", "pw").await.unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::Reply(535));
    server.await.unwrap();
}

#[tokio::test]
async fn test_quit_requires_closing_reply() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        greet(&mut peer, &[]).await;
        peer.expect("QUIT", "250 still here\r\n").await;
    });

    let client = Client::connect(&config(port).build()).await.unwrap();
    let err = client.quit().await.unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::Reply(250));
    server.await.unwrap();
}
