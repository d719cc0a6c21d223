//! HTTP client tests against scripted loopback servers.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use afd_auth::{Algorithm, AwsCredentials, AwsRequest};
use afd_http::{
    AuthType, Chunk, Credentials, Error, ExitCode, HttpClient, HttpConfig, Methods,
    ProtocolOptions,
};

/// Server side of one accepted connection.
struct Peer {
    io: BufReader<TcpStream>,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (sock, _) = listener.accept().await.unwrap();
        Self {
            io: BufReader::new(sock),
        }
    }

    /// Reads one request head, without the blank line.
    async fn request(&mut self) -> String {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            let n = self.io.read_line(&mut line).await.unwrap();
            assert!(n > 0, "client closed before completing a request");
            if line == "\r\n" {
                return head;
            }
            head.push_str(&line);
        }
    }

    async fn body(&mut self, len: usize) -> Vec<u8> {
        let mut body = vec![0; len];
        self.io.read_exact(&mut body).await.unwrap();
        body
    }

    async fn send(&mut self, data: &[u8]) {
        self.io.get_mut().write_all(data).await.unwrap();
    }
}

fn header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    request.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn config(port: u16) -> afd_http::HttpConfigBuilder {
    HttpConfig::builder("127.0.0.1")
        .port(port)
        .transfer_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_get_with_content_length() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let req = peer.request().await;
        assert!(req.starts_with("GET /data/obj.gz HTTP/1.1\r\n"));
        assert_eq!(header(&req, "Host"), Some(format!("127.0.0.1:{port}").as_str()));
        assert!(header(&req, "User-Agent").unwrap().starts_with("AFD/"));
        assert_eq!(header(&req, "Content-Length"), Some("0"));
        assert_eq!(header(&req, "Accept-Encoding"), Some("gzip"));
        assert_eq!(header(&req, "Range"), None);
        peer.send(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\nETag: \"v1\"\r\n\r\nhello world")
            .await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    let response = client.get("/data/", "obj.gz", 0, None).await.unwrap();
    assert_eq!(response.outcome, ExitCode::Success);
    assert_eq!(response.status, Some(200));
    assert_eq!(response.content_length, Some(11));
    assert_eq!(response.etag.as_deref(), Some("v1"));

    let mut buf = [0u8; 64];
    let mut body = Vec::new();
    loop {
        let n = client.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    assert_eq!(body, b"hello world");
    assert_eq!(client.connection().line_buffer().bytes_buffered(), 0);
    server.await.unwrap();
    client.quit().await;
}

#[tokio::test]
async fn test_range_not_satisfiable_retries_from_zero() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let req = peer.request().await;
        assert_eq!(header(&req, "Range"), Some("bytes=100-"));
        peer.send(b"HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\n\r\n")
            .await;

        let req = peer.request().await;
        assert_eq!(header(&req, "Range"), None);
        let mut reply = b"HTTP/1.1 200 OK\r\nContent-Length: 1024\r\n\r\n".to_vec();
        reply.extend(std::iter::repeat_n(b'x', 1024));
        peer.send(&reply).await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    let response = client.get("/", "large", 100, None).await.unwrap();
    assert_eq!(response.outcome, ExitCode::Success);
    assert_eq!(response.offset, 0);
    assert_eq!(response.content_length, Some(1024));
    let body = client.read_body(u64::MAX).await.unwrap();
    assert_eq!(body.len(), 1024);
    assert_eq!(client.state().retries, 1);
    server.await.unwrap();
}

#[tokio::test]
async fn test_put_with_expect_continue() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let req = peer.request().await;
        assert!(req.starts_with("PUT /b/x.txt HTTP/1.1\r\n"));
        assert_eq!(header(&req, "Content-Length"), Some("5"));
        assert_eq!(header(&req, "Expect"), Some("100-continue"));
        peer.send(b"HTTP/1.1 100 Continue\r\n\r\n").await;
        assert_eq!(peer.body(5).await, b"hello");
        peer.send(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n").await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    assert_eq!(client.put("/b/", "x.txt", 5).await.unwrap(), ExitCode::Success);
    client.write(b"hello").await.unwrap();
    let response = client.put_response().await.unwrap();
    assert_eq!(response.outcome, ExitCode::Success);
    assert_eq!(response.status, Some(201));
    server.await.unwrap();
}

#[tokio::test]
async fn test_put_without_expect() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let req = peer.request().await;
        assert_eq!(header(&req, "Expect"), None);
        assert_eq!(peer.body(3).await, b"abc");
        peer.send(b"HTTP/1.1 204 No Content\r\n\r\n").await;
    });

    let config = config(port).flag(ProtocolOptions::NO_EXPECT).build();
    let mut client = HttpClient::connect(config).await.unwrap();
    client.put("/", "f", 3).await.unwrap();
    client.write(b"abc").await.unwrap();
    assert_eq!(client.put_response().await.unwrap().status, Some(204));
    server.await.unwrap();
}

#[tokio::test]
async fn test_digest_challenge_and_retry() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let req = peer.request().await;
        assert_eq!(header(&req, "Authorization"), None);
        peer.send(
            b"HTTP/1.1 401 Unauthorized\r\n\
              WWW-Authenticate: Digest realm=\"R\", nonce=\"N\", algorithm=SHA-256, qop=\"auth\"\r\n\
              Content-Length: 0\r\n\r\n",
        )
        .await;

        let req = peer.request().await;
        let auth = header(&req, "Authorization").unwrap();
        let prefix = "Digest username=\"u\", realm=\"R\", nonce=\"N\", uri=\"/x\", qop=auth, nc=00000001, cnonce=\"";
        assert!(auth.starts_with(prefix), "{auth}");
        let cnonce = &auth[prefix.len()..prefix.len() + 16];
        assert!(cnonce.chars().all(|c| c.is_ascii_hexdigit()));

        let alg = Algorithm::Sha256;
        let a1 = alg.hash(b"u:R:p");
        let a2 = alg.hash(b"GET:/x");
        let expected = alg.hash(format!("{a1}:N:00000001:{cnonce}:auth:{a2}").as_bytes());
        assert!(auth.contains(&format!("response=\"{expected}\"")));
        assert!(auth.ends_with("algorithm=SHA-256"));
        peer.send(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    });

    let config = config(port)
        .credentials(Credentials::new("u", "p", AuthType::Digest))
        .build();
    let mut client = HttpClient::connect(config).await.unwrap();
    let response = client.get("/x", "", 0, None).await.unwrap();
    assert_eq!(response.status, Some(200));
    assert_eq!(client.state().nc(), 1);
    assert_eq!(client.state().realm(), Some("R"));
    server.await.unwrap();
}

const DIGEST_CHALLENGE: &[u8] = b"HTTP/1.1 401 Unauthorized\r\n\
    WWW-Authenticate: Digest realm=\"R\", nonce=\"N\", qop=\"auth\"\r\n\
    Content-Length: 0\r\n\r\n";

#[tokio::test]
async fn test_digest_count_restarts_after_reconnect() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut first = Peer::accept(&listener).await;
        first.request().await;
        first.send(DIGEST_CHALLENGE).await;
        let req = first.request().await;
        assert!(header(&req, "Authorization").unwrap().contains("nc=00000001"));
        first.send(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
        drop(first);

        let mut second = Peer::accept(&listener).await;
        let req = second.request().await;
        let auth = header(&req, "Authorization").unwrap();
        assert!(auth.starts_with("Digest "), "{auth}");
        assert!(auth.contains("nonce=\"N\""), "{auth}");
        assert!(auth.contains("nc=00000001"), "{auth}");
        second.send(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    });

    let config = config(port)
        .credentials(Credentials::new("u", "p", AuthType::Digest))
        .build();
    let mut client = HttpClient::connect(config).await.unwrap();
    client.get("/a", "", 0, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = client.get("/b", "", 0, None).await.unwrap();
    assert_eq!(response.status, Some(200));
    assert_eq!(client.state().nc(), 1);
    server.await.unwrap();
}

#[tokio::test]
async fn test_digest_nextnonce_used_for_next_request() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.request().await;
        peer.send(DIGEST_CHALLENGE).await;
        let req = peer.request().await;
        assert!(header(&req, "Authorization").unwrap().contains("nonce=\"N\""));
        peer.send(
            b"HTTP/1.1 200 OK\r\n\
              Authentication-Info: nextnonce=\"N2\", qop=auth\r\n\
              Content-Length: 0\r\n\r\n",
        )
        .await;

        let req = peer.request().await;
        let auth = header(&req, "Authorization").unwrap();
        assert!(auth.contains("nonce=\"N2\""), "{auth}");
        assert!(!auth.contains("nonce=\"N\""), "{auth}");
        peer.send(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    });

    let config = config(port)
        .credentials(Credentials::new("u", "p", AuthType::Digest))
        .build();
    let mut client = HttpClient::connect(config).await.unwrap();
    client.get("/a", "", 0, None).await.unwrap();
    assert_eq!(client.state().nonce(), Some("N2"));
    let response = client.get("/b", "", 0, None).await.unwrap();
    assert_eq!(response.status, Some(200));
    server.await.unwrap();
}

#[tokio::test]
async fn test_repeated_401_exhausts_authentication() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        for _ in 0..2 {
            let req = peer.request().await;
            assert!(header(&req, "Authorization").unwrap().starts_with("Basic "));
            peer.send(
                b"HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic realm=\"x\"\r\n\
                  Content-Length: 4\r\n\r\nnope",
            )
            .await;
        }
    });

    let config = config(port)
        .credentials(Credentials::new("u", "wrong", AuthType::Basic))
        .build();
    let mut client = HttpClient::connect(config).await.unwrap();
    let err = client.get("/", "f", 0, None).await.unwrap_err();
    assert!(matches!(err, Error::AuthExhausted(_)), "{err}");
    assert_eq!(err.kind(), afd_net::ErrorKind::AuthExhausted);
    server.await.unwrap();
}

#[tokio::test]
async fn test_aws4_list_request() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let req = peer.request().await;
        assert!(
            req.starts_with("GET /bucket/?list-type=2&max-keys=1000&prefix=dir%2F HTTP/1.1\r\n"),
            "{req}"
        );
        let host = header(&req, "Host").unwrap();
        let date = header(&req, "x-amz-date").unwrap();
        assert_eq!(
            header(&req, "x-amz-content-sha256"),
            Some(afd_auth::aws4::EMPTY_PAYLOAD_SHA256)
        );
        let expected = AwsRequest::new("GET", host, "/bucket/", "us-east-1")
            .with_query(vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
                ("prefix".to_string(), "dir/".to_string()),
            ])
            .sign_at(Some(&AwsCredentials::new("AKIAEXAMPLE", "SECRET")), date)
            .unwrap();
        assert_eq!(
            header(&req, "Authorization"),
            expected.authorization.as_deref()
        );

        let body = "<ListBucketResult><IsTruncated>true</IsTruncated>\
                    <NextContinuationToken>tok</NextContinuationToken>\
                    <Contents><Key>dir/a</Key><Size>3</Size></Contents></ListBucketResult>";
        peer.send(format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}", body.len()).as_bytes())
            .await;

        let req = peer.request().await;
        assert!(req.starts_with(
            "GET /bucket/?continuation-token=tok&list-type=2&max-keys=1000&prefix=dir%2F HTTP/1.1\r\n"
        ));
        let body = "<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>";
        peer.send(format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}", body.len()).as_bytes())
            .await;
    });

    let config = config(port)
        .credentials(Credentials::new("AKIAEXAMPLE", "SECRET", AuthType::Aws4HmacSha256))
        .flag(ProtocolOptions::BUCKETNAME_IS_IN_PATH)
        .flag(ProtocolOptions::NO_DELIMITER)
        .build();
    let mut client = HttpClient::connect(config).await.unwrap();
    let page = client.list_page("/bucket/dir/").await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].key, "dir/a");
    assert_eq!(client.state().marker.as_deref(), Some("tok"));
    assert!(client.state().authorization.as_deref().unwrap().starts_with("AWS4-HMAC-SHA256 "));

    let page = client.list_page("/bucket/dir/").await.unwrap();
    assert!(!page.is_truncated);
    assert_eq!(client.state().marker, None);
    server.await.unwrap();
}

#[tokio::test]
async fn test_chunked_body() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.request().await;
        peer.send(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: t\r\n\r\n",
        )
        .await;
        peer.request().await;
        peer.send(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n")
            .await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    let response = client.get("/", "c", 0, None).await.unwrap();
    assert_eq!(response.outcome, ExitCode::Chunked);
    let mut chunk = Vec::new();
    assert_eq!(client.chunk_read(&mut chunk).await.unwrap(), Chunk::Data(5));
    assert_eq!(chunk, b"hello");
    assert_eq!(client.chunk_read(&mut chunk).await.unwrap(), Chunk::Data(6));
    assert_eq!(chunk, b" world");
    let last = client.chunk_read(&mut chunk).await.unwrap();
    assert_eq!(last.exit_code(), ExitCode::HttpLastChunk);

    client.get("/", "empty", 0, None).await.unwrap();
    assert_eq!(client.chunk_read(&mut chunk).await.unwrap(), Chunk::Last);
    assert!(chunk.is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn test_connection_close_reopens() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut first = Peer::accept(&listener).await;
        first.request().await;
        first
            .send(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
            .await;
        drop(first);
        let mut second = Peer::accept(&listener).await;
        second.request().await;
        second.send(b"HTTP/1.1 204 No Content\r\n\r\n").await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    client.get("/", "", 0, None).await.unwrap();
    assert!(client.state().close);
    assert_eq!(
        client.check_connection().await.unwrap(),
        ExitCode::ConnectionReopened
    );
    assert_eq!(client.get("/", "", 0, None).await.unwrap().status, Some(204));
    server.await.unwrap();
}

#[tokio::test]
async fn test_silently_closed_connection_is_retried() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut first = Peer::accept(&listener).await;
        first.request().await;
        first.send(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
        drop(first);
        let mut second = Peer::accept(&listener).await;
        second.request().await;
        second.send(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    client.get("/", "", 0, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = client.get("/", "f", 0, None).await.unwrap();
    assert_eq!(response.content_length, Some(2));
    assert_eq!(client.read_body(16).await.unwrap(), b"ok");
    server.await.unwrap();
}

#[tokio::test]
async fn test_not_found_drains_s3_error() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.request().await;
        let body = "<Error><Code>NoSuchKey</Code><Message>gone</Message></Error>";
        peer.send(
            format!(
                "HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            )
            .as_bytes(),
        )
        .await;
        let req = peer.request().await;
        assert!(req.starts_with("DELETE /a HTTP/1.1"));
        peer.send(b"HTTP/1.1 204 No Content\r\n\r\n").await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    let err = client.get("/", "missing", 0, None).await.unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::Reply(404));
    assert!(err.to_string().contains("NoSuchKey: gone"), "{err}");
    client.delete("/", "a").await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_head_then_get_length_agrees() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let req = peer.request().await;
        assert!(req.starts_with("HEAD /d/f HTTP/1.1"));
        peer.send(
            b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\
              Last-Modified: Sun, 06 Nov 1994 08:49:37 GMT\r\n\r\n",
        )
        .await;
        peer.request().await;
        peer.send(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\n1234567").await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    let head = client.head("/d/", "f").await.unwrap();
    assert_eq!(head.content_length, Some(7));
    assert_eq!(head.mtime(), Some(784_111_777));
    client.get("/d/", "f", 0, None).await.unwrap();
    let body = client.read_body(u64::MAX).await.unwrap();
    assert_eq!(Some(body.len() as u64), head.content_length);
    server.await.unwrap();
}

#[tokio::test]
async fn test_unsupported_head_is_remembered() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.request().await;
        peer.send(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n")
            .await;
        let req = peer.request().await;
        assert!(req.starts_with("OPTIONS /d/ HTTP/1.1"));
        peer.send(b"HTTP/1.1 200 OK\r\nAllow: GET, PUT\r\nContent-Length: 0\r\n\r\n")
            .await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    let first = client.head("/d/", "f").await.unwrap();
    assert_eq!(first.status, None);
    assert!(client.state().not_working.contains(Methods::HEAD));
    let noop = client.noop().await.unwrap();
    assert_eq!(noop.status, None);
    let options = client.options("/d/").await.unwrap();
    assert!(options.allow.contains(Methods::GET | Methods::PUT));
    server.await.unwrap();
}

#[tokio::test]
async fn test_not_modified_with_etag() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let req = peer.request().await;
        assert_eq!(header(&req, "If-None-Match"), Some("\"abc\""));
        peer.send(b"HTTP/1.1 304 Not Modified\r\n\r\n").await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    let response = client.get("/", "f", 0, Some("abc")).await.unwrap();
    assert_eq!(response.outcome, ExitCode::NothingToFetch);
    server.await.unwrap();
}

#[tokio::test]
async fn test_empty_body_with_filename_is_nothing_to_fetch() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.request().await;
        peer.send(
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\
              Content-Disposition: attachment; filename=\"report.csv\"\r\n\r\n",
        )
        .await;
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    let response = client.get("/", "f", 0, None).await.unwrap();
    assert_eq!(response.outcome, ExitCode::NothingToFetch);
    assert_eq!(response.filename.as_deref(), Some("report.csv"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_proxy_uses_absolute_form() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let req = peer.request().await;
        assert!(req.starts_with("GET http://origin.example/data/f HTTP/1.1\r\n"), "{req}");
        assert_eq!(header(&req, "Host"), Some("origin.example"));
        peer.send(b"HTTP/1.1 204 No Content\r\n\r\n").await;
    });

    let config = HttpConfig::builder("origin.example")
        .proxy("127.0.0.1", port)
        .transfer_timeout(Duration::from_secs(2))
        .build();
    let mut client = HttpClient::connect(config).await.unwrap();
    client.get("/data/", "f", 0, None).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_oversized_header_line_then_resync() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut first = Peer::accept(&listener).await;
        first.request().await;
        let mut reply = b"HTTP/1.1 200 OK\r\nX-Big: ".to_vec();
        reply.extend(std::iter::repeat_n(b'a', 40 * 1024));
        reply.extend_from_slice(b"\r\n\r\n");
        first.send(&reply).await;

        let mut second = Peer::accept(&listener).await;
        second.request().await;
        second.send(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
        drop(first);
    });

    let mut client = HttpClient::connect(config(port).build()).await.unwrap();
    let err = client.get("/", "f", 0, None).await.unwrap_err();
    assert!(matches!(err, Error::Net(afd_net::Error::LineTooLong(_))), "{err}");
    assert_eq!(err.exit_code(), ExitCode::Incorrect);

    client.get("/", "f", 0, None).await.unwrap();
    assert_eq!(client.read_body(16).await.unwrap(), b"ok");
    server.await.unwrap();
}
