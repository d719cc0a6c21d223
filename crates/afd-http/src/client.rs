//! HTTP/1.1 client session.

use afd_auth::aws4::{self, EMPTY_PAYLOAD_SHA256, UNSIGNED_PAYLOAD};
use afd_auth::{AuthType, AwsCredentials, AwsRequest, ListVersion, WwwAuthenticate, basic};
use afd_net::{Connection, ErrorKind, ExitCode, ProtocolOptions};
use chrono::{DateTime, Utc};

use crate::config::HttpConfig;
use crate::header::{self, Methods, StatusLine};
use crate::s3::{self, ListPage};
use crate::state::HttpMessageState;
use crate::{Error, Result};

/// Largest error body drained to keep the connection in sync.
pub const DRAIN_LIMIT: u64 = 64 * 1024;

/// Largest chunk accepted from a chunked body.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`.
    Get,
    /// `PUT`.
    Put,
    /// `HEAD`.
    Head,
    /// `DELETE`.
    Delete,
    /// `OPTIONS`.
    Options,
}

impl Method {
    /// Returns the method token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Head => "HEAD",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }

    const fn as_methods(self) -> Methods {
        match self {
            Self::Get => Methods::GET,
            Self::Put => Methods::PUT,
            Self::Head => Methods::HEAD,
            Self::Delete => Methods::DELETE,
            Self::Options => Methods::OPTIONS,
        }
    }
}

/// Outcome of one operation plus the response fields the caller needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Final status code; `None` if no request was sent.
    pub status: Option<u16>,
    /// Caller-visible outcome.
    pub outcome: ExitCode,
    /// `Content-Length`, ignored when chunked.
    pub content_length: Option<u64>,
    /// Body uses chunked transfer encoding.
    pub chunked: bool,
    /// Byte offset the body starts at.
    pub offset: u64,
    /// Entity tag without quotes.
    pub etag: Option<String>,
    /// Entity tag is weak.
    pub weak_etag: bool,
    /// `Last-Modified`.
    pub last_modified: Option<DateTime<Utc>>,
    /// `Date`.
    pub date: Option<DateTime<Utc>>,
    /// Methods from `Allow`.
    pub allow: Methods,
    /// Safe filename from `Content-Disposition`.
    pub filename: Option<String>,
}

impl Response {
    fn skipped() -> Self {
        Self {
            status: None,
            outcome: ExitCode::Success,
            content_length: None,
            chunked: false,
            offset: 0,
            etag: None,
            weak_etag: false,
            last_modified: None,
            date: None,
            allow: Methods::NONE,
            filename: None,
        }
    }

    /// Returns the last-modified time as UNIX seconds.
    #[must_use]
    pub fn mtime(&self) -> Option<i64> {
        self.last_modified.map(|t| t.timestamp())
    }
}

/// One chunk read from a chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// A data chunk of this many bytes.
    Data(usize),
    /// The terminating zero-size chunk.
    Last,
}

impl Chunk {
    /// Returns the caller-visible outcome.
    #[must_use]
    pub const fn exit_code(self) -> ExitCode {
        match self {
            Self::Data(_) => ExitCode::Success,
            Self::Last => ExitCode::HttpLastChunk,
        }
    }
}

struct Request<'a> {
    method: Method,
    path: &'a str,
    query: Vec<(String, String)>,
    content_length: u64,
    offset: u64,
    etag: Option<&'a str>,
    expect_continue: bool,
    gzip: bool,
}

impl<'a> Request<'a> {
    const fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            query: Vec::new(),
            content_length: 0,
            offset: 0,
            etag: None,
            expect_continue: false,
            gzip: false,
        }
    }
}

/// HTTP/1.1 client over one keep-alive connection.
///
/// Requests are strictly sequential. A response body must be consumed
/// with [`HttpClient::read`] or [`HttpClient::chunk_read`] before the next
/// request; otherwise the connection is reopened.
#[derive(Debug)]
pub struct HttpClient {
    conn: Connection,
    config: HttpConfig,
    state: HttpMessageState,
    last_path: String,
    early_reply: Option<StatusLine>,
}

impl HttpClient {
    /// Connects to the configured host (or proxy).
    ///
    /// # Errors
    ///
    /// Returns the transport or TLS error.
    pub async fn connect(config: HttpConfig) -> Result<Self> {
        let conn = Connection::connect(&config.host, config.port, config.connect_options()).await?;
        Ok(Self {
            conn,
            config,
            state: HttpMessageState::new(),
            last_path: "/".to_string(),
            early_reply: None,
        })
    }

    /// Returns the session state.
    #[must_use]
    pub const fn state(&self) -> &HttpMessageState {
        &self.state
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Returns the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Reopens the connection if the server asked to close it, the peer
    /// hung up, or the previous body was not consumed.
    ///
    /// # Errors
    ///
    /// Returns the reconnect error.
    pub async fn check_connection(&mut self) -> Result<ExitCode> {
        let reason = if self.state.close || self.conn.close_after_response() {
            Some("server requested close")
        } else if self.state.body_pending {
            Some("previous body not consumed")
        } else if self.conn.is_closed_by_peer().await {
            Some("closed by peer")
        } else {
            None
        };
        match reason {
            Some(reason) => {
                self.reopen(reason).await?;
                Ok(ExitCode::ConnectionReopened)
            }
            None => Ok(ExitCode::Success),
        }
    }

    async fn reopen(&mut self, reason: &str) -> Result<()> {
        tracing::info!(host = %self.config.host, reason, "reopening connection");
        self.conn.reconnect().await?;
        self.state.connection_reopened();
        self.early_reply = None;
        Ok(())
    }

    /// Sends `GET path+filename`, optionally resuming at `offset` and
    /// conditional on `etag`.
    ///
    /// On success the body is read with [`HttpClient::read`] (or
    /// [`HttpClient::chunk_read`] when the outcome is
    /// [`ExitCode::Chunked`]). A 416 on a resumed request is retried once
    /// from offset zero; the returned `offset` tells where the body starts.
    ///
    /// # Errors
    ///
    /// [`Error::Status`] for 403, 404 and other failures after draining the
    /// body; [`Error::AuthExhausted`] after a repeated 401.
    pub async fn get(
        &mut self,
        path: &str,
        filename: &str,
        offset: u64,
        etag: Option<&str>,
    ) -> Result<Response> {
        let target = join_path(path, filename);
        self.last_path = path.to_string();
        let mut offset = offset;
        let mut range_retried = false;
        loop {
            let mut req = Request::new(Method::Get, &target);
            req.offset = offset;
            req.etag = etag;
            req.gzip = filename.ends_with(".gz");
            let status = self.exchange(&req).await?;
            match status.code {
                200 | 206 => {
                    let effective = if status.code == 200 { 0 } else { offset };
                    let outcome = if self.state.chunked {
                        ExitCode::Chunked
                    } else if self.state.content_length == Some(0) && !filename.is_empty() {
                        ExitCode::NothingToFetch
                    } else {
                        ExitCode::Success
                    };
                    self.begin_body();
                    return Ok(self.response(&status, outcome, effective));
                }
                204 => return Ok(self.response(&status, ExitCode::Success, offset)),
                304 => return Ok(self.response(&status, ExitCode::NothingToFetch, offset)),
                416 if offset > 0 && !range_retried => {
                    tracing::info!(%target, offset, "range not satisfiable, retrying from start");
                    self.drain_body(Method::Get, &status).await?;
                    offset = 0;
                    range_retried = true;
                    self.state.retries += 1;
                }
                _ => return Err(self.failure(Method::Get, &status).await),
            }
        }
    }

    /// Reads body bytes of the current response.
    ///
    /// Bytes already buffered behind the headers are returned first.
    /// Returns 0 once the body is complete.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] for chunked bodies, otherwise the transport
    /// error.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.state.body_pending || buf.is_empty() {
            return Ok(0);
        }
        if self.state.chunked {
            return Err(Error::InvalidState(
                "chunked body must be read with chunk_read".to_string(),
            ));
        }
        let limit = match self.state.body_remaining {
            Some(0) => {
                self.state.body_pending = false;
                return Ok(0);
            }
            Some(remaining) => usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len())),
            None => buf.len(),
        };
        match self.conn.read(&mut buf[..limit]).await {
            Ok(n) => {
                if let Some(remaining) = self.state.body_remaining.as_mut() {
                    *remaining = remaining.saturating_sub(to_u64(n));
                    if *remaining == 0 {
                        self.state.body_pending = false;
                    }
                }
                Ok(n)
            }
            Err(afd_net::Error::RemoteHangup) if self.state.body_remaining.is_none() => {
                self.state.body_pending = false;
                self.conn.set_close_after_response(true);
                Ok(0)
            }
            Err(err) => {
                self.conn.set_close_after_response(true);
                Err(err.into())
            }
        }
    }

    /// Reads the next chunk of a chunked body into `chunk`, resizing it to
    /// the chunk length.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] for a bad size line or missing chunk CRLF,
    /// [`Error::InvalidState`] if the body is not chunked.
    pub async fn chunk_read(&mut self, chunk: &mut Vec<u8>) -> Result<Chunk> {
        if !self.state.chunked {
            return Err(Error::InvalidState("body is not chunked".to_string()));
        }
        if !self.state.body_pending {
            chunk.clear();
            return Ok(Chunk::Last);
        }
        let result = self.next_chunk(chunk).await;
        if result.is_err() {
            self.conn.set_close_after_response(true);
        }
        result
    }

    async fn next_chunk(&mut self, chunk: &mut Vec<u8>) -> Result<Chunk> {
        let line = self.conn.read_line().await?;
        let size = parse_chunk_size(&line.text())?;
        if size == 0 {
            loop {
                if self.conn.read_line().await?.is_empty() {
                    break;
                }
            }
            self.state.body_pending = false;
            chunk.clear();
            return Ok(Chunk::Last);
        }
        chunk.resize(size + 2, 0);
        self.conn.read_exact(chunk).await?;
        if &chunk[size..] != b"\r\n" {
            return Err(Error::malformed("chunk not terminated by CRLF"));
        }
        chunk.truncate(size);
        Ok(Chunk::Data(size))
    }

    /// Sends the headers of `PUT path+filename` with a body of `size`
    /// bytes. The body follows with [`HttpClient::write`], the reply with
    /// [`HttpClient::put_response`].
    ///
    /// Unless [`ProtocolOptions::NO_EXPECT`] is set, `Expect: 100-continue`
    /// is sent and the 100 reply awaited; an early 200/201/204 is accepted.
    ///
    /// # Errors
    ///
    /// [`Error::Status`] if the server rejects the request before the
    /// body.
    pub async fn put(&mut self, path: &str, filename: &str, size: u64) -> Result<ExitCode> {
        let target = join_path(path, filename);
        self.last_path = path.to_string();
        self.early_reply = None;
        let mut req = Request::new(Method::Put, &target);
        req.content_length = size;
        req.expect_continue = !self.config.has(ProtocolOptions::NO_EXPECT);
        if !req.expect_continue {
            self.send_with_retry(&req).await?;
            return Ok(ExitCode::Success);
        }
        let status = self.exchange(&req).await?;
        match status.code {
            100 => Ok(ExitCode::Success),
            200 | 201 | 204 => {
                tracing::debug!(code = status.code, "early final reply to PUT");
                self.drain_body(Method::Put, &status).await?;
                self.early_reply = Some(status);
                Ok(ExitCode::Success)
            }
            _ => Err(self.failure(Method::Put, &status).await),
        }
    }

    /// Writes body bytes of the current PUT.
    ///
    /// # Errors
    ///
    /// Timeout or reset.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.conn.write(bytes).await?;
        Ok(())
    }

    /// Reads the final reply to a PUT.
    ///
    /// # Errors
    ///
    /// [`Error::Status`] for anything but 200, 201 and 204.
    pub async fn put_response(&mut self) -> Result<Response> {
        if let Some(status) = self.early_reply.take() {
            return Ok(self.response(&status, ExitCode::Success, 0));
        }
        let status = self.read_head(false).await?;
        match status.code {
            200 | 201 | 204 => {
                self.drain_body(Method::Put, &status).await?;
                Ok(self.response(&status, ExitCode::Success, 0))
            }
            _ => Err(self.failure(Method::Put, &status).await),
        }
    }

    /// Sends `HEAD path+filename` and returns the size and metadata.
    ///
    /// If the server answers 400, 403, 405 or 501, HEAD is recorded as not
    /// working and this and later calls succeed without a request.
    ///
    /// # Errors
    ///
    /// [`Error::Status`] for other failures.
    pub async fn head(&mut self, path: &str, filename: &str) -> Result<Response> {
        let target = join_path(path, filename);
        self.last_path = path.to_string();
        self.probe(Method::Head, &target, &[200, 206]).await
    }

    /// Sends `DELETE path+filename`.
    ///
    /// # Errors
    ///
    /// [`Error::Status`] for anything but 200 and 204.
    pub async fn delete(&mut self, path: &str, filename: &str) -> Result<Response> {
        let target = join_path(path, filename);
        self.last_path = path.to_string();
        let status = self.exchange(&Request::new(Method::Delete, &target)).await?;
        match status.code {
            200 | 204 => {
                self.drain_body(Method::Delete, &status).await?;
                Ok(self.response(&status, ExitCode::Success, 0))
            }
            _ => Err(self.failure(Method::Delete, &status).await),
        }
    }

    /// Sends `OPTIONS path` and returns the `Allow` set.
    ///
    /// Unsupported OPTIONS is remembered like unsupported HEAD.
    ///
    /// # Errors
    ///
    /// [`Error::Status`] for unexpected failures.
    pub async fn options(&mut self, path: &str) -> Result<Response> {
        self.probe(Method::Options, path, &[200]).await
    }

    /// Checks the session with a HEAD on the bucket root of the last path.
    ///
    /// # Errors
    ///
    /// As [`HttpClient::head`].
    pub async fn noop(&mut self) -> Result<Response> {
        let root = s3::bucket_root(&self.last_path, self.bucket_in_path());
        self.probe(Method::Head, &root, &[200, 206]).await
    }

    async fn probe(&mut self, method: Method, target: &str, ok: &[u16]) -> Result<Response> {
        if self.state.not_working.contains(method.as_methods()) {
            tracing::debug!(method = method.as_str(), "method not supported by server, skipping");
            return Ok(Response::skipped());
        }
        let status = self.exchange(&Request::new(method, target)).await?;
        if ok.contains(&status.code) {
            self.drain_body(method, &status).await?;
            return Ok(self.response(&status, ExitCode::Success, 0));
        }
        if matches!(status.code, 400 | 403 | 405 | 501) {
            tracing::info!(
                method = method.as_str(),
                code = status.code,
                "server does not support method, disabling it"
            );
            self.drain_body(method, &status).await?;
            self.state.not_working.insert(method.as_methods());
            return Ok(Response::skipped());
        }
        Err(self.failure(method, &status).await)
    }

    /// Requests one S3 LIST page for `path` using the stored marker.
    ///
    /// The XML body is read like a GET body; [`HttpClient::list_page`]
    /// reads and decodes it in one step.
    ///
    /// # Errors
    ///
    /// [`Error::Status`] if the listing is refused.
    pub async fn list(&mut self, path: &str) -> Result<Response> {
        self.last_path = path.to_string();
        let (root, query) = s3::list_request(
            path,
            self.bucket_in_path(),
            self.config.listobject_version,
            self.state.marker.as_deref(),
            !self.config.has(ProtocolOptions::NO_DELIMITER),
        );
        let mut req = Request::new(Method::Get, &root);
        req.query = query.params();
        let status = self.exchange(&req).await?;
        if status.code != 200 {
            return Err(self.failure(Method::Get, &status).await);
        }
        let outcome = if self.state.chunked {
            ExitCode::Chunked
        } else {
            ExitCode::Success
        };
        self.begin_body();
        Ok(self.response(&status, outcome, 0))
    }

    /// Requests, reads and decodes one LIST page, then stores the next
    /// marker.
    ///
    /// # Errors
    ///
    /// As [`HttpClient::list`], or [`Error::Malformed`] for a bad body.
    pub async fn list_page(&mut self, path: &str) -> Result<ListPage> {
        self.list(path).await?;
        let body = self.read_body(u64::MAX).await?;
        let page = s3::parse_list_page(&String::from_utf8_lossy(&body), self.list_version())?;
        self.set_marker(page.next_marker.clone());
        Ok(page)
    }

    /// Sets the paging cursor for the next LIST request.
    pub fn set_marker(&mut self, marker: Option<String>) {
        self.state.marker = marker;
    }

    /// Reads the rest of the current body into memory, up to `limit`
    /// bytes.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if the body exceeds `limit`, otherwise the
    /// read error.
    pub async fn read_body(&mut self, limit: u64) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        if self.state.chunked {
            let mut chunk = Vec::new();
            while let Chunk::Data(_) = self.chunk_read(&mut chunk).await? {
                body.extend_from_slice(&chunk);
                if to_u64(body.len()) > limit {
                    self.conn.set_close_after_response(true);
                    return Err(Error::malformed("body exceeds limit"));
                }
            }
        } else {
            let mut buf = [0u8; 8192];
            loop {
                let n = self.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buf[..n]);
                if to_u64(body.len()) > limit {
                    self.conn.set_close_after_response(true);
                    return Err(Error::malformed("body exceeds limit"));
                }
            }
        }
        Ok(body)
    }

    /// Closes the session.
    pub async fn quit(self) {
        tracing::debug!(host = %self.config.host, retries = self.state.retries, "quit");
        self.conn.close().await;
    }

    const fn bucket_in_path(&self) -> bool {
        self.config.has(ProtocolOptions::BUCKETNAME_IS_IN_PATH)
    }

    const fn list_version(&self) -> ListVersion {
        self.config.listobject_version
    }

    /// Sends a request and reads the final (or 100) reply, handling one
    /// reconnect and one authentication retry.
    async fn exchange(&mut self, req: &Request<'_>) -> Result<StatusLine> {
        let mut auth_retried = false;
        let mut reopened = false;
        loop {
            self.check_connection().await?;
            let result = match self.send_request(req).await {
                Ok(()) => self.read_head(req.expect_continue).await,
                Err(err) => Err(err),
            };
            let status = match result {
                Err(err) if !reopened && is_stale_connection(&err) => {
                    tracing::info!(host = %self.config.host, error = %err, "retrying on a new connection");
                    reopened = true;
                    self.state.retries += 1;
                    self.reopen("connection lost").await?;
                    continue;
                }
                other => other?,
            };
            if status.code != 401 {
                return Ok(status);
            }
            self.drain_body(req.method, &status).await?;
            if auth_retried || !self.can_answer_challenge() {
                return Err(Error::AuthExhausted(format!(
                    "{} {} rejected: {status}",
                    req.method.as_str(),
                    req.path
                )));
            }
            tracing::debug!(scheme = ?self.state.www_authenticate, "answering authentication challenge");
            auth_retried = true;
            self.state.retries += 1;
        }
    }

    /// Sends a request without waiting for a reply, reconnecting once if
    /// the connection turns out to be dead.
    async fn send_with_retry(&mut self, req: &Request<'_>) -> Result<()> {
        self.check_connection().await?;
        match self.send_request(req).await {
            Err(err) if is_stale_connection(&err) => {
                tracing::info!(host = %self.config.host, error = %err, "retrying on a new connection");
                self.state.retries += 1;
                self.reopen("connection lost").await?;
                self.send_request(req).await
            }
            other => other,
        }
    }

    fn can_answer_challenge(&self) -> bool {
        let creds = &self.config.credentials;
        if !creds.is_present() || creds.auth_type.is_aws() {
            return false;
        }
        match self.state.www_authenticate {
            WwwAuthenticate::Unknown => false,
            WwwAuthenticate::Basic => true,
            _ => self.state.digest.is_some(),
        }
    }

    fn request_target(&self, req: &Request<'_>) -> (String, String) {
        let mut origin = if req.path.is_empty() {
            "/".to_string()
        } else {
            aws4::uri_encode(req.path, false)
        };
        if !origin.starts_with('/') {
            origin.insert(0, '/');
        }
        if !req.query.is_empty() {
            origin.push('?');
            origin.push_str(&aws4::canonical_query(&req.query));
        }
        let wire = if self.config.proxy.is_some() {
            let scheme = if self.config.tls { "https" } else { "http" };
            format!("{scheme}://{}{origin}", self.config.host_header())
        } else {
            origin.clone()
        };
        (origin, wire)
    }

    fn authorization(&mut self, req: &Request<'_>, uri: &str) -> Result<String> {
        let creds = &self.config.credentials;
        if creds.auth_type.is_aws() {
            let payload = if req.method == Method::Put {
                UNSIGNED_PAYLOAD
            } else {
                EMPTY_PAYLOAD_SHA256
            };
            let keys = (creds.auth_type == AuthType::Aws4HmacSha256)
                .then(|| AwsCredentials::new(&creds.user, &creds.passwd));
            let path = if req.path.starts_with('/') {
                req.path.to_string()
            } else {
                format!("/{}", req.path)
            };
            let signed = AwsRequest::new(
                req.method.as_str(),
                &self.config.host_header(),
                &path,
                &self.config.region,
            )
            .with_service(self.config.service.clone())
            .with_query(req.query.clone())
            .with_payload_hash(payload)
            .sign(keys.as_ref(), Utc::now())?;
            self.state.authorization = signed.authorization.clone();
            return Ok(signed.header_lines());
        }
        if !creds.is_present() {
            return Ok(String::new());
        }
        if self.state.www_authenticate.is_digest() {
            if let Some(digest) = self.state.digest.as_mut() {
                let body = (req.content_length == 0).then_some(&[][..]);
                let value = digest.authorize(
                    &creds.user,
                    &creds.passwd,
                    req.method.as_str(),
                    uri,
                    body,
                    self.config.digest,
                )?;
                let line = format!("Authorization: {value}\r\n");
                self.state.authorization = Some(value);
                return Ok(line);
            }
        }
        if creds.auth_type == AuthType::Basic || self.state.www_authenticate == WwwAuthenticate::Basic
        {
            if self.state.basic.is_none() {
                self.state.basic = Some(basic::authorization_value(&creds.user, &creds.passwd)?);
            }
            let value = self.state.basic.clone().unwrap_or_default();
            let line = format!("Authorization: {value}\r\n");
            self.state.authorization = Some(value);
            return Ok(line);
        }
        Ok(String::new())
    }

    async fn send_request(&mut self, req: &Request<'_>) -> Result<()> {
        let (origin, wire) = self.request_target(req);
        let auth = self.authorization(req, &origin)?;
        let mut head = format!(
            "{} {wire} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nContent-Length: {}\r\n",
            req.method.as_str(),
            self.config.host_header(),
            self.config.user_agent,
            req.content_length
        );
        head.push_str(&auth);
        if req.offset > 0 {
            head.push_str(&format!("Range: bytes={}-\r\n", req.offset));
        }
        if let Some(etag) = req.etag {
            head.push_str(&format!("If-None-Match: \"{etag}\"\r\n"));
        }
        if req.expect_continue {
            head.push_str("Expect: 100-continue\r\n");
        }
        if req.gzip {
            head.push_str("Accept-Encoding: gzip\r\n");
        }
        head.push_str("\r\n");
        self.conn.write_block(&head).await?;
        Ok(())
    }

    /// Reads a status line and its headers. 1xx replies are skipped unless
    /// `want_continue` is set and the code is 100.
    async fn read_head(&mut self, want_continue: bool) -> Result<StatusLine> {
        let result = self.read_head_inner(want_continue).await;
        if result.is_err() {
            self.conn.set_close_after_response(true);
        }
        result
    }

    async fn read_head_inner(&mut self, want_continue: bool) -> Result<StatusLine> {
        loop {
            self.state.begin_response();
            let line = self.conn.read_line().await?;
            let status = StatusLine::parse(&line.text())?;
            self.read_headers().await?;
            if self.state.close {
                self.conn.set_close_after_response(true);
            }
            if status.is_informational() && !(want_continue && status.code == 100) {
                tracing::debug!(code = status.code, "skipping informational reply");
                continue;
            }
            return Ok(status);
        }
    }

    async fn read_headers(&mut self) -> Result<()> {
        let mut malformed = None;
        let mut dump = String::new();
        loop {
            let line = self.conn.read_line().await?;
            if line.is_empty() {
                break;
            }
            let text = line.text();
            if self.conn.debug_level() > 0 {
                dump.push_str(&afd_net::trace::redact(&text));
                dump.push('\n');
            }
            if let Err(err) = header::apply(&mut self.state, &text) {
                tracing::warn!(error = %err, "malformed header line");
                malformed.get_or_insert(err);
            }
        }
        if !dump.is_empty() {
            self.conn.trace_dump("response headers", &dump);
        }
        malformed.map_or(Ok(()), Err)
    }

    fn begin_body(&mut self) {
        self.state.body_remaining = self.state.body_length();
        self.state.body_pending = self.state.chunked || self.state.body_remaining != Some(0);
        if !self.state.chunked && self.state.body_remaining.is_none() {
            self.conn.set_close_after_response(true);
        }
    }

    /// Consumes the body of a response the caller does not want, so the
    /// connection stays usable. Returns the body text if it was read.
    async fn drain_body(&mut self, method: Method, status: &StatusLine) -> Result<Option<String>> {
        if method == Method::Head || matches!(status.code, 100..=199 | 204 | 304) {
            return Ok(None);
        }
        if !self.state.chunked {
            match self.state.content_length {
                Some(0) => return Ok(None),
                Some(n) if n <= DRAIN_LIMIT => {}
                _ => {
                    self.conn.set_close_after_response(true);
                    return Ok(None);
                }
            }
        }
        self.begin_body();
        let body = self.read_body(DRAIN_LIMIT).await?;
        Ok(Some(String::from_utf8_lossy(&body).into_owned()))
    }

    async fn failure(&mut self, method: Method, status: &StatusLine) -> Error {
        let mut message = status.reason.clone();
        match self.drain_body(method, status).await {
            Ok(Some(body)) => {
                if let Some(s3) = s3::parse_error(&body) {
                    message = format!("{message} ({}: {})", s3.code, s3.message);
                }
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(error = %err, "failed to drain error body"),
        }
        tracing::warn!(
            host = %self.config.host,
            method = method.as_str(),
            code = status.code,
            %message,
            "request failed"
        );
        Error::Status {
            method: method.as_str(),
            code: status.code,
            message,
        }
    }

    fn response(&self, status: &StatusLine, outcome: ExitCode, offset: u64) -> Response {
        Response {
            status: Some(status.code),
            outcome,
            content_length: self.state.content_length,
            chunked: self.state.chunked,
            offset,
            etag: self.state.etag.clone(),
            weak_etag: self.state.weak_etag,
            last_modified: self.state.last_modified,
            date: self.state.date,
            allow: self.state.allow,
            filename: self.state.filename.clone(),
        }
    }
}

fn is_stale_connection(err: &Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset | ErrorKind::RemoteHangup
    )
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Joins a directory path and a filename with exactly one `/`.
#[must_use]
pub fn join_path(path: &str, filename: &str) -> String {
    let mut out = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if !filename.is_empty() {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(filename.trim_start_matches('/'));
    }
    out
}

/// Parses a chunk size line, ignoring chunk extensions.
///
/// # Errors
///
/// [`Error::Malformed`] if the size is not hex or too large.
pub fn parse_chunk_size(line: &str) -> Result<usize> {
    let digits = line.split(';').next().unwrap_or_default().trim();
    let size = usize::from_str_radix(digits, 16)
        .map_err(|_| Error::malformed(format!("bad chunk size line: {line}")))?;
    if size > MAX_CHUNK_SIZE {
        return Err(Error::malformed(format!("chunk of {size} bytes too large")));
    }
    Ok(size)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/data/", "obj.gz"), "/data/obj.gz");
        assert_eq!(join_path("/data", "obj.gz"), "/data/obj.gz");
        assert_eq!(join_path("data", ""), "/data");
        assert_eq!(join_path("/", "/x"), "/x");
    }

    #[test]
    fn test_chunk_size() {
        assert_eq!(parse_chunk_size("1a").unwrap(), 26);
        assert_eq!(parse_chunk_size("0").unwrap(), 0);
        assert_eq!(parse_chunk_size("FF;name=value").unwrap(), 255);
        assert!(parse_chunk_size("").is_err());
        assert!(parse_chunk_size("xyz").is_err());
        assert!(parse_chunk_size("ffffffff").is_err());
    }

    #[test]
    fn test_chunk_exit_codes() {
        assert_eq!(Chunk::Last.exit_code(), ExitCode::HttpLastChunk);
        assert_eq!(Chunk::Data(3).exit_code(), ExitCode::Success);
    }

    proptest::proptest! {
        #[test]
        fn prop_chunk_size_hex(size in 0usize..=MAX_CHUNK_SIZE, ext in "(;[a-z]{1,8}(=[a-z0-9]{1,8})?)?") {
            proptest::prop_assert_eq!(parse_chunk_size(&format!("{size:x}{ext}")).unwrap(), size);
            proptest::prop_assert_eq!(parse_chunk_size(&format!("{size:X}")).unwrap(), size);
        }

        #[test]
        fn prop_join_path_single_slash(dir in "(/[a-z]{1,5}){0,3}/?", file in "[a-z]{1,8}") {
            let joined = join_path(&dir, &file);
            proptest::prop_assert!(joined.starts_with('/'));
            let suffix = format!("/{file}");
            proptest::prop_assert!(joined.ends_with(&suffix));
            proptest::prop_assert!(!joined.contains("//"));
        }
    }
}
