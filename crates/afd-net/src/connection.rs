//! A session with one remote endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::{ConnectOptions, Protocol};
use crate::error::{classify_read_error, classify_write_error};
use crate::line::{Line, LineBuffer};
use crate::tls::{self, TlsInfo, TlsSettings};
use crate::trace::{Direction, Tracer};
use crate::transport::{self, NetStream};
use crate::{Error, Result};

/// Longest command line (including CRLF) that will be sent.
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// A connected transport plus its line buffer and health flags.
///
/// The connection is owned by one task at a time. Every failed read or
/// write records why it failed; after a timeout or reset the connection
/// must be closed, and [`Connection::shutdown`] skips the TLS close_notify
/// exchange in that case.
pub struct Connection {
    host: String,
    port: u16,
    peer: SocketAddr,
    options: ConnectOptions,
    stream: Option<NetStream>,
    line_buf: LineBuffer,
    tls_info: Option<TlsInfo>,
    timed_out: bool,
    reset: bool,
    hung_up: bool,
    close_after_response: bool,
    tracer: Tracer,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("peer", &self.peer)
            .field("protocol", &self.options.protocol)
            .field("tls", &self.tls_info)
            .field("open", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connects to `host:port`, negotiating TLS first if `options.tls` is set.
    ///
    /// # Errors
    ///
    /// Returns the transport or TLS error that prevented the session.
    pub async fn connect(host: &str, port: u16, options: ConnectOptions) -> Result<Self> {
        let (tcp, peer) = transport::connect_tcp(host, port, &options).await?;
        tracing::info!(host, port, %peer, protocol = %options.protocol, "connected");

        let mut conn = Self {
            host: host.to_string(),
            port,
            peer,
            tracer: Tracer::new(host, options.debug_level),
            options,
            stream: Some(NetStream::Plain(tcp)),
            line_buf: LineBuffer::new(),
            tls_info: None,
            timed_out: false,
            reset: false,
            hung_up: false,
            close_after_response: false,
        };
        if conn.options.tls {
            conn.start_tls().await?;
        }
        Ok(conn)
    }

    /// Closes the current transport and connects again with the same options.
    ///
    /// The line buffer and all health flags are reset.
    ///
    /// # Errors
    ///
    /// Returns the error of the new connect attempt.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.shutdown().await;
        let (tcp, peer) = transport::connect_tcp(&self.host, self.port, &self.options).await?;
        tracing::info!(host = %self.host, port = self.port, %peer, "reconnected");
        self.peer = peer;
        self.stream = Some(NetStream::Plain(tcp));
        self.line_buf.reset();
        self.tls_info = None;
        self.timed_out = false;
        self.reset = false;
        self.hung_up = false;
        self.close_after_response = false;
        if self.options.tls {
            self.start_tls().await?;
        }
        Ok(())
    }

    /// Upgrades the plaintext transport to TLS.
    ///
    /// Pending buffered bytes are discarded; after STARTTLS the server must
    /// not have sent anything past its 220 reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if TLS is already active, otherwise
    /// the handshake error.
    pub async fn start_tls(&mut self) -> Result<TlsInfo> {
        let tcp = match self.stream.take() {
            Some(NetStream::Plain(tcp)) => tcp,
            Some(tls @ NetStream::Tls(_)) => {
                self.stream = Some(tls);
                return Err(Error::InvalidState("TLS is already active".to_string()));
            }
            None => return Err(closed()),
        };
        let config = self.tls_config()?;
        let sni = self.host.clone();
        match tls::handshake(tcp, &sni, config, self.options.transfer_timeout).await {
            Ok((stream, info)) => {
                self.stream = Some(NetStream::Tls(Box::new(stream)));
                self.line_buf.reset();
                self.tls_info = Some(info.clone());
                Ok(info)
            }
            Err(err) => {
                self.note(&err);
                Err(err)
            }
        }
    }

    fn tls_config(&self) -> Result<Arc<ClientConfig>> {
        if let Some(config) = &self.options.tls_config {
            return Ok(Arc::clone(config));
        }
        tls::shared_client_config(&TlsSettings::from_options(&self.options))
    }

    /// Reads the next line, trailing CR/LF removed.
    ///
    /// # Errors
    ///
    /// Timeout, reset, hangup or [`Error::LineTooLong`].
    pub async fn read_line(&mut self) -> Result<Line> {
        let timeout = self.options.transfer_timeout;
        let stream = self.stream.as_mut().ok_or_else(closed)?;
        let result = self.line_buf.read_line(stream, timeout).await;
        match result.map_err(|e| reclassify_read(e, &self.host)) {
            Ok(line) => {
                self.tracer.line(Direction::Read, &line.text());
                Ok(line)
            }
            Err(err) => {
                self.note(&err);
                Err(err)
            }
        }
    }

    /// Reads body bytes into `buf`, draining buffered residue first.
    ///
    /// Returns the number of bytes placed into `buf`; never zero for a
    /// non-empty `buf`.
    ///
    /// # Errors
    ///
    /// [`Error::RemoteHangup`] if the peer closed the connection, or a
    /// timeout/I/O error.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let carried = self.line_buf.take(buf);
        if carried > 0 {
            self.tracer.bytes(Direction::BinRead, carried);
            return Ok(carried);
        }
        let timeout = self.options.transfer_timeout;
        let stream = self.stream.as_mut().ok_or_else(closed)?;
        let result = match tokio::time::timeout(timeout, stream.read(buf)).await {
            Err(_) => Err(Error::Timeout(timeout)),
            Ok(Err(e)) => Err(classify_read_error(e, &self.host)),
            Ok(Ok(0)) => Err(Error::RemoteHangup),
            Ok(Ok(n)) => Ok(n),
        };
        match result {
            Ok(n) => {
                self.tracer.bytes(Direction::BinRead, n);
                Ok(n)
            }
            Err(err) => {
                self.note(&err);
                Err(err)
            }
        }
    }

    /// Fills `buf` completely.
    ///
    /// # Errors
    ///
    /// As [`Connection::read`].
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read(&mut buf[filled..]).await?;
        }
        Ok(())
    }

    /// Writes raw body bytes.
    ///
    /// # Errors
    ///
    /// Timeout or reset.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.send(bytes).await?;
        self.tracer.bytes(Direction::BinWrite, bytes.len());
        Ok(())
    }

    /// Sends one command line, appending CRLF.
    ///
    /// # Errors
    ///
    /// [`Error::CommandTooLong`] if the line would exceed
    /// [`MAX_LINE_LENGTH`], otherwise the write error.
    pub async fn write_command(&mut self, command: &str) -> Result<()> {
        let wire = frame_command(command)?;
        self.tracer.line(Direction::Write, command);
        self.send(wire.as_bytes()).await
    }

    /// Sends one command line that must not appear in traces.
    ///
    /// # Errors
    ///
    /// As [`Connection::write_command`].
    pub async fn write_secret(&mut self, command: &str) -> Result<()> {
        let wire = frame_command(command)?;
        self.tracer.secret(Direction::Write);
        self.send(wire.as_bytes()).await
    }

    /// Sends a complete CRLF-delimited header block in a single write,
    /// tracing each line.
    ///
    /// # Errors
    ///
    /// [`Error::CommandTooLong`] if any line exceeds [`MAX_LINE_LENGTH`],
    /// otherwise the write error.
    pub async fn write_block(&mut self, block: &str) -> Result<()> {
        for line in block.split("\r\n").filter(|l| !l.is_empty()) {
            if line.len() + 2 > MAX_LINE_LENGTH {
                return Err(Error::CommandTooLong(line.len() + 2));
            }
            self.tracer.line(Direction::Write, line);
        }
        self.tracer.dump("request", block);
        self.send(block.as_bytes()).await
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let timeout = self.options.transfer_timeout;
        let stream = self.stream.as_mut().ok_or_else(closed)?;
        let io = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        let result = match tokio::time::timeout(timeout, io).await {
            Err(_) => Err(Error::Timeout(timeout)),
            Ok(Err(e)) => Err(classify_write_error(e, &self.host)),
            Ok(Ok(())) => Ok(()),
        };
        if let Err(err) = &result {
            self.note(err);
        }
        result
    }

    fn note(&mut self, err: &Error) {
        match err {
            Error::Timeout(after) => {
                tracing::warn!(host = %self.host, ?after, "transfer timeout reached");
                self.timed_out = true;
            }
            Error::ConnectionReset(_) => self.reset = true,
            Error::RemoteHangup => {
                tracing::debug!(host = %self.host, "remote hangup");
                self.hung_up = true;
            }
            _ => {}
        }
    }

    /// Returns true if the peer has closed its end.
    ///
    /// Performs a non-blocking peek; pending data means the connection is
    /// still usable.
    pub async fn is_closed_by_peer(&mut self) -> bool {
        if self.timed_out || self.reset || self.hung_up {
            return true;
        }
        if !self.line_buf.pending().is_empty() {
            return false;
        }
        let Some(stream) = self.stream.as_ref() else {
            return true;
        };
        let mut probe = [0u8; 1];
        match tokio::time::timeout(Duration::ZERO, stream.tcp().peek(&mut probe)).await {
            Ok(Ok(0) | Err(_)) => true,
            Ok(Ok(_)) | Err(_) => false,
        }
    }

    /// Shuts the transport down and drops it.
    ///
    /// TLS close_notify is sent only if the connection is healthy; errors
    /// are logged and otherwise ignored.
    pub async fn shutdown(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        if self.timed_out || self.reset {
            tracing::debug!(host = %self.host, "skipping orderly shutdown of broken connection");
            return;
        }
        let timeout = self.options.transfer_timeout;
        match tokio::time::timeout(timeout, stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::debug!(host = %self.host, error = %err, "shutdown failed"),
            Err(_) => tracing::debug!(host = %self.host, "shutdown timed out"),
        }
    }

    /// Shuts down and releases the connection.
    pub async fn close(mut self) {
        self.shutdown().await;
        tracing::debug!(host = %self.host, lines = self.tracer.lines(), "connection closed");
    }

    /// Returns the logical hostname.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the logical port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the address actually dialed.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the protocol spoken on this connection.
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.options.protocol
    }

    /// Returns the options the connection was opened with.
    #[must_use]
    pub const fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Returns true if the transport is TLS-encrypted.
    #[must_use]
    pub fn tls_active(&self) -> bool {
        self.stream.as_ref().is_some_and(NetStream::is_tls)
    }

    /// Returns the negotiated TLS parameters.
    #[must_use]
    pub const fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls_info.as_ref()
    }

    /// Returns true after a read or write timed out.
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Returns true after a reset or broken pipe.
    #[must_use]
    pub const fn was_reset(&self) -> bool {
        self.reset
    }

    /// Returns true after the peer closed the connection.
    #[must_use]
    pub const fn hung_up(&self) -> bool {
        self.hung_up
    }

    /// Returns true if neither a timeout nor a reset was seen, i.e. a
    /// quit exchange is still meaningful.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        !self.timed_out && !self.reset && self.stream.is_some()
    }

    /// Returns true if the peer announced it will close after this response.
    #[must_use]
    pub const fn close_after_response(&self) -> bool {
        self.close_after_response
    }

    /// Records whether the peer announced `Connection: close`.
    pub const fn set_close_after_response(&mut self, close: bool) {
        self.close_after_response = close;
    }

    /// Returns the line buffer.
    #[must_use]
    pub const fn line_buffer(&self) -> &LineBuffer {
        &self.line_buf
    }

    /// Discards buffered residue.
    pub const fn discard_buffered(&mut self) {
        self.line_buf.reset();
    }

    /// Returns the transfer timeout.
    #[must_use]
    pub const fn transfer_timeout(&self) -> Duration {
        self.options.transfer_timeout
    }

    /// Returns the trace debug level.
    #[must_use]
    pub const fn debug_level(&self) -> u8 {
        self.options.debug_level
    }

    /// Dumps text to the trace when the debug level is raised.
    pub fn trace_dump(&self, label: &str, text: &str) {
        self.tracer.dump(label, text);
    }
}

/// Appends CRLF to a command, refusing oversized lines.
pub(crate) fn frame_command(command: &str) -> Result<String> {
    let len = command.len() + 2;
    if len > MAX_LINE_LENGTH {
        return Err(Error::CommandTooLong(len));
    }
    let mut wire = String::with_capacity(len);
    wire.push_str(command);
    wire.push_str("\r\n");
    Ok(wire)
}

fn reclassify_read(err: Error, host: &str) -> Error {
    match err {
        Error::Io(io) => classify_read_error(io, host),
        other => other,
    }
}

fn closed() -> Error {
    Error::InvalidState("connection is closed".to_string())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_command() {
        assert_eq!(frame_command("NOOP").unwrap(), "NOOP\r\n");
    }

    #[test]
    fn test_frame_command_limit() {
        let ok = "A".repeat(MAX_LINE_LENGTH - 2);
        assert!(frame_command(&ok).is_ok());
        let too_long = "A".repeat(MAX_LINE_LENGTH - 1);
        assert!(matches!(
            frame_command(&too_long),
            Err(Error::CommandTooLong(n)) if n == MAX_LINE_LENGTH + 1
        ));
    }
}
