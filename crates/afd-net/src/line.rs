//! Line reassembly over a byte stream.
//!
//! Replies are CRLF-terminated lines that may arrive split across reads or
//! bundled with the start of a message body. [`LineBuffer`] keeps the bytes
//! after the last returned line so a subsequent line or body read consumes
//! them before touching the socket again.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

/// Capacity of a connection's line buffer.
pub const LINE_BUFFER_CAPACITY: usize = 32 * 1024;

/// Fixed-capacity carry buffer for line-oriented reads.
///
/// `bytes_buffered` counts the bytes held, `bytes_read` how many of them
/// were already handed out; `bytes_buffered >= bytes_read` always holds.
pub struct LineBuffer {
    buf: Box<[u8]>,
    bytes_buffered: usize,
    bytes_read: usize,
}

impl std::fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineBuffer")
            .field("capacity", &self.buf.len())
            .field("bytes_buffered", &self.bytes_buffered)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a successful line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line content without the terminating `\n` (and `\r`).
    pub bytes: Vec<u8>,
    /// Bytes held in the buffer when the line was found.
    pub buffered: usize,
}

impl Line {
    /// Returns the line as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Returns the line length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for an empty line (end of a header block).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl LineBuffer {
    /// Creates a buffer with [`LINE_BUFFER_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(LINE_BUFFER_CAPACITY)
    }

    /// Creates a buffer with a custom capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            bytes_buffered: 0,
            bytes_read: 0,
        }
    }

    /// Returns the buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns the number of bytes held.
    #[must_use]
    pub const fn bytes_buffered(&self) -> usize {
        self.bytes_buffered
    }

    /// Returns the number of held bytes already consumed.
    #[must_use]
    pub const fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Returns the bytes received but not yet consumed.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.bytes_read..self.bytes_buffered]
    }

    /// Discards everything held.
    pub const fn reset(&mut self) {
        self.bytes_buffered = 0;
        self.bytes_read = 0;
    }

    /// Copies pending bytes into `out`, returning how many were copied.
    pub fn take(&mut self, out: &mut [u8]) -> usize {
        let n = self.pending().len().min(out.len());
        out[..n].copy_from_slice(&self.buf[self.bytes_read..self.bytes_read + n]);
        self.consume(n);
        n
    }

    fn consume(&mut self, n: usize) {
        self.bytes_read += n;
        if self.bytes_read >= self.bytes_buffered {
            self.reset();
        }
    }

    /// Moves pending bytes to the start of the buffer.
    fn compact(&mut self) {
        if self.bytes_read > 0 {
            self.buf.copy_within(self.bytes_read..self.bytes_buffered, 0);
            self.bytes_buffered -= self.bytes_read;
            self.bytes_read = 0;
        }
    }

    /// Returns the next complete line, reading from `reader` as needed.
    ///
    /// # Errors
    ///
    /// - [`Error::RemoteHangup`] if the peer closes before a line completes.
    /// - [`Error::LineTooLong`] if no `\n` fits into the buffer; the buffer
    ///   is discarded so the next exchange starts clean.
    /// - [`Error::Timeout`] if a read exceeds `timeout`.
    pub async fn read_line<R>(&mut self, reader: &mut R, timeout: Duration) -> Result<Line>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(line) = self.next_line() {
                return Ok(line);
            }
            self.compact();
            if self.bytes_buffered == self.buf.len() {
                let capacity = self.buf.len();
                self.reset();
                return Err(Error::LineTooLong(capacity));
            }
            let n = self.fill(reader, timeout).await?;
            if n == 0 {
                return Err(Error::RemoteHangup);
            }
        }
    }

    /// Reads once from `reader` into the free space.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or the underlying I/O error.
    pub async fn fill<R>(&mut self, reader: &mut R, timeout: Duration) -> Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        let spare = &mut self.buf[self.bytes_buffered..];
        let n = match tokio::time::timeout(timeout, reader.read(spare)).await {
            Err(_) => return Err(Error::Timeout(timeout)),
            Ok(result) => result?,
        };
        self.bytes_buffered += n;
        Ok(n)
    }

    fn next_line(&mut self) -> Option<Line> {
        let pending = self.pending();
        let nl = pending.iter().position(|&b| b == b'\n')?;
        let mut end = nl;
        if end > 0 && pending[end - 1] == b'\r' {
            end -= 1;
        }
        let line = Line {
            bytes: pending[..end].to_vec(),
            buffered: self.bytes_buffered,
        };
        self.consume(nl + 1);
        Some(line)
    }
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
    use tokio_test::io::Builder;

    const T: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let mut mock = Builder::new().read(b"HTTP/1.1 2").read(b"00 OK\r\nHost").build();
        let mut buffer = LineBuffer::new();
        let line = buffer.read_line(&mut mock, T).await.unwrap();
        assert_eq!(line.text(), "HTTP/1.1 200 OK");
        assert_eq!(buffer.pending(), b"Host");
    }

    #[tokio::test]
    async fn test_residue_kept_for_next_call() {
        let mut mock = Builder::new().read(b"220 ready\r\n250 ok\r\nbody").build();
        let mut buffer = LineBuffer::new();
        let first = buffer.read_line(&mut mock, T).await.unwrap();
        assert_eq!(first.text(), "220 ready");
        assert_eq!(first.buffered, 23);
        let second = buffer.read_line(&mut mock, T).await.unwrap();
        assert_eq!(second.text(), "250 ok");
        assert_eq!(buffer.bytes_buffered() - buffer.bytes_read(), 4);
        let mut out = [0u8; 16];
        assert_eq!(buffer.take(&mut out), 4);
        assert_eq!(&out[..4], b"body");
        assert_eq!(buffer.bytes_buffered(), 0);
    }

    #[tokio::test]
    async fn test_bare_newline_accepted() {
        let mut mock = Builder::new().read(b"one\ntwo\r\n").build();
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.read_line(&mut mock, T).await.unwrap().text(), "one");
        assert_eq!(buffer.read_line(&mut mock, T).await.unwrap().text(), "two");
    }

    #[tokio::test]
    async fn test_empty_line() {
        let mut mock = Builder::new().read(b"\r\n").build();
        let mut buffer = LineBuffer::new();
        let line = buffer.read_line(&mut mock, T).await.unwrap();
        assert!(line.is_empty());
    }

    #[tokio::test]
    async fn test_hangup() {
        let mut mock = Builder::new().read(b"partial").build();
        let mut buffer = LineBuffer::new();
        let err = buffer.read_line(&mut mock, T).await.unwrap_err();
        assert!(matches!(err, Error::RemoteHangup));
    }

    #[tokio::test]
    async fn test_line_too_long_resets_buffer() {
        let mut mock = Builder::new().read(&[b'x'; 8]).build();
        let mut buffer = LineBuffer::with_capacity(8);
        let err = buffer.read_line(&mut mock, T).await.unwrap_err();
        assert!(matches!(err, Error::LineTooLong(8)));
        assert_eq!(buffer.bytes_buffered(), 0);
    }

    #[tokio::test]
    async fn test_compaction_makes_room() {
        let mut mock = Builder::new().read(b"abc\r\nde").read(b"fgh\r\n").build();
        let mut buffer = LineBuffer::with_capacity(10);
        assert_eq!(buffer.read_line(&mut mock, T).await.unwrap().text(), "abc");
        assert_eq!(buffer.read_line(&mut mock, T).await.unwrap().text(), "defgh");
    }
}
