//! Stream transport helpers shared by server and client
//!
//! Wraps a byte stream with a read buffer so that line reads, byte reads and
//! marker-terminated reads can be mixed without losing bytes that arrived
//! past the end of a message. Timed reads treat an elapsed timeout as the end
//! of the message, not as an error.

use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

const READ_CHUNK: usize = 4096;

/// Buffered message transport
pub struct Transport<S = TcpStream> {
    stream: S,
    buf: BytesMut,
    peer: Option<SocketAddr>,
}

impl Transport<TcpStream> {
    /// Open a TCP connection to `host:port`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the host cannot be resolved or reached.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to {}:{}: {}", host, port, e)))?;
        debug!(event = "transport_connected", host, port, "Connected");
        Ok(Self::from_tcp(stream))
    }

    /// Wrap an accepted TCP stream
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let mut transport = Self::new(stream);
        transport.peer = peer;
        transport
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream` with an empty read buffer
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            peer: None,
        }
    }

    /// Remote address, known for TCP streams only
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Send all of `data`
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    /// Send a text message
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub async fn send_str(&mut self, text: &str) -> Result<()> {
        self.send(text.as_bytes()).await
    }

    /// Flush and shut down the write half
    ///
    /// # Errors
    ///
    /// Propagates shutdown failures.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Whatever is buffered, or the result of one read
    ///
    /// An empty result means the peer closed the connection.
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub async fn recv(&mut self) -> Result<Bytes> {
        if self.buf.is_empty() {
            self.fill().await?;
        }
        Ok(self.buf.split().freeze())
    }

    /// Read a single byte, `None` at end of stream
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub async fn recv_byte(&mut self) -> Result<Option<u8>> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.get_u8()))
    }

    /// Read one LF-terminated line with trailing CR/LF removed
    ///
    /// Lines longer than `max_len` are split. A final unterminated line is
    /// returned as-is; `None` means the stream ended with nothing buffered.
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub async fn recv_line(&mut self, max_len: usize) -> Result<Option<String>> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(scanned + pos + 1);
                return Ok(Some(trim_line(&line)));
            }
            scanned = self.buf.len();

            if self.buf.len() >= max_len {
                let line = self.buf.split_to(max_len);
                return Ok(Some(trim_line(&line)));
            }

            if self.fill().await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = self.buf.split();
                return Ok(Some(trim_line(&line)));
            }
        }
    }

    /// Read until `marker` has been received (inclusive)
    ///
    /// Stops early, returning what was buffered, when `wait` passes without
    /// new data, the peer closes, or `limit` bytes are buffered.
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub async fn recv_until(&mut self, marker: &[u8], wait: Duration, limit: usize) -> Result<Bytes> {
        let mut scanned: usize = 0;
        self.recv_frame(wait, limit, |buf| {
            let start = scanned.saturating_sub(marker.len().saturating_sub(1));
            let found = find_bytes(&buf[start..], marker).map(|pos| start + pos + marker.len());
            scanned = buf.len();
            found
        })
        .await
    }

    /// Read until `frame_end` reports the end offset of a complete frame
    ///
    /// `frame_end` is called with the buffered bytes after every read. Stops
    /// early under the same conditions as [`Transport::recv_until`].
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub async fn recv_frame<F>(&mut self, wait: Duration, limit: usize, mut frame_end: F) -> Result<Bytes>
    where
        F: FnMut(&[u8]) -> Option<usize>,
    {
        loop {
            if let Some(end) = frame_end(&self.buf[..]) {
                let end = end.min(self.buf.len());
                return Ok(self.buf.split_to(end).freeze());
            }

            if self.buf.len() >= limit {
                debug!(event = "read_limit_reached", limit, "Message exceeds read limit");
                return Ok(self.buf.split_to(limit).freeze());
            }

            match timeout(wait, self.fill()).await {
                Ok(Ok(0)) => return Ok(self.buf.split().freeze()),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    trace!(event = "read_timeout", buffered = self.buf.len(), "Read timed out");
                    return Ok(self.buf.split().freeze());
                }
            }
        }
    }

    /// Drop the next `len` bytes of input
    ///
    /// Returns how many bytes were dropped, which is less than `len` only if
    /// the peer closes or `wait` passes without data.
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub async fn discard(&mut self, len: usize, wait: Duration) -> Result<usize> {
        let mut remaining = len;
        loop {
            let step = remaining.min(self.buf.len());
            self.buf.advance(step);
            remaining -= step;
            if remaining == 0 {
                return Ok(len);
            }

            match timeout(wait, self.fill()).await {
                Ok(Ok(0)) | Err(_) => return Ok(len - remaining),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    /// Read until EOF, timeout or `limit`
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub async fn recv_all(&mut self, wait: Duration, limit: usize) -> Result<Bytes> {
        self.recv_frame(wait, limit, |_| None).await
    }

    async fn fill(&mut self) -> Result<usize> {
        self.buf.reserve(READ_CHUNK);
        let n = self.stream.read_buf(&mut self.buf).await?;
        Ok(n)
    }
}

/// Position of the first occurrence of `needle` in `haystack`
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn trim_line(line: &[u8]) -> String {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    String::from_utf8_lossy(&line[..end]).into_owned()
}
