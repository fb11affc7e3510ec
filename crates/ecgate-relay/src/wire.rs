//! Line codec shared by both relay hops.
//!
//! # Wire format
//!
//! ```text
//! REQUEST:  <VERB>[ <parameter>]\n
//! REPLY:    +<PARAMETER> <value>\n      success, named
//!           +<text>\n                   success, unnamed
//!           -<reason>\n                 failure
//! ```
//!
//! On the mover hop the raw payload follows the `SIZE` line on the same
//! stream.

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{RelayError, Result};
use crate::BUFFER_SIZE;

/// Parse one reply line.
///
/// With `expected` set, the line must be `+<expected> <value>` and the value
/// is returned; a `+MESSAGE <text>` in its place is a rejection carrying the
/// text. Without `expected`, the text after `+` is returned.
///
/// # Errors
///
/// Returns `RelayError::Rejected` for a `-` line, `UnexpectedParameter` for
/// another named reply and `BadFormat` for anything else.
pub fn parse_reply(line: &str, expected: Option<&str>) -> Result<String> {
    let message = line.trim();
    if let Some(text) = message.strip_prefix('+') {
        let Some(expected) = expected else {
            return Ok(text.to_string());
        };
        let lower = text.to_ascii_lowercase();
        if !lower.starts_with(&expected.to_ascii_lowercase()) {
            if lower.starts_with("message ") {
                return Err(RelayError::Rejected(text[8..].to_string()));
            }
            return Err(RelayError::UnexpectedParameter {
                expected: expected.to_string(),
                got: text.to_string(),
            });
        }
        return Ok(text[expected.len()..].trim().to_string());
    }
    if let Some(reason) = message.strip_prefix('-') {
        return Err(RelayError::Rejected(reason.to_string()));
    }
    Err(RelayError::BadFormat(message.to_string()))
}

/// A line-oriented connection.
pub struct Wire<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    reply_timeout: Duration,
}

impl Wire<OwnedReadHalf, OwnedWriteHalf> {
    /// Connect to `addr` within `timeout`; replies are awaited for as long.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Timeout` or the connection error.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(RelayError::Timeout),
        };
        tracing::debug!(%addr, "connected");
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, timeout))
    }
}

impl<R, W> Wire<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap an already established stream pair.
    pub fn new(reader: R, writer: W, reply_timeout: Duration) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, reader),
            writer: BufWriter::with_capacity(BUFFER_SIZE, writer),
            reply_timeout,
        }
    }

    /// Send one line.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub async fn send(&mut self, line: &str) -> Result<()> {
        tracing::trace!(line, "sending");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send `<name> <value>` when a value is present.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub async fn send_opt(&mut self, name: &str, value: Option<impl Display>) -> Result<()> {
        match value {
            Some(value) => self.send(&format!("{name} {value}")).await,
            None => Ok(()),
        }
    }

    /// Next line without its terminator, `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Timeout` or the socket error.
    pub async fn recv_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = match tokio::time::timeout(self.reply_timeout, self.reader.read_line(&mut line)).await {
            Ok(read) => read?,
            Err(_) => return Err(RelayError::Timeout),
        };
        if read == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        tracing::trace!(line = %line, "received");
        Ok(Some(line))
    }

    /// Next reply, parsed with [`parse_reply`].
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ConnectionClosed` at end of stream or the parse
    /// error.
    pub async fn expect(&mut self, expected: Option<&str>) -> Result<String> {
        let line = self.recv_line().await?.ok_or(RelayError::ConnectionClosed)?;
        parse_reply(&line, expected)
    }

    /// Stream `source` as raw bytes; returns the byte count.
    ///
    /// # Errors
    ///
    /// Returns the read or write error.
    pub async fn send_payload<P: AsyncRead + Unpin>(&mut self, source: &mut P) -> Result<u64> {
        let sent = tokio::io::copy(source, &mut self.writer).await?;
        self.writer.flush().await?;
        Ok(sent)
    }

    /// Receive a raw payload into `sink`: exactly `size` bytes, or up to end
    /// of stream when the size is unknown. Returns the byte count.
    ///
    /// # Errors
    ///
    /// Returns the read or write error.
    pub async fn recv_payload<D: AsyncWrite + Unpin>(
        &mut self,
        size: Option<u64>,
        sink: &mut D,
    ) -> Result<u64> {
        let received = match size {
            Some(size) => tokio::io::copy(&mut (&mut self.reader).take(size), sink).await?,
            None => tokio::io::copy(&mut self.reader, sink).await?,
        };
        sink.flush().await?;
        Ok(received)
    }

    /// Close the send side.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
